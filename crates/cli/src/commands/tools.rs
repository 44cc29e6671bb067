//! `codeloop tools` lists the registered tools.

use codeloop_core::TodoList;

use crate::host;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = host::load_config()?;
    let workspace = host::open_workspace(&config)?;
    let registry = host::registry(&config, &workspace, TodoList::shared());

    let mut defs = registry.definitions();
    defs.sort_by(|a, b| a.name.cmp(&b.name));
    println!("{} tools available in {}:\n", defs.len(), workspace.root().display());
    for def in defs {
        println!("  {}", def.name);
        println!("      {}", def.description.lines().next().unwrap_or_default());
    }
    Ok(())
}
