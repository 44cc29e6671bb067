//! `codeloop repl` reads goals line by line, sharing Task Memory between them.

use codeloop_core::TaskOutcome;

use crate::host::Host;
use crate::input::LineInput;
use crate::progress;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let input = LineInput::stdin();
    let mut host = Host::build(&input)?;

    println!();
    println!("  codeloop");
    println!("{}", host.banner());
    if let Some(warning) = host.provider_warning().await {
        println!("{warning}");
    }
    println!();
    println!("  Type a goal and press Enter.");
    println!("  Commands: tools, memory, todos, exit");
    println!();

    let renderer = progress::spawn(host.agent.event_bus());
    let mut last: Option<TaskOutcome> = None;

    while let Some(line) = input.prompt("  goal > ").await? {
        match line.trim() {
            "" => continue,
            "exit" | "quit" => break,
            "tools" => {
                for def in host.agent.dispatcher().registry().definitions() {
                    println!("  {:<14} {}", def.name, first_line(&def.description));
                }
            }
            "memory" => {
                if host.memory.is_empty() {
                    println!("  No earlier tasks.");
                }
                for (i, entry) in host.memory.entries().rev().enumerate() {
                    println!("  {}. [{}] {}", i + 1, entry.status, entry.goal);
                    if !entry.files_touched.is_empty() {
                        println!("     files: {}", entry.files_touched.join(", "));
                    }
                }
            }
            "todos" => {
                let live = host.agent.todos().lock().await.render();
                if !live.is_empty() {
                    println!("{live}");
                } else if let Some(outcome) = last.as_ref().filter(|o| !o.unfinished.is_empty()) {
                    println!("  Left over from the last task:");
                    for item in &outcome.unfinished {
                        println!("  - {item}");
                    }
                } else {
                    println!("  No todos.");
                }
            }
            goal => {
                let outcome = host.agent.run_task(goal, &mut host.memory).await;
                println!();
                for line in outcome.report().lines() {
                    println!("  {line}");
                }
                println!();
                last = Some(outcome);
            }
        }
    }

    renderer.abort();
    println!();
    println!("  Goodbye.");
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
