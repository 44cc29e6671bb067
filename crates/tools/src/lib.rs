//! Built-in workspace tools for codeloop.
//!
//! File reading and editing, search, shell commands, the todo list and
//! web access. Every tool declares its input and output schema and which
//! of its arguments are workspace paths; the dispatcher in
//! `codeloop-agent` validates and resolves those before a tool runs.

pub mod delete_file;
pub mod edit_file;
pub mod fetch_url;
pub mod find_files;
pub mod grep;
pub mod list_files;
pub mod manage_todos;
pub mod multi_edit;
pub mod read_file;
pub mod run_command;
pub mod search_web;
pub mod walk;
pub mod write_file;

use codeloop_config::ToolsConfig;
use codeloop_core::{SharedTodos, ToolRegistry};
use codeloop_security::CommandPolicy;
use std::path::Path;

pub use delete_file::DeleteFileTool;
pub use edit_file::EditFileTool;
pub use fetch_url::FetchUrlTool;
pub use find_files::FindFilesTool;
pub use grep::GrepTool;
pub use list_files::ListFilesTool;
pub use manage_todos::ManageTodosTool;
pub use multi_edit::MultiEditTool;
pub use read_file::ReadFileTool;
pub use run_command::RunCommandTool;
pub use search_web::SearchWebTool;
pub use write_file::WriteFileTool;

/// Build a registry holding all twelve tools.
///
/// `root` is the canonical workspace root; `todos` is shared with the
/// agent loop so it can render and clear the list.
pub fn default_registry(
    config: &ToolsConfig,
    root: &Path,
    policy: CommandPolicy,
    todos: SharedTodos,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ReadFileTool::new(root, config.max_read_bytes)));
    registry.register(Box::new(WriteFileTool));
    registry.register(Box::new(EditFileTool));
    registry.register(Box::new(MultiEditTool));
    registry.register(Box::new(DeleteFileTool));
    registry.register(Box::new(ListFilesTool));
    registry.register(Box::new(FindFilesTool::new(config.max_search_results)));
    registry.register(Box::new(GrepTool::new(config.max_search_results)));
    registry.register(Box::new(RunCommandTool::new(root, policy, config.command_timeout_secs)));
    registry.register(Box::new(ManageTodosTool::new(todos)));
    registry.register(Box::new(FetchUrlTool::new(
        config.http_timeout_secs,
        config.fetch_max_chars,
    )));
    registry.register(Box::new(SearchWebTool::new(
        config.search_endpoint.clone(),
        config.http_timeout_secs,
    )));
    registry
}
