//! Confirmation of destructive calls under supervised autonomy.

use async_trait::async_trait;
use codeloop_core::ToolCallRequest;

/// Asks whoever is driving the agent whether a call may run.
///
/// Returning `false` (or having no way to ask) refuses the call, which
/// ends the task with a boundary violation.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, request: &ToolCallRequest, description: &str) -> bool;
}

/// Refuses everything. Used when no interactive channel exists.
pub struct DenyAll;

#[async_trait]
impl Confirmer for DenyAll {
    async fn confirm(&self, _request: &ToolCallRequest, _description: &str) -> bool {
        false
    }
}

/// Approves everything.
pub struct ApproveAll;

#[async_trait]
impl Confirmer for ApproveAll {
    async fn confirm(&self, _request: &ToolCallRequest, _description: &str) -> bool {
        true
    }
}

/// Short human description of a call, e.g. `run_command: cargo test`.
pub fn describe(request: &ToolCallRequest) -> String {
    let args = &request.arguments;
    let detail = ["command", "path", "url"]
        .iter()
        .find_map(|k| args.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| args.to_string());
    format!("{}: {}", request.tool_name, detail)
}
