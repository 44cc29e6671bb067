//! run_command: execute a shell command in the workspace root.
//!
//! Commands go through the [`CommandPolicy`] blocklist first. The child
//! runs with `kill_on_drop`, so when the timeout fires and the future is
//! dropped the process is killed.

use async_trait::async_trait;
use codeloop_core::{FieldType, Schema, Tool, ToolEffect, ToolError, ValidatedInput};
use codeloop_security::CommandPolicy;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const MAX_TIMEOUT_SECS: u64 = 600;
const MAX_OUTPUT_CHARS: usize = 30_000;

pub struct RunCommandTool {
    root: PathBuf,
    policy: CommandPolicy,
    default_timeout_secs: u64,
}

impl RunCommandTool {
    pub fn new(root: impl Into<PathBuf>, policy: CommandPolicy, default_timeout_secs: u64) -> Self {
        Self {
            root: root.into(),
            policy,
            default_timeout_secs,
        }
    }
}

/// Keep the tail of long output; errors usually come last.
fn clip(output: String) -> (String, bool) {
    let total = output.chars().count();
    if total <= MAX_OUTPUT_CHARS {
        return (output, false);
    }
    let tail: String = output.chars().skip(total - MAX_OUTPUT_CHARS).collect();
    (format!("[... {} characters omitted ...]\n{tail}", total - MAX_OUTPUT_CHARS), true)
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace root and return its combined output and exit code. \
         Use only when no dedicated tool fits (builds, tests, git). Dangerous commands are blocked."
    }

    fn input_schema(&self) -> Schema {
        Schema::new()
            .required("command", FieldType::String, "Shell command line")
            .optional("timeout_secs", FieldType::Integer, "Seconds before the command is killed")
    }

    fn output_schema(&self) -> Schema {
        Schema::new()
            .required("output", FieldType::String, "stdout followed by stderr")
            .optional("exit_code", FieldType::Integer, "Exit code; absent if killed by a signal")
            .required("truncated", FieldType::Boolean, "Whether the output was shortened")
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::Destructive
    }

    async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let command = input.require_str("command")?.trim();
        if command.is_empty() {
            return Err(input.invalid("command", "must not be empty"));
        }
        self.policy
            .check(command)
            .map_err(|e| ToolError::boundary(self.name(), e.to_string()))?;

        let timeout_secs = input
            .u64_opt("timeout_secs")
            .unwrap_or(self.default_timeout_secs)
            .clamp(1, MAX_TIMEOUT_SECS);

        debug!(command = %command, timeout_secs, "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limit = Duration::from_secs(timeout_secs);
        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let reason = format!("failed to start command: {e}");
                return Err(ToolError::execution(self.name(), reason));
            }
            Err(_) => {
                warn!(command = %command, timeout_secs, "Command timed out, child killed");
                return Err(ToolError::Timeout {
                    tool: self.name().to_string(),
                    timeout_secs,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
            (_, true) => stdout.trim_end().to_string(),
            (true, false) => stderr.trim_end().to_string(),
            (false, false) => format!("{}\n[stderr]\n{}", stdout.trim_end(), stderr.trim_end()),
        };
        let (output_text, truncated) = clip(combined);

        let exit_code = output.status.code();
        if !output.status.success() {
            warn!(command = %command, exit_code = ?exit_code, "Command exited unsuccessfully");
        }

        Ok(json!({
            "output": output_text,
            "exit_code": exit_code,
            "truncated": truncated,
        }))
    }
}
