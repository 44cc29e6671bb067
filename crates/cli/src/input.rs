//! Line input shared by the REPL prompt and call confirmations.
//!
//! Both read from the same buffered stdin so a confirmation never
//! swallows the next goal, and the lock keeps prompts from interleaving.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use codeloop_agent::Confirmer;
use codeloop_core::ToolCallRequest;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Clone)]
pub struct LineInput {
    lines: Arc<Mutex<Lines<BufReader<Stdin>>>>,
}

impl LineInput {
    pub fn stdin() -> Self {
        Self {
            lines: Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines())),
        }
    }

    /// Print `prompt` and wait for one line. `None` at end of input.
    pub async fn prompt(&self, prompt: &str) -> std::io::Result<Option<String>> {
        let mut lines = self.lines.lock().await;
        print!("{prompt}");
        std::io::stdout().flush()?;
        lines.next_line().await
    }
}

/// Asks `(y/n)` on stdin before a destructive call runs.
pub struct StdinConfirmer {
    input: LineInput,
}

impl StdinConfirmer {
    pub fn new(input: LineInput) -> Self {
        Self { input }
    }
}

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, request: &ToolCallRequest, description: &str) -> bool {
        let answer = self.input.prompt(&format!("  Allow {description}? (y/n) ")).await;
        let approved = matches!(&answer, Ok(Some(line)) if is_yes(line));
        debug!(call_id = %request.id, approved, "Confirmation answered");
        approved
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
