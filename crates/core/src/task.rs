//! Task lifecycle types.
//!
//! A task is one user goal driven by the agent loop from start to a
//! terminal state. Phases follow
//! `Started → (Iterating ⇄ AwaitingToolResult) → {Completed, Failed, Aborted}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Started,
    Iterating,
    AwaitingToolResult,
    Completed,
    Failed,
    Aborted,
}

impl TaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    pub fn can_transition_to(self, next: TaskPhase) -> bool {
        use TaskPhase::*;
        match (self, next) {
            (Started, Iterating) => true,
            (Iterating, AwaitingToolResult) => true,
            (AwaitingToolResult, Iterating) => true,
            // Budget or fatal errors can end a task from any live phase.
            (Started | Iterating | AwaitingToolResult, Failed | Aborted) => true,
            (Iterating, Completed) => true,
            _ => false,
        }
    }

    pub fn status(self) -> TaskStatus {
        match self {
            Self::Started | Self::Iterating | Self::AwaitingToolResult => TaskStatus::Running,
            Self::Completed => TaskStatus::Completed,
            Self::Failed => TaskStatus::Failed,
            Self::Aborted => TaskStatus::Aborted,
        }
    }
}

/// A task owned by the agent loop for the duration of one goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub goal: String,
    pub phase: TaskPhase,
    /// Number of LLM requests issued so far.
    pub iteration_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            phase: TaskPhase::Started,
            iteration_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.phase.status()
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: TaskPhase) -> Result<(), Error> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "illegal task transition {:?} -> {:?}",
                self.phase, next
            )));
        }
        tracing::trace!(task_id = %self.id, from = ?self.phase, to = ?next, "Task transition");
        self.phase = next;
        Ok(())
    }
}

/// The action and error that ended a failed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub attempted: String,
    pub error: String,
}

/// What `run_task` returns to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub goal: String,
    pub status: TaskStatus,
    pub summary: String,
    pub iterations: u32,
    pub files_touched: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    /// Work left undone when the task was aborted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unfinished: Vec<String>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Human-readable report for the user.
    pub fn report(&self) -> String {
        let mut lines = vec![
            format!("Task {}: {}", self.status, self.goal),
            format!("Iterations: {}", self.iterations),
        ];
        if !self.summary.is_empty() {
            lines.push(format!("Summary: {}", self.summary));
        }
        if !self.files_touched.is_empty() {
            let files: Vec<&str> = self.files_touched.iter().map(String::as_str).collect();
            lines.push(format!("Files touched: {}", files.join(", ")));
        }
        if let Some(failure) = &self.failure {
            lines.push(format!("Attempted: {}", failure.attempted));
            lines.push(format!("Failed with: {}", failure.error));
        }
        if !self.unfinished.is_empty() {
            lines.push("Unfinished:".to_string());
            lines.extend(self.unfinished.iter().map(|u| format!("  - {u}")));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut task = Task::new("fix bug");
        assert_eq!(task.status(), TaskStatus::Running);
        task.transition(TaskPhase::Iterating).unwrap();
        task.transition(TaskPhase::AwaitingToolResult).unwrap();
        task.transition(TaskPhase::Iterating).unwrap();
        task.transition(TaskPhase::Completed).unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    #[test]
    fn terminal_phases_are_final() {
        let mut task = Task::new("x");
        task.transition(TaskPhase::Aborted).unwrap();
        assert!(task.phase.is_terminal());
        let err = task.transition(TaskPhase::Iterating).unwrap_err();
        assert!(matches!(err, Error::Internal(ref m) if m.contains("Aborted")), "{err}");
        assert!(task.transition(TaskPhase::Completed).is_err());
    }

    #[test]
    fn cannot_complete_while_awaiting_tools() {
        assert!(!TaskPhase::AwaitingToolResult.can_transition_to(TaskPhase::Completed));
        assert!(!TaskPhase::Started.can_transition_to(TaskPhase::AwaitingToolResult));
    }

    #[test]
    fn aborted_report_lists_unfinished_work() {
        let outcome = TaskOutcome {
            task_id: "t".into(),
            goal: "refactor".into(),
            status: TaskStatus::Aborted,
            summary: "Stopped after 5 iterations".into(),
            iterations: 5,
            files_touched: BTreeSet::from(["src/a.rs".to_string()]),
            failure: None,
            unfinished: vec!["update callers".into()],
        };
        let report = outcome.report();
        assert!(report.contains("aborted"));
        assert!(report.contains("src/a.rs"));
        assert!(report.contains("- update callers"));
        assert!(!outcome.is_success());
    }
}
