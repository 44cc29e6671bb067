//! Domain event system: progress reporting without coupling the loop to a UI.
//!
//! The agent loop publishes events as a task advances; the CLI (or a test)
//! subscribes and renders or asserts on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::task::TaskStatus;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    TaskStarted {
        task_id: String,
        goal: String,
        timestamp: DateTime<Utc>,
    },

    /// A request is about to be sent to the LLM
    IterationStarted {
        task_id: String,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        task_id: String,
        tool_name: String,
        call_id: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Older messages were folded into the conversation summary
    HistoryCompressed {
        task_id: String,
        folded: usize,
        timestamp: DateTime<Utc>,
    },

    TaskFinished {
        task_id: String,
        status: TaskStatus,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The task this event belongs to.
    pub fn task_id(&self) -> &str {
        match self {
            Self::TaskStarted { task_id, .. }
            | Self::IterationStarted { task_id, .. }
            | Self::ToolExecuted { task_id, .. }
            | Self::HistoryCompressed { task_id, .. }
            | Self::TaskFinished { task_id, .. } => task_id,
        }
    }
}

/// Fan-out of [`DomainEvent`]s to any number of listeners.
///
/// Slow listeners lag and skip events; publishing never blocks the loop.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Send to every current listener; returns how many received it.
    pub fn publish(&self, event: DomainEvent) -> usize {
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
