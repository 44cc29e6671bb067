//! Todo state machine for breaking large multi-file changes into steps.
//!
//! Invariant: at most one item is `in_progress` at any time. Every
//! mutation checks it before changing anything, so a failed call leaves
//! the list untouched.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::TodoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" | "done" => Some(Self::Completed),
            _ => None,
        }
    }

    fn marker(self) -> &'static str {
        match self {
            Self::Pending => "[ ]",
            Self::InProgress => "[~]",
            Self::Completed => "[x]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

/// An item as submitted for insertion. Missing ids are assigned.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TodoDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub status: Option<TodoStatus>,
}

impl TodoDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Todo list shared between the `manage_todos` tool and the agent loop.
pub type SharedTodos = Arc<Mutex<TodoList>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TodoList {
    items: Vec<TodoItem>,
    next_id: u64,
}

impl TodoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedTodos {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Insert a batch atomically. Duplicate ids or a second in-progress
    /// item reject the whole batch.
    pub fn add_batch(&mut self, drafts: Vec<TodoDraft>) -> Result<Vec<TodoItem>, TodoError> {
        let mut next_id = self.next_id;
        let mut staged: Vec<TodoItem> = Vec::with_capacity(drafts.len());
        let mut in_progress = self.in_progress().map(|item| item.id.clone());

        for draft in drafts {
            let id = match draft.id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
                Some(id) => id,
                None => loop {
                    next_id += 1;
                    let candidate = next_id.to_string();
                    if !self.contains(&candidate) && !staged.iter().any(|s| s.id == candidate) {
                        break candidate;
                    }
                },
            };
            if self.contains(&id) || staged.iter().any(|s| s.id == id) {
                return Err(TodoError::InvariantViolation(format!("duplicate todo id '{id}'")));
            }

            let status = draft.status.unwrap_or(TodoStatus::Pending);
            if status == TodoStatus::InProgress {
                if let Some(current) = &in_progress {
                    return Err(already_in_progress(current));
                }
                in_progress = Some(id.clone());
            }
            staged.push(TodoItem {
                id,
                content: draft.content,
                status,
            });
        }

        self.next_id = next_id;
        self.items.extend(staged.iter().cloned());
        Ok(staged)
    }

    pub fn set_status(&mut self, id: &str, status: TodoStatus) -> Result<&TodoItem, TodoError> {
        let index = self
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| TodoError::NotFound(id.to_string()))?;

        if status == TodoStatus::InProgress
            && let Some(current) = self.in_progress()
            && current.id != id
        {
            return Err(already_in_progress(&current.id));
        }

        self.items[index].status = status;
        Ok(&self.items[index])
    }

    /// Mark the first pending item in progress and return it.
    pub fn pop_first_pending(&mut self) -> Result<Option<TodoItem>, TodoError> {
        let Some(index) = self.items.iter().position(|i| i.status == TodoStatus::Pending) else {
            return Ok(None);
        };
        if let Some(current) = self.in_progress() {
            return Err(already_in_progress(&current.id));
        }
        self.items[index].status = TodoStatus::InProgress;
        Ok(Some(self.items[index].clone()))
    }

    pub fn list(&self) -> &[TodoItem] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn in_progress(&self) -> Option<&TodoItem> {
        self.items.iter().find(|i| i.status == TodoStatus::InProgress)
    }

    /// Items not yet completed, in list order.
    pub fn unfinished(&self) -> Vec<&TodoItem> {
        self.items
            .iter()
            .filter(|i| i.status != TodoStatus::Completed)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|i| i.id == id)
    }

    /// One line per item, e.g. `[~] 2. Update callers`.
    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(|i| format!("{} {}. {}", i.status.marker(), i.id, i.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn already_in_progress(current: &str) -> TodoError {
    TodoError::InvariantViolation(format!(
        "todo '{current}' is already in progress; complete it before starting another"
    ))
}
