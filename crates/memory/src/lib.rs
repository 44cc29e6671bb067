//! Cross-task memory for codeloop.
//!
//! Keeps the last ten finished tasks (goal, files touched, outcome) so a
//! new goal like "add tests for that file" can be resolved against recent
//! history. Optionally persisted as JSON lines.

pub mod store;
pub mod task_memory;

pub use store::JsonlStore;
pub use task_memory::{
    TaskMemory, TaskMemoryEntry, has_back_reference, render_recall, resolve_file_reference,
};
