//! # codeloop core
//!
//! Domain types, traits, and error definitions for the codeloop coding agent.
//! This crate has no I/O of its own. It defines the model every other
//! crate implements against: messages, the LLM [`Provider`] boundary, the
//! [`Tool`] capability with its typed schemas, the todo state machine, and
//! task lifecycle types.

pub mod error;
pub mod message;
pub mod provider;
pub mod schema;
pub mod tool;
pub mod todo;
pub mod task;
pub mod autonomy;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, ProviderError, Result, SchemaError, TodoError, ToolError};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{
    Action, COMPLETION_TOOL, Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage,
};
pub use schema::{FieldType, Schema, ToolPayload};
pub use tool::{
    ErrorDetail, ResolvedPath, Tool, ToolCallRequest, ToolEffect, ToolOutcome, ToolRegistry,
    ToolResult, ValidatedInput,
};
pub use todo::{SharedTodos, TodoDraft, TodoItem, TodoList, TodoStatus};
pub use task::{FailureReport, Task, TaskOutcome, TaskPhase, TaskStatus};
pub use autonomy::{AutonomyLevel, Permission};
pub use event::{DomainEvent, EventBus};
