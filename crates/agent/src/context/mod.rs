//! Per-request context: bounded conversation history plus the layered
//! system message.
//!
//! - [`conversation`] keeps the head, a folded summary and the last K messages
//! - [`assembler`] builds the provider request from task state
//! - [`project`] detects the workspace's language for the system message
//! - [`token`] estimates sizes for early folding and metadata

pub mod assembler;
pub mod conversation;
pub mod project;
pub mod token;

pub use assembler::{AssembledRequest, AssemblyMetadata, LayerStats, RequestAssembler, RequestInput};
pub use conversation::{ConversationState, ConversationWindow, HistorySummary};
pub use project::ProjectInfo;
