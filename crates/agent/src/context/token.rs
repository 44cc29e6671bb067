//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Good
//! enough for deciding when to fold history early; nothing here is
//! billed against.

use codeloop_core::{Message, ToolDefinition};

/// Per-message overhead for role names and delimiters on the wire.
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including tool call arguments.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + message.estimated_tokens()
}

pub fn estimate_messages_tokens<'a>(messages: impl IntoIterator<Item = &'a Message>) -> usize {
    messages.into_iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for the tool definitions sent with every request.
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| estimate_tokens(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}
