//! Message domain types.
//!
//! These are the value objects that make up a task's conversation:
//! the user goal, the agent's replies and tool calls, and tool results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instructions (rules, memory, hints)
    System,
    /// The end user
    User,
    /// The model
    Agent,
    /// Tool execution result
    ToolResult,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the agent (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Structured output of a tool, when it succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Workspace-relative paths this message's tool call touched
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_touched: Vec<String>,

    /// Set on tool results that carry a failure
    #[serde(default)]
    pub is_error: bool,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_name: None,
            tool_call_id: None,
            payload: None,
            files_touched: Vec::new(),
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    /// Create a new agent message.
    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(Role::Agent, content.into())
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content.into())
    }

    /// Create a tool result message.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(Role::ToolResult, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg.tool_name = Some(tool_name.into());
        msg
    }

    pub fn with_tool_calls(mut self, calls: Vec<MessageToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files_touched = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn as_error(mut self) -> Self {
        self.is_error = true;
        self
    }

    /// Rough token estimate (4 chars ≈ 1 token), counting tool call arguments.
    pub fn estimated_tokens(&self) -> usize {
        let args: usize = self
            .tool_calls
            .iter()
            .map(|c| c.name.len() + c.arguments.len())
            .sum();
        (self.content.len() + args).div_ceil(4)
    }
}

/// A tool call embedded in an agent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert!(msg.tool_calls.is_empty());
        assert!(!msg.is_error);
    }

    #[test]
    fn tool_result_builder() {
        let msg = Message::tool_result("call_1", "read_file", "file not found")
            .with_files(["src/lib.rs"])
            .as_error();
        assert_eq!(msg.role, Role::ToolResult);
        assert_eq!(msg.tool_name.as_deref(), Some("read_file"));
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.files_touched, vec!["src/lib.rs".to_string()]);
        assert!(msg.is_error);
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::agent("Test message").with_payload(serde_json::json!({"k": 1}));
        let json = serde_json::to_string(&msg).unwrap();
        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.content, "Test message");
        assert_eq!(deserialized.role, Role::Agent);
        assert_eq!(deserialized.payload, Some(serde_json::json!({"k": 1})));
    }

    #[test]
    fn token_estimate() {
        // 20 chars ≈ 5 tokens
        assert_eq!(Message::user("12345678901234567890").estimated_tokens(), 5);
        assert_eq!(Message::user("123").estimated_tokens(), 1);
    }
}
