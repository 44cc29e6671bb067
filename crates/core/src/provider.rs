//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation window to an LLM and get
//! exactly one reply back. The agent loop turns that reply into an
//! [`Action`]: either tool calls to dispatch or a completion signal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolCallRequest;

/// Name of the pseudo-tool a model calls to signal that the task is done.
pub const COMPLETION_TOOL: &str = "task_complete";

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o-mini", "openai/gpt-4.1")
    pub model: String,

    /// The conversation messages, system instructions first
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.2
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Definition of the completion pseudo-tool.
pub fn completion_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: COMPLETION_TOOL.to_string(),
        description: "Call this when the task is finished. \
                      Provide a short summary of what was done."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "What was accomplished, including files changed"
                }
            },
            "required": ["summary"]
        }),
    }
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

impl ProviderResponse {
    pub fn action(&self) -> Action {
        Action::from_message(&self.message)
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The single structured action carried by a model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// One or more tool calls, in the order the model issued them. May
    /// include completion calls alongside real ones; see [`Action::from_message`].
    ToolCalls(Vec<ToolCallRequest>),
    /// The model is done.
    Complete { summary: String },
}

impl Action {
    /// Interpret an agent message.
    ///
    /// Plain text completes the task with the text as summary. A reply whose
    /// only calls are `task_complete` completes with that call's summary.
    /// Anything else is a batch of tool calls; completion calls mixed into it
    /// are left in place for the loop to defer.
    pub fn from_message(message: &Message) -> Self {
        if message.tool_calls.is_empty() {
            return Self::Complete {
                summary: message.content.trim().to_string(),
            };
        }

        let calls: Vec<ToolCallRequest> = message
            .tool_calls
            .iter()
            .map(ToolCallRequest::from_message_call)
            .collect();

        if calls.iter().all(is_completion) {
            let summary = calls
                .first()
                .and_then(|c| c.arguments.get("summary"))
                .and_then(|s| s.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| message.content.trim().to_string());
            return Self::Complete { summary };
        }

        Self::ToolCalls(calls)
    }
}

pub fn is_completion(call: &ToolCallRequest) -> bool {
    call.tool_name == COMPLETION_TOOL
}

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The agent loop calls `complete()`
/// without knowing which provider is being used. Transport retries are the
/// implementation's concern.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageToolCall;

    fn call(id: &str, name: &str, args: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args.into(),
        }
    }

    #[test]
    fn plain_text_is_completion() {
        let action = Action::from_message(&Message::agent("  All done.  "));
        assert_eq!(action, Action::Complete { summary: "All done.".into() });
    }

    #[test]
    fn completion_tool_carries_summary() {
        let done = call("c1", COMPLETION_TOOL, r#"{"summary":"Fixed the bug"}"#);
        let msg = Message::agent("").with_tool_calls(vec![done]);
        assert_eq!(
            Action::from_message(&msg),
            Action::Complete { summary: "Fixed the bug".into() }
        );
    }

    #[test]
    fn mixed_calls_stay_tool_calls_in_order() {
        let msg = Message::agent("").with_tool_calls(vec![
            call("c1", "read_file", r#"{"path":"a.rs"}"#),
            call("c2", COMPLETION_TOOL, r#"{"summary":"done"}"#),
        ]);
        match Action::from_message(&msg) {
            Action::ToolCalls(calls) => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].tool_name, "read_file");
                assert!(is_completion(&calls[1]));
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn completion_definition_requires_summary() {
        let def = completion_tool_definition();
        assert_eq!(def.name, COMPLETION_TOOL);
        assert_eq!(def.parameters["required"][0], "summary");
    }
}
