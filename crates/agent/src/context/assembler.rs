//! Request assembly: turns task state into one provider request.
//!
//! The system message is built from layered sections:
//!
//! | Layer | Source | When present |
//! |-------|--------|--------------|
//! | 1. Instructions | fixed rules + workspace root | always |
//! | 2. Project | marker-file detection | a project type was detected |
//! | 3. Recall | Task Memory entries relevant to the goal | any recalled |
//! | 4. Reference | most recently touched file from recall | goal refers back |
//! | 5. Tool warnings | usage tracker hints | a tool keeps failing |
//! | 6. Todos | the task's todo list | list not empty |
//!
//! Conversation history follows as the bounded window: head, summary,
//! raw tail. Assembly is deterministic for identical inputs.

use std::path::Path;

use codeloop_core::provider::completion_tool_definition;
use codeloop_core::{Message, ProviderRequest, ToolDefinition};
use serde::Serialize;

use crate::context::conversation::ConversationWindow;
use crate::context::token;

const INSTRUCTIONS: &str = "You are codeloop, a coding agent that works on the files of one \
workspace by calling tools.

Rules:
- All paths are relative to the workspace root. Never try to leave it.
- Read a file before editing it, and copy old_string exactly from what you read.
- Prefer edit_file or multi_edit over rewriting whole files.
- For changes that span several files, plan them with manage_todos and keep exactly one item \
in progress.
- When a tool call fails, read the reason and change your approach. Repeating an identical \
failed call is refused.
- Independent tool calls may be issued together in one reply; they can run concurrently.
- When the goal is achieved, call task_complete with a short summary of what changed.";

/// All inputs for a single request.
pub struct RequestInput<'a> {
    pub workspace: &'a Path,
    /// One-line project description, if detected.
    pub project: Option<&'a str>,
    /// Rendered recall block (empty when nothing was recalled).
    pub recall: &'a str,
    pub reference_hint: Option<&'a str>,
    pub tool_hints: &'a [String],
    /// Rendered todo list (empty when there are no todos).
    pub todos: &'a str,
    pub window: &'a ConversationWindow,
    pub tools: &'a [ToolDefinition],
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerStats {
    pub name: &'static str,
    pub tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssemblyMetadata {
    pub total_tokens: usize,
    pub per_layer: Vec<LayerStats>,
}

#[derive(Debug, Clone)]
pub struct AssembledRequest {
    pub request: ProviderRequest,
    pub metadata: AssemblyMetadata,
}

/// Sampling settings shared by every request of a session.
#[derive(Debug, Clone)]
pub struct RequestAssembler {
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl RequestAssembler {
    pub fn new(model: impl Into<String>, temperature: f32, max_tokens: Option<u32>) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    pub fn assemble(&self, input: &RequestInput<'_>) -> AssembledRequest {
        let mut stats = Vec::new();
        let mut sections = Vec::new();

        let instructions =
            format!("{INSTRUCTIONS}\n\nWorkspace root: {}", input.workspace.display());
        push_layer(&mut sections, &mut stats, "instructions", instructions);

        if let Some(project) = input.project {
            push_layer(&mut sections, &mut stats, "project", format!("## Project\n{project}"));
        }
        if !input.recall.is_empty() {
            push_layer(&mut sections, &mut stats, "recall", input.recall.to_string());
        }
        if let Some(file) = input.reference_hint {
            push_layer(
                &mut sections,
                &mut stats,
                "reference",
                format!(
                    "## Reference\nThe goal refers to earlier work. \
                     Unless it names another file, \"that file\" means `{file}`."
                ),
            );
        }
        if !input.tool_hints.is_empty() {
            let body = input
                .tool_hints
                .iter()
                .map(|h| format!("- {h}"))
                .collect::<Vec<_>>()
                .join("\n");
            let body = format!("## Tool warnings\n{body}");
            push_layer(&mut sections, &mut stats, "tool_warnings", body);
        }
        if !input.todos.is_empty() {
            let body = format!("## Todo list\n{}", input.todos);
            push_layer(&mut sections, &mut stats, "todos", body);
        }

        let mut messages = vec![Message::system(sections.join("\n\n"))];
        messages.extend(input.window.messages());
        stats.push(LayerStats {
            name: "history",
            tokens: token::estimate_messages_tokens(&messages[1..]),
        });

        let mut tools = input.tools.to_vec();
        tools.push(completion_tool_definition());
        stats.push(LayerStats {
            name: "tool_schemas",
            tokens: token::estimate_tools_tokens(&tools),
        });

        let total_tokens = stats.iter().map(|s| s.tokens).sum();
        AssembledRequest {
            request: ProviderRequest {
                model: self.model.clone(),
                messages,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools,
            },
            metadata: AssemblyMetadata {
                total_tokens,
                per_layer: stats,
            },
        }
    }
}

fn push_layer(
    sections: &mut Vec<String>,
    stats: &mut Vec<LayerStats>,
    name: &'static str,
    body: String,
) {
    stats.push(LayerStats {
        name,
        tokens: token::estimate_tokens(&body),
    });
    sections.push(body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeloop_core::{COMPLETION_TOOL, Role};

    fn window() -> ConversationWindow {
        ConversationWindow {
            head: Message::user("fix the bug"),
            summary: Some(Message::system("[Summary of 3 earlier messages]")),
            tail: vec![Message::agent("looking")],
        }
    }

    fn input<'a>(window: &'a ConversationWindow, hints: &'a [String]) -> RequestInput<'a> {
        RequestInput {
            workspace: Path::new("/ws"),
            project: Some("Detected a rust project."),
            recall: "## Previous tasks (most recent first)\n1. [completed] add logging",
            reference_hint: Some("src/main.rs"),
            tool_hints: hints,
            todos: "[~] 1. Update callers",
            window,
            tools: &[],
        }
    }

    #[test]
    fn system_message_carries_every_layer() {
        let window = window();
        let hints = vec!["grep has failed 2 times in a row".to_string()];
        let assembled = RequestAssembler::new("m", 0.2, None).assemble(&input(&window, &hints));

        let system = &assembled.request.messages[0];
        assert_eq!(system.role, Role::System);
        let needles = [
            "/ws",
            "rust project",
            "add logging",
            "`src/main.rs`",
            "grep has failed",
            "Update callers",
        ];
        for needle in needles {
            assert!(system.content.contains(needle), "missing {needle}");
        }
        let names: Vec<_> = assembled.metadata.per_layer.iter().map(|l| l.name).collect();
        assert_eq!(
            names,
            [
                "instructions",
                "project",
                "recall",
                "reference",
                "tool_warnings",
                "todos",
                "history",
                "tool_schemas"
            ]
        );
    }

    #[test]
    fn window_follows_system_in_order() {
        let window = window();
        let assembled = RequestAssembler::new("m", 0.2, Some(512)).assemble(&input(&window, &[]));
        let contents: Vec<_> =
            assembled.request.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            &contents[1..],
            ["fix the bug", "[Summary of 3 earlier messages]", "looking"]
        );
        assert_eq!(assembled.request.max_tokens, Some(512));
    }

    #[test]
    fn completion_tool_is_always_offered() {
        let window = window();
        let assembled = RequestAssembler::new("m", 0.2, None).assemble(&input(&window, &[]));
        assert!(assembled.request.tools.iter().any(|t| t.name == COMPLETION_TOOL));
    }

    #[test]
    fn empty_layers_are_skipped() {
        let window = window();
        let input = RequestInput {
            project: None,
            recall: "",
            reference_hint: None,
            todos: "",
            ..input(&window, &[])
        };
        let assembled = RequestAssembler::new("m", 0.2, None).assemble(&input);
        assert!(!assembled.request.messages[0].content.contains("## "));
    }
}
