//! Bounded conversation state for one task.
//!
//! The first message (the goal) is kept verbatim as the head, the last K
//! messages are kept raw, and everything in between is folded into a
//! single synthetic summary. Folding is lossy and one-way: only files
//! touched, decisions and open issues survive it.

use std::collections::VecDeque;

use codeloop_core::{Message, Role};

use crate::context::token;

const MAX_DECISIONS: usize = 20;
const MAX_ISSUES: usize = 10;
const LINE_LIMIT: usize = 160;

/// What survives of folded messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySummary {
    files_touched: Vec<String>,
    decisions: Vec<String>,
    open_issues: Vec<Issue>,
    folded: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct Issue {
    tool: String,
    text: String,
}

impl HistorySummary {
    pub fn is_empty(&self) -> bool {
        self.folded == 0
    }

    /// Number of raw messages folded so far.
    pub fn folded(&self) -> usize {
        self.folded
    }

    /// Files touched by folded messages, oldest first.
    pub fn files_touched(&self) -> &[String] {
        &self.files_touched
    }

    pub fn decisions(&self) -> &[String] {
        &self.decisions
    }

    pub fn open_issues(&self) -> Vec<String> {
        self.open_issues.iter().map(|i| format!("{}: {}", i.tool, i.text)).collect()
    }

    fn absorb(&mut self, message: &Message) {
        self.folded += 1;
        for file in &message.files_touched {
            touch(&mut self.files_touched, file);
        }

        match message.role {
            Role::Agent => {
                if let Some(line) = first_line(&message.content) {
                    self.decide(line);
                }
                for call in &message.tool_calls {
                    self.decide(format!("called {} {}", call.name, clip(&call.arguments, 120)));
                }
            }
            Role::ToolResult => {
                let tool = message.tool_name.clone().unwrap_or_default();
                if message.is_error {
                    let text = failure_reason(&message.content);
                    self.open_issues.push(Issue { tool, text });
                    if self.open_issues.len() > MAX_ISSUES {
                        self.open_issues.remove(0);
                    }
                } else {
                    self.open_issues.retain(|i| i.tool != tool);
                }
            }
            Role::User => {
                if let Some(line) = first_line(&message.content) {
                    self.decide(format!("user: {line}"));
                }
            }
            Role::System => {}
        }
    }

    fn decide(&mut self, decision: String) {
        self.decisions.push(decision);
        if self.decisions.len() > MAX_DECISIONS {
            self.decisions.remove(0);
        }
    }

    /// Render as the synthetic summary message body.
    pub fn render(&self) -> String {
        let mut out = format!("[Summary of {} earlier messages]", self.folded);
        if !self.files_touched.is_empty() {
            out.push_str("\nFiles touched: ");
            out.push_str(&self.files_touched.join(", "));
        }
        if !self.decisions.is_empty() {
            out.push_str("\nDecisions:");
            for d in &self.decisions {
                out.push_str("\n- ");
                out.push_str(d);
            }
        }
        if !self.open_issues.is_empty() {
            out.push_str("\nOpen issues:");
            for issue in self.open_issues() {
                out.push_str("\n- ");
                out.push_str(&issue);
            }
        }
        out
    }
}

/// The bounded history sent with one request.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    pub head: Message,
    pub summary: Option<Message>,
    pub tail: Vec<Message>,
}

impl ConversationWindow {
    /// Head, summary (if any), then the raw tail.
    pub fn messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.tail.len() + 2);
        out.push(self.head.clone());
        out.extend(self.summary.clone());
        out.extend(self.tail.iter().cloned());
        out
    }

    /// Raw (non-synthetic) messages in the window.
    pub fn raw_len(&self) -> usize {
        1 + self.tail.len()
    }
}

pub struct ConversationState {
    head: Message,
    summary: HistorySummary,
    tail: VecDeque<Message>,
    window: usize,
    token_budget: Option<usize>,
    last_agent_text: Option<String>,
}

impl ConversationState {
    /// Start a conversation whose head is `head`, keeping the last `window`
    /// messages raw (at least one).
    pub fn new(head: Message, window: usize) -> Self {
        Self {
            head,
            summary: HistorySummary::default(),
            tail: VecDeque::new(),
            window: window.max(1),
            token_budget: None,
            last_agent_text: None,
        }
    }

    /// Fold early whenever the raw tail is estimated above `budget` tokens.
    pub fn with_token_budget(mut self, budget: Option<usize>) -> Self {
        self.token_budget = budget;
        self
    }

    /// Append a message, folding older ones as needed. Returns how many
    /// messages were folded by this call.
    pub fn append(&mut self, message: Message) -> usize {
        if message.role == Role::Agent && !message.content.trim().is_empty() {
            self.last_agent_text = Some(message.content.trim().to_string());
        }
        self.tail.push_back(message);

        let mut folded = 0;
        while self.tail.len() > self.window {
            folded += self.fold_oldest();
        }
        if let Some(budget) = self.token_budget {
            while self.tail.len() > 1 && token::estimate_messages_tokens(&self.tail) > budget {
                folded += self.fold_oldest();
            }
        }
        folded
    }

    fn fold_oldest(&mut self) -> usize {
        match self.tail.pop_front() {
            Some(message) => {
                self.summary.absorb(&message);
                1
            }
            None => 0,
        }
    }

    pub fn window(&self) -> ConversationWindow {
        ConversationWindow {
            head: self.head.clone(),
            summary: (!self.summary.is_empty()).then(|| Message::system(self.summary.render())),
            tail: self.tail.iter().cloned().collect(),
        }
    }

    pub fn summary(&self) -> &HistorySummary {
        &self.summary
    }

    /// Head plus raw tail.
    pub fn raw_len(&self) -> usize {
        1 + self.tail.len()
    }

    /// Every file touched during the task, oldest first, most recent last.
    pub fn files_touched(&self) -> Vec<String> {
        let mut files = self.summary.files_touched.clone();
        for message in &self.tail {
            for file in &message.files_touched {
                touch(&mut files, file);
            }
        }
        files
    }

    /// Failures not followed by a success of the same tool.
    pub fn open_issues(&self) -> Vec<String> {
        let mut summary = self.summary.clone();
        for message in self.tail.iter().filter(|m| m.role == Role::ToolResult) {
            summary.absorb(message);
        }
        summary.open_issues()
    }

    /// The most recent non-empty text the model wrote.
    pub fn last_agent_text(&self) -> Option<&str> {
        self.last_agent_text.as_deref()
    }
}

/// Record a touch, moving a re-touched file to the end.
fn touch(files: &mut Vec<String>, file: &str) {
    files.retain(|f| f != file);
    files.push(file.to_string());
}

fn first_line(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    Some(clip(line, LINE_LIMIT))
}

/// Pull the reason out of a rendered tool failure.
fn failure_reason(content: &str) -> String {
    content
        .lines()
        .find_map(|l| l.strip_prefix("Reason: "))
        .map(|r| clip(r, LINE_LIMIT))
        .or_else(|| first_line(content))
        .unwrap_or_default()
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeloop_core::MessageToolCall;

    fn tool_ok(name: &str, file: &str) -> Message {
        Message::tool_result("c", name, "{}").with_files([file])
    }

    fn tool_err(name: &str, reason: &str) -> Message {
        let body = format!("Tool call failed.\nAttempted: {name} {{}}\nReason: {reason}");
        Message::tool_result("c", name, body).as_error()
    }

    #[test]
    fn window_never_exceeds_head_plus_k() {
        let mut state = ConversationState::new(Message::user("goal"), 4);
        for i in 0..30 {
            state.append(Message::agent(format!("step {i}")));
            assert!(state.window().raw_len() <= 5);
        }
        let window = state.window();
        assert_eq!(window.head.content, "goal");
        assert_eq!(window.tail.len(), 4);
        assert_eq!(window.tail.last().unwrap().content, "step 29");
        assert_eq!(state.summary().folded(), 26);
    }

    #[test]
    fn no_summary_until_something_folds() {
        let mut state = ConversationState::new(Message::user("goal"), 3);
        state.append(Message::agent("a"));
        state.append(Message::agent("b"));
        assert!(state.window().summary.is_none());
        assert_eq!(state.window().messages().len(), 3);
    }

    #[test]
    fn folding_keeps_files_decisions_and_issues() {
        let mut state = ConversationState::new(Message::user("goal"), 2);
        let call = MessageToolCall {
            id: "c1".into(),
            name: "read_file".into(),
            arguments: r#"{"path":"src/a.rs"}"#.into(),
        };
        state.append(Message::agent("I will read the file first").with_tool_calls(vec![call]));
        state.append(tool_ok("read_file", "src/a.rs"));
        state.append(tool_err("grep", "invalid regex: unclosed group"));
        state.append(Message::agent("x"));
        state.append(Message::agent("y"));

        let summary = state.summary();
        assert_eq!(summary.files_touched(), ["src/a.rs"]);
        assert!(summary.decisions().iter().any(|d| d.contains("read the file first")));
        assert!(summary.decisions().iter().any(|d| d.starts_with("called read_file")));
        assert_eq!(summary.open_issues(), vec!["grep: invalid regex: unclosed group"]);

        let rendered = state.window().summary.unwrap().content;
        assert!(rendered.contains("src/a.rs"));
        assert!(rendered.contains("invalid regex"));
    }

    #[test]
    fn later_success_resolves_issue() {
        let mut state = ConversationState::new(Message::user("goal"), 1);
        state.append(tool_err("grep", "bad pattern"));
        state.append(tool_ok("grep", "src/lib.rs"));
        state.append(Message::agent("done"));
        assert!(state.summary().open_issues().is_empty());
    }

    #[test]
    fn open_issues_include_raw_tail() {
        let mut state = ConversationState::new(Message::user("goal"), 10);
        state.append(tool_err("read_file", "file not found: x.py"));
        assert_eq!(state.open_issues(), vec!["read_file: file not found: x.py"]);
    }

    #[test]
    fn token_budget_folds_early_but_keeps_one() {
        let mut state =
            ConversationState::new(Message::user("goal"), 10).with_token_budget(Some(50));
        state.append(Message::agent("a".repeat(100)));
        let folded = state.append(Message::agent("b".repeat(400)));
        assert_eq!(folded, 1);
        assert_eq!(state.raw_len(), 2);
        assert_eq!(state.window().tail[0].content.len(), 400);
    }

    #[test]
    fn files_are_ordered_by_last_touch() {
        let mut state = ConversationState::new(Message::user("goal"), 1);
        state.append(tool_ok("read_file", "a.rs"));
        state.append(tool_ok("read_file", "b.rs"));
        state.append(tool_ok("edit_file", "a.rs"));
        assert_eq!(state.files_touched(), vec!["b.rs", "a.rs"]);
    }
}
