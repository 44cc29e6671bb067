//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act on a workspace:
//! read and edit files, search, run commands, fetch web pages.
//! Each tool declares typed input and output [`Schema`]s; the dispatcher
//! validates against them so executors only ever see well-formed input.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use crate::error::{ErrorKind, ToolError};
use crate::message::{Message, MessageToolCall};
use crate::provider::ToolDefinition;
use crate::schema::{Schema, ToolPayload};

/// A request to execute a tool, as produced by the LLM boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub tool_name: String,

    /// Arguments as a JSON value
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }

    /// Parse a wire-level tool call. Arguments that are not valid JSON are
    /// kept as a string so schema validation can report them.
    pub fn from_message_call(call: &MessageToolCall) -> Self {
        let arguments = if call.arguments.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(&call.arguments)
                .unwrap_or_else(|_| Value::String(call.arguments.clone()))
        };
        Self::new(call.id.clone(), call.name.clone(), arguments)
    }

    /// Tool name plus canonical arguments. Two calls with the same
    /// signature would do the same thing.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.tool_name, self.arguments)
    }
}

/// How a tool affects the world. Drives autonomy checks and scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEffect {
    /// Reads the workspace or the network.
    ReadOnly,
    /// Mutates in-process agent state only.
    Internal,
    /// Writes files inside the workspace.
    Mutating,
    /// Deletes files or runs arbitrary commands.
    Destructive,
}

impl ToolEffect {
    pub fn writes_workspace(self) -> bool {
        matches!(self, Self::Mutating | Self::Destructive)
    }
}

/// A path argument after it has been resolved against the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPath {
    /// Absolute, normalized location on disk.
    pub absolute: PathBuf,
    /// The same location relative to the workspace root, `/`-separated.
    pub relative: String,
}

/// Tool arguments that passed input-schema validation.
#[derive(Debug, Clone)]
pub struct ValidatedInput {
    tool: String,
    args: Map<String, Value>,
    paths: BTreeMap<String, ResolvedPath>,
}

impl ValidatedInput {
    pub fn new(tool: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            tool: tool.into(),
            args,
            paths: BTreeMap::new(),
        }
    }

    pub fn with_path(mut self, name: impl Into<String>, path: ResolvedPath) -> Self {
        self.paths.insert(name.into(), path);
        self
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    pub fn str_opt(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(Value::as_str)
    }

    pub fn require_str(&self, name: &str) -> Result<&str, ToolError> {
        self.str_opt(name).ok_or_else(|| self.invalid(name, "is required"))
    }

    pub fn u64_opt(&self, name: &str) -> Option<u64> {
        self.args.get(name).and_then(Value::as_u64)
    }

    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        self.args.get(name).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn array(&self, name: &str) -> Option<&Vec<Value>> {
        self.args.get(name).and_then(Value::as_array)
    }

    /// A resolved path argument.
    pub fn path(&self, name: &str) -> Result<&ResolvedPath, ToolError> {
        self.paths
            .get(name)
            .ok_or_else(|| self.invalid(name, "must be a path inside the workspace"))
    }

    pub fn paths(&self) -> impl Iterator<Item = &ResolvedPath> {
        self.paths.values()
    }

    pub fn invalid(&self, field: &str, message: &str) -> ToolError {
        ToolError::InvalidArguments {
            tool: self.tool.clone(),
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Why a call failed, in the shape fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    /// The call that was attempted, `tool {args}`.
    pub attempted: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ErrorDetail {
    pub fn from_error(request: &ToolCallRequest, err: &ToolError) -> Self {
        Self {
            kind: err.kind(),
            attempted: format!("{} {}", request.tool_name, request.arguments),
            reason: err.reason(),
            suggestion: err.suggestion(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "Tool call failed.\nAttempted: {}\nReason: {}",
            self.attempted, self.reason
        );
        if let Some(suggestion) = &self.suggestion {
            out.push_str("\nTry instead: ");
            out.push_str(suggestion);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok { payload: ToolPayload },
    Error { detail: ErrorDetail },
}

/// The result of a tool execution. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    pub tool_name: String,

    pub outcome: ToolOutcome,

    /// Workspace-relative paths the call touched
    #[serde(default)]
    pub side_effects: BTreeSet<String>,

    /// Subset of `side_effects` that did not exist before the call
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub created: BTreeSet<String>,
}

impl ToolResult {
    pub fn ok(
        request: &ToolCallRequest,
        payload: ToolPayload,
        side_effects: BTreeSet<String>,
    ) -> Self {
        Self {
            call_id: request.id.clone(),
            tool_name: request.tool_name.clone(),
            outcome: ToolOutcome::Ok { payload },
            side_effects,
            created: BTreeSet::new(),
        }
    }

    pub fn with_created(mut self, created: BTreeSet<String>) -> Self {
        self.created = created;
        self
    }

    pub fn error(request: &ToolCallRequest, detail: ErrorDetail) -> Self {
        Self {
            call_id: request.id.clone(),
            tool_name: request.tool_name.clone(),
            outcome: ToolOutcome::Error { detail },
            side_effects: BTreeSet::new(),
            created: BTreeSet::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Ok { .. })
    }

    pub fn payload(&self) -> Option<&ToolPayload> {
        match &self.outcome {
            ToolOutcome::Ok { payload } => Some(payload),
            ToolOutcome::Error { .. } => None,
        }
    }

    pub fn error_detail(&self) -> Option<&ErrorDetail> {
        match &self.outcome {
            ToolOutcome::Ok { .. } => None,
            ToolOutcome::Error { detail } => Some(detail),
        }
    }

    /// The tool-result message appended to the conversation.
    pub fn to_message(&self) -> Message {
        let msg = match &self.outcome {
            ToolOutcome::Ok { payload } => {
                let body = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
                Message::tool_result(&self.call_id, &self.tool_name, body)
                    .with_payload(payload.to_value())
            }
            ToolOutcome::Error { detail } => {
                Message::tool_result(&self.call_id, &self.tool_name, detail.render()).as_error()
            }
        };
        msg.with_files(self.side_effects.iter().cloned())
    }
}

/// The core Tool trait.
///
/// Each tool (read_file, grep, run_command, etc.) implements this trait.
/// Tools are registered in the ToolRegistry and reached through the
/// dispatcher, never called directly by the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    fn input_schema(&self) -> Schema;

    fn output_schema(&self) -> Schema;

    fn effect(&self) -> ToolEffect {
        ToolEffect::ReadOnly
    }

    /// Names of arguments that hold workspace paths. The dispatcher resolves
    /// and bounds-checks them before `execute` runs.
    fn path_params(&self) -> &'static [&'static str] {
        &[]
    }

    /// Execute the tool. The returned value must satisfy `output_schema`.
    async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.input_schema().to_json_schema(),
        }
    }
}

/// A registry of available tools.
///
/// Pure lookup: adding a tool means registering a new implementation,
/// never touching the dispatcher.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
