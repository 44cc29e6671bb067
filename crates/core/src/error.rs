//! Error types for the codeloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the agent loop only ever
//! needs to ask a [`ToolError`] whether it is fatal.

use thiserror::Error;

/// The top-level error type for all codeloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Todo list errors ---
    #[error("Todo error: {0}")]
    Todo(#[from] TodoError),

    // --- Schema errors ---
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Persistence ---
    #[error("Storage error: {0}")]
    Storage(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Failure modes of a single tool call.
///
/// The split between recoverable and fatal variants drives the agent loop:
/// recoverable errors are fed back to the model on the next request, fatal
/// ones end the task immediately.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The model asked for a tool that is not registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: field '{field}' {message}")]
    InvalidArguments {
        tool: String,
        field: String,
        message: String,
    },

    #[error("{tool} failed: {reason}")]
    Execution {
        tool: String,
        reason: String,
        suggestion: Option<String>,
    },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("Boundary violation in {tool}: {reason}")]
    BoundaryViolation { tool: String, reason: String },

    #[error("Invariant violation in {tool}: {reason}")]
    InvariantViolation { tool: String, reason: String },

    /// The executor produced output its own schema rejects.
    #[error("Output of {tool} does not match its schema: {detail}")]
    OutputSchemaMismatch { tool: String, detail: String },
}

impl ToolError {
    /// Shorthand for a recoverable execution failure.
    pub fn execution(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.into(),
            reason: reason.into(),
            suggestion: None,
        }
    }

    pub fn boundary(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BoundaryViolation {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Attach a remediation hint. Only execution failures carry one; other
    /// variants are returned unchanged.
    pub fn with_suggestion(self, hint: impl Into<String>) -> Self {
        match self {
            Self::Execution { tool, reason, .. } => Self::Execution {
                tool,
                reason,
                suggestion: Some(hint.into()),
            },
            other => other,
        }
    }

    /// Fatal errors end the task; everything else is reported back to the model.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownTool(_)
                | Self::BoundaryViolation { .. }
                | Self::InvariantViolation { .. }
                | Self::OutputSchemaMismatch { .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTool(_) => ErrorKind::UnknownTool,
            Self::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::BoundaryViolation { .. } => ErrorKind::BoundaryViolation,
            Self::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            Self::OutputSchemaMismatch { .. } => ErrorKind::OutputSchemaMismatch,
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            Self::UnknownTool(name) => name,
            Self::InvalidArguments { tool, .. }
            | Self::Execution { tool, .. }
            | Self::Timeout { tool, .. }
            | Self::BoundaryViolation { tool, .. }
            | Self::InvariantViolation { tool, .. }
            | Self::OutputSchemaMismatch { tool, .. } => tool,
        }
    }

    /// The bare cause, without the tool-name prefix used by `Display`.
    pub fn reason(&self) -> String {
        match self {
            Self::UnknownTool(name) => format!("no tool named '{name}' is registered"),
            Self::InvalidArguments { field, message, .. } => format!("field '{field}' {message}"),
            Self::Execution { reason, .. } => reason.clone(),
            Self::Timeout { timeout_secs, .. } => format!("timed out after {timeout_secs}s"),
            Self::BoundaryViolation { reason, .. }
            | Self::InvariantViolation { reason, .. } => reason.clone(),
            Self::OutputSchemaMismatch { detail, .. } => detail.clone(),
        }
    }

    /// A single alternative the model could try instead.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Execution { suggestion, .. } => suggestion.clone(),
            Self::InvalidArguments { field, .. } => {
                Some(format!("Call the tool again with a valid '{field}' argument."))
            }
            Self::Timeout { .. } => {
                Some("Run a narrower command or raise timeout_secs.".to_string())
            }
            _ => None,
        }
    }
}

/// Coarse classification of a [`ToolError`], serializable into events and
/// tool-result payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownTool,
    InvalidArguments,
    Execution,
    Timeout,
    BoundaryViolation,
    InvariantViolation,
    OutputSchemaMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TodoError {
    #[error("todo '{0}' does not exist")]
    NotFound(String),

    #[error("{0}")]
    InvariantViolation(String),
}

impl TodoError {
    /// Lift into a tool failure. Unknown ids are the model's mistake and
    /// recoverable; invariant violations are fatal.
    pub fn into_tool_error(self, tool: &str) -> ToolError {
        match self {
            Self::NotFound(id) => ToolError::execution(tool, format!("todo '{id}' does not exist"))
                .with_suggestion("List the todos to see valid ids."),
            Self::InvariantViolation(reason) => ToolError::InvariantViolation {
                tool: tool.to_string(),
                reason,
            },
        }
    }
}

/// A value failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("field '{0}' is required")]
    MissingField(String),

    #[error("field '{field}' expected {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("field '{0}' is not declared")]
    UnexpectedField(String),

    #[error("expected an object, got {0}")]
    NotAnObject(String),
}

impl SchemaError {
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField(field) | Self::UnexpectedField(field) => field,
            Self::TypeMismatch { field, .. } => field,
            Self::NotAnObject(_) => "arguments",
        }
    }
}
