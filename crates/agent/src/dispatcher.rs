//! Tool dispatch: lookup, validation, confinement, permission, execution.
//!
//! Dispatch is split in two so the loop can schedule a batch:
//! [`Dispatcher::prepare`] does everything up to execution (and is where
//! confirmations are asked, one call at a time); [`Dispatcher::execute`]
//! runs a prepared call and wraps its output. Both return `Err` only for
//! fatal errors; recoverable failures come back as error results.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use codeloop_core::{
    AutonomyLevel, ErrorDetail, Permission, SchemaError, Tool, ToolCallRequest, ToolError,
    ToolPayload, ToolRegistry, ToolResult, ValidatedInput,
};
use codeloop_security::Workspace;
use serde_json::Value;
use tracing::{debug, warn};

use crate::confirm::{self, Confirmer, DenyAll};
use crate::scheduler::Footprint;
use crate::tracker::{ToolUsageTracker, UsageOutcome};

/// A call that passed every check and is ready to run.
pub struct PreparedCall<'a> {
    pub request: ToolCallRequest,
    tool: &'a dyn Tool,
    input: ValidatedInput,
}

impl PreparedCall<'_> {
    pub fn footprint(&self) -> Footprint {
        Footprint::of(self.tool.effect(), self.input.paths())
    }
}

pub enum Prepared<'a> {
    Ready(PreparedCall<'a>),
    /// Rejected with a recoverable error; the result goes straight back to the model.
    Rejected(ToolResult),
}

pub struct Dispatcher {
    registry: ToolRegistry,
    workspace: Workspace,
    autonomy: AutonomyLevel,
    confirmer: Arc<dyn Confirmer>,
    tracker: Arc<Mutex<ToolUsageTracker>>,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, workspace: Workspace) -> Self {
        Self {
            registry,
            workspace,
            autonomy: AutonomyLevel::default(),
            confirmer: Arc::new(DenyAll),
            tracker: Arc::new(Mutex::new(ToolUsageTracker::new(2))),
        }
    }

    pub fn with_autonomy(mut self, level: AutonomyLevel) -> Self {
        self.autonomy = level;
        self
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = confirmer;
        self
    }

    /// Share a tracker owned by the host.
    pub fn with_tracker(mut self, tracker: Arc<Mutex<ToolUsageTracker>>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn tracker(&self) -> &Arc<Mutex<ToolUsageTracker>> {
        &self.tracker
    }

    pub fn begin_task(&self) {
        self.with_usage(|t| t.begin_task());
    }

    pub fn hints(&self) -> Vec<String> {
        self.with_usage(|t| t.hints())
    }

    pub fn record(&self, tool: &str, outcome: &UsageOutcome) {
        self.with_usage(|t| t.record(tool, outcome));
    }

    fn with_usage<R>(&self, f: impl FnOnce(&mut ToolUsageTracker) -> R) -> R {
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut tracker)
    }

    /// Prepare and execute a single call.
    pub async fn dispatch(&self, request: ToolCallRequest) -> Result<ToolResult, ToolError> {
        match self.prepare(request).await? {
            Prepared::Ready(call) => self.execute(call).await,
            Prepared::Rejected(result) => Ok(result),
        }
    }

    /// Look up the tool, validate arguments, resolve paths and check
    /// permission.
    pub async fn prepare(&self, request: ToolCallRequest) -> Result<Prepared<'_>, ToolError> {
        let Some(tool) = self.registry.get(&request.tool_name) else {
            let err = ToolError::UnknownTool(request.tool_name.clone());
            return self.settle(&request, err).map(Prepared::Rejected);
        };

        let args = match tool.input_schema().validate_input(&request.arguments) {
            Ok(args) => args,
            Err(e) => {
                let err = invalid_arguments(tool.name(), &e);
                return self.settle(&request, err).map(Prepared::Rejected);
            }
        };

        let mut input = ValidatedInput::new(tool.name(), args);
        for name in tool.path_params() {
            let Some(raw) = input.get(name).and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            match self.workspace.resolve(&raw) {
                Ok(path) => input = input.with_path(*name, path),
                Err(e) => {
                    let err = ToolError::boundary(tool.name(), e.to_string());
                    return self.settle(&request, err).map(Prepared::Rejected);
                }
            }
        }

        match self.autonomy.permission(tool.effect()) {
            Permission::Allowed => {}
            Permission::Denied => {
                let reason = format!("read-only mode does not allow {}", tool.name());
                let err = ToolError::boundary(tool.name(), reason);
                return self.settle(&request, err).map(Prepared::Rejected);
            }
            Permission::NeedsConfirmation => {
                let description = confirm::describe(&request);
                if !self.confirmer.confirm(&request, &description).await {
                    let reason = format!("confirmation refused for {description}");
                    let err = ToolError::boundary(tool.name(), reason);
                    return self.settle(&request, err).map(Prepared::Rejected);
                }
            }
        }

        Ok(Prepared::Ready(PreparedCall { request, tool, input }))
    }

    /// Run a prepared call and wrap its output into the output schema.
    pub async fn execute(&self, call: PreparedCall<'_>) -> Result<ToolResult, ToolError> {
        let PreparedCall { request, tool, input } = call;
        let effect = tool.effect();
        let paths: Vec<(String, PathBuf, bool)> = input
            .paths()
            .filter(|p| p.relative != ".")
            .map(|p| (p.relative.clone(), p.absolute.clone(), p.absolute.exists()))
            .collect();

        debug!(tool = %tool.name(), call_id = %request.id, "Executing tool");
        let raw = match tool.execute(input).await {
            Ok(raw) => raw,
            Err(e) => return self.settle(&request, e),
        };

        let payload = match ToolPayload::wrap(&tool.output_schema(), raw) {
            Ok(payload) => payload,
            Err(e) => {
                let err = ToolError::OutputSchemaMismatch {
                    tool: tool.name().to_string(),
                    detail: e.to_string(),
                };
                return self.settle(&request, err);
            }
        };

        let mut side_effects = BTreeSet::new();
        let mut created = BTreeSet::new();
        for (relative, absolute, existed) in paths {
            if effect.writes_workspace() {
                if !existed && absolute.exists() {
                    created.insert(relative.clone());
                }
                side_effects.insert(relative);
            } else if absolute.is_file() {
                side_effects.insert(relative);
            }
        }

        self.record(tool.name(), &UsageOutcome::Success);
        Ok(ToolResult::ok(&request, payload, side_effects).with_created(created))
    }

    /// Record a failure; fatal errors propagate, the rest become error results.
    fn settle(&self, request: &ToolCallRequest, err: ToolError) -> Result<ToolResult, ToolError> {
        self.record(&request.tool_name, &UsageOutcome::Failure(err.reason()));
        if err.is_fatal() {
            warn!(
                tool = %request.tool_name,
                call_id = %request.id,
                error = %err,
                "Fatal tool error"
            );
            return Err(err);
        }
        warn!(tool = %request.tool_name, call_id = %request.id, error = %err, "Tool call failed");
        Ok(ToolResult::error(request, ErrorDetail::from_error(request, &err)))
    }
}

fn invalid_arguments(tool: &str, err: &SchemaError) -> ToolError {
    let message = match err {
        SchemaError::MissingField(_) => "is required".to_string(),
        SchemaError::TypeMismatch { expected, found, .. } => {
            format!("expected {expected}, got {found}")
        }
        SchemaError::UnexpectedField(_) => "is not accepted".to_string(),
        SchemaError::NotAnObject(kind) => format!("must be a JSON object, got {kind}"),
    };
    ToolError::InvalidArguments {
        tool: tool.to_string(),
        field: err.field().to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::ApproveAll;
    use async_trait::async_trait;
    use codeloop_core::{ErrorKind, FieldType, Schema, ToolEffect};
    use serde_json::json;

    /// Writes nothing; returns whatever it was built with.
    struct Fixed {
        output: Value,
        effect: ToolEffect,
    }

    #[async_trait]
    impl Tool for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn description(&self) -> &str {
            "returns a fixed value"
        }
        fn input_schema(&self) -> Schema {
            Schema::new()
                .required("path", FieldType::String, "a path")
                .optional("count", FieldType::Integer, "a number")
        }
        fn output_schema(&self) -> Schema {
            Schema::new().required("value", FieldType::String, "the value")
        }
        fn effect(&self) -> ToolEffect {
            self.effect
        }
        fn path_params(&self) -> &'static [&'static str] {
            &["path"]
        }
        async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError> {
            input.path("path")?;
            Ok(self.output.clone())
        }
    }

    fn dispatcher(output: Value, effect: ToolEffect) -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Fixed { output, effect }));
        let ws = Workspace::new(dir.path(), vec![]).unwrap();
        (dir, Dispatcher::new(registry, ws))
    }

    fn call(args: Value) -> ToolCallRequest {
        ToolCallRequest::new("c1", "fixed", args)
    }

    #[tokio::test]
    async fn unknown_tool_is_fatal() {
        let (_dir, d) = dispatcher(json!({"value": "x"}), ToolEffect::ReadOnly);
        let err = d.dispatch(ToolCallRequest::new("c1", "nope", json!({}))).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "nope"));
    }

    #[tokio::test]
    async fn invalid_arguments_name_the_field() {
        let (_dir, d) = dispatcher(json!({"value": "x"}), ToolEffect::ReadOnly);
        let result = d.dispatch(call(json!({}))).await.unwrap();
        let detail = result.error_detail().unwrap();
        assert_eq!(detail.kind, ErrorKind::InvalidArguments);
        assert!(detail.reason.contains("path"), "{}", detail.reason);

        let result = d.dispatch(call(json!({"path": "a.txt", "count": "many"}))).await.unwrap();
        assert!(result.error_detail().unwrap().reason.contains("count"));
    }

    #[tokio::test]
    async fn coerced_arguments_pass() {
        let (_dir, d) = dispatcher(json!({"value": "x"}), ToolEffect::ReadOnly);
        let result = d.dispatch(call(json!({"path": "a.txt", "count": "3"}))).await.unwrap();
        assert!(result.is_ok());
        assert!(result.side_effects.contains("a.txt"));
    }

    #[tokio::test]
    async fn escaping_the_workspace_is_fatal() {
        let (_dir, d) = dispatcher(json!({"value": "x"}), ToolEffect::ReadOnly);
        let err = d.dispatch(call(json!({"path": "../../etc/passwd"}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BoundaryViolation);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn writing_through_a_dangling_link_is_fatal() {
        let (dir, d) = dispatcher(json!({"value": "x"}), ToolEffect::Mutating);
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("planted.txt");
        std::os::unix::fs::symlink(&target, dir.path().join("notes.txt")).unwrap();

        let err = d.dispatch(call(json!({"path": "notes.txt"}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BoundaryViolation);
        assert!(err.reason().contains("outside the workspace"), "{}", err.reason());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn output_mismatch_is_fatal() {
        let (_dir, d) = dispatcher(json!({"value": 42}), ToolEffect::ReadOnly);
        let err = d.dispatch(call(json!({"path": "a.txt"}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutputSchemaMismatch);
    }

    #[tokio::test]
    async fn read_tool_is_idempotent() {
        let (_dir, d) = dispatcher(json!({"value": "same"}), ToolEffect::ReadOnly);
        let first = d.dispatch(call(json!({"path": "a.txt"}))).await.unwrap();
        let second = d.dispatch(call(json!({"path": "a.txt"}))).await.unwrap();
        assert_eq!(first.payload(), second.payload());
    }

    #[tokio::test]
    async fn supervised_destructive_needs_confirmation() {
        let (_dir, d) = dispatcher(json!({"value": "x"}), ToolEffect::Destructive);
        let err = d.dispatch(call(json!({"path": "a.txt"}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BoundaryViolation);

        let d = d.with_confirmer(Arc::new(ApproveAll));
        assert!(d.dispatch(call(json!({"path": "a.txt"}))).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn read_only_rejects_writers() {
        let (_dir, d) = dispatcher(json!({"value": "x"}), ToolEffect::Mutating);
        let d = d.with_autonomy(AutonomyLevel::ReadOnly);
        let err = d.dispatch(call(json!({"path": "a.txt"}))).await.unwrap_err();
        assert!(err.reason().contains("read-only"));
    }

    #[tokio::test]
    async fn outcomes_are_tracked() {
        let (_dir, d) = dispatcher(json!({"value": "x"}), ToolEffect::ReadOnly);
        d.dispatch(call(json!({}))).await.unwrap();
        d.dispatch(call(json!({}))).await.unwrap();
        d.dispatch(call(json!({"path": "a.txt"}))).await.unwrap();

        let tracker = d.tracker().lock().unwrap();
        let record = tracker.task_record("fixed").unwrap();
        assert_eq!((record.attempts, record.successes, record.failures), (3, 1, 2));
    }

    #[tokio::test]
    async fn hints_follow_repeated_failures() {
        let (_dir, d) = dispatcher(json!({"value": "x"}), ToolEffect::ReadOnly);
        d.dispatch(call(json!({}))).await.unwrap();
        assert!(d.hints().is_empty());
        d.dispatch(call(json!({}))).await.unwrap();
        assert_eq!(d.hints().len(), 1);
        d.begin_task();
        assert!(d.hints().is_empty());
    }
}
