//! The agent loop: one goal from start to a terminal state.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use codeloop_config::AppConfig;
use codeloop_core::provider::is_completion;
use codeloop_core::{
    Action, COMPLETION_TOOL, DomainEvent, ErrorDetail, ErrorKind, EventBus, FailureReport, Message,
    Provider, SharedTodos, Task, TaskOutcome, TaskPhase, TaskStatus, ToolCallRequest, ToolError,
    ToolResult,
};
use codeloop_memory::{
    TaskMemory, TaskMemoryEntry, has_back_reference, render_recall, resolve_file_reference,
};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::context::{ConversationState, RequestAssembler, RequestInput, project};
use crate::dispatcher::{Dispatcher, Prepared};
use crate::scheduler::plan_waves;
use crate::tracker::UsageOutcome;

const REPEATED_FAILURE: &str =
    "this exact call already failed earlier in this task, so it was not run again";

/// Drives tasks against one provider and one dispatcher.
///
/// The loop owns no cross-task state except through the dispatcher's
/// usage tracker; Task Memory is passed into each run by the host.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    dispatcher: Dispatcher,
    assembler: RequestAssembler,
    todos: SharedTodos,
    event_bus: Arc<EventBus>,
    /// Maximum LLM requests per task
    max_iterations: u32,
    history_window: usize,
    history_token_budget: Option<usize>,
    max_parallel_tools: usize,
    recall_limit: usize,
}

/// How the iteration phase ended.
enum Ending {
    Completed(String),
    Failed(FailureReport),
    BudgetExhausted,
}

/// Everything a single task accumulates.
struct TaskState {
    conversation: ConversationState,
    failed_signatures: HashSet<String>,
    created: BTreeSet<String>,
}

/// Per-task context that does not change between iterations.
struct TaskPrompt {
    project: Option<String>,
    recall: String,
    reference_hint: Option<String>,
}

/// A call's answer, waiting to be appended in request order.
enum Settled {
    Executed { result: ToolResult, duration_ms: u64 },
    Deferred(Message),
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        dispatcher: Dispatcher,
        todos: SharedTodos,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            assembler: RequestAssembler::new("", 0.2, None),
            todos,
            event_bus,
            max_iterations: 25,
            history_window: 12,
            history_token_budget: None,
            max_parallel_tools: 4,
            recall_limit: 5,
        }
    }

    /// Apply model, sampling and `[agent]` settings.
    pub fn with_config(self, config: &AppConfig) -> Self {
        self.with_sampling(&config.model, config.temperature, Some(config.max_tokens))
            .with_max_iterations(config.agent.max_iterations)
            .with_history(config.agent.history_window, config.agent.history_token_budget)
            .with_max_parallel_tools(config.agent.max_parallel_tools)
            .with_recall_limit(config.agent.recall_limit)
    }

    pub fn with_sampling(mut self, model: &str, temperature: f32, max_tokens: Option<u32>) -> Self {
        self.assembler = RequestAssembler::new(model, temperature, max_tokens);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Keep `window` raw messages, folding early above `token_budget`.
    pub fn with_history(mut self, window: usize, token_budget: Option<usize>) -> Self {
        self.history_window = window;
        self.history_token_budget = token_budget;
        self
    }

    pub fn with_max_parallel_tools(mut self, max: usize) -> Self {
        self.max_parallel_tools = max.max(1);
        self
    }

    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn todos(&self) -> &SharedTodos {
        &self.todos
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run one goal to completion, failure or budget exhaustion.
    ///
    /// Completed and aborted tasks are archived into `memory`. Provider
    /// and fatal tool errors end the task as `Failed`; they are reported
    /// in the outcome rather than returned as `Err`.
    pub async fn run_task(&self, goal: &str, memory: &mut TaskMemory) -> TaskOutcome {
        let goal = goal.trim();
        let mut task = Task::new(goal);
        info!(task_id = %task.id, goal, "Task started");
        self.event_bus.publish(DomainEvent::TaskStarted {
            task_id: task.id.clone(),
            goal: goal.to_string(),
            timestamp: Utc::now(),
        });

        self.dispatcher.begin_task();
        self.todos.lock().await.clear();

        let prompt = {
            let recalled = memory.relevant(goal, self.recall_limit);
            let reference_hint = if has_back_reference(goal) {
                resolve_file_reference(&recalled).map(str::to_string)
            } else {
                None
            };
            debug!(
                task_id = %task.id,
                recalled = recalled.len(),
                reference = ?reference_hint,
                "Recalled memory"
            );
            TaskPrompt {
                project: project::detect(self.dispatcher.workspace().root()).describe(),
                recall: render_recall(&recalled),
                reference_hint,
            }
        };

        let mut state = TaskState {
            conversation: ConversationState::new(Message::user(goal), self.history_window)
                .with_token_budget(self.history_token_budget),
            failed_signatures: HashSet::new(),
            created: BTreeSet::new(),
        };

        let ending = self.drive(&mut task, &mut state, &prompt).await;
        self.finish(task, state, ending, memory).await
    }

    async fn drive(&self, task: &mut Task, state: &mut TaskState, prompt: &TaskPrompt) -> Ending {
        advance(task, TaskPhase::Iterating);

        loop {
            if task.iteration_count >= self.max_iterations {
                let budget = self.max_iterations;
                warn!(task_id = %task.id, budget, "Iteration budget exhausted");
                return Ending::BudgetExhausted;
            }
            task.iteration_count += 1;
            let iteration = task.iteration_count;
            self.event_bus.publish(DomainEvent::IterationStarted {
                task_id: task.id.clone(),
                iteration,
                timestamp: Utc::now(),
            });

            let hints = self.dispatcher.hints();
            let todos = self.todos.lock().await.render();
            let window = state.conversation.window();
            let tools = self.dispatcher.registry().definitions();
            let assembled = self.assembler.assemble(&RequestInput {
                workspace: self.dispatcher.workspace().root(),
                project: prompt.project.as_deref(),
                recall: &prompt.recall,
                reference_hint: prompt.reference_hint.as_deref(),
                tool_hints: &hints,
                todos: &todos,
                window: &window,
                tools: &tools,
            });
            debug!(
                task_id = %task.id,
                iteration,
                messages = assembled.request.messages.len(),
                estimated_tokens = assembled.metadata.total_tokens,
                "Sending request"
            );

            let response = match self.provider.complete(assembled.request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(task_id = %task.id, iteration, error = %e, "Provider request failed");
                    return Ending::Failed(FailureReport {
                        attempted: format!(
                            "request {iteration} to provider '{}'",
                            self.provider.name()
                        ),
                        error: e.to_string(),
                    });
                }
            };

            let action = response.action();
            self.append(task, state, response.message);

            match action {
                Action::Complete { summary } => return Ending::Completed(summary),
                Action::ToolCalls(calls) => {
                    let count = calls.len();
                    debug!(task_id = %task.id, iteration, calls = count, "Dispatching tool calls");
                    advance(task, TaskPhase::AwaitingToolResult);
                    if let Err(failure) = self.run_calls(task, state, calls).await {
                        return Ending::Failed(failure);
                    }
                    advance(task, TaskPhase::Iterating);
                }
            }
        }
    }

    /// Dispatch one response's calls and append their results in request
    /// order. `Err` carries the first fatal error; results settled before it
    /// are appended first.
    async fn run_calls(
        &self,
        task: &Task,
        state: &mut TaskState,
        calls: Vec<ToolCallRequest>,
    ) -> Result<(), FailureReport> {
        let signatures: Vec<String> = calls.iter().map(ToolCallRequest::signature).collect();
        let mut settled: Vec<Option<Settled>> = calls.iter().map(|_| None).collect();
        let mut ready = Vec::new();

        // Prepare sequentially so confirmations are asked one at a time.
        for (i, call) in calls.into_iter().enumerate() {
            if is_completion(&call) {
                settled[i] = Some(Settled::Deferred(deferred_completion(&call)));
                continue;
            }
            if state.failed_signatures.contains(&signatures[i]) {
                warn!(task_id = %task.id, tool = %call.tool_name, "Refusing repeated failed call");
                self.dispatcher
                    .record(&call.tool_name, &UsageOutcome::Failure(REPEATED_FAILURE.to_string()));
                settled[i] = Some(Settled::Executed {
                    result: repeated_failure(&call),
                    duration_ms: 0,
                });
                continue;
            }

            let attempted = call.clone();
            match self.dispatcher.prepare(call).await {
                Ok(Prepared::Ready(prepared)) => ready.push((i, prepared)),
                Ok(Prepared::Rejected(result)) => {
                    settled[i] = Some(Settled::Executed { result, duration_ms: 0 });
                }
                Err(e) => {
                    let report = self.fatal(task, &attempted, &e);
                    self.merge(task, state, settled, &signatures);
                    return Err(report);
                }
            }
        }

        let footprints: Vec<_> = ready.iter().map(|(_, prepared)| prepared.footprint()).collect();
        let waves = plan_waves(&footprints);
        let mut pending: Vec<_> = ready.into_iter().map(Some).collect();

        for wave in waves {
            let batch: Vec<_> = wave.iter().filter_map(|&j| pending[j].take()).collect();
            debug!(task_id = %task.id, size = batch.len(), "Running wave");

            let outcomes: Vec<_> = stream::iter(batch.into_iter().map(|(i, prepared)| async move {
                let request = prepared.request.clone();
                let started = Instant::now();
                let result = self.dispatcher.execute(prepared).await;
                (i, request, started.elapsed().as_millis() as u64, result)
            }))
            .buffered(self.max_parallel_tools)
            .collect()
            .await;

            let mut fatal = None;
            for (i, request, duration_ms, result) in outcomes {
                match result {
                    Ok(result) => settled[i] = Some(Settled::Executed { result, duration_ms }),
                    Err(e) => {
                        let (tool, id) = (&request.tool_name, &request.id);
                        self.publish_tool(task, tool, id, false, duration_ms);
                        fatal.get_or_insert_with(|| self.fatal(task, &request, &e));
                    }
                }
            }
            if let Some(report) = fatal {
                // Calls that already ran keep their side effects on record.
                self.merge(task, state, settled, &signatures);
                return Err(report);
            }
        }

        self.merge(task, state, settled, &signatures);
        Ok(())
    }

    /// Append settled results in request order, tracking created files and
    /// failed signatures.
    fn merge(
        &self,
        task: &Task,
        state: &mut TaskState,
        settled: Vec<Option<Settled>>,
        signatures: &[String],
    ) {
        for (i, slot) in settled.into_iter().enumerate() {
            match slot {
                Some(Settled::Executed { result, duration_ms }) => {
                    let (tool, id) = (&result.tool_name, &result.call_id);
                    self.publish_tool(task, tool, id, result.is_ok(), duration_ms);
                    if result.is_ok() {
                        state.created.extend(result.created.iter().cloned());
                    } else {
                        state.failed_signatures.insert(signatures[i].clone());
                    }
                    self.append(task, state, result.to_message());
                }
                Some(Settled::Deferred(message)) => self.append(task, state, message),
                None => {}
            }
        }
    }

    fn fatal(&self, task: &Task, request: &ToolCallRequest, err: &ToolError) -> FailureReport {
        warn!(
            task_id = %task.id,
            tool = %request.tool_name,
            error = %err,
            "Fatal error, ending task"
        );
        FailureReport {
            attempted: format!("{} {}", request.tool_name, request.arguments),
            error: err.to_string(),
        }
    }

    fn append(&self, task: &Task, state: &mut TaskState, message: Message) {
        let folded = state.conversation.append(message);
        if folded > 0 {
            debug!(task_id = %task.id, folded, "Folded history into summary");
            self.event_bus.publish(DomainEvent::HistoryCompressed {
                task_id: task.id.clone(),
                folded,
                timestamp: Utc::now(),
            });
        }
    }

    fn publish_tool(
        &self,
        task: &Task,
        tool: &str,
        call_id: &str,
        success: bool,
        duration_ms: u64,
    ) {
        self.event_bus.publish(DomainEvent::ToolExecuted {
            task_id: task.id.clone(),
            tool_name: tool.to_string(),
            call_id: call_id.to_string(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    async fn finish(
        &self,
        mut task: Task,
        state: TaskState,
        ending: Ending,
        memory: &mut TaskMemory,
    ) -> TaskOutcome {
        let open_todos: Vec<String> = {
            let mut todos = self.todos.lock().await;
            let open = todos.unfinished().iter().map(|t| t.content.clone()).collect();
            todos.clear();
            open
        };
        let touched = state.conversation.files_touched();
        let iterations = task.iteration_count;

        let (summary, failure, unfinished) = match ending {
            Ending::Completed(summary) => {
                advance(&mut task, TaskPhase::Completed);
                (summary, None, Vec::new())
            }
            Ending::Failed(report) => {
                advance(&mut task, TaskPhase::Failed);
                let summary = state.conversation.last_agent_text().unwrap_or_default().to_string();
                (summary, Some(report), open_todos)
            }
            Ending::BudgetExhausted => {
                advance(&mut task, TaskPhase::Aborted);
                let mut summary = format!("Stopped after {iterations} requests without finishing.");
                if let Some(note) = state.conversation.last_agent_text() {
                    summary.push_str(" Last progress note: ");
                    summary.push_str(note);
                }
                let mut unfinished = open_todos;
                unfinished.extend(
                    state
                        .conversation
                        .open_issues()
                        .into_iter()
                        .map(|issue| format!("unresolved: {issue}")),
                );
                (summary, None, unfinished)
            }
        };

        let status = task.status();
        if matches!(status, TaskStatus::Completed | TaskStatus::Aborted) {
            let entry = TaskMemoryEntry::new(task.goal.clone(), summary.clone(), status)
                .with_files(touched.iter().cloned())
                .with_created(state.created.iter().cloned())
                .with_iterations(iterations);
            if let Err(e) = memory.remember(entry) {
                warn!(task_id = %task.id, error = %e, "Failed to persist task memory");
            }
        }

        info!(task_id = %task.id, %status, iterations, files = touched.len(), "Task finished");
        self.event_bus.publish(DomainEvent::TaskFinished {
            task_id: task.id.clone(),
            status,
            iterations,
            timestamp: Utc::now(),
        });

        TaskOutcome {
            task_id: task.id,
            goal: task.goal,
            status,
            summary,
            iterations,
            files_touched: touched.into_iter().collect(),
            failure,
            unfinished,
        }
    }
}

fn advance(task: &mut Task, phase: TaskPhase) {
    if let Err(e) = task.transition(phase) {
        warn!(task_id = %task.id, error = %e, "Ignoring task transition");
    }
}

fn deferred_completion(call: &ToolCallRequest) -> Message {
    Message::tool_result(
        &call.id,
        COMPLETION_TOOL,
        "Not finished yet: task_complete was called together with other tools. \
         Check their results first, then call task_complete on its own.",
    )
}

fn repeated_failure(call: &ToolCallRequest) -> ToolResult {
    ToolResult::error(
        call,
        ErrorDetail {
            kind: ErrorKind::Execution,
            attempted: format!("{} {}", call.tool_name, call.arguments),
            reason: REPEATED_FAILURE.to_string(),
            suggestion: Some("Change the arguments or use a different tool.".to_string()),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codeloop_config::ToolsConfig;
    use codeloop_core::{
        FieldType, MessageToolCall, ProviderError, ProviderRequest, ProviderResponse, Role, Schema,
        TodoList, Tool, ToolEffect, ToolRegistry, ValidatedInput,
    };
    use codeloop_security::{CommandPolicy, Workspace};
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Fallback = Box<dyn Fn(usize) -> Message + Send + Sync>;

    /// Replays queued replies, then the fallback; records every request.
    struct Scripted {
        replies: Mutex<VecDeque<Message>>,
        fallback: Option<Fallback>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Message>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                fallback: None,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn forever(make: impl Fn(usize) -> Message + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::new()),
                fallback: Some(Box::new(make)),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ProviderRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            let n = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(request);
                requests.len()
            };
            let next = self.replies.lock().unwrap().pop_front();
            let message = match (next, &self.fallback) {
                (Some(message), _) => message,
                (None, Some(make)) => make(n),
                (None, None) => {
                    return Err(ProviderError::MalformedResponse("script exhausted".into()));
                }
            };
            Ok(ProviderResponse {
                message,
                usage: None,
                model: "scripted".into(),
            })
        }
    }

    fn calls(list: &[(&str, &str, Value)]) -> Message {
        Message::agent("").with_tool_calls(
            list.iter()
                .map(|(id, name, args)| MessageToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: args.to_string(),
                })
                .collect(),
        )
    }

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta\n").unwrap();
        let ws = Workspace::new(dir.path(), vec![".git".into()]).unwrap();
        (dir, ws)
    }

    fn agent(ws: Workspace, provider: Arc<Scripted>) -> AgentLoop {
        let todos = TodoList::shared();
        let registry = codeloop_tools::default_registry(
            &ToolsConfig::default(),
            ws.root(),
            CommandPolicy::default(),
            todos.clone(),
        );
        let events = Arc::new(EventBus::default());
        AgentLoop::new(provider, Dispatcher::new(registry, ws), todos, events)
    }

    fn tool_messages(request: &ProviderRequest) -> Vec<&Message> {
        request.messages.iter().filter(|m| m.role == Role::ToolResult).collect()
    }

    #[tokio::test]
    async fn plain_text_completes_and_is_archived() {
        let (_dir, ws) = workspace();
        let provider = Scripted::new(vec![
            calls(&[("c1", "read_file", json!({"path": "a.txt"}))]),
            Message::agent("Read a.txt, it says alpha."),
        ]);
        let agent = agent(ws, provider.clone());
        let mut memory = TaskMemory::new();

        let outcome = agent.run_task("what is in a.txt", &mut memory).await;
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.summary, "Read a.txt, it says alpha.");
        assert_eq!(outcome.iterations, 2);
        assert!(outcome.files_touched.contains("a.txt"));

        let entry = memory.entries().last().unwrap();
        assert_eq!(entry.files_touched, vec!["a.txt"]);
        assert_eq!(entry.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn completion_tool_carries_summary() {
        let (_dir, ws) = workspace();
        let done = calls(&[("c1", COMPLETION_TOOL, json!({"summary": "nothing to do"}))]);
        let provider = Scripted::new(vec![done]);
        let outcome = agent(ws, provider).run_task("check", &mut TaskMemory::new()).await;
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.summary, "nothing to do");
    }

    #[tokio::test]
    async fn missing_file_reason_reaches_next_request() {
        let (_dir, ws) = workspace();
        let provider = Scripted::new(vec![
            calls(&[("c1", "read_file", json!({"path": "missing.py"}))]),
            Message::agent("The file does not exist."),
        ]);
        let outcome = agent(ws, provider.clone())
            .run_task("read missing.py", &mut TaskMemory::new())
            .await;
        assert_eq!(outcome.status, TaskStatus::Completed);

        let requests = provider.requests();
        let results = tool_messages(&requests[1]);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_error);
        let content = &results[0].content;
        assert!(content.contains("Reason: file not found: missing.py"), "{content}");
        assert!(results[0].content.contains("find_files"));
    }

    #[tokio::test]
    async fn budget_aborts_without_an_extra_request() {
        let (_dir, ws) = workspace();
        let provider =
            Scripted::forever(|n| calls(&[(format!("c{n}").as_str(), "list_files", json!({}))]));
        let agent = agent(ws, provider.clone()).with_max_iterations(5);

        let outcome = agent.run_task("never finishes", &mut TaskMemory::new()).await;
        assert_eq!(outcome.status, TaskStatus::Aborted);
        assert_eq!(outcome.iterations, 5);
        assert_eq!(provider.requests().len(), 5);
        assert!(outcome.summary.contains("Stopped after 5 requests"));
    }

    #[tokio::test]
    async fn repeated_failed_call_is_not_executed() {
        let (_dir, ws) = workspace();
        let provider = Scripted::new(vec![
            calls(&[("c1", "read_file", json!({"path": "gone.txt"}))]),
            calls(&[("c2", "read_file", json!({"path": "gone.txt"}))]),
            Message::agent("giving up"),
        ]);
        let agent = agent(ws, provider.clone());
        agent.run_task("read gone.txt", &mut TaskMemory::new()).await;

        let requests = provider.requests();
        let last = tool_messages(&requests[2]);
        let refused = last.iter().find(|m| m.tool_call_id.as_deref() == Some("c2")).unwrap();
        assert!(refused.content.contains("already failed"));

        let tracker = agent.dispatcher().tracker().lock().unwrap();
        let record = tracker.task_record("read_file").unwrap();
        assert_eq!(record.failures, 2);
        assert_eq!(record.attempts, record.successes + record.failures);
    }

    #[tokio::test]
    async fn failure_hints_reach_the_system_message() {
        let (_dir, ws) = workspace();
        let provider = Scripted::new(vec![
            calls(&[("c1", "read_file", json!({"path": "x1.txt"}))]),
            calls(&[("c2", "read_file", json!({"path": "x2.txt"}))]),
            Message::agent("done"),
        ]);
        agent(ws, provider.clone()).run_task("read things", &mut TaskMemory::new()).await;

        let requests = provider.requests();
        assert!(!requests[1].messages[0].content.contains("Tool warnings"));
        assert!(requests[2].messages[0].content.contains("read_file has failed 2 times"));
    }

    #[tokio::test]
    async fn boundary_violation_fails_the_task() {
        let (_dir, ws) = workspace();
        let escape = calls(&[("c1", "read_file", json!({"path": "../../etc/passwd"}))]);
        let provider = Scripted::new(vec![escape]);
        let mut memory = TaskMemory::new();
        let outcome = agent(ws, provider.clone()).run_task("escape", &mut memory).await;

        assert_eq!(outcome.status, TaskStatus::Failed);
        let failure = outcome.failure.unwrap();
        assert!(failure.attempted.starts_with("read_file"));
        assert!(failure.error.contains("outside the workspace"), "{}", failure.error);
        assert_eq!(provider.requests().len(), 1);
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_fails_the_task() {
        let (_dir, ws) = workspace();
        let provider = Scripted::new(vec![calls(&[("c1", "teleport", json!({}))])]);
        let outcome = agent(ws, provider).run_task("go", &mut TaskMemory::new()).await;
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome.failure.unwrap().error.contains("teleport"));
    }

    #[tokio::test]
    async fn completion_mixed_with_calls_is_deferred() {
        let (_dir, ws) = workspace();
        let provider = Scripted::new(vec![
            calls(&[
                ("c1", "read_file", json!({"path": "a.txt"})),
                ("c2", COMPLETION_TOOL, json!({"summary": "too early"})),
            ]),
            Message::agent("now done"),
        ]);
        let outcome = agent(ws, provider.clone()).run_task("read a", &mut TaskMemory::new()).await;
        assert_eq!(outcome.summary, "now done");
        assert_eq!(outcome.iterations, 2);

        let requests = provider.requests();
        let results = tool_messages(&requests[1]);
        assert_eq!(results[1].tool_call_id.as_deref(), Some("c2"));
        assert!(results[1].content.contains("Not finished yet"));
    }

    #[tokio::test]
    async fn abort_reports_unfinished_todos_and_clears_them() {
        let (_dir, ws) = workspace();
        let provider = Scripted::forever(|n| {
            if n == 1 {
                calls(&[(
                    "t1",
                    "manage_todos",
                    json!({
                        "action": "add",
                        "items": [{"content": "update callers"}, {"content": "write tests"}]
                    }),
                )])
            } else {
                calls(&[(format!("c{n}").as_str(), "list_files", json!({}))])
            }
        });
        let agent = agent(ws, provider).with_max_iterations(3);
        let mut memory = TaskMemory::new();
        let outcome = agent.run_task("refactor", &mut memory).await;

        assert_eq!(outcome.status, TaskStatus::Aborted);
        assert_eq!(outcome.unfinished, vec!["update callers", "write tests"]);
        assert!(agent.todos().lock().await.is_empty());
        assert!(outcome.report().contains("write tests"));
        assert_eq!(memory.entries().last().unwrap().status, TaskStatus::Aborted);
    }

    #[tokio::test]
    async fn that_file_resolves_through_memory() {
        let (_dir, ws) = workspace();
        let mut memory = TaskMemory::new();
        memory
            .remember(
                TaskMemoryEntry::new("create app", "created the app", TaskStatus::Completed)
                    .with_files(["src/app.py"]),
            )
            .unwrap();

        let provider = Scripted::new(vec![Message::agent("ok")]);
        agent(ws, provider.clone()).run_task("add tests for that file", &mut memory).await;

        let system = &provider.requests()[0].messages[0].content;
        assert!(system.contains("`src/app.py`"), "{system}");
        assert!(system.contains("create app"));
    }

    #[tokio::test]
    async fn window_stays_bounded_over_many_iterations() {
        let (_dir, ws) = workspace();
        let provider = Scripted::forever(|n| {
            calls(&[(format!("c{n}").as_str(), "read_file", json!({"path": "a.txt"}))])
        });
        let agent = agent(ws, provider.clone()).with_max_iterations(10).with_history(4, None);
        let mut events = agent.event_bus().subscribe();
        agent.run_task("loop", &mut TaskMemory::new()).await;

        for request in provider.requests() {
            // system + head + summary + K raw
            assert!(request.messages.len() <= 1 + 1 + 1 + 4);
        }
        let last = provider.requests().pop().unwrap();
        assert!(last.messages[2].content.starts_with("[Summary of"));

        let mut compressed = false;
        while let Ok(event) = events.try_recv() {
            compressed |= matches!(event.as_ref(), DomainEvent::HistoryCompressed { .. });
        }
        assert!(compressed);
    }

    #[tokio::test]
    async fn writes_are_recorded_as_created() {
        let (dir, ws) = workspace();
        let provider = Scripted::new(vec![
            calls(&[(
                "c1",
                "write_file",
                json!({"path": "src/new.rs", "content": "fn main() {}\n"}),
            )]),
            Message::agent("created src/new.rs"),
        ]);
        let mut memory = TaskMemory::new();
        agent(ws, provider).run_task("create a file", &mut memory).await;

        assert!(dir.path().join("src/new.rs").exists());
        let entry = memory.entries().last().unwrap();
        assert_eq!(entry.files_created, vec!["src/new.rs"]);
    }

    /// Sleeps briefly and records how many calls overlap.
    struct Gauge {
        effect: ToolEffect,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        /// Path on which the call ends with a fatal error.
        breaks_on: Option<&'static str>,
    }

    impl Gauge {
        fn new(effect: ToolEffect, peak: Arc<AtomicUsize>) -> Self {
            Self {
                effect,
                active: Arc::new(AtomicUsize::new(0)),
                peak,
                breaks_on: None,
            }
        }
    }

    #[async_trait]
    impl Tool for Gauge {
        fn name(&self) -> &str {
            "gauge"
        }
        fn description(&self) -> &str {
            "measures overlapping calls"
        }
        fn input_schema(&self) -> Schema {
            Schema::new().required("path", FieldType::String, "a path")
        }
        fn output_schema(&self) -> Schema {
            Schema::new().required("path", FieldType::String, "the path")
        }
        fn effect(&self) -> ToolEffect {
            self.effect
        }
        fn path_params(&self) -> &'static [&'static str] {
            &["path"]
        }
        async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let relative = input.path("path")?.relative.clone();
            if self.breaks_on == Some(relative.as_str()) {
                return Err(ToolError::InvariantViolation {
                    tool: "gauge".into(),
                    reason: format!("state of {relative} is inconsistent"),
                });
            }
            Ok(json!({ "path": relative }))
        }
    }

    /// The default tools plus `gauge`.
    fn gauged_agent(ws: Workspace, provider: Arc<Scripted>, gauge: Gauge) -> AgentLoop {
        let todos = TodoList::shared();
        let mut registry = codeloop_tools::default_registry(
            &ToolsConfig::default(),
            ws.root(),
            CommandPolicy::default(),
            todos.clone(),
        );
        registry.register(Box::new(gauge));
        let events = Arc::new(EventBus::default());
        AgentLoop::new(provider, Dispatcher::new(registry, ws), todos, events)
    }

    fn gauge_both(first: &str, second: &str) -> Arc<Scripted> {
        Scripted::new(vec![
            calls(&[
                ("c1", "gauge", json!({ "path": first })),
                ("c2", "gauge", json!({ "path": second })),
            ]),
            Message::agent("done"),
        ])
    }

    fn result_ids(request: &ProviderRequest) -> Vec<String> {
        tool_messages(request)
            .iter()
            .map(|m| m.tool_call_id.clone().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn independent_calls_run_concurrently_in_request_order() {
        let (_dir, ws) = workspace();
        let peak = Arc::new(AtomicUsize::new(0));
        let provider = gauge_both("a.txt", "b.txt");
        gauged_agent(ws, provider.clone(), Gauge::new(ToolEffect::ReadOnly, peak.clone()))
            .run_task("measure both", &mut TaskMemory::new())
            .await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(result_ids(&provider.requests()[1]), ["c1", "c2"]);
    }

    #[tokio::test]
    async fn single_lane_runs_sequentially() {
        let (_dir, ws) = workspace();
        let peak = Arc::new(AtomicUsize::new(0));
        let provider = gauge_both("a.txt", "b.txt");
        gauged_agent(ws, provider.clone(), Gauge::new(ToolEffect::ReadOnly, peak.clone()))
            .with_max_parallel_tools(1)
            .run_task("measure both", &mut TaskMemory::new())
            .await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(tool_messages(&provider.requests()[1]).len(), 2);
    }

    #[tokio::test]
    async fn writers_of_one_path_never_overlap() {
        let (_dir, ws) = workspace();
        let peak = Arc::new(AtomicUsize::new(0));
        let provider = gauge_both("a.txt", "a.txt");
        gauged_agent(ws, provider.clone(), Gauge::new(ToolEffect::Mutating, peak.clone()))
            .with_max_parallel_tools(4)
            .run_task("touch a twice", &mut TaskMemory::new())
            .await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(result_ids(&provider.requests()[1]), ["c1", "c2"]);
    }

    #[tokio::test]
    async fn read_after_write_in_one_reply_sees_new_content() {
        let (dir, ws) = workspace();
        let provider = Scripted::new(vec![
            calls(&[
                ("c1", "write_file", json!({"path": "a.txt", "content": "NEW\n"})),
                ("c2", "read_file", json!({"path": "a.txt"})),
            ]),
            Message::agent("rewrote a.txt"),
        ]);
        let outcome = agent(ws, provider.clone())
            .with_max_parallel_tools(4)
            .run_task("rewrite a.txt and check it", &mut TaskMemory::new())
            .await;
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "NEW\n");

        let requests = provider.requests();
        assert_eq!(result_ids(&requests[1]), ["c1", "c2"]);
        let read = tool_messages(&requests[1])[1];
        assert!(!read.is_error);
        assert!(read.content.contains("NEW"), "{}", read.content);
        assert!(!read.content.contains("alpha"), "{}", read.content);
    }

    #[tokio::test]
    async fn fatal_call_keeps_completed_siblings_on_record() {
        let (dir, ws) = workspace();
        let peak = Arc::new(AtomicUsize::new(0));
        let gauge = Gauge {
            breaks_on: Some("b.txt"),
            ..Gauge::new(ToolEffect::ReadOnly, peak)
        };
        let provider = Scripted::new(vec![calls(&[
            ("c1", "write_file", json!({"path": "c.txt", "content": "gamma\n"})),
            ("c2", "gauge", json!({"path": "b.txt"})),
        ])]);
        let outcome = gauged_agent(ws, provider, gauge)
            .run_task("write c and check b", &mut TaskMemory::new())
            .await;

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome.failure.unwrap().error.contains("inconsistent"));
        assert!(dir.path().join("c.txt").exists());
        assert!(outcome.files_touched.contains("c.txt"), "{:?}", outcome.files_touched);
    }
}
