//! Wiring: config, workspace, tools, provider and memory for one session.

use std::error::Error;
use std::sync::{Arc, Mutex};

use codeloop_agent::{AgentLoop, Dispatcher, ToolUsageTracker};
use codeloop_config::AppConfig;
use codeloop_core::{EventBus, Provider, SharedTodos, TodoList, ToolRegistry};
use codeloop_memory::TaskMemory;
use codeloop_security::{CommandPolicy, PathValidationError, Workspace};
use tracing::info;

use crate::input::{LineInput, StdinConfirmer};

/// Process-wide state for a `run` or `repl` session.
pub struct Host {
    pub config: AppConfig,
    pub agent: AgentLoop,
    pub memory: TaskMemory,
    provider: Arc<dyn Provider>,
}

impl Host {
    pub fn build(input: &LineInput) -> Result<Self, Box<dyn Error>> {
        let config = load_config()?;
        let workspace = open_workspace(&config)?;
        let todos = TodoList::shared();
        let registry = registry(&config, &workspace, todos.clone());

        let threshold = config.agent.failure_hint_threshold;
        let tracker = Arc::new(Mutex::new(ToolUsageTracker::new(threshold)));
        let dispatcher = Dispatcher::new(registry, workspace)
            .with_autonomy(config.autonomy.level)
            .with_confirmer(Arc::new(StdinConfirmer::new(input.clone())))
            .with_tracker(tracker);

        let provider = codeloop_providers::build_from_config(&config)?;
        let events = Arc::new(EventBus::default());
        let agent =
            AgentLoop::new(provider.clone(), dispatcher, todos, events).with_config(&config);

        let memory = if config.memory.persist {
            TaskMemory::persistent(config.memory.resolved_path())
        } else {
            TaskMemory::new()
        };
        info!(
            workspace = %agent.dispatcher().workspace().root().display(),
            remembered = memory.len(),
            "Session ready"
        );

        Ok(Self {
            config,
            agent,
            memory,
            provider,
        })
    }

    /// A warning line when the provider cannot be reached.
    pub async fn provider_warning(&self) -> Option<String> {
        match self.provider.health_check().await {
            Ok(true) => None,
            Ok(false) => Some(format!(
                "  Warning: {} did not answer at {}; check base_url and the API key.",
                self.provider.name(),
                self.config.base_url.as_deref().unwrap_or("its default endpoint")
            )),
            Err(e) => Some(format!("  Warning: {} is unreachable: {e}", self.provider.name())),
        }
    }

    pub fn banner(&self) -> String {
        let mut tools = self.agent.dispatcher().registry().names();
        tools.sort_unstable();
        [
            format!("  Workspace: {}", self.agent.dispatcher().workspace().root().display()),
            format!("  Provider:  {} ({})", self.config.provider, self.config.model),
            format!("  Autonomy:  {:?}", self.config.autonomy.level),
            format!("  Tools:     {}", tools.join(", ")),
            format!("  Memory:    {} earlier tasks", self.memory.len()),
        ]
        .join("\n")
    }
}

pub fn load_config() -> Result<AppConfig, Box<dyn Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

pub fn open_workspace(config: &AppConfig) -> Result<Workspace, PathValidationError> {
    Workspace::new(
        config.autonomy.workspace_root(),
        config.autonomy.forbidden_paths.clone(),
    )
}

pub fn registry(config: &AppConfig, workspace: &Workspace, todos: SharedTodos) -> ToolRegistry {
    codeloop_tools::default_registry(
        &config.tools,
        workspace.root(),
        CommandPolicy::new(config.autonomy.blocked_commands.clone()),
        todos,
    )
}
