//! Configuration loading, validation, and management for codeloop.
//!
//! Loads configuration from `~/.codeloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use codeloop_core::AutonomyLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.codeloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the LLM endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider preset: "openrouter", "openai", "ollama", or "custom"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Override the preset's base URL (required for "custom")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-attempt timeout for LLM requests
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Extra attempts on rate limits, timeouts and 5xx responses
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Agent loop tuning
    #[serde(default)]
    pub agent: AgentConfig,

    /// Cross-task memory
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Autonomy and security settings
    #[serde(default)]
    pub autonomy: AutonomyConfig,

    /// Tool limits
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    2
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("agent", &self.agent)
            .field("memory", &self.memory)
            .field("autonomy", &self.autonomy)
            .field("tools", &self.tools)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// LLM requests allowed per task before it is aborted
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Raw messages kept after the head before older ones are folded
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Fold early once the retained tail exceeds this many estimated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_token_budget: Option<usize>,

    /// Tool calls from one response that may run at once (1 = sequential)
    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,

    /// Past tasks offered to the model as context
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Consecutive failures before a tool gets a warning hint
    #[serde(default = "default_failure_hint_threshold")]
    pub failure_hint_threshold: u32,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_history_window() -> usize {
    12
}
fn default_max_parallel_tools() -> usize {
    4
}
fn default_recall_limit() -> usize {
    5
}
fn default_failure_hint_threshold() -> u32 {
    2
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            history_window: default_history_window(),
            history_token_budget: None,
            max_parallel_tools: default_max_parallel_tools(),
            recall_limit: default_recall_limit(),
            failure_hint_threshold: default_failure_hint_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Write completed tasks to disk so they survive a restart
    #[serde(default = "default_true")]
    pub persist: bool,

    /// JSONL file; defaults to `~/.codeloop/memory/tasks.jsonl`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            persist: true,
            path: None,
        }
    }
}

impl MemoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("memory").join("tasks.jsonl"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomyConfig {
    #[serde(default)]
    pub level: AutonomyLevel,

    /// Workspace root; defaults to the current directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,

    /// Workspace-relative prefixes no tool may touch
    #[serde(default = "default_forbidden_paths")]
    pub forbidden_paths: Vec<String>,

    /// Commands `run_command` refuses, matched as whole words
    #[serde(default = "default_blocked_commands")]
    pub blocked_commands: Vec<String>,
}

fn default_forbidden_paths() -> Vec<String> {
    vec![".git".into()]
}

fn default_blocked_commands() -> Vec<String> {
    [
        "sudo", "su", "ssh", "scp", "rm -rf", "reboot", "shutdown", "poweroff", "passwd",
        "chmod 777", "chown", "dd", "mkfs", "fdisk",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            level: AutonomyLevel::default(),
            workspace: None,
            forbidden_paths: default_forbidden_paths(),
            blocked_commands: default_blocked_commands(),
        }
    }
}

impl AutonomyConfig {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Files larger than this are read partially
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: usize,

    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,

    #[serde(default = "default_fetch_max_chars")]
    pub fetch_max_chars: usize,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_search_endpoint")]
    pub search_endpoint: String,
}

fn default_command_timeout() -> u64 {
    120
}
fn default_max_read_bytes() -> usize {
    256 * 1024
}
fn default_max_search_results() -> usize {
    50
}
fn default_fetch_max_chars() -> usize {
    20_000
}
fn default_http_timeout() -> u64 {
    30
}
fn default_search_endpoint() -> String {
    "https://html.duckduckgo.com/html/".into()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            max_read_bytes: default_max_read_bytes(),
            max_search_results: default_max_search_results(),
            fetch_max_chars: default_fetch_max_chars(),
            http_timeout_secs: default_http_timeout(),
            search_endpoint: default_search_endpoint(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.codeloop/config.toml).
    ///
    /// Also checks environment variables:
    /// - `CODELOOP_API_KEY` (highest priority), then `OPENROUTER_API_KEY`, `OPENAI_API_KEY`
    /// - `CODELOOP_MODEL`, `CODELOOP_BASE_URL`, `CODELOOP_WORKSPACE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        if config.api_key.is_none() {
            config.api_key = std::env::var("CODELOOP_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("CODELOOP_MODEL") {
            config.model = model;
        }

        if let Ok(url) = std::env::var("CODELOOP_BASE_URL") {
            config.base_url = Some(url);
        }

        if let Ok(dir) = std::env::var("CODELOOP_WORKSPACE") {
            config.autonomy.workspace = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".codeloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let agent = &self.agent;
        let positive = [
            ("agent.max_iterations", agent.max_iterations as usize),
            ("agent.history_window", agent.history_window),
            ("agent.max_parallel_tools", agent.max_parallel_tools),
            ("agent.failure_hint_threshold", agent.failure_hint_threshold as usize),
            ("tools.command_timeout_secs", self.tools.command_timeout_secs as usize),
            ("request_timeout_secs", self.request_timeout_secs as usize),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ValidationError(format!("{name} must be at least 1")));
        }

        if !matches!(self.provider.as_str(), "openrouter" | "openai" | "ollama" | "custom") {
            return Err(ConfigError::ValidationError(format!(
                "unknown provider \"{}\" (expected openrouter, openai, ollama or custom)",
                self.provider
            )));
        }

        if self.provider == "custom" && self.base_url.is_none() {
            return Err(ConfigError::ValidationError(
                "provider \"custom\" requires base_url".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            base_url: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            agent: AgentConfig::default(),
            memory: MemoryConfig::default(),
            autonomy: AutonomyConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 25);
        assert_eq!(config.agent.max_parallel_tools, 4);
        assert_eq!(config.autonomy.level, AutonomyLevel::Supervised);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider, config.provider);
        assert_eq!(parsed.agent.history_window, config.agent.history_window);
        assert_eq!(parsed.autonomy.blocked_commands, config.autonomy.blocked_commands);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_budget_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("agent.max_iterations"));
    }

    #[test]
    fn custom_provider_needs_base_url() {
        let config = AppConfig {
            provider: "custom".into(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.provider, "openrouter");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
model = "gpt-4o"

[agent]
max_iterations = 5

[autonomy]
level = "full"
"#,
        )
        .unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.agent.max_iterations, 5);
        assert_eq!(config.agent.history_window, 12);
        assert_eq!(config.autonomy.level, AutonomyLevel::Full);
        assert_eq!(config.tools.command_timeout_secs, 120);
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "agent = 3").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter"));
        assert!(toml_str.contains("max_iterations"));
    }
}
