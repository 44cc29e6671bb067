//! LLM provider implementations for codeloop.
//!
//! All providers implement the `codeloop_core::Provider` trait. Presets
//! cover OpenRouter, OpenAI and Ollama; any other OpenAI-compatible
//! endpoint is reachable through the `custom` preset and `base_url`.

pub mod openai_compat;
pub mod retry;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryProvider;

use codeloop_config::AppConfig;
use codeloop_core::{Provider, ProviderError};
use std::sync::Arc;
use std::time::Duration;

/// Base URL for a provider preset.
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "openai" => Some("https://api.openai.com/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        _ => None,
    }
}

/// Build the configured provider, wrapped in transport retries.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let base_url = config
        .base_url
        .clone()
        .or_else(|| default_base_url(&config.provider).map(String::from))
        .ok_or_else(|| {
            ProviderError::NotConfigured(format!("provider '{}' needs a base_url", config.provider))
        })?;

    let api_key = match (config.api_key.clone(), config.provider.as_str()) {
        (Some(key), _) => key,
        // Local servers usually run without a key.
        (None, "ollama" | "custom") => String::new(),
        (None, other) => {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for '{other}'; set CODELOOP_API_KEY or api_key in the config file"
            )));
        }
    };

    let timeout = Duration::from_secs(config.request_timeout_secs);
    let inner = OpenAiCompatProvider::new(config.provider.clone(), base_url, api_key, timeout)?;
    Ok(Arc::new(RetryProvider::new(Arc::new(inner), config.max_retries, timeout)))
}
