//! Transport retry around a provider.
//!
//! Rate limits, timeouts, network failures and 5xx responses are retried
//! with exponential backoff. Everything else (bad key, 4xx, malformed
//! replies) surfaces at once.

use async_trait::async_trait;
use codeloop_core::{Provider, ProviderError, ProviderRequest, ProviderResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    max_retries: u32,
    attempt_timeout: Duration,
    base_delay: Duration,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn Provider>, max_retries: u32, attempt_timeout: Duration) -> Self {
        Self {
            inner,
            max_retries,
            attempt_timeout,
            base_delay: Duration::from_millis(500),
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    fn delay_for(&self, attempt: u32, error: &ProviderError) -> Duration {
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        match error {
            ProviderError::RateLimited { retry_after_secs } => {
                backoff.max(Duration::from_secs(*retry_after_secs).min(self.base_delay * 20))
            }
            _ => backoff,
        }
    }
}

pub fn is_transient(error: &ProviderError) -> bool {
    match error {
        ProviderError::RateLimited { .. }
        | ProviderError::Timeout(_)
        | ProviderError::Network(_) => true,
        ProviderError::ApiError { status_code, .. } => *status_code >= 500,
        _ => false,
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            let call = self.inner.complete(request.clone());
            let result = match tokio::time::timeout(self.attempt_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "Provider '{}' timed out after {}s",
                    self.inner.name(),
                    self.attempt_timeout.as_secs()
                ))),
            };

            match result {
                Ok(response) => {
                    if attempt > 0 {
                        let provider = self.inner.name();
                        info!(provider = %provider, attempt = attempt + 1, "Provider recovered");
                    }
                    return Ok(response);
                }
                Err(e) if is_transient(&e) && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt, &e);
                    warn!(
                        provider = %self.inner.name(),
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
