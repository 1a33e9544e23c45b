//! Retry wrapper: bounded re-sends with a per-attempt timeout.
//!
//! Transient failures (timeout, network, rate limit, 5xx) are retried with the
//! same payload up to `max_retries` times. Exhausting the retries surfaces
//! `BackendUnavailable`; non-transient failures surface immediately.

use async_trait::async_trait;
use planloop_config::BackendConfig;
use planloop_core::error::ProviderError;
use planloop_core::provider::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A provider that re-sends transient failures to an inner provider.
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    max_retries: u32,
    timeout: Duration,
    backoff: Duration,
}

impl RetryingProvider {
    /// Wrap `inner` with the default timeout (120s) and backoff (500ms).
    pub fn new(inner: Arc<dyn Provider>, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries,
            timeout: Duration::from_secs(120),
            backoff: Duration::from_millis(500),
        }
    }

    /// Wrap `inner` using the backend section of the app config.
    pub fn from_config(inner: Arc<dyn Provider>, config: &BackendConfig) -> Self {
        Self::new(inner, config.max_retries)
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .with_backoff(Duration::from_millis(config.retry_backoff_ms))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay before retry `n` is `n * backoff`.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// First attempt plus retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the attempt after `attempt`, saturating at `Duration::MAX`.
    fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let max_attempts = self.max_attempts();
        let mut last_error = ProviderError::NotConfigured("no attempt made".into());

        for attempt in 1..=max_attempts {
            let outcome =
                match tokio::time::timeout(self.timeout, self.inner.complete(request.clone())).await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ProviderError::Timeout(format!(
                        "no response from '{}' within {:?}",
                        self.inner.name(),
                        self.timeout
                    ))),
                };

            match outcome {
                Ok(response) => {
                    if attempt > 1 {
                        info!(provider = %self.inner.name(), attempt, "Retry succeeded");
                    }
                    return Ok(response);
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        provider = %self.inner.name(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Transient backend failure"
                    );
                    last_error = e;
                    if attempt < max_attempts && !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff_after(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProviderError::BackendUnavailable {
            attempts: max_attempts,
            last_error: last_error.to_string(),
        })
    }
}
