//! Completion backend client for planloop.
//!
//! [`OpenAiCompatProvider`] performs one authenticated HTTP call;
//! [`RetryingProvider`] adds the per-attempt timeout and the retry ceiling.
//! [`build_from_config`] assembles both from the backend config.

pub mod openai_compat;
pub mod retry;

use std::sync::Arc;

use planloop_config::BackendConfig;
use planloop_core::error::ProviderError;
use planloop_core::provider::Provider;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryingProvider;

/// Build the backend client described by `config`.
pub fn build_from_config(config: &BackendConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let http: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::from_config(config)?);
    tracing::debug!(
        provider = %http.name(),
        model = %config.model,
        max_retries = config.max_retries,
        "Completion backend configured"
    );
    Ok(Arc::new(RetryingProvider::from_config(http, config)))
}
