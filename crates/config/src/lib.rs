//! Configuration loading, validation, and management for planloop.
//!
//! Loads configuration from `~/.planloop/config.toml` with environment
//! variable overrides. Validates all settings at startup. The resulting
//! [`AppConfig`] is built once and passed by reference to the backend client
//! and the orchestrator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.planloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion backend settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Loop control settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Settings for the text-completion backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Full chat-completions URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer credential. Never logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature, 0.0..=2.0
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling, 0.0..=1.0
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Per-attempt timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before retry `n` is `n * retry_backoff_ms`
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}
fn default_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_top_p() -> f32 {
    1.0
}
fn default_timeout_secs() -> u64 {
    120
}
/// Upper bound accepted for `backend.max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 100;

fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

/// Settings for the planning/critique loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Iteration ceiling. The run fails once the iteration count exceeds it.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Ask the Engineer for a summary report after each execution pass
    #[serde(default = "default_true")]
    pub engineer_report: bool,

    /// Steps dispatched to the Executor at once (1 = strictly sequential)
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,
}

fn default_max_iterations() -> u32 {
    5
}
fn default_true() -> bool {
    true
}
fn default_max_concurrent_steps() -> usize {
    1
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            engineer_report: true,
            max_concurrent_steps: default_max_concurrent_steps(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.planloop/config.toml)
    /// and apply process environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply process environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply environment overrides read through `lookup`.
    ///
    /// `PLANLOOP_*` keys win over the `OPENAI_*` fallbacks.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| keys.iter().find_map(|&k| lookup(k));

        if let Some(endpoint) = first(&["PLANLOOP_ENDPOINT", "OPENAI_ENDPOINT"]) {
            self.backend.endpoint = endpoint;
        }
        if let Some(key) = first(&["PLANLOOP_API_KEY", "OPENAI_API_KEY"]) {
            self.backend.api_key = Some(key);
        }
        if let Some(model) = first(&["PLANLOOP_MODEL", "OPENAI_MODEL_NAME"]) {
            self.backend.model = model;
        }
        if let Some(v) = lookup("PLANLOOP_TEMPERATURE") {
            self.backend.temperature = parse_env("PLANLOOP_TEMPERATURE", &v)?;
        }
        if let Some(v) = lookup("PLANLOOP_TOP_P") {
            self.backend.top_p = parse_env("PLANLOOP_TOP_P", &v)?;
        }
        if let Some(v) = lookup("PLANLOOP_TIMEOUT_SECS") {
            self.backend.timeout_secs = parse_env("PLANLOOP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("PLANLOOP_MAX_RETRIES") {
            self.backend.max_retries = parse_env("PLANLOOP_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("PLANLOOP_MAX_ITERATIONS") {
            self.orchestrator.max_iterations = parse_env("PLANLOOP_MAX_ITERATIONS", &v)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".planloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.backend;
        if !(0.0..=2.0).contains(&b.temperature) {
            return Err(ConfigError::ValidationError(
                "backend.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&b.top_p) {
            return Err(ConfigError::ValidationError(
                "backend.top_p must be between 0.0 and 1.0".into(),
            ));
        }
        if b.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "backend.timeout_secs must be > 0".into(),
            ));
        }
        if b.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend.endpoint must not be empty".into(),
            ));
        }
        if b.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "backend.max_retries must be <= {MAX_RETRIES_LIMIT}"
            )));
        }
        if self.orchestrator.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_iterations must be >= 1".into(),
            ));
        }
        if self.orchestrator.max_concurrent_steps == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_concurrent_steps must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.backend.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!("{key}={value:?} is not a valid value"))
    })
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
