//! Configuration types for the generation layer.
//!
//! Both sections deserialize from the `llm` and `dispatch` blocks of
//! `vaxsim-config.yaml`, with every field defaulted. Backend settings can
//! then be overridden from the environment, and the API key is only ever
//! read from the environment so it never sits in a config file or in
//! the per-run config dump.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::RetryPolicy;
use crate::error::RunnerError;

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Supported backend protocols.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// Chat-completions style API (`OpenAI`, `DeepSeek`, vLLM's server).
    #[default]
    #[serde(alias = "openai", alias = "deepseek")]
    ChatCompletion,
    /// Messages style API with a top-level system field.
    #[serde(alias = "anthropic", alias = "claude")]
    Messages,
    /// Self-hosted chat-completions endpoint, no authentication.
    #[serde(alias = "local", alias = "vllm", alias = "ollama")]
    LocalModel,
}

impl BackendType {
    /// Parse a backend name as accepted in config files and `LLM_BACKEND`.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Config`] for an unknown name.
    pub fn parse(name: &str) -> Result<Self, RunnerError> {
        match name.to_lowercase().as_str() {
            "chat_completion" | "openai" | "deepseek" => Ok(Self::ChatCompletion),
            "messages" | "anthropic" | "claude" => Ok(Self::Messages),
            "local_model" | "local" | "vllm" | "ollama" => Ok(Self::LocalModel),
            other => Err(RunnerError::Config(format!("unknown backend type: {other}"))),
        }
    }
}

/// Connection settings for the generation backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmBackendConfig {
    /// Protocol spoken by the endpoint(s).
    pub backend: BackendType,
    /// Base API URL (e.g. `https://api.openai.com/v1`).
    pub api_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Additional base URLs, one worker each. Empty means `api_url` only.
    pub targets: Vec<String>,
    /// Fold the system message into the first user turn.
    ///
    /// Needed for local models whose chat template rejects system roles.
    pub merge_system_prompt: bool,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// API key, filled from `api_key_env` by [`Self::apply_env_overrides`].
    #[serde(skip)]
    pub api_key: String,
}

impl Default for LlmBackendConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::ChatCompletion,
            api_url: "https://api.openai.com/v1".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            targets: Vec::new(),
            merge_system_prompt: false,
            api_key_env: "LLM_API_KEY".to_owned(),
            api_key: String::new(),
        }
    }
}

// The key must never reach logs or the run-config dump.
impl fmt::Debug for LlmBackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmBackendConfig")
            .field("backend", &self.backend)
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("targets", &self.targets)
            .field("merge_system_prompt", &self.merge_system_prompt)
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

impl LlmBackendConfig {
    /// Apply environment overrides on top of file values.
    ///
    /// Recognized variables:
    /// - `LLM_BACKEND` -- backend type
    /// - `LLM_API_URL` -- base API URL
    /// - `LLM_MODEL` -- model name
    /// - `LLM_TARGETS` -- comma-separated worker URLs
    /// - the variable named by `api_key_env` (default `LLM_API_KEY`)
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Config`] if `LLM_BACKEND` names an unknown
    /// backend.
    pub fn apply_env_overrides(&mut self) -> Result<(), RunnerError> {
        if let Some(backend) = optional_env("LLM_BACKEND") {
            self.backend = BackendType::parse(&backend)?;
        }
        if let Some(url) = optional_env("LLM_API_URL") {
            self.api_url = url;
        }
        if let Some(model) = optional_env("LLM_MODEL") {
            self.model = model;
        }
        if let Some(targets) = optional_env("LLM_TARGETS") {
            self.targets = split_targets(&targets);
        }
        if let Some(key) = optional_env(&self.api_key_env) {
            self.api_key = key;
        }
        Ok(())
    }

    /// Base URLs to generate against, one per worker.
    pub fn endpoints(&self) -> Vec<String> {
        if self.targets.is_empty() {
            vec![self.api_url.clone()]
        } else {
            self.targets.clone()
        }
    }

    /// Whether requests need an API key.
    pub const fn requires_api_key(&self) -> bool {
        !matches!(self.backend, BackendType::LocalModel)
    }
}

/// Read an environment variable, treating empty values as unset.
fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Split a comma-separated URL list, dropping blanks.
fn split_targets(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// How a wave of requests is spread over backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStrategy {
    /// One backend, bounded-concurrency batches.
    #[default]
    Concurrent,
    /// One worker per backend, requests sharded round-robin.
    WorkerPool,
}

/// Output token ceilings per generation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenLimits {
    /// Very short answers.
    pub short: u32,
    /// A single post.
    pub tweet: u32,
    /// Lesson lists and attitude replies.
    pub medium: u32,
    /// Longer summaries.
    pub long: u32,
    /// Unbounded-ish completions.
    pub full: u32,
}

impl Default for TokenLimits {
    fn default() -> Self {
        Self {
            short: 50,
            tweet: 100,
            medium: 150,
            long: 250,
            full: 1000,
        }
    }
}

/// Batching and retry settings for generation waves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Concurrent or worker-pool dispatch.
    pub strategy: DispatchStrategy,
    /// Requests in flight at once (per worker for the pool).
    pub batch_size: usize,
    /// Generations per request before giving up on parsing.
    pub max_parse_attempts: u32,
    /// Transport attempts per generation (rate limits included).
    pub max_retries: u32,
    /// Wait after a rate limit without a server hint, in seconds.
    pub rate_limit_wait_secs: u64,
    /// First backoff after a hard failure, in milliseconds.
    pub backoff_base_ms: u64,
    /// Ceiling for hard-failure backoff, in milliseconds.
    pub backoff_cap_ms: u64,
    /// Sampling temperature sent with generation requests.
    pub generation_temperature: f64,
    /// Output token ceilings.
    pub token_limits: TokenLimits,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            strategy: DispatchStrategy::Concurrent,
            batch_size: 25,
            max_parse_attempts: 5,
            max_retries: 7,
            rate_limit_wait_secs: 35,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            generation_temperature: 0.7,
            token_limits: TokenLimits::default(),
        }
    }
}

impl DispatchConfig {
    /// Retry settings in the form the dispatcher consumes.
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_parse_attempts: self.max_parse_attempts,
            max_retries: self.max_retries,
            rate_limit_wait: Duration::from_secs(self.rate_limit_wait_secs),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_type_parsing() {
        assert_eq!(BackendType::parse("OpenAI").ok(), Some(BackendType::ChatCompletion));
        assert_eq!(BackendType::parse("claude").ok(), Some(BackendType::Messages));
        assert_eq!(BackendType::parse("vllm").ok(), Some(BackendType::LocalModel));
        assert!(BackendType::parse("carrier-pigeon").is_err());
    }

    #[test]
    fn endpoints_fall_back_to_api_url() {
        let mut config = LlmBackendConfig::default();
        assert_eq!(config.endpoints(), vec!["https://api.openai.com/v1".to_owned()]);
        config.targets = split_targets("http://a:8000/v1, ,http://b:8000/v1");
        assert_eq!(config.endpoints().len(), 2);
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = LlmBackendConfig {
            api_key: "sk-secret".to_owned(),
            ..LlmBackendConfig::default()
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn dispatch_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_parse_attempts, 5);
        assert_eq!(config.max_retries, 7);
        let policy = config.retry_policy();
        assert_eq!(policy.rate_limit_wait, Duration::from_secs(35));
        assert_eq!(config.token_limits.medium, 150);
        assert!(!LlmBackendConfig {
            backend: BackendType::LocalModel,
            ..LlmBackendConfig::default()
        }
        .requires_api_key());
    }
}
