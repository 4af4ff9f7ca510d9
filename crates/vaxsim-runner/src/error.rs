//! Error types for the generation layer.
//!
//! Three families, handled at different levels:
//!
//! - [`RunnerError`]: setup problems (templates, backend construction,
//!   configuration). These surface to the caller.
//! - [`TransportError`]: a single generation call failed. Retried inside
//!   the dispatcher and never raised past it.
//! - [`ParseError`]: generated text could not be recovered into the
//!   expected shape. Triggers regeneration inside the dispatcher.

use std::time::Duration;

/// Errors that can occur while setting up or rendering for generation.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Failed to load or render a prompt template.
    #[error("template error: {0}")]
    Template(String),

    /// A backend could not be constructed.
    #[error("LLM backend error: {0}")]
    LlmBackend(String),

    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),

    /// Serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Failure of a single generation call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The backend asked us to slow down.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Server-provided wait hint, if any.
        retry_after: Option<Duration>,
    },

    /// Any other failure: connection, non-success status, unusable body.
    #[error("transport failure: {0}")]
    Hard(String),
}

/// Generated text that could not be recovered into the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// No usable attitude distribution.
    #[error("malformed attitude distribution: {0}")]
    Distribution(String),

    /// No usable lesson entries.
    #[error("malformed lesson list: {0}")]
    Lessons(String),

    /// Post text empty or too short after cleanup.
    #[error("degenerate action text: {0}")]
    Action(String),
}
