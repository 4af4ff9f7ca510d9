//! Error types for the experiment driver.
//!
//! [`EngineError`] wraps every failure that can stop an experiment, so
//! `main` can propagate with `?`.

/// Top-level error for the experiment driver.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: vaxsim_core::ConfigError,
    },

    /// Backend construction or prompt loading failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: vaxsim_runner::RunnerError,
    },

    /// The population or social graph is inconsistent.
    #[error("agent error: {source}")]
    Agent {
        /// The underlying agent error.
        #[from]
        source: vaxsim_agents::AgentError,
    },

    /// A simulation run failed.
    #[error("orchestrator error: {source}")]
    Orchestrator {
        /// The underlying orchestrator error.
        #[from]
        source: vaxsim_core::OrchestratorError,
    },

    /// An input data file could not be loaded.
    #[error("data error: {message}")]
    Data {
        /// Description of the failure, with file context.
        message: String,
    },

    /// Writing experiment results failed.
    #[error("io error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl From<anyhow::Error> for EngineError {
    fn from(error: anyhow::Error) -> Self {
        Self::Data {
            message: format!("{error:#}"),
        }
    }
}
