//! Generation layer for the vaccine-attitude simulation.
//!
//! Everything between "the orchestrator has N prompts" and "the orchestrator
//! has N validated results" lives here:
//!
//! ```text
//!   prompts ──► Dispatcher ──► run_slot (per request)
//!                  │              │  transport retry (rate limit / hard)
//!                  │              │  parse retry (distribution / lessons / action)
//!                  │              ▼
//!                  │         CompletionBackend ──► HTTP (chat / messages / local)
//!                  ▼
//!            results, in input order
//! ```
//!
//! # Modules
//!
//! - [`config`] -- Backend and dispatch configuration
//! - [`dispatch`] -- Concurrent and worker-pool dispatch with retries
//! - [`error`] -- Runner, transport, and parse errors
//! - [`llm`] -- Backend abstraction and HTTP implementations
//! - [`parse`] -- Recovery of distributions, lesson lists, and post text
//! - [`prompt`] -- `minijinja` prompt templates

pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod parse;
pub mod prompt;

pub use config::{BackendType, DispatchConfig, DispatchStrategy, LlmBackendConfig, TokenLimits};
pub use dispatch::{
    ConcurrentDispatcher, Dispatcher, Generated, RetryPolicy, SlotResult, Task,
    WorkerPoolDispatcher, run_slot,
};
pub use error::{ParseError, RunnerError, TransportError};
pub use llm::{
    ChatMessage, CompletionBackend, GenerationRequest, LlmBackend, Role, create_backend,
    create_backends,
};
pub use parse::ParsedDistribution;
pub use prompt::{PromptEngine, PromptTemplate};
