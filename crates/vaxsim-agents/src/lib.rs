//! Agent state, lesson memory, attitude sampling, and social graph.
//!
//! This crate is the logic layer for agents: everything that operates on
//! agent state without touching I/O or the generation backend. It sits
//! between `vaxsim-types` (data structures) and the runner/core crates
//! (generation and orchestration).
//!
//! # Modules
//!
//! - [`agent`] -- Per-agent mutable history ([`Agent`])
//! - [`error`] -- Error types for agent operations ([`AgentError`])
//! - [`memory`] -- Lesson store with decayed-importance retrieval ([`LessonStore`])
//! - [`sampler`] -- Temperature-controlled attitude sampling ([`AttitudeSampler`])
//! - [`social`] -- Social graph, following weights, homophily ([`SocialGraph`])

pub mod agent;
pub mod error;
pub mod memory;
pub mod sampler;
pub mod social;

// Re-export primary types at crate root for convenience.
pub use agent::{Agent, build_population};
pub use error::AgentError;
pub use memory::{DEFAULT_MAX_REFLECTIONS, LessonStore, RetrievedLesson, render_lessons};
pub use sampler::{AttitudeSampler, SampledAttitude, apply_temperature};
pub use social::{DEFAULT_FOLLOW_WEIGHT, SocialGraph};
