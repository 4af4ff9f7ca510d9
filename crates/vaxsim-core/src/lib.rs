//! Day-cycle orchestration for the vaccine-attitude simulation.
//!
//! This crate owns a run from start to finish: it loads configuration,
//! tracks the day and phase, sequences the daily stage pipeline, calls the
//! generation dispatcher once per stage, and persists every result.
//!
//! ```text
//! SimulationConfig --> Orchestrator --+--> StageRunner --> Dispatcher (vaxsim-runner)
//!                                     |        |
//!                                     |        +--> Collaborators (news, posts, risk)
//!                                     |
//!                                     +--> RunState (clock, agents, series, RNG)
//!                                     +--> RunRecorder (TSV, JSON)
//! ```
//!
//! # Modules
//!
//! - [`clock`] -- Day counter and INIT/WARMUP/ACTIVE/FINALIZED machine
//! - [`collaborators`] -- Recommender and risk-model traits
//! - [`config`] -- YAML configuration and validation
//! - [`record`] -- Run directory writer and summary document
//! - [`runner`] -- The orchestrator, reset, and day callbacks
//! - [`stages`] -- The per-day stage pipeline
//! - [`state`] -- Per-run mutable state and seeded generators

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod record;
pub mod runner;
pub mod stages;
pub mod state;

pub use clock::{ClockError, DayClock, Phase};
pub use collaborators::{Collaborators, ContentRecommender, DiseaseRiskModel, TweetRecommender};
pub use config::{ConfigError, ExperimentMode, SimulationConfig};
pub use record::{InfectionInfo, RecordError, RunRecorder, RunSummary};
pub use runner::{DayCallback, NoOpCallback, Orchestrator, OrchestratorError, Population, RunSpec};
pub use stages::{NewsDiagnostics, Stage, StageError, StageRunner, StageSettings};
pub use state::RunState;
