//! Shared type definitions for the vaccine-attitude simulation.
//!
//! This crate is the single source of truth for the data that flows between
//! the agent layer, the generation layer, and the day-cycle orchestrator.
//!
//! # Modules
//!
//! - [`ids`] -- Agent indices and run identifiers
//! - [`enums`] -- Attitude ratings, risk levels, content stance
//! - [`structs`] -- Profiles, lessons, policies, distributions, aggregates

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{AttitudeRating, RiskLevel, Stance};
pub use ids::{AgentId, RunId};
pub use structs::{
    AttitudeDistribution, AttitudeReply, DEFAULT_DECAY_RATE, Homophily, Lesson, Policy,
    PopulationSplit, Profile, RecommendedItem, RiskReport, Tweet, round_to,
};
