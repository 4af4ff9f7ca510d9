//! Error types for the vaxsim-agents crate.
//!
//! All operations that can fail return typed errors rather than panicking.

use vaxsim_types::AgentId;

/// Errors that can occur during agent state operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A social-graph edge references a node outside the population.
    #[error("edge ({from}, {to}) references a node outside 0..{nodes}")]
    EdgeOutOfRange {
        /// Edge source.
        from: usize,
        /// Edge target.
        to: usize,
        /// Number of nodes in the graph.
        nodes: usize,
    },

    /// The population and the social graph disagree on the agent count.
    #[error("population has {agents} agents but the social graph has {nodes} nodes")]
    PopulationMismatch {
        /// Number of persona profiles.
        agents: usize,
        /// Number of graph nodes.
        nodes: usize,
    },

    /// A distribution had no positive mass left to draw from.
    #[error("attitude distribution has no positive mass: {values:?}")]
    DegenerateDistribution {
        /// The offending entries.
        values: [f64; 4],
    },

    /// Agent with the given ID was not found.
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),
}
