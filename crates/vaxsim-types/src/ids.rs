//! Identifier types.
//!
//! Agents are addressed by their dense position in the population (the same
//! index the social graph uses for its nodes), so [`AgentId`] wraps a
//! `usize`. Runs get a time-ordered UUID v7 so result directories and
//! summaries sort by start time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Index of an agent within the run's population and social graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub usize);

impl AgentId {
    /// Return the population index this id refers to.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl core::fmt::Display for AgentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for AgentId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

/// Identifier of a single simulation run (one seed, one experiment variable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new run identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_round_trips_through_json() {
        let id = AgentId(17);
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, "17");
        let back: AgentId = serde_json::from_str(&json).unwrap_or(AgentId(0));
        assert_eq!(back, id);
    }

    #[test]
    fn run_ids_are_time_ordered() {
        let first = RunId::new();
        let second = RunId::new();
        assert!(first <= second);
    }
}
