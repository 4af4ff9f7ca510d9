//! Social graph, following weights, and attitude homophily.
//!
//! The graph is undirected and fixed for the run: nodes are agent indices,
//! edges are friendships loaded from the network file. Every neighbor is
//! followed with the same weight. Homophily is recomputed after each
//! attitude poll from the agents' latest ratings.

use std::collections::{BTreeMap, BTreeSet};

use vaxsim_types::{AgentId, AttitudeRating, Homophily};

use crate::error::AgentError;

/// Weight assigned to every followed neighbor.
pub const DEFAULT_FOLLOW_WEIGHT: u32 = 3;

/// Undirected friendship graph over the population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialGraph {
    nodes: usize,
    edges: Vec<(usize, usize)>,
    adjacency: Vec<Vec<usize>>,
}

impl SocialGraph {
    /// Build a graph from an edge list, validating every endpoint.
    ///
    /// Reversed and repeated pairs collapse to one undirected edge. Self-loops
    /// are kept as edges (they count towards homophily like any other edge)
    /// but do not make a node follow itself.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::EdgeOutOfRange`] if an endpoint is not a node.
    pub fn from_edges(nodes: usize, edges: Vec<(usize, usize)>) -> Result<Self, AgentError> {
        let mut adjacency = vec![Vec::new(); nodes];
        let mut unique = BTreeSet::new();
        for (from, to) in edges {
            if from >= nodes || to >= nodes {
                return Err(AgentError::EdgeOutOfRange { from, to, nodes });
            }
            if !unique.insert((from.min(to), from.max(to))) || from == to {
                continue;
            }
            if let Some(list) = adjacency.get_mut(from) {
                list.push(to);
            }
            if let Some(list) = adjacency.get_mut(to) {
                list.push(from);
            }
        }
        for list in &mut adjacency {
            list.sort_unstable();
            list.dedup();
        }
        Ok(Self {
            nodes,
            edges: unique.into_iter().collect(),
            adjacency,
        })
    }

    /// A graph with `nodes` nodes and no edges.
    pub fn empty(nodes: usize) -> Self {
        Self {
            nodes,
            edges: Vec::new(),
            adjacency: vec![Vec::new(); nodes],
        }
    }

    /// Number of nodes.
    pub const fn node_count(&self) -> usize {
        self.nodes
    }

    /// Number of unique undirected edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Unique undirected edges as `(low, high)` pairs, sorted.
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Sorted, deduplicated neighbors of a node.
    pub fn neighbors(&self, id: AgentId) -> &[usize] {
        self.adjacency.get(id.index()).map_or(&[], Vec::as_slice)
    }

    /// Following map for a node: every neighbor at the default weight.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::AgentNotFound`] if `id` is not a node.
    pub fn following(&self, id: AgentId) -> Result<BTreeMap<AgentId, u32>, AgentError> {
        let neighbors = self
            .adjacency
            .get(id.index())
            .ok_or(AgentError::AgentNotFound(id))?;
        Ok(neighbors
            .iter()
            .map(|&peer| (AgentId(peer), DEFAULT_FOLLOW_WEIGHT))
            .collect())
    }

    /// Attitude homophily given each node's current rating.
    ///
    /// `ratings[i]` is node `i`'s rating; nodes without a rating never match.
    /// A graph with no edges has zero homophily everywhere.
    pub fn homophily(&self, ratings: &[Option<AttitudeRating>]) -> Homophily {
        if self.edges.is_empty() {
            return Homophily::default();
        }
        let mut same: usize = 0;
        let mut per_rating = [0_usize; 4];
        for &(from, to) in &self.edges {
            let a = ratings.get(from).copied().flatten();
            let b = ratings.get(to).copied().flatten();
            if let (Some(a), Some(b)) = (a, b)
                && a == b
            {
                same = same.saturating_add(1);
                if let Some(count) = per_rating.get_mut(a.index()) {
                    *count = count.saturating_add(1);
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let fraction = |count: usize| count as f64 / self.edges.len() as f64;
        Homophily {
            overall: fraction(same),
            per_rating: per_rating.map(fraction),
        }
    }
}
