//! Seams to the parts of the system the orchestrator does not own.
//!
//! Ranking news, ranking peer posts, and reading the disease-risk series
//! are supplied from outside through these traits. The orchestrator calls
//! them synchronously between waves and never shares them with in-flight
//! generation.

use vaxsim_agents::Agent;
use vaxsim_types::{RecommendedItem, RiskReport};

/// Ranks news items for each agent.
pub trait ContentRecommender: Send + Sync {
    /// Per-agent ranked items for the day's window, indexed by agent id.
    ///
    /// `count` is the number of items wanted per agent. Implementations
    /// may return fewer; the orchestrator pads short lists.
    fn recommend(&self, agents: &[Agent], day: u32, count: usize) -> Vec<Vec<RecommendedItem>>;

    /// Forget any per-run state.
    fn reset(&mut self) {}
}

/// Ranks peer posts for each agent.
pub trait TweetRecommender: Send + Sync {
    /// Per-agent ranked posts, indexed by agent id.
    fn recommend(&self, agents: &[Agent], count: usize) -> Vec<Vec<RecommendedItem>>;

    /// Forget any per-run state.
    fn reset(&mut self) {}
}

/// Weekly disease-risk reports derived from an external series.
pub trait DiseaseRiskModel: Send + Sync {
    /// Report for a simulation day, or `None` outside the series.
    ///
    /// Day 0 is the week before the run starts; models that have no
    /// history before day 1 return `None` for it.
    fn report(&self, day: u32) -> Option<RiskReport>;

    /// Raw risk values for the run window, in day order.
    fn history(&self) -> Vec<f64>;

    /// Day-over-day change rates (percent), in day order.
    fn change_rates(&self) -> Vec<f64>;
}

/// The external collaborators a run needs.
pub struct Collaborators {
    /// News ranking.
    pub news: Box<dyn ContentRecommender>,
    /// Peer post ranking.
    pub tweets: Box<dyn TweetRecommender>,
    /// Risk series; broadcasts are skipped without one.
    pub risk: Option<Box<dyn DiseaseRiskModel>>,
}

impl Collaborators {
    /// Reset every recommender before a new run.
    pub fn reset(&mut self) {
        self.news.reset();
        self.tweets.reset();
    }
}

impl core::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Collaborators")
            .field("risk", &self.risk.is_some())
            .finish_non_exhaustive()
    }
}
