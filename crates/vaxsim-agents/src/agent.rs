//! Per-agent state: fixed persona plus the history the simulation builds.
//!
//! An [`Agent`] is created from a persona profile at run start and mutated
//! only by the orchestrator, once a wave of generation results is fully
//! collected. Reset rebuilds agents from scratch via [`build_population`].

use std::collections::BTreeMap;

use vaxsim_types::{
    AgentId, AttitudeDistribution, AttitudeRating, Lesson, Policy, Profile, RiskLevel, Tweet,
};

use crate::error::AgentError;
use crate::memory::{LessonStore, RetrievedLesson, render_lessons};
use crate::social::SocialGraph;

/// A synthetic persona and its evolving vaccination-attitude history.
#[derive(Debug, Clone)]
pub struct Agent {
    /// Population index (also the social-graph node).
    pub id: AgentId,
    /// Immutable demographic profile.
    pub profile: Profile,
    /// Sampled rating per poll, oldest first.
    pub attitudes: Vec<AttitudeRating>,
    /// Stated reasoning per poll, aligned with `attitudes`.
    pub reasoning: Vec<String>,
    /// Post-draw distribution per poll, aligned with `attitudes`.
    pub distributions: Vec<AttitudeDistribution>,
    /// Deduplicated lesson memory.
    pub lessons: LessonStore,
    /// Lessons surfaced by the most recent retrieval.
    pub reflections: Vec<RetrievedLesson>,
    /// Posts authored by this agent, oldest first.
    pub tweets: Vec<Tweet>,
    /// Followed peers and their weights.
    ///
    /// Populated from the social graph; only recommenders read it.
    pub following: BTreeMap<AgentId, u32>,
    /// Risk level from the latest disease broadcast.
    pub risk: Option<RiskLevel>,
    /// Policy currently in force for this agent.
    pub policy: Option<Policy>,
    max_reflections: usize,
}

impl Agent {
    /// Create an agent with an empty history.
    pub fn new(
        id: AgentId,
        profile: Profile,
        following: BTreeMap<AgentId, u32>,
        max_reflections: usize,
    ) -> Self {
        Self {
            id,
            profile,
            attitudes: Vec::new(),
            reasoning: Vec::new(),
            distributions: Vec::new(),
            lessons: LessonStore::new(),
            reflections: Vec::new(),
            tweets: Vec::new(),
            following,
            risk: None,
            policy: None,
            max_reflections,
        }
    }

    /// Rating from the first poll, if any.
    pub fn initial_attitude(&self) -> Option<AttitudeRating> {
        self.attitudes.first().copied()
    }

    /// Rating from the latest poll, if any.
    pub fn latest_attitude(&self) -> Option<AttitudeRating> {
        self.attitudes.last().copied()
    }

    /// Reasoning from the first poll, if any.
    pub fn initial_reasoning(&self) -> Option<&str> {
        self.reasoning.first().map(String::as_str)
    }

    /// Reasoning from the latest poll, if any.
    pub fn latest_reasoning(&self) -> Option<&str> {
        self.reasoning.last().map(String::as_str)
    }

    /// Distribution from the latest poll, if any.
    pub fn latest_distribution(&self) -> Option<&AttitudeDistribution> {
        self.distributions.last()
    }

    /// Append one poll result to the history.
    pub fn record_attitude(
        &mut self,
        rating: AttitudeRating,
        reasoning: String,
        distribution: AttitudeDistribution,
    ) {
        self.attitudes.push(rating);
        self.reasoning.push(reasoning);
        self.distributions.push(distribution);
    }

    /// Store new lessons; returns how many were not already known.
    pub fn learn(&mut self, lessons: Vec<Lesson>) -> usize {
        self.lessons.add(lessons)
    }

    /// Retrieve the top lessons for `day`, remember them, and render the
    /// prompt block (empty when the agent has learned nothing yet).
    pub fn refresh_reflections(&mut self, day: u32) -> String {
        self.reflections = self.lessons.retrieve(day, self.max_reflections);
        render_lessons(&self.reflections)
    }

    /// Append an authored post.
    pub fn post(&mut self, text: String, day: u32) {
        self.tweets.push(Tweet {
            text,
            day,
            author: self.id,
        });
    }

    /// Most recent post, if any.
    pub fn latest_tweet(&self) -> Option<&Tweet> {
        self.tweets.last()
    }
}

/// Build one agent per profile, wiring following maps from the graph.
///
/// # Errors
///
/// Returns [`AgentError::PopulationMismatch`] if the graph's node count
/// differs from the number of profiles.
pub fn build_population(
    profiles: &[Profile],
    graph: &SocialGraph,
    max_reflections: usize,
) -> Result<Vec<Agent>, AgentError> {
    if profiles.len() != graph.node_count() {
        return Err(AgentError::PopulationMismatch {
            agents: profiles.len(),
            nodes: graph.node_count(),
        });
    }
    profiles
        .iter()
        .enumerate()
        .map(|(index, profile)| {
            let id = AgentId(index);
            let following = graph.following(id)?;
            Ok(Agent::new(id, profile.clone(), following, max_reflections))
        })
        .collect()
}
