//! Mutable state of one run, owned exclusively by the orchestrator.
//!
//! [`RunState`] holds everything a reset must rebuild: the clock, the
//! agents, the aggregate series, and the run's seeded generators. Stages
//! borrow it mutably one at a time, so only one stage ever advances the
//! generator.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;
use vaxsim_agents::{Agent, AttitudeSampler, SampledAttitude, SocialGraph, apply_temperature};
use vaxsim_types::{
    AttitudeDistribution, AttitudeRating, Homophily, Policy, PopulationSplit, RunId,
};

use crate::clock::{DayClock, Phase};

/// Exclusive upper bound of per-request sub-seeds.
pub const SUB_SEED_RANGE: u64 = 10_000;

/// Everything a run mutates.
#[derive(Debug)]
pub struct RunState {
    /// Day counter and phase.
    pub clock: DayClock,
    /// Top-level seed of this run.
    pub seed: u64,
    /// Unique run identifier.
    pub run_id: RunId,
    /// Sampling temperature for attitude draws.
    pub temperature: f64,
    /// The population, indexed by agent id.
    pub agents: Vec<Agent>,
    /// Friendship graph used for homophily.
    pub graph: SocialGraph,
    /// Population split after every poll, oldest first.
    pub attitude_series: Vec<PopulationSplit>,
    /// Homophily after every poll, aligned with `attitude_series`.
    pub homophily_series: Vec<Homophily>,
    /// Policy injected once the run is active.
    pub policy: Option<Policy>,
    /// Disease broadcast composed for the current day.
    pub broadcast: Option<String>,
    /// Per-agent news block for the current day.
    pub recommended_news: Option<Vec<String>>,
    generation_rng: StdRng,
    sampler: AttitudeSampler,
}

impl RunState {
    /// Fresh state for a run seeded with `seed`.
    pub fn new(
        clock: DayClock,
        seed: u64,
        temperature: f64,
        agents: Vec<Agent>,
        graph: SocialGraph,
        policy: Option<Policy>,
    ) -> Self {
        let mut generation_rng = StdRng::seed_from_u64(seed);
        let sampler = AttitudeSampler::from_seed(generation_rng.random());
        Self {
            clock,
            seed,
            run_id: RunId::new(),
            temperature,
            agents,
            graph,
            attitude_series: Vec::new(),
            homophily_series: Vec::new(),
            policy,
            broadcast: None,
            recommended_news: None,
            generation_rng,
            sampler,
        }
    }

    /// Current day.
    pub const fn day(&self) -> u32 {
        self.clock.day()
    }

    /// Number of agents.
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Draw one sub-seed per request of a wave, in request order.
    pub fn draw_seeds(&mut self, count: usize) -> Vec<u64> {
        (0..count)
            .map(|_| self.generation_rng.random_range(0..SUB_SEED_RANGE))
            .collect()
    }

    /// Turn a stated distribution into a behavioral rating.
    ///
    /// The distribution is rescaled by the run temperature and cut at
    /// `min_p`. If the cutoff removes every entry the draw is repeated
    /// without it.
    pub fn sample_attitude(
        &mut self,
        distribution: &AttitudeDistribution,
        min_p: f64,
    ) -> SampledAttitude {
        let rescaled = apply_temperature(distribution, self.temperature);
        match self.sampler.sample(&rescaled, min_p) {
            Ok(sampled) => sampled,
            Err(err) => {
                warn!(error = %err, min_p, "min_p removed all mass, sampling without cutoff");
                self.sampler
                    .sample(&rescaled, 0.0)
                    .or_else(|_| self.sampler.sample(&AttitudeDistribution::uniform(), 0.0))
                    .unwrap_or_else(|_| SampledAttitude {
                        rating: AttitudeRating::ProbablyNot,
                        distribution: AttitudeDistribution::uniform(),
                    })
            }
        }
    }

    /// Each agent's latest rating, indexed by agent id.
    pub fn latest_ratings(&self) -> Vec<Option<AttitudeRating>> {
        self.agents.iter().map(Agent::latest_attitude).collect()
    }

    /// Policy in force today, if the run is active.
    pub fn active_policy(&self) -> Option<&Policy> {
        if self.clock.phase() == Phase::Active {
            self.policy.as_ref()
        } else {
            None
        }
    }
}
