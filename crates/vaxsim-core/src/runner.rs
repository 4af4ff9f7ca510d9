//! Run orchestration: INIT, warmup, active days, finalize, reset.
//!
//! [`Orchestrator::run`] drives one complete run:
//!
//! 1. Initial attitude poll on day 1.
//! 2. Warmup days `1..=W` (the first skips peer posts).
//! 3. Active days `W+1..=W+R` with the run's policy injected.
//! 4. Summary written; the orchestrator is FINALIZED.
//!
//! A finalized orchestrator refuses to run again until
//! [`Orchestrator::reset`] rebuilds agents, lesson stores, recommenders and
//! the seeded generators for the next seed or policy. Backend, prompts and
//! day counts carry over.

use std::path::PathBuf;

use tracing::{info, warn};
use vaxsim_agents::{AgentError, SocialGraph, build_population};
use vaxsim_runner::{CompletionBackend, Dispatcher, PromptEngine};
use vaxsim_types::{Policy, PopulationSplit, Profile};

use crate::clock::{ClockError, DayClock, Phase};
use crate::collaborators::Collaborators;
use crate::config::{DaysConfig, SimulationConfig};
use crate::record::{InfectionInfo, RecordError, RunRecorder, RunSummary, split_triple};
use crate::stages::{Stage, StageError, StageRunner, StageSettings};
use crate::state::RunState;

/// Errors that can occur during a run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The day clock rejected a transition.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// A stage failed.
    #[error("stage error: {source}")]
    Stage {
        /// The underlying stage error.
        #[from]
        source: StageError,
    },

    /// Output could not be written.
    #[error("record error: {source}")]
    Record {
        /// The underlying record error.
        #[from]
        source: RecordError,
    },

    /// The population could not be built.
    #[error("agent error: {source}")]
    Agent {
        /// The underlying agent error.
        #[from]
        source: AgentError,
    },

    /// The run is finalized; call [`Orchestrator::reset`] first.
    #[error("run is finalized; reset before running again")]
    NeedsReset,

    /// The run was interrupted mid-way and cannot resume.
    #[error("run cannot start from phase {phase}")]
    NotReady {
        /// Phase the run was left in.
        phase: Phase,
    },
}

/// Callback invoked after each simulated day.
pub trait DayCallback: Send {
    /// Called once the day's poll is aggregated.
    fn on_day_complete(&mut self, day: u32, phase: Phase, split: Option<&PopulationSplit>);
}

/// A no-op day callback.
pub struct NoOpCallback;

impl DayCallback for NoOpCallback {
    fn on_day_complete(&mut self, _day: u32, _phase: Phase, _split: Option<&PopulationSplit>) {}
}

/// The fixed population every run starts from.
#[derive(Debug, Clone)]
pub struct Population {
    /// Persona profiles, one per agent.
    pub profiles: Vec<Profile>,
    /// Friendship graph over the profiles.
    pub graph: SocialGraph,
}

/// What varies between runs of one orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    /// Top-level seed.
    pub seed: u64,
    /// Sampling temperature for attitude draws.
    pub temperature: f64,
    /// Policy injected once the run is active.
    pub policy: Option<Policy>,
    /// Output directory of the run.
    pub run_dir: PathBuf,
}

/// Owns a run's state and everything needed to advance it.
pub struct Orchestrator<B> {
    dispatcher: Dispatcher<B>,
    prompts: PromptEngine,
    collaborators: Collaborators,
    population: Population,
    settings: StageSettings,
    days: DaysConfig,
    max_reflections: usize,
    config_dump: String,
    state: RunState,
    recorder: RunRecorder,
}

impl<B: CompletionBackend + 'static> Orchestrator<B> {
    /// Prepare the first run.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] if the population does not match the
    /// graph, the day counts are invalid, or the run directory cannot be
    /// created.
    pub fn new(
        config: &SimulationConfig,
        dispatcher: Dispatcher<B>,
        prompts: PromptEngine,
        collaborators: Collaborators,
        population: Population,
        spec: RunSpec,
    ) -> Result<Self, OrchestratorError> {
        let days = config.days;
        let max_reflections = config.experiment.max_reflections;
        let config_dump = format!("{config:#?}");
        let (state, recorder) =
            prepare(&population, days, max_reflections, &config_dump, spec)?;
        Ok(Self {
            dispatcher,
            prompts,
            collaborators,
            population,
            settings: StageSettings::from(config),
            days,
            max_reflections,
            config_dump,
            state,
            recorder,
        })
    }

    /// Current run state.
    pub const fn state(&self) -> &RunState {
        &self.state
    }

    /// Current phase.
    pub const fn phase(&self) -> Phase {
        self.state.clock.phase()
    }

    /// Rebuild agents, memory, recommenders and generators for a new run.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] if the run directory cannot be created.
    pub fn reset(&mut self, spec: RunSpec) -> Result<(), OrchestratorError> {
        let (state, recorder) = prepare(
            &self.population,
            self.days,
            self.max_reflections,
            &self.config_dump,
            spec,
        )?;
        self.collaborators.reset();
        self.state = state;
        self.recorder = recorder;
        Ok(())
    }

    /// Run every day and write the summary.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NeedsReset`] on a finalized run,
    /// [`OrchestratorError::NotReady`] on an interrupted one, and any
    /// stage or output error encountered on the way.
    pub async fn run(
        &mut self,
        callback: &mut dyn DayCallback,
    ) -> Result<RunSummary, OrchestratorError> {
        match self.state.clock.phase() {
            Phase::Init => {}
            Phase::Finalized => return Err(OrchestratorError::NeedsReset),
            phase => return Err(OrchestratorError::NotReady { phase }),
        }

        info!(
            run_id = %self.state.run_id,
            seed = self.state.seed,
            temperature = self.state.temperature,
            policy = %self.state.policy.as_ref().map_or_else(|| "none".to_owned(), Policy::head),
            agents = self.state.agent_count(),
            warmup_days = self.days.warmup_days,
            run_days = self.days.run_days,
            workers = self.dispatcher.worker_count(),
            "Simulation starting"
        );

        let stages = StageRunner::new(
            &self.dispatcher,
            &self.prompts,
            &self.collaborators,
            &self.settings,
            &self.recorder,
        );
        stages.run(Stage::InitAgents, &mut self.state).await?;
        self.state.clock.start()?;

        loop {
            let phase = self.state.clock.phase();
            if phase == Phase::Finalized {
                break;
            }
            let day = self.state.clock.day();
            if phase == Phase::Active && day == self.days.warmup_days.saturating_add(1) {
                info!(day, "Warmup finished, policy in effect");
            }
            for stage in Stage::pipeline(self.state.clock.is_first_warmup_day()) {
                stages.run(stage, &mut self.state).await?;
            }
            callback.on_day_complete(day, phase, self.state.attitude_series.last());
            self.state.clock.complete_day()?;
        }

        let summary = self.summary();
        self.recorder.write_summary(&summary)?;
        log_simulation_end(&summary, self.state.clock.total_days());
        Ok(summary)
    }

    fn summary(&self) -> RunSummary {
        let infection_info = self
            .collaborators
            .risk
            .as_deref()
            .map_or_else(InfectionInfo::default, |model| InfectionInfo {
                risks_history: model.history(),
                risks_rate: model.change_rates(),
            });
        RunSummary {
            run_id: self.state.run_id,
            seed: self.state.seed,
            temperature: self.state.temperature,
            policy: self.state.policy.clone(),
            vaccine_hesitancy_ratio: self.state.attitude_series.iter().map(split_triple).collect(),
            infection_info,
        }
    }
}

impl<B> core::fmt::Debug for Orchestrator<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("run_id", &self.state.run_id)
            .field("day", &self.state.clock.day())
            .field("phase", &self.state.clock.phase())
            .finish_non_exhaustive()
    }
}

/// Fresh state and output directory for one run.
fn prepare(
    population: &Population,
    days: DaysConfig,
    max_reflections: usize,
    config_dump: &str,
    spec: RunSpec,
) -> Result<(RunState, RunRecorder), OrchestratorError> {
    let clock = DayClock::new(days.warmup_days, days.run_days)?;
    let agents = build_population(&population.profiles, &population.graph, max_reflections)?;
    let recorder = RunRecorder::create(&spec.run_dir, agents.len())?;
    let state = RunState::new(
        clock,
        spec.seed,
        spec.temperature,
        agents,
        population.graph.clone(),
        spec.policy,
    );
    let policy = state.policy.as_ref().map_or("None", |p| p.content.as_str());
    recorder.write_run_config(&format!(
        "{config_dump}\nrun_id: {}\nseed: {}\ntemperature: {}\npolicy: {policy}\n",
        state.run_id, state.seed, state.temperature
    ))?;
    Ok((state, recorder))
}

/// Log the end-of-run summary.
fn log_simulation_end(summary: &RunSummary, days: u32) {
    let hesitancy = summary.hesitancy();
    let (Some(first), Some(last)) = (hesitancy.first(), hesitancy.last()) else {
        warn!(run_id = %summary.run_id, "Simulation complete without any poll");
        return;
    };
    info!(
        run_id = %summary.run_id,
        days,
        polls = hesitancy.len(),
        initial_hesitancy = first,
        final_hesitancy = last,
        "Simulation complete"
    );
}
