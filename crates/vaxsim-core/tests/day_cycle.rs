//! End-to-end day cycle against a deterministic mocked backend.
//!
//! Five agents on a ring, one warmup day and two active days. The backend
//! answers from the request seed alone, so every run with the same
//! top-level seed must produce the same series.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use std::fs;
use std::path::Path;

use vaxsim_agents::{Agent, SocialGraph};
use vaxsim_core::record::{AGGREGATE_FILE, SUMMARY_FILE, TRANSCRIPT_FILE};
use vaxsim_core::{
    Collaborators, ContentRecommender, DayCallback, DiseaseRiskModel, NoOpCallback, Orchestrator,
    OrchestratorError, Phase, Population, RunSpec, SimulationConfig, TweetRecommender,
};
use vaxsim_runner::{
    BackendType, CompletionBackend, Dispatcher, DispatchStrategy, GenerationRequest, PromptEngine,
    TransportError,
};
use vaxsim_types::{
    PopulationSplit, Policy, Profile, RecommendedItem, RiskLevel, RiskReport, Stance,
};

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

/// Answers every task from the request seed.
struct SeededBackend;

impl CompletionBackend for SeededBackend {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        let seed = request.seed.unwrap_or(0);
        let user = request.user_text();
        if user.contains("attitude_dist") {
            let mut dist = [0.1_f64; 4];
            dist[usize::try_from(seed % 4).unwrap()] = 0.7;
            return Ok(serde_json::json!({
                "reasoning": format!("answer for seed {seed}"),
                "attitude_dist": dist,
            })
            .to_string());
        }
        if user.contains("list of lists") {
            return Ok(format!(
                r#"[["lesson {}", 0.{}], ["shared lesson", 0.5]]"#,
                seed % 7,
                seed % 9 + 1
            ));
        }
        if user.contains("Write a post") {
            return Ok(format!("* Post number {seed} #Vaccines"));
        }
        Ok(String::new())
    }

    fn name(&self) -> &str {
        "seeded"
    }
}

/// Rotates through a fixed corpus by day and agent.
struct RotatingNews {
    items: Vec<RecommendedItem>,
}

impl ContentRecommender for RotatingNews {
    fn recommend(&self, agents: &[Agent], day: u32, count: usize) -> Vec<Vec<RecommendedItem>> {
        let offset = usize::try_from(day).unwrap();
        agents
            .iter()
            .map(|agent| {
                self.items
                    .iter()
                    .cycle()
                    .skip(offset + agent.id.index())
                    .take(count)
                    .cloned()
                    .collect()
            })
            .collect()
    }
}

/// Latest posts of followed peers.
struct FollowedPosts;

impl TweetRecommender for FollowedPosts {
    fn recommend(&self, agents: &[Agent], count: usize) -> Vec<Vec<RecommendedItem>> {
        agents
            .iter()
            .map(|agent| {
                agent
                    .following
                    .keys()
                    .filter_map(|peer| agents.get(peer.index())?.latest_tweet())
                    .take(count)
                    .map(|tweet| RecommendedItem {
                        text: tweet.text.clone(),
                        stance: Stance::Neutral,
                        score: 1.0,
                    })
                    .collect()
            })
            .collect()
    }
}

/// A short fixed risk series.
struct FixedRisk {
    values: Vec<f64>,
}

impl DiseaseRiskModel for FixedRisk {
    fn report(&self, day: u32) -> Option<RiskReport> {
        let index = usize::try_from(day.checked_sub(1)?).ok()?;
        let value = *self.values.get(index)?;
        Some(RiskReport {
            level: RiskLevel::from_value(value),
            value,
            change_rate: 0.0,
        })
    }

    fn history(&self) -> Vec<f64> {
        self.values.clone()
    }

    fn change_rates(&self) -> Vec<f64> {
        vec![0.0; self.values.len()]
    }
}

/// Records which days completed in which phase.
#[derive(Default)]
struct PhaseLog {
    days: Vec<(u32, Phase)>,
}

impl DayCallback for PhaseLog {
    fn on_day_complete(&mut self, day: u32, phase: Phase, split: Option<&PopulationSplit>) {
        assert!(split.is_some());
        self.days.push((day, phase));
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn config(strategy: DispatchStrategy) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.days.warmup_days = 1;
    config.days.run_days = 2;
    config.llm.backend = BackendType::LocalModel;
    config.dispatch.strategy = strategy;
    config.dispatch.batch_size = 2;
    config.dispatch.backoff_base_ms = 0;
    config.dispatch.backoff_cap_ms = 0;
    config
}

fn population() -> Population {
    let profile = |gender: &str, belief: &str| Profile {
        gender: gender.to_owned(),
        age: "40".to_owned(),
        education: "College".to_owned(),
        occupation: "Teacher".to_owned(),
        political_belief: belief.to_owned(),
        religion: "None".to_owned(),
    };
    let profiles = vec![
        profile("Female", "Liberal"),
        profile("Male", "Conservative"),
        profile("Female", "Moderate"),
        profile("Male", "Liberal"),
        profile("Female", "Conservative"),
    ];
    let graph = SocialGraph::from_edges(5, vec![(0, 1), (1, 2), (2, 3), (3, 4), (4, 0)]).unwrap();
    Population { profiles, graph }
}

fn collaborators() -> Collaborators {
    let items = (0..12)
        .map(|i| RecommendedItem {
            text: format!("News story {i}"),
            stance: if i % 2 == 0 { Stance::Positive } else { Stance::Negative },
            score: 0.5,
        })
        .collect();
    Collaborators {
        news: Box::new(RotatingNews { items }),
        tweets: Box::new(FollowedPosts),
        risk: Some(Box::new(FixedRisk {
            values: vec![1.0, 3.0, 6.5],
        })),
    }
}

fn policy() -> Policy {
    Policy {
        category: "incentive".to_owned(),
        strength: "strong".to_owned(),
        content: "Every vaccinated resident receives $200.".to_owned(),
    }
}

fn spec(seed: u64, run_dir: &Path) -> RunSpec {
    RunSpec {
        seed,
        temperature: 1.0,
        policy: Some(policy()),
        run_dir: run_dir.to_path_buf(),
    }
}

fn orchestrator(
    strategy: DispatchStrategy,
    workers: usize,
    run_dir: &Path,
) -> Orchestrator<SeededBackend> {
    let config = config(strategy);
    let backends = (0..workers).map(|_| SeededBackend).collect();
    let dispatcher = Dispatcher::from_config(&config.dispatch, backends).unwrap();
    Orchestrator::new(
        &config,
        dispatcher,
        PromptEngine::builtin().unwrap(),
        collaborators(),
        population(),
        spec(2621, run_dir),
    )
    .unwrap()
}

fn line_count(path: &Path) -> usize {
    fs::read_to_string(path).unwrap().lines().count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn same_seed_reproduces_aggregates() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();

    let mut first = orchestrator(DispatchStrategy::Concurrent, 1, first_dir.path());
    let mut second = orchestrator(DispatchStrategy::Concurrent, 1, second_dir.path());
    let a = first.run(&mut NoOpCallback).await.unwrap();
    let b = second.run(&mut NoOpCallback).await.unwrap();

    // Initial poll plus one poll per day.
    assert_eq!(a.vaccine_hesitancy_ratio.len(), 4);
    assert_eq!(a.vaccine_hesitancy_ratio, b.vaccine_hesitancy_ratio);
    assert_eq!(
        fs::read_to_string(first_dir.path().join(AGGREGATE_FILE)).unwrap(),
        fs::read_to_string(second_dir.path().join(AGGREGATE_FILE)).unwrap(),
    );
}

#[tokio::test]
async fn worker_pool_matches_concurrent() {
    let concurrent_dir = tempfile::tempdir().unwrap();
    let pool_dir = tempfile::tempdir().unwrap();

    let mut concurrent = orchestrator(DispatchStrategy::Concurrent, 1, concurrent_dir.path());
    let mut pool = orchestrator(DispatchStrategy::WorkerPool, 3, pool_dir.path());
    let a = concurrent.run(&mut NoOpCallback).await.unwrap();
    let b = pool.run(&mut NoOpCallback).await.unwrap();

    assert_eq!(a.vaccine_hesitancy_ratio, b.vaccine_hesitancy_ratio);
    for (x, y) in concurrent.state().agents.iter().zip(&pool.state().agents) {
        assert_eq!(x.attitudes, y.attitudes);
        assert_eq!(x.lessons.len(), y.lessons.len());
    }
}

#[tokio::test]
async fn phases_and_policy_follow_the_day_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = orchestrator(DispatchStrategy::Concurrent, 1, dir.path());
    let mut log = PhaseLog::default();
    orchestrator.run(&mut log).await.unwrap();

    assert_eq!(
        log.days,
        vec![(1, Phase::Warmup), (2, Phase::Active), (3, Phase::Active)]
    );
    assert_eq!(orchestrator.phase(), Phase::Finalized);

    let state = orchestrator.state();
    for agent in &state.agents {
        assert_eq!(agent.attitudes.len(), 4);
        assert_eq!(agent.reasoning.len(), 4);
        assert_eq!(agent.distributions.len(), 4);
        // One post per day.
        assert_eq!(agent.tweets.len(), 3);
        assert_eq!(agent.policy.as_ref(), Some(&policy()));
        assert_eq!(agent.risk, Some(RiskLevel::High));
        assert!(agent.lessons.contains("shared lesson"));
        assert!(!agent.reflections.is_empty());
    }
}

#[tokio::test]
async fn every_agent_gets_a_row_per_stage() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = orchestrator(DispatchStrategy::Concurrent, 1, dir.path());
    orchestrator.run(&mut NoOpCallback).await.unwrap();

    // init + day 1 (no posts feed: 3 waves) + two full days (4 waves each)
    let waves = 1 + 3 + 4 + 4;
    assert_eq!(line_count(&dir.path().join(TRANSCRIPT_FILE)), waves + 1);
    for id in 0..5 {
        let path = dir.path().join(format!("agents/agent_id={id}.tsv"));
        assert_eq!(line_count(&path), waves + 1);
    }
    assert_eq!(line_count(&dir.path().join(AGGREGATE_FILE)), 4 + 1);

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(summary["vaccine_hesitancy_ratio"].as_array().unwrap().len(), 4);
    assert_eq!(summary["infection_info"]["risks_history"].as_array().unwrap().len(), 3);
    assert_eq!(summary["policy"]["category"], "incentive");
}

#[tokio::test]
async fn finalized_run_requires_reset() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = orchestrator(DispatchStrategy::Concurrent, 1, dir.path());
    let first = orchestrator.run(&mut NoOpCallback).await.unwrap();

    let again = orchestrator.run(&mut NoOpCallback).await;
    assert!(matches!(again, Err(OrchestratorError::NeedsReset)));

    let reset_dir = tempfile::tempdir().unwrap();
    orchestrator.reset(spec(2621, reset_dir.path())).unwrap();
    assert_eq!(orchestrator.phase(), Phase::Init);
    assert!(orchestrator.state().agents.iter().all(|a| a.attitudes.is_empty()));

    let second = orchestrator.run(&mut NoOpCallback).await.unwrap();
    assert_eq!(first.vaccine_hesitancy_ratio, second.vaccine_hesitancy_ratio);
    assert_ne!(first.run_id, second.run_id);
}
