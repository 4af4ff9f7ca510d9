//! The per-day stage pipeline.
//!
//! Each stage builds one wave of requests (one per agent), hands it to the
//! dispatcher, waits for the complete result list, and only then writes to
//! agent state. Stages never overlap.
//!
//! | Stage                    | Generates    | Writes                         |
//! |--------------------------|--------------|--------------------------------|
//! | `feed_news`              | nothing      | per-agent news block           |
//! | `feed_disease_broadcast` | nothing      | broadcast text, agent risk     |
//! | `feed_news_and_policies` | lesson lists | lessons, agent policy          |
//! | `write_tweets_lesson`    | lesson lists | lessons                        |
//! | `prompt_actions`         | posts        | authored posts                 |
//! | `poll_attitude`          | attitudes    | ratings, aggregate series      |
//!
//! The initial poll (`init_agents`) runs once on day 1, before the first
//! warmup day.

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use vaxsim_agents::Agent;
use vaxsim_runner::{
    ChatMessage, CompletionBackend, Dispatcher, GenerationRequest, PromptEngine, PromptTemplate,
    RunnerError, SlotResult, Task, TokenLimits,
};
use vaxsim_types::{AttitudeDistribution, PopulationSplit, RecommendedItem, Stance};

use crate::collaborators::Collaborators;
use crate::config::{DiseaseConfig, SimulationConfig};
use crate::record::{AgentRow, RecordError, RunRecorder};
use crate::state::RunState;

/// Errors that end a stage.
///
/// Generation failures never appear here: they degrade per slot inside
/// the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// A prompt could not be rendered.
    #[error("prompt error: {0}")]
    Prompt(#[from] RunnerError),

    /// Output could not be written.
    #[error("record error: {0}")]
    Record(#[from] RecordError),
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// One step of the day cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Initial attitude poll.
    InitAgents,
    /// Recommend the day's news.
    FeedNews,
    /// Compose the weekly risk broadcast.
    FeedDiseaseBroadcast,
    /// Learn from broadcast, news and (once active) policy.
    BroadcastNewsAndPolicy,
    /// Learn from recommended peer posts.
    FeedTweets,
    /// Write a post.
    PromptActions,
    /// Poll attitudes and aggregate.
    PollAttitude,
}

impl Stage {
    /// Every daily stage in execution order.
    pub const DAY_PIPELINE: [Self; 6] = [
        Self::FeedNews,
        Self::FeedDiseaseBroadcast,
        Self::BroadcastNewsAndPolicy,
        Self::FeedTweets,
        Self::PromptActions,
        Self::PollAttitude,
    ];

    /// The stages to run for one day.
    pub fn pipeline(skip_tweets: bool) -> Vec<Self> {
        Self::DAY_PIPELINE
            .into_iter()
            .filter(|stage| !(skip_tweets && *stage == Self::FeedTweets))
            .collect()
    }

    /// Stable stage name used in transcripts.
    pub const fn name(self) -> &'static str {
        match self {
            Self::InitAgents => "init_agents",
            Self::FeedNews => "feed_news",
            Self::FeedDiseaseBroadcast => "feed_disease_broadcast",
            Self::BroadcastNewsAndPolicy => "feed_news_and_policies",
            Self::FeedTweets => "write_tweets_lesson",
            Self::PromptActions => "prompt_actions",
            Self::PollAttitude => "poll_attitude",
        }
    }

    /// Transcript label, e.g. `poll_attitude_day=3`.
    pub fn label(self, day: u32) -> String {
        format!("{}_day={day}", self.name())
    }
}

impl core::fmt::Display for Stage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// The knobs stages read, resolved once from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSettings {
    /// The simulated disease.
    pub disease: DiseaseConfig,
    /// News items per agent per day.
    pub num_news: usize,
    /// Takeaways requested from news and policy.
    pub news_takeaways: usize,
    /// Posts recommended per agent.
    pub tweet_recommendations: usize,
    /// Takeaways requested from posts.
    pub tweet_takeaways: usize,
    /// Probability cutoff for attitude draws.
    pub min_p: f64,
    /// Decay rate given to new lessons.
    pub decay_rate: f64,
    /// Output ceilings per task.
    pub token_limits: TokenLimits,
    /// Sampling temperature sent to the backend.
    pub generation_temperature: f64,
}

impl From<&SimulationConfig> for StageSettings {
    fn from(config: &SimulationConfig) -> Self {
        let experiment = &config.experiment;
        Self {
            disease: experiment.disease.clone(),
            num_news: experiment.num_news,
            news_takeaways: experiment.news_takeaways,
            tweet_recommendations: experiment.tweet_recommendations,
            tweet_takeaways: experiment.tweet_takeaways,
            min_p: experiment.min_p,
            decay_rate: experiment.decay_rate,
            token_limits: config.dispatch.token_limits,
            generation_temperature: config.dispatch.generation_temperature,
        }
    }
}

// ---------------------------------------------------------------------------
// News diagnostics
// ---------------------------------------------------------------------------

/// How one agent's news selection leans.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NewsDiagnostics {
    /// Share of the majority stance among the selected items.
    pub purity: f64,
    /// Positive items over the requested count.
    pub stance: f64,
    /// Mean relevance over the requested count.
    pub similarity: f64,
}

impl NewsDiagnostics {
    /// Diagnostics of one selection against the requested count.
    pub fn of(items: &[RecommendedItem], requested: usize) -> Self {
        if items.is_empty() || requested == 0 {
            return Self::default();
        }
        let positive = items.iter().filter(|i| i.stance == Stance::Positive).count();
        let relevance: f64 = items.iter().map(|i| i.score).sum();

        #[allow(clippy::cast_precision_loss)]
        let (positive, shown, requested) =
            (positive as f64, items.len() as f64, requested as f64);
        let share = positive / shown;
        Self {
            purity: if positive > shown / 2.0 { share } else { 1.0 - share },
            stance: positive / requested,
            similarity: relevance / requested,
        }
    }

    /// Mean of several diagnostics.
    pub fn mean(all: &[Self]) -> Self {
        if all.is_empty() {
            return Self::default();
        }
        #[allow(clippy::cast_precision_loss)]
        let count = all.len() as f64;
        let sum = |f: fn(&Self) -> f64| all.iter().map(f).sum::<f64>() / count;
        Self {
            purity: sum(|d| d.purity),
            stance: sum(|d| d.stance),
            similarity: sum(|d| d.similarity),
        }
    }
}

/// Enumerate texts as `"{header} {i}: {text}\n"` lines, starting at 1.
pub fn enumerate_block<'a, I>(header: &str, texts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| format!("{header} {}: {text}\n", i.saturating_add(1)))
        .collect()
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// What an attitude poll recorded for one agent.
#[derive(Debug, Clone, Serialize)]
struct AttitudeOutcome {
    reasoning: String,
    stated_dist: AttitudeDistribution,
    attitude_dist: AttitudeDistribution,
    attitude: u8,
    parsed: bool,
}

/// Executes stages against a run's state.
///
/// Borrows everything except the state, which each stage takes mutably.
pub struct StageRunner<'a, B> {
    dispatcher: &'a Dispatcher<B>,
    prompts: &'a PromptEngine,
    collaborators: &'a Collaborators,
    settings: &'a StageSettings,
    recorder: &'a RunRecorder,
}

impl<'a, B: CompletionBackend + 'static> StageRunner<'a, B> {
    /// Bundle the collaborators of one day.
    pub const fn new(
        dispatcher: &'a Dispatcher<B>,
        prompts: &'a PromptEngine,
        collaborators: &'a Collaborators,
        settings: &'a StageSettings,
        recorder: &'a RunRecorder,
    ) -> Self {
        Self {
            dispatcher,
            prompts,
            collaborators,
            settings,
            recorder,
        }
    }

    /// Run one stage to completion.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] if a prompt cannot be rendered or output
    /// cannot be written.
    pub async fn run(&self, stage: Stage, state: &mut RunState) -> Result<(), StageError> {
        debug!(stage = %stage, day = state.day(), "stage starting");
        match stage {
            Stage::InitAgents => self.init_agents(state).await,
            Stage::FeedNews => {
                self.feed_news(state);
                Ok(())
            }
            Stage::FeedDiseaseBroadcast => self.feed_disease_broadcast(state),
            Stage::BroadcastNewsAndPolicy => self.broadcast_news_and_policy(state).await,
            Stage::FeedTweets => self.feed_tweets(state).await,
            Stage::PromptActions => self.prompt_actions(state).await,
            Stage::PollAttitude => self.poll_attitude(state).await,
        }
    }

    /// Poll every agent once before the first day.
    async fn init_agents(&self, state: &mut RunState) -> Result<(), StageError> {
        let prompt = self.render(PromptTemplate::InitialAttitude, &json!({}))?;
        self.poll(state, Stage::InitAgents, prompt).await
    }

    /// Fetch each agent's news for the day's window.
    fn feed_news(&self, state: &mut RunState) {
        let day = state.day();
        let requested = self.settings.num_news;
        let recommendations = self
            .collaborators
            .news
            .recommend(&state.agents, day, requested);

        let mut blocks = Vec::with_capacity(state.agent_count());
        let mut diagnostics = Vec::with_capacity(state.agent_count());
        for index in 0..state.agent_count() {
            let items = recommendations.get(index).map_or(&[][..], Vec::as_slice);
            if items.len() < requested {
                debug!(agent_id = index, got = items.len(), requested, "short news list");
            }
            blocks.push(enumerate_block("News", items.iter().map(|i| i.text.as_str())));
            diagnostics.push(NewsDiagnostics::of(items, requested));
        }

        let mean = NewsDiagnostics::mean(&diagnostics);
        info!(
            day,
            purity = mean.purity,
            stance = mean.stance,
            similarity = mean.similarity,
            "news recommended"
        );
        state.recommended_news = Some(blocks);
    }

    /// Compose the risk broadcast and tag agents with the risk level.
    fn feed_disease_broadcast(&self, state: &mut RunState) -> Result<(), StageError> {
        let day = state.day();
        state.broadcast = None;
        let Some(model) = self.collaborators.risk.as_deref() else {
            debug!(day, "no risk model, broadcast skipped");
            return Ok(());
        };
        let Some(report) = model.report(day) else {
            warn!(day, "risk series has no entry for this day, broadcast skipped");
            return Ok(());
        };
        let previous = day
            .checked_sub(1)
            .and_then(|d| model.report(d))
            .map_or(report.level, |r| r.level);

        let message = self.render(
            PromptTemplate::DiseaseBroadcast,
            &json!({
                "day": day,
                "risk": report.level.to_string(),
                "previous_risk": previous.to_string(),
            }),
        )?;
        for agent in &mut state.agents {
            agent.risk = Some(report.level);
        }
        info!(day, risk = %report.level, change_rate = report.change_rate, "risk broadcast");
        state.broadcast = Some(format!("{message} "));
        Ok(())
    }

    /// Learn from broadcast plus news, with the policy once active.
    async fn broadcast_news_and_policy(&self, state: &mut RunState) -> Result<(), StageError> {
        let policy = state.active_policy().cloned();
        let policy_content = policy.as_ref().map(|p| p.content.clone());
        for agent in &mut state.agents {
            agent.policy.clone_from(&policy);
        }

        let news = state.recommended_news.take().unwrap_or_default();
        let broadcast = state.broadcast.clone().unwrap_or_default();
        let mut prompts = Vec::with_capacity(state.agent_count());
        for index in 0..state.agent_count() {
            let items = news.get(index).map_or("", String::as_str);
            let combined = format!("{broadcast}{items}");
            let combined = combined.trim();
            prompts.push(self.render(
                PromptTemplate::NewsAndPolicy,
                &json!({
                    "news": if combined.is_empty() { None } else { Some(combined) },
                    "policies": policy_content,
                    "takeaways": self.settings.news_takeaways,
                }),
            )?);
        }
        state.recommended_news = Some(news);
        self.learn(state, Stage::BroadcastNewsAndPolicy, prompts).await
    }

    /// Learn from the top peer posts.
    async fn feed_tweets(&self, state: &mut RunState) -> Result<(), StageError> {
        let recommendations = self
            .collaborators
            .tweets
            .recommend(&state.agents, self.settings.tweet_recommendations);
        let mut prompts = Vec::with_capacity(state.agent_count());
        for index in 0..state.agent_count() {
            let items = recommendations.get(index).map_or(&[][..], Vec::as_slice);
            let posts = enumerate_block("Post", items.iter().map(|i| i.text.as_str()));
            prompts.push(self.render(
                PromptTemplate::Tweets,
                &json!({ "tweets": posts.trim(), "takeaways": self.settings.tweet_takeaways }),
            )?);
        }
        self.learn(state, Stage::FeedTweets, prompts).await
    }

    /// Have every agent write a post.
    async fn prompt_actions(&self, state: &mut RunState) -> Result<(), StageError> {
        let day = state.day();
        let prompt = self.render(PromptTemplate::Action, &json!({}))?;
        let prompts = vec![prompt; state.agent_count()];
        let requests = self.build_requests(state, prompts, self.settings.token_limits.tweet)?;
        let results = self.dispatch(Stage::PromptActions, day, Task::Action, &requests).await;

        let mut outputs = Vec::with_capacity(results.len());
        for (index, result) in results.into_iter().enumerate() {
            let text = result.into_action();
            match (&text, state.agents.get_mut(index)) {
                (Some(text), Some(agent)) => agent.post(text.clone(), day),
                (None, _) => debug!(agent_id = index, day, "no post written"),
                (Some(_), None) => {}
            }
            outputs.push(text.unwrap_or_default());
        }
        self.record(state, Stage::PromptActions, &requests, &outputs, &outputs)?;
        Ok(())
    }

    /// Poll attitudes for the day.
    async fn poll_attitude(&self, state: &mut RunState) -> Result<(), StageError> {
        let prompt = self.render(PromptTemplate::Attitude, &json!({}))?;
        self.poll(state, Stage::PollAttitude, prompt).await
    }

    // -- shared steps -------------------------------------------------------

    fn render(
        &self,
        template: PromptTemplate,
        extra: &serde_json::Value,
    ) -> Result<String, RunnerError> {
        let mut context = json!({ "disease": self.settings.disease.name });
        if let (Some(target), Some(fields)) = (context.as_object_mut(), extra.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        self.prompts.render(template, &context)
    }

    /// Render the system turn for one agent, refreshing its reflections.
    fn system_prompt(&self, agent: &mut Agent, day: u32) -> Result<String, RunnerError> {
        let reflections = agent.refresh_reflections(day);
        let profile = &agent.profile;
        let initial = agent.initial_attitude().map(|rating| {
            json!({ "rating": rating.value(), "reasoning": agent.initial_reasoning() })
        });
        let latest = agent.latest_attitude().map(|rating| {
            json!({
                "rating": rating.value(),
                "reasoning": agent.latest_reasoning(),
                "distribution": agent.latest_distribution().map(ToString::to_string),
            })
        });
        self.render(
            PromptTemplate::System,
            &json!({
                "profile": {
                    "gender": profile.gender,
                    "age": profile.age,
                    "education": profile.education,
                    "occupation": profile.occupation,
                    "political_belief": profile.political_belief,
                    "religion": profile.religion,
                },
                "initial": initial,
                "latest": latest,
                "risk": agent.risk.map(|r| r.to_string()),
                "policy": agent.policy.as_ref().map(|p| json!({
                    "content": p.content,
                    "strength": p.strength,
                })),
                "day": day,
                "disease_description": self.settings.disease.description,
                "reflections": reflections,
            }),
        )
    }

    /// One `[system, user]` request per agent, each with its own sub-seed.
    fn build_requests(
        &self,
        state: &mut RunState,
        user_prompts: Vec<String>,
        max_tokens: u32,
    ) -> Result<Vec<GenerationRequest>, RunnerError> {
        let day = state.day();
        let mut requests = Vec::with_capacity(user_prompts.len());
        for (agent, user) in state.agents.iter_mut().zip(user_prompts) {
            let system = self.system_prompt(agent, day)?;
            requests.push(GenerationRequest {
                messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
                max_tokens,
                temperature: self.settings.generation_temperature,
                seed: None,
            });
        }
        let seeds = state.draw_seeds(requests.len());
        for (request, seed) in requests.iter_mut().zip(seeds) {
            request.seed = Some(seed);
        }
        Ok(requests)
    }

    async fn dispatch(
        &self,
        stage: Stage,
        day: u32,
        task: Task,
        requests: &[GenerationRequest],
    ) -> Vec<SlotResult> {
        debug!(stage = %stage, day, requests = requests.len(), "stage wave built");
        self.dispatcher.dispatch(task, requests.to_vec()).await
    }

    /// Dispatch lesson extraction and store the results.
    async fn learn(
        &self,
        state: &mut RunState,
        stage: Stage,
        prompts: Vec<String>,
    ) -> Result<(), StageError> {
        let day = state.day();
        let requests = self.build_requests(state, prompts, self.settings.token_limits.long)?;
        let results = self.dispatch(stage, day, Task::Lessons { day }, &requests).await;

        let mut outputs: Vec<Vec<(String, f64)>> = Vec::with_capacity(results.len());
        let mut learned: usize = 0;
        for (index, result) in results.into_iter().enumerate() {
            let lessons: Vec<_> = result
                .into_lessons()
                .into_iter()
                .map(|l| l.with_decay_rate(self.settings.decay_rate))
                .collect();
            outputs.push(lessons.iter().map(|l| (l.text.clone(), l.importance)).collect());
            if let Some(agent) = state.agents.get_mut(index) {
                learned = learned.saturating_add(agent.learn(lessons));
            }
        }
        info!(stage = %stage, day, learned, "lessons stored");

        let responses = outputs
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(RecordError::from)?;
        self.record(state, stage, &requests, &outputs, &responses)?;
        Ok(())
    }

    /// Dispatch an attitude poll, sample ratings, and aggregate.
    async fn poll(&self, state: &mut RunState, stage: Stage, prompt: String) -> Result<(), StageError> {
        let day = state.day();
        let prompts = vec![prompt; state.agent_count()];
        let requests = self.build_requests(state, prompts, self.settings.token_limits.long)?;
        let results = self.dispatch(stage, day, Task::Attitude, &requests).await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (index, result) in results.into_iter().enumerate() {
            let parsed = result.into_attitude();
            let sampled = state.sample_attitude(&parsed.reply.distribution, self.settings.min_p);
            if let Some(agent) = state.agents.get_mut(index) {
                agent.record_attitude(
                    sampled.rating,
                    parsed.reply.reasoning.clone(),
                    sampled.distribution,
                );
            }
            outcomes.push(AttitudeOutcome {
                reasoning: parsed.reply.reasoning,
                stated_dist: parsed.reply.distribution,
                attitude_dist: sampled.distribution,
                attitude: sampled.rating.value(),
                parsed: parsed.success,
            });
        }

        let ratings: Vec<_> = state.agents.iter().filter_map(Agent::latest_attitude).collect();
        let split = PopulationSplit::from_ratings(&ratings);
        let homophily = state.graph.homophily(&state.latest_ratings());
        state.attitude_series.push(split);
        state.homophily_series.push(homophily);
        self.recorder.append_aggregate(day, &split, &homophily)?;
        info!(
            day,
            against = split.against,
            swing = split.swing,
            support = split.support,
            homophily = homophily.overall,
            "attitudes polled"
        );

        let responses = outcomes
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(RecordError::from)?;
        self.record(state, stage, &requests, &outcomes, &responses)?;
        Ok(())
    }

    /// Write the wave's transcript row and one row per agent.
    fn record<T: Serialize>(
        &self,
        state: &RunState,
        stage: Stage,
        requests: &[GenerationRequest],
        outputs: &[T],
        responses: &[String],
    ) -> Result<(), RecordError> {
        let day = state.day();
        let label = stage.label(day);
        self.recorder
            .append_stage(&label, day, &state.attitude_series, requests, outputs)?;
        for ((agent, request), response) in state.agents.iter().zip(requests).zip(responses) {
            self.recorder.append_agent_row(&AgentRow {
                agent,
                day,
                stage: &label,
                response,
                system_prompt: &request.system_text(),
                user_prompt: request.user_text(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn item(stance: Stance, score: f64) -> RecommendedItem {
        RecommendedItem {
            text: "item".to_owned(),
            stance,
            score,
        }
    }

    #[test]
    fn first_warmup_day_skips_tweets() {
        let full = Stage::pipeline(false);
        assert_eq!(full.len(), 6);
        let short = Stage::pipeline(true);
        assert_eq!(short.len(), 5);
        assert!(!short.contains(&Stage::FeedTweets));
        assert_eq!(short.last(), Some(&Stage::PollAttitude));
    }

    #[test]
    fn labels_carry_the_day() {
        assert_eq!(Stage::PollAttitude.label(3), "poll_attitude_day=3");
        assert_eq!(Stage::InitAgents.label(1), "init_agents_day=1");
    }

    #[test]
    fn news_diagnostics_match_majority() {
        let items = [
            item(Stance::Positive, 0.9),
            item(Stance::Positive, 0.6),
            item(Stance::Negative, 0.3),
        ];
        let d = NewsDiagnostics::of(&items, 3);
        assert!((d.purity - 2.0 / 3.0).abs() < 1e-12);
        assert!((d.stance - 2.0 / 3.0).abs() < 1e-12);
        assert!((d.similarity - 0.6).abs() < 1e-12);

        let negative = [item(Stance::Negative, 0.5), item(Stance::Positive, 0.5)];
        let d = NewsDiagnostics::of(&negative, 3);
        assert!((d.purity - 0.5).abs() < 1e-12);
        assert!((d.stance - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_news_has_zero_diagnostics() {
        assert_eq!(NewsDiagnostics::of(&[], 3), NewsDiagnostics::default());
        assert_eq!(NewsDiagnostics::mean(&[]), NewsDiagnostics::default());
    }

    #[test]
    fn enumerate_starts_at_one() {
        let block = enumerate_block("News", ["a", "b"]);
        assert_eq!(block, "News 1: a\nNews 2: b\n");
        assert_eq!(enumerate_block("Post", Vec::<&str>::new()), "");
    }
}
