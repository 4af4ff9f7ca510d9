//! Batched generation with retries, in input order.
//!
//! A wave is a list of [`GenerationRequest`]s that all share a [`Task`]
//! (attitude poll, lesson extraction, post writing, or raw completion).
//! The dispatcher returns exactly one [`SlotResult`] per request, at the
//! request's index, whatever happened to it.
//!
//! Each slot runs two nested loops:
//!
//! - **transport**: up to `max_retries` calls. A rate limit waits for the
//!   server hint (or `rate_limit_wait`); any other failure backs off
//!   exponentially up to `backoff_cap`. Rate-limited calls count towards
//!   the limit.
//! - **parse**: up to `max_parse_attempts` generations. Every regeneration
//!   bumps the request seed by one so a deterministic backend does not
//!   repeat the same unparsable answer.
//!
//! Exhausting either loop yields the task's fallback value. Failures never
//! escape a wave; the orchestrator only ever sees complete result lists.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info, warn};
use vaxsim_types::Lesson;

use crate::config::{DispatchConfig, DispatchStrategy};
use crate::error::{ParseError, RunnerError, TransportError};
use crate::llm::{CompletionBackend, GenerationRequest};
use crate::parse::{self, ParsedDistribution};

// ---------------------------------------------------------------------------
// Tasks and results
// ---------------------------------------------------------------------------

/// What a wave's replies are parsed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Raw text, no parsing.
    Completion,
    /// Reasoning plus attitude distribution.
    Attitude,
    /// Lesson list, dated with `day`.
    Lessons {
        /// Simulation day the lessons are learned on.
        day: u32,
    },
    /// A post.
    Action,
}

impl Task {
    /// Parse one reply for this task.
    ///
    /// # Errors
    ///
    /// Returns the parser's [`ParseError`] when the reply is unusable.
    pub fn parse(self, raw: &str) -> Result<Generated, ParseError> {
        match self {
            Self::Completion => Ok(Generated::Completion(Some(raw.to_owned()))),
            Self::Attitude => parse::try_parse_distribution(raw).map(|reply| {
                Generated::Attitude(ParsedDistribution {
                    reply,
                    success: true,
                })
            }),
            Self::Lessons { day } => parse::try_parse_lesson_list(raw, day).map(Generated::Lessons),
            Self::Action => parse::try_parse_action(raw).map(|text| Generated::Action(Some(text))),
        }
    }

    /// Value used when no usable reply was obtained.
    pub fn fallback(self) -> Generated {
        match self {
            Self::Completion => Generated::Completion(None),
            Self::Attitude => Generated::Attitude(ParsedDistribution::fallback()),
            Self::Lessons { .. } => Generated::Lessons(Vec::new()),
            Self::Action => Generated::Action(None),
        }
    }
}

/// Parsed output of one slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Generated {
    /// Raw text, `None` if generation failed.
    Completion(Option<String>),
    /// Attitude reply (uniform fallback when unparsable).
    Attitude(ParsedDistribution),
    /// Lessons (empty when unparsable).
    Lessons(Vec<Lesson>),
    /// Post text, `None` if no usable post was produced.
    Action(Option<String>),
}

/// Outcome of one request in a wave.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotResult {
    /// Last raw reply received, if any.
    pub raw: Option<String>,
    /// Parsed value or the task fallback.
    pub output: Generated,
    /// Generations used (parse attempts, not transport retries).
    pub attempts: u32,
}

impl SlotResult {
    /// A result carrying the task fallback.
    pub fn fallback(task: Task, raw: Option<String>, attempts: u32) -> Self {
        Self {
            raw,
            output: task.fallback(),
            attempts,
        }
    }

    /// The attitude reply, or the uniform fallback for other outputs.
    pub fn into_attitude(self) -> ParsedDistribution {
        match self.output {
            Generated::Attitude(parsed) => parsed,
            _ => ParsedDistribution::fallback(),
        }
    }

    /// The lessons, or none for other outputs.
    pub fn into_lessons(self) -> Vec<Lesson> {
        match self.output {
            Generated::Lessons(lessons) => lessons,
            _ => Vec::new(),
        }
    }

    /// The post text, if any.
    pub fn into_action(self) -> Option<String> {
        match self.output {
            Generated::Action(text) => text,
            _ => None,
        }
    }

    /// The raw completion, if any.
    pub fn into_completion(self) -> Option<String> {
        match self.output {
            Generated::Completion(text) => text,
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry limits and waits for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Generations per request before falling back.
    pub max_parse_attempts: u32,
    /// Transport calls per generation.
    pub max_retries: u32,
    /// Wait after a rate limit without a server hint.
    pub rate_limit_wait: Duration,
    /// First backoff after a hard failure.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    /// Backoff after the `failures`-th consecutive hard failure.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2_u32.saturating_pow(failures.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        DispatchConfig::default().retry_policy()
    }
}

// ---------------------------------------------------------------------------
// Single slot
// ---------------------------------------------------------------------------

/// Generate and parse one request, retrying as the policy allows.
///
/// Each parse attempt makes up to `max_retries` transport calls. If those all
/// fail, the slot returns the task's fallback at once; the remaining parse
/// attempts are not spent.
pub async fn run_slot<B: CompletionBackend>(
    backend: &B,
    task: Task,
    request: &GenerationRequest,
    policy: &RetryPolicy,
) -> SlotResult {
    let allowed = policy.max_parse_attempts.max(1);
    let mut last_raw: Option<String> = None;

    for attempt in 0..allowed {
        let used = attempt.saturating_add(1);
        let seeded = request.with_seed(request.seed.map(|seed| seed.wrapping_add(u64::from(attempt))));
        let Some(raw) = request_with_retry(backend, &seeded, policy).await else {
            return SlotResult::fallback(task, last_raw, used);
        };
        match task.parse(&raw) {
            Ok(output) => {
                return SlotResult {
                    raw: Some(raw),
                    output,
                    attempts: used,
                };
            }
            Err(e) => {
                debug!(task = ?task, attempt = used, error = %e, "unparsable reply, regenerating");
                last_raw = Some(raw);
            }
        }
    }

    warn!(
        task = ?task,
        attempts = allowed,
        raw_response = last_raw.as_deref().unwrap_or_default(),
        "parse attempts exhausted, using fallback"
    );
    SlotResult::fallback(task, last_raw, allowed)
}

/// Call the backend until it answers or the transport budget runs out.
async fn request_with_retry<B: CompletionBackend>(
    backend: &B,
    request: &GenerationRequest,
    policy: &RetryPolicy,
) -> Option<String> {
    let allowed = policy.max_retries.max(1);
    let mut hard_failures: u32 = 0;

    for attempt in 1..=allowed {
        let wait = match backend.complete(request).await {
            Ok(text) => return Some(text),
            Err(TransportError::RateLimited { retry_after }) => {
                let wait = retry_after.unwrap_or(policy.rate_limit_wait);
                warn!(
                    backend = backend.name(),
                    attempt,
                    wait_secs = wait.as_secs_f64(),
                    "rate limited"
                );
                wait
            }
            Err(TransportError::Hard(reason)) => {
                hard_failures = hard_failures.saturating_add(1);
                let wait = policy.backoff(hard_failures);
                warn!(
                    backend = backend.name(),
                    attempt,
                    error = %reason,
                    backoff_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "generation call failed"
                );
                wait
            }
        };
        if attempt < allowed {
            tokio::time::sleep(wait).await;
        }
    }

    error!(backend = backend.name(), attempts = allowed, "generation failed after all retries");
    None
}

// ---------------------------------------------------------------------------
// Dispatchers
// ---------------------------------------------------------------------------

/// One backend, requests issued in windows of `batch_size`.
#[derive(Debug)]
pub struct ConcurrentDispatcher<B> {
    backend: B,
    batch_size: usize,
    policy: RetryPolicy,
}

impl<B: CompletionBackend> ConcurrentDispatcher<B> {
    /// Create a dispatcher; a zero batch size is treated as one.
    pub fn new(backend: B, batch_size: usize, policy: RetryPolicy) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            policy,
        }
    }

    /// Run a wave; results are in request order.
    pub async fn dispatch(&self, task: Task, requests: Vec<GenerationRequest>) -> Vec<SlotResult> {
        let mut results = Vec::with_capacity(requests.len());
        for window in requests.chunks(self.batch_size) {
            let slots = window
                .iter()
                .map(|request| run_slot(&self.backend, task, request, &self.policy));
            results.extend(join_all(slots).await);
        }
        results
    }
}

/// One worker task per backend, requests sharded round-robin.
///
/// Request `i` goes to worker `i mod workers`; each worker runs its shard
/// in windows of `batch_size`.
#[derive(Debug)]
pub struct WorkerPoolDispatcher<B> {
    workers: Vec<Arc<B>>,
    batch_size: usize,
    policy: RetryPolicy,
}

impl<B: CompletionBackend + 'static> WorkerPoolDispatcher<B> {
    /// Create a pool with one worker per backend.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Config`] if `backends` is empty.
    pub fn new(backends: Vec<B>, batch_size: usize, policy: RetryPolicy) -> Result<Self, RunnerError> {
        if backends.is_empty() {
            return Err(RunnerError::Config("worker pool needs at least one backend".to_owned()));
        }
        Ok(Self {
            workers: backends.into_iter().map(Arc::new).collect(),
            batch_size: batch_size.max(1),
            policy,
        })
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Run a wave; results are in request order.
    ///
    /// A worker that panics contributes fallbacks for its whole shard.
    pub async fn dispatch(&self, task: Task, requests: Vec<GenerationRequest>) -> Vec<SlotResult> {
        let total = requests.len();
        let mut shards: Vec<Vec<(usize, GenerationRequest)>> = vec![Vec::new(); self.workers.len()];
        for (index, request) in requests.into_iter().enumerate() {
            let worker = index.checked_rem(self.workers.len()).unwrap_or(0);
            if let Some(shard) = shards.get_mut(worker) {
                shard.push((index, request));
            }
        }

        let mut handles = Vec::with_capacity(shards.len());
        for (worker, shard) in self.workers.iter().zip(shards) {
            if shard.is_empty() {
                continue;
            }
            let indices: Vec<usize> = shard.iter().map(|(index, _)| *index).collect();
            let backend = Arc::clone(worker);
            let policy = self.policy;
            let batch_size = self.batch_size;
            let handle = tokio::spawn(async move {
                let mut out = Vec::with_capacity(shard.len());
                for window in shard.chunks(batch_size) {
                    let slots = window.iter().map(|(index, request)| {
                        let backend = Arc::clone(&backend);
                        async move { (*index, run_slot(backend.as_ref(), task, request, &policy).await) }
                    });
                    out.extend(join_all(slots).await);
                }
                out
            });
            handles.push((indices, handle));
        }

        let mut slots: Vec<Option<SlotResult>> = vec![None; total];
        for (indices, handle) in handles {
            match handle.await {
                Ok(results) => {
                    for (index, result) in results {
                        if let Some(slot) = slots.get_mut(index) {
                            *slot = Some(result);
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, requests = indices.len(), "worker task failed");
                }
            }
        }
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| SlotResult::fallback(task, None, 0)))
            .collect()
    }
}

/// Configured dispatch strategy.
#[derive(Debug)]
pub enum Dispatcher<B> {
    /// Single backend, bounded concurrency.
    Concurrent(ConcurrentDispatcher<B>),
    /// One worker per backend.
    WorkerPool(WorkerPoolDispatcher<B>),
}

impl<B: CompletionBackend + 'static> Dispatcher<B> {
    /// Build the strategy named in `config` over `backends`.
    ///
    /// The concurrent strategy uses the first backend and ignores the rest.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Config`] if `backends` is empty.
    pub fn from_config(config: &DispatchConfig, backends: Vec<B>) -> Result<Self, RunnerError> {
        let policy = config.retry_policy();
        match config.strategy {
            DispatchStrategy::Concurrent => {
                let extra = backends.len().saturating_sub(1);
                let backend = backends
                    .into_iter()
                    .next()
                    .ok_or_else(|| RunnerError::Config("no generation backend configured".to_owned()))?;
                if extra > 0 {
                    warn!(ignored = extra, "concurrent dispatch uses one backend; extra targets ignored");
                }
                Ok(Self::Concurrent(ConcurrentDispatcher::new(backend, config.batch_size, policy)))
            }
            DispatchStrategy::WorkerPool => Ok(Self::WorkerPool(WorkerPoolDispatcher::new(
                backends,
                config.batch_size,
                policy,
            )?)),
        }
    }

    /// Run a wave; exactly one result per request, in request order.
    pub async fn dispatch(&self, task: Task, requests: Vec<GenerationRequest>) -> Vec<SlotResult> {
        let count = requests.len();
        info!(task = ?task, requests = count, "dispatching generation wave");
        let results = match self {
            Self::Concurrent(dispatcher) => dispatcher.dispatch(task, requests).await,
            Self::WorkerPool(dispatcher) => dispatcher.dispatch(task, requests).await,
        };
        let retried = results.iter().filter(|r| r.attempts > 1).count();
        debug!(task = ?task, requests = count, retried, "generation wave complete");
        results
    }

    /// Number of backends in use.
    pub fn worker_count(&self) -> usize {
        match self {
            Self::Concurrent(_) => 1,
            Self::WorkerPool(pool) => pool.worker_count(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use vaxsim_types::AttitudeDistribution;

    use super::*;
    use crate::llm::ChatMessage;

    /// How the scripted backend misbehaves for each request.
    #[derive(Clone, Copy)]
    enum Failure {
        Hard,
        RateLimited,
        Garbage,
    }

    /// Fails the first `fail_first` calls for each distinct prompt.
    struct ScriptedBackend {
        failure: Failure,
        fail_first: u32,
        calls: Mutex<HashMap<String, u32>>,
        seeds: Mutex<Vec<Option<u64>>>,
    }

    impl ScriptedBackend {
        fn new(failure: Failure, fail_first: u32) -> Self {
            Self {
                failure,
                fail_first,
                calls: Mutex::new(HashMap::new()),
                seeds: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, request: &GenerationRequest) -> u32 {
            self.seeds.lock().unwrap().push(request.seed);
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(request.user_text().to_owned()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        }

        fn total_calls(&self) -> u32 {
            self.calls.lock().unwrap().values().sum()
        }
    }

    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, request: &GenerationRequest) -> Result<String, TransportError> {
            let count = self.record(request);
            if count <= self.fail_first {
                return match self.failure {
                    Failure::Hard => Err(TransportError::Hard("connection reset".to_owned())),
                    Failure::RateLimited => Err(TransportError::RateLimited {
                        retry_after: Some(Duration::from_secs(1)),
                    }),
                    Failure::Garbage => Ok("I'd rather not say.".to_owned()),
                };
            }
            Ok(format!(
                r#"{{"reasoning": "{}", "attitude_dist": [0.1, 0.2, 0.3, 0.4]}}"#,
                request.user_text()
            ))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_parse_attempts: 5,
            max_retries: 7,
            rate_limit_wait: Duration::from_secs(35),
            backoff_base: Duration::ZERO,
            backoff_cap: Duration::ZERO,
        }
    }

    fn requests(n: usize) -> Vec<GenerationRequest> {
        (0..n)
            .map(|i| GenerationRequest {
                messages: vec![ChatMessage::system("persona"), ChatMessage::user(format!("req-{i}"))],
                max_tokens: 150,
                temperature: 0.7,
                seed: Some(100),
            })
            .collect()
    }

    fn assert_in_order(results: Vec<SlotResult>, n: usize) {
        assert_eq!(results.len(), n);
        for (i, result) in results.into_iter().enumerate() {
            let parsed = result.into_attitude();
            assert!(parsed.success);
            assert_eq!(parsed.reply.reasoning, format!("req-{i}"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_preserves_order_through_failures() {
        let dispatcher = ConcurrentDispatcher::new(ScriptedBackend::new(Failure::Hard, 2), 25, policy());
        let results = dispatcher.dispatch(Task::Attitude, requests(60)).await;
        assert!(results.iter().all(|r| r.attempts == 1));
        assert_in_order(results, 60);
        assert_eq!(dispatcher.backend.total_calls(), 180);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_pool_preserves_order_through_failures() {
        let backends = (0..3).map(|_| ScriptedBackend::new(Failure::Hard, 2)).collect();
        let pool = WorkerPoolDispatcher::new(backends, 25, policy()).unwrap();
        assert_eq!(pool.worker_count(), 3);
        let results = pool.dispatch(Task::Attitude, requests(61)).await;
        assert_in_order(results, 61);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_count_towards_retry_ceiling() {
        let dispatcher =
            ConcurrentDispatcher::new(ScriptedBackend::new(Failure::RateLimited, 100), 25, policy());
        let results = dispatcher.dispatch(Task::Attitude, requests(1)).await;
        assert_eq!(dispatcher.backend.total_calls(), 7);
        let result = results.into_iter().next().unwrap();
        assert_eq!(result.attempts, 1);
        assert!(result.raw.is_none());
        let parsed = result.into_attitude();
        assert!(!parsed.success);
        assert_eq!(parsed.reply.distribution, AttitudeDistribution::uniform());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_then_success() {
        let dispatcher =
            ConcurrentDispatcher::new(ScriptedBackend::new(Failure::RateLimited, 3), 25, policy());
        let results = dispatcher.dispatch(Task::Attitude, requests(4)).await;
        assert_in_order(results, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unparsable_replies_are_regenerated_with_new_seeds() {
        let dispatcher = ConcurrentDispatcher::new(ScriptedBackend::new(Failure::Garbage, 2), 25, policy());
        let results = dispatcher.dispatch(Task::Attitude, requests(1)).await;
        assert_eq!(results[0].attempts, 3);
        assert_eq!(
            *dispatcher.backend.seeds.lock().unwrap(),
            vec![Some(100), Some(101), Some(102)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn parse_exhaustion_falls_back_with_last_raw() {
        let dispatcher =
            ConcurrentDispatcher::new(ScriptedBackend::new(Failure::Garbage, 100), 25, policy());
        let results = dispatcher.dispatch(Task::Attitude, requests(2)).await;
        for result in results {
            assert_eq!(result.attempts, 5);
            assert_eq!(result.raw.as_deref(), Some("I'd rather not say."));
            assert!(!result.into_attitude().success);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lessons_and_actions_use_their_fallbacks() {
        let dispatcher =
            ConcurrentDispatcher::new(ScriptedBackend::new(Failure::Hard, 100), 25, policy());
        let lessons = dispatcher.dispatch(Task::Lessons { day: 2 }, requests(1)).await;
        assert!(lessons.into_iter().next().unwrap().into_lessons().is_empty());
        let actions = dispatcher.dispatch(Task::Action, requests(1)).await;
        assert!(actions.into_iter().next().unwrap().into_action().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_exhaustion_skips_remaining_parse_attempts() {
        let backend = ScriptedBackend::new(Failure::Hard, 100);
        let result = run_slot(&backend, Task::Attitude, &requests(1)[0], &policy()).await;
        assert_eq!(backend.total_calls(), 7);
        assert_eq!(result.attempts, 1);
        assert!(result.raw.is_none());
        let parsed = result.into_attitude();
        assert!(!parsed.success);
        assert_eq!(parsed.reply.distribution, AttitudeDistribution::uniform());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(3),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(3));
        assert_eq!(policy.backoff(40), Duration::from_secs(3));
    }

    #[test]
    fn empty_pool_is_rejected() {
        let result = WorkerPoolDispatcher::<ScriptedBackend>::new(Vec::new(), 25, policy());
        assert!(matches!(result, Err(RunnerError::Config(_))));
        let config = DispatchConfig::default();
        assert!(Dispatcher::<ScriptedBackend>::from_config(&config, Vec::new()).is_err());
    }
}
