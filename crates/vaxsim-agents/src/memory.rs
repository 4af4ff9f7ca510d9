//! Per-agent lesson memory with time-decayed retrieval.
//!
//! Every lesson an agent draws from news, broadcasts, policies and peer
//! posts lands in its [`LessonStore`]. Lessons are never deleted: storage
//! grows with the run, and relevance is handled at read time instead.
//!
//! ## Retrieval
//!
//! [`LessonStore::retrieve`] scores each lesson with
//! [`Lesson::score`](vaxsim_types::Lesson::score)
//! (`importance + decay_rate^age`), drops scores at or below
//! [`MIN_RETRIEVAL_SCORE`], min-max normalizes the survivors, rounds to two
//! decimals, and keeps the top `k` by normalized score. Ties keep insertion
//! order, so retrieval is deterministic for a given history.
//!
//! [`render_lessons`] turns a retrieval into the block that is spliced into
//! the agent's system prompt, listed in ascending order of importance.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use vaxsim_types::{Lesson, round_to};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Number of lessons surfaced into the prompt by default.
pub const DEFAULT_MAX_REFLECTIONS: usize = 5;

/// Lessons scoring at or below this value are not retrieved.
pub const MIN_RETRIEVAL_SCORE: f64 = 0.05;

/// Header line of the rendered lesson block.
const LESSON_BLOCK_HEADER: &str = "Below are the most influential lessons to your opinions on vaccinations, shown in ascending order of their importance (a float on a scale of 0-1):\n";

/// Closing line of the rendered lesson block.
const LESSON_BLOCK_FOOTER: &str =
    "\n Please consider these lessons carefully when you make your decisions.\n";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// A lesson surfaced by retrieval, with its normalized score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedLesson {
    /// Lesson text.
    pub text: String,
    /// Min-max normalized score, rounded to two decimals.
    pub score: f64,
}

/// Deduplicated, insertion-ordered set of lessons.
#[derive(Debug, Clone, Default)]
pub struct LessonStore {
    lessons: Vec<Lesson>,
    texts: BTreeSet<String>,
}

impl LessonStore {
    /// Create an empty store.
    pub const fn new() -> Self {
        Self {
            lessons: Vec::new(),
            texts: BTreeSet::new(),
        }
    }

    /// Insert each lesson whose text is not already present.
    ///
    /// Returns how many lessons were actually added. A duplicate keeps the
    /// original entry (its day and importance are not refreshed).
    pub fn add<I>(&mut self, lessons: I) -> usize
    where
        I: IntoIterator<Item = Lesson>,
    {
        let mut added: usize = 0;
        for lesson in lessons {
            if self.texts.insert(lesson.text.clone()) {
                self.lessons.push(lesson);
                added = added.saturating_add(1);
            }
        }
        added
    }

    /// Whether a lesson with this text is stored.
    pub fn contains(&self, text: &str) -> bool {
        self.texts.contains(text)
    }

    /// All stored lessons in insertion order.
    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    /// Number of stored lessons.
    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }

    /// Retrieve at most `k` lessons ranked by normalized decayed score.
    ///
    /// Ranking uses the rounded score, so lessons that tie after rounding
    /// keep their insertion order.
    pub fn retrieve(&self, current_day: u32, k: usize) -> Vec<RetrievedLesson> {
        let scored: Vec<(&str, f64)> = self
            .lessons
            .iter()
            .map(|lesson| (lesson.text.as_str(), lesson.score(current_day)))
            .filter(|(_, score)| *score > MIN_RETRIEVAL_SCORE)
            .collect();

        let Some((mut min, mut max)) = score_range(scored.iter().map(|(_, s)| *s)) else {
            return Vec::new();
        };
        // All-equal scores: treat the range as [0, 1] instead of dividing by zero.
        if (max - min).abs() < f64::EPSILON {
            min = 0.0;
            max = 1.0;
        }
        let span = max - min;

        let mut retrieved: Vec<RetrievedLesson> = scored
            .into_iter()
            .map(|(text, score)| RetrievedLesson {
                text: text.to_owned(),
                score: round_to((score - min) / span, 2),
            })
            .collect();
        // Stable sort keeps insertion order among ties.
        retrieved.sort_by(|a, b| b.score.total_cmp(&a.score));
        retrieved.truncate(k);
        retrieved
    }
}

/// Minimum and maximum of a score sequence, or `None` if it is empty.
fn score_range<I>(scores: I) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = f64>,
{
    scores.into_iter().fold(None, |range, score| match range {
        None => Some((score, score)),
        Some((min, max)) => Some((min.min(score), max.max(score))),
    })
}

/// Render retrieved lessons as an enumerated prompt block.
///
/// `retrieved` is expected in descending score order (as returned by
/// [`LessonStore::retrieve`]); the block lists them ascending so the most
/// important lesson sits closest to the instruction that follows. An empty
/// retrieval renders as an empty string.
pub fn render_lessons(retrieved: &[RetrievedLesson]) -> String {
    if retrieved.is_empty() {
        return String::new();
    }
    let mut block = String::from(LESSON_BLOCK_HEADER);
    for (position, lesson) in retrieved.iter().rev().enumerate() {
        block.push_str(&format!(
            "Lessons {}: ({}, {})\n",
            position.saturating_add(1),
            lesson.text,
            lesson.score
        ));
    }
    block.push_str(LESSON_BLOCK_FOOTER);
    block
}
