//! Core data structs for the vaccine-attitude simulation.
//!
//! Profiles and policies are immutable inputs. Lessons, distributions and
//! tweets are produced by the generation layer and accumulated per agent.
//! Population aggregates are computed once per polled day.

use serde::{Deserialize, Serialize};

use crate::enums::{AttitudeRating, RiskLevel, Stance};
use crate::ids::AgentId;

/// Default per-day decay rate for lesson relevance.
pub const DEFAULT_DECAY_RATE: f64 = 0.995;

/// Round `value` to `decimals` decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Persona profile
// ---------------------------------------------------------------------------

/// Immutable demographic profile of a synthetic persona.
///
/// Field names follow the persona records on disk (`"Gender"`,
/// `"Political belief"`, ...). Age is accepted as either a number or a
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Self-described gender.
    #[serde(rename = "Gender", alias = "gender")]
    pub gender: String,
    /// Age, kept as text so ranges like "35-44" survive.
    #[serde(rename = "Age", alias = "age", deserialize_with = "deserialize_age")]
    pub age: String,
    /// Highest education level.
    #[serde(rename = "Education", alias = "education")]
    pub education: String,
    /// Occupation.
    #[serde(rename = "Occupation", alias = "occupation")]
    pub occupation: String,
    /// Political belief.
    #[serde(rename = "Political belief", alias = "political_belief")]
    pub political_belief: String,
    /// Religion.
    #[serde(rename = "Religion", alias = "religion")]
    pub religion: String,
}

/// Raw age field as it may appear in persona records.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawAge {
    Int(i64),
    Float(f64),
    Text(String),
}

fn deserialize_age<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match RawAge::deserialize(deserializer)? {
        RawAge::Int(value) => value.to_string(),
        RawAge::Float(value) => value.to_string(),
        RawAge::Text(value) => value,
    })
}

// ---------------------------------------------------------------------------
// Attitude distribution
// ---------------------------------------------------------------------------

/// Model-asserted probability over the four attitude ratings.
///
/// Entries are nominally non-negative and sum to 1, but generated text is
/// not trusted: consumers normalize before drawing from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttitudeDistribution(pub [f64; 4]);

impl AttitudeDistribution {
    /// Wrap four probabilities (ratings 1 through 4).
    pub const fn new(values: [f64; 4]) -> Self {
        Self(values)
    }

    /// The uniform distribution, used as the degraded fallback.
    pub const fn uniform() -> Self {
        Self([0.25; 4])
    }

    /// The four probabilities in rating order.
    pub const fn values(&self) -> &[f64; 4] {
        &self.0
    }

    /// Probability assigned to a rating.
    pub fn get(&self, rating: AttitudeRating) -> f64 {
        self.0.get(rating.index()).copied().unwrap_or(0.0)
    }

    /// Sum of all entries.
    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Whether every entry is finite and non-negative.
    pub fn is_well_formed(&self) -> bool {
        self.0.iter().all(|v| v.is_finite() && *v >= 0.0)
    }

    /// Scale the entries to sum to 1.
    ///
    /// Returns `None` when the total mass is zero or not finite.
    pub fn normalized(&self) -> Option<Self> {
        let total = self.total();
        if !total.is_finite() || total <= 0.0 {
            return None;
        }
        Some(Self(self.0.map(|v| v / total)))
    }

    /// Round every entry to `decimals` places (for logging and transcripts).
    pub fn rounded(&self, decimals: i32) -> Self {
        Self(self.0.map(|v| round_to(v, decimals)))
    }
}

impl core::fmt::Display for AttitudeDistribution {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "[{a}, {b}, {c}, {d}]")
    }
}

/// A parsed attitude response: the stated reasoning plus the distribution.
///
/// Serializes to the same JSON shape the model is asked to produce, so a
/// reply can be written out and parsed back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttitudeReply {
    /// Short free-text justification.
    pub reasoning: String,
    /// Probability over the four ratings.
    #[serde(rename = "attitude_dist")]
    pub distribution: AttitudeDistribution,
}

// ---------------------------------------------------------------------------
// Lessons
// ---------------------------------------------------------------------------

/// A distilled, importance-weighted memory fragment.
///
/// Equality and hashing consider the text only: two lessons with the same
/// text are the same lesson regardless of when or how strongly they were
/// learned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    /// The takeaway text.
    pub text: String,
    /// Simulation day the lesson was created on.
    pub day: u32,
    /// Model-assigned importance (nominally 0-1).
    pub importance: f64,
    /// Per-day decay rate in (0, 1).
    pub decay_rate: f64,
}

impl Lesson {
    /// Create a lesson with the default decay rate.
    pub fn new(text: impl Into<String>, day: u32, importance: f64) -> Self {
        Self {
            text: text.into(),
            day,
            importance,
            decay_rate: DEFAULT_DECAY_RATE,
        }
    }

    /// Replace the decay rate.
    #[must_use]
    pub const fn with_decay_rate(mut self, decay_rate: f64) -> Self {
        self.decay_rate = decay_rate;
        self
    }

    /// Relevance on `current_day`: `importance + decay_rate^(age in days)`.
    ///
    /// The decay term is added rather than multiplied, so scores can exceed
    /// 1. They are only compared against each other.
    pub fn score(&self, current_day: u32) -> f64 {
        let age = current_day.saturating_sub(self.day);
        let exponent = i32::try_from(age).unwrap_or(i32::MAX);
        self.importance + self.decay_rate.powi(exponent)
    }
}

impl PartialEq for Lesson {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Lesson {}

impl core::hash::Hash for Lesson {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Policies, content, risk
// ---------------------------------------------------------------------------

/// An experimental intervention broadcast during the active phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy family, e.g. `incentive`, `community`, `mandate`.
    pub category: String,
    /// Strength label, e.g. `weak`, `strong`.
    pub strength: String,
    /// The announcement text shown to agents.
    pub content: String,
}

impl Policy {
    /// Short label used to key experiment summaries.
    pub fn head(&self) -> String {
        format!("{}-{}", self.category, self.strength)
    }
}

/// A short text authored by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tweet {
    /// Post body.
    pub text: String,
    /// Day it was written.
    pub day: u32,
    /// Author.
    pub author: AgentId,
}

/// One ranked item from a content or tweet recommender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedItem {
    /// Item text shown to the agent.
    pub text: String,
    /// Stance of the item, when known.
    #[serde(default)]
    pub stance: Stance,
    /// Recommender relevance score.
    pub score: f64,
}

/// Risk report for one simulation day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    /// Categorical level shown to agents.
    pub level: RiskLevel,
    /// Raw risk value.
    pub value: f64,
    /// Day-over-day change in percent (0 on the first day).
    pub change_rate: f64,
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Fractions of the population against (1-2), swing (3) and support (4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationSplit {
    /// Fraction with rating 1 or 2.
    pub against: f64,
    /// Fraction with rating 3.
    pub swing: f64,
    /// Fraction with rating 4.
    pub support: f64,
}

impl PopulationSplit {
    /// Compute the split over a population's current ratings.
    ///
    /// An empty population yields all zeros.
    pub fn from_ratings(ratings: &[AttitudeRating]) -> Self {
        if ratings.is_empty() {
            return Self::default();
        }
        let against = ratings.iter().filter(|r| r.is_against()).count();
        let swing = ratings.iter().filter(|r| r.is_swing()).count();
        let support = ratings.iter().filter(|r| r.is_support()).count();

        #[allow(clippy::cast_precision_loss)]
        let fraction = |count: usize| count as f64 / ratings.len() as f64;
        Self {
            against: fraction(against),
            swing: fraction(swing),
            support: fraction(support),
        }
    }
}

/// Attitude homophily over the social graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Homophily {
    /// Fraction of edges whose endpoints share a rating.
    pub overall: f64,
    /// Fraction of edges whose endpoints both hold rating 1, 2, 3, 4.
    pub per_rating: [f64; 4],
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn profile_accepts_numeric_age() {
        let json = r#"{"Gender":"Female","Age":42,"Education":"College","Occupation":"Nurse","Political belief":"Moderate","Religion":"None"}"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.age, "42");
        assert_eq!(profile.political_belief, "Moderate");
    }

    #[test]
    fn lesson_identity_is_text_only() {
        let a = Lesson::new("masks help", 1, 0.9);
        let b = Lesson::new("masks help", 4, 0.1);
        assert_eq!(a, b);
        let set: HashSet<Lesson> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn lesson_score_decays_with_age() {
        let lesson = Lesson::new("x", 2, 0.5);
        let mut previous = lesson.score(2);
        assert!((previous - 1.5).abs() < 1e-12);
        for day in 3..200 {
            let score = lesson.score(day);
            assert!(score <= previous);
            previous = score;
        }
    }

    #[test]
    fn lesson_score_before_creation_counts_as_age_zero() {
        let lesson = Lesson::new("x", 5, 0.2);
        assert!((lesson.score(1) - lesson.score(5)).abs() < 1e-12);
    }

    #[test]
    fn distribution_normalizes() {
        let dist = AttitudeDistribution::new([1.0, 1.0, 2.0, 0.0]);
        let norm = dist.normalized().unwrap();
        assert!((norm.get(AttitudeRating::Probably) - 0.5).abs() < 1e-12);
        assert!(AttitudeDistribution::new([0.0; 4]).normalized().is_none());
    }

    #[test]
    fn reply_uses_attitude_dist_key() {
        let reply = AttitudeReply {
            reasoning: "r".to_owned(),
            distribution: AttitudeDistribution::new([0.1, 0.2, 0.3, 0.4]),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert!(json.get("attitude_dist").is_some());
    }

    #[test]
    fn population_split_fractions() {
        let ratings = [
            AttitudeRating::WillNot,
            AttitudeRating::ProbablyNot,
            AttitudeRating::Probably,
            AttitudeRating::Will,
        ];
        let split = PopulationSplit::from_ratings(&ratings);
        assert!((split.against - 0.5).abs() < 1e-12);
        assert!((split.swing - 0.25).abs() < 1e-12);
        assert!((split.support - 0.25).abs() < 1e-12);
        assert_eq!(PopulationSplit::from_ratings(&[]), PopulationSplit::default());
    }

    #[test]
    fn rounding() {
        assert!((round_to(0.126, 2) - 0.13).abs() < 1e-12);
        assert!((round_to(-1.234, 1) + 1.2).abs() < 1e-12);
    }
}
