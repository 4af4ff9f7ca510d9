//! Reference recommenders for news and peer posts.
//!
//! [`NewsRecommender`] serves a day-indexed window of the news corpus and
//! ranks it per agent by stance affinity. [`FollowTweetRecommender`] ranks
//! other agents' latest posts by a blend of follow weight and attitude
//! proximity. Both are deterministic for a given population state.

use vaxsim_agents::Agent;
use vaxsim_core::{ContentRecommender, TweetRecommender};
use vaxsim_types::{AttitudeRating, RecommendedItem, Stance, round_to};

use crate::data::NewsItem;

/// Largest possible distance between two ratings.
const MAX_RATING_GAP: f64 = 3.0;

/// Lean of a rating in `[-1, 1]`: negative is against, positive supports.
fn lean(rating: Option<AttitudeRating>) -> f64 {
    rating.map_or(0.0, |r| (f64::from(r.value()) - 2.5) / 1.5)
}

const fn stance_sign(stance: Stance) -> f64 {
    match stance {
        Stance::Positive => 1.0,
        Stance::Negative => -1.0,
        Stance::Neutral => 0.0,
    }
}

/// Stance implied by an author's rating.
const fn stance_of(rating: Option<AttitudeRating>) -> Stance {
    match rating {
        Some(r) if r.is_support() => Stance::Positive,
        Some(r) if r.is_against() => Stance::Negative,
        _ => Stance::Neutral,
    }
}

/// Sort descending by score; ties keep their input order.
fn rank(items: &mut [RecommendedItem]) {
    items.sort_by(|a, b| b.score.total_cmp(&a.score));
}

// ---------------------------------------------------------------------------
// News
// ---------------------------------------------------------------------------

/// Serves `n²` articles per day and keeps the `n` with the best affinity.
#[derive(Debug, Clone)]
pub struct NewsRecommender {
    items: Vec<NewsItem>,
}

impl NewsRecommender {
    /// Wrap a loaded corpus.
    pub const fn new(items: Vec<NewsItem>) -> Self {
        Self { items }
    }

    /// Articles in the day's window `[day·n², (day+1)·n²)`.
    ///
    /// The window wraps around the corpus so long runs keep receiving news.
    pub fn window(&self, day: u32, count: usize) -> Vec<&NewsItem> {
        if self.items.is_empty() {
            return Vec::new();
        }
        let size = count.saturating_mul(count);
        let start = usize::try_from(day).unwrap_or(usize::MAX).saturating_mul(size);
        (0..size)
            .filter_map(|offset| {
                let index = start.wrapping_add(offset).checked_rem(self.items.len())?;
                self.items.get(index)
            })
            .collect()
    }
}

impl ContentRecommender for NewsRecommender {
    fn recommend(&self, agents: &[Agent], day: u32, count: usize) -> Vec<Vec<RecommendedItem>> {
        let window = self.window(day, count);
        agents
            .iter()
            .map(|agent| {
                let lean = lean(agent.latest_attitude());
                // Rotate per agent so equal scores do not hand everyone the same article.
                let shift = agent.id.index().checked_rem(window.len()).unwrap_or(0);
                let mut ranked: Vec<RecommendedItem> = window
                    .iter()
                    .cycle()
                    .skip(shift)
                    .take(window.len())
                    .map(|item| RecommendedItem {
                        text: item.text.clone(),
                        stance: item.stance,
                        score: round_to(lean.mul_add(stance_sign(item.stance), 1.0) / 2.0, 4),
                    })
                    .collect();
                rank(&mut ranked);
                ranked.truncate(count);
                ranked
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Peer posts
// ---------------------------------------------------------------------------

/// Ranks peers' latest posts by follow weight and attitude proximity.
///
/// `score = alpha · weight / max_weight + (1 - alpha) · (1 - |Δrating| / 3)`
#[derive(Debug, Clone, Copy)]
pub struct FollowTweetRecommender {
    alpha: f64,
}

impl FollowTweetRecommender {
    /// Create with the blend factor `alpha` in `[0, 1]`.
    pub const fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    fn score(&self, reader: &Agent, author: &Agent, max_weight: u32) -> f64 {
        let weight = reader.following.get(&author.id).copied().unwrap_or(0);
        let follow = if max_weight == 0 {
            0.0
        } else {
            f64::from(weight) / f64::from(max_weight)
        };
        let proximity = match (reader.latest_attitude(), author.latest_attitude()) {
            (Some(a), Some(b)) => {
                1.0 - f64::from(a.value().abs_diff(b.value())) / MAX_RATING_GAP
            }
            _ => 0.0,
        };
        self.alpha.mul_add(follow, (1.0 - self.alpha) * proximity)
    }
}

impl TweetRecommender for FollowTweetRecommender {
    fn recommend(&self, agents: &[Agent], count: usize) -> Vec<Vec<RecommendedItem>> {
        agents
            .iter()
            .map(|reader| {
                let max_weight = reader.following.values().copied().max().unwrap_or(0);
                let mut ranked: Vec<RecommendedItem> = agents
                    .iter()
                    .filter(|author| author.id != reader.id)
                    .filter_map(|author| {
                        let tweet = author.latest_tweet()?;
                        Some(RecommendedItem {
                            text: tweet.text.clone(),
                            stance: stance_of(author.latest_attitude()),
                            score: round_to(self.score(reader, author, max_weight), 4),
                        })
                    })
                    .collect();
                rank(&mut ranked);
                ranked.truncate(count);
                ranked
            })
            .collect()
    }
}
