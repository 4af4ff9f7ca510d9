//! Temperature-controlled attitude sampling.
//!
//! The model states a belief distribution over the four ratings; the
//! behavioral rating an agent "acts on" is drawn from that distribution
//! after temperature rescaling. Low temperatures sharpen towards the
//! model's argmax, high temperatures flatten towards uniform.
//!
//! The sampler owns its own seeded generator, so every draw in a run is
//! reproducible from the run seed independent of how generation requests
//! were scheduled.

use rand::SeedableRng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use vaxsim_types::{AttitudeDistribution, AttitudeRating};

use crate::error::AgentError;

/// Entries below this value are floored before taking logs.
const PROBABILITY_FLOOR: f64 = 1e-6;

/// Lower bound on the temperature divisor.
const MIN_TEMPERATURE_SCALE: f64 = 1e-12;

/// Result of one attitude draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledAttitude {
    /// The drawn rating.
    pub rating: AttitudeRating,
    /// The distribution that was drawn from, rounded to two decimals.
    pub distribution: AttitudeDistribution,
}

/// Rescale a distribution by `temperature` (softmax over log-probabilities).
///
/// Entries below 1e-6 (or not finite) are floored at 1e-6, logs are divided
/// by `|temperature - 1e-6|`, and the result is exponentiated and
/// renormalized. The maximum log is subtracted first so very low
/// temperatures do not overflow.
pub fn apply_temperature(distribution: &AttitudeDistribution, temperature: f64) -> AttitudeDistribution {
    let scale = (temperature - PROBABILITY_FLOOR).abs().max(MIN_TEMPERATURE_SCALE);
    let logits = distribution.values().map(|value| {
        let floored = if value.is_finite() && value >= PROBABILITY_FLOOR {
            value
        } else {
            PROBABILITY_FLOOR
        };
        floored.ln() / scale
    });
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights = AttitudeDistribution::new(logits.map(|logit| (logit - max).exp()));
    // The max entry contributes exp(0) = 1, so the total is at least 1.
    weights.normalized().unwrap_or_else(AttitudeDistribution::uniform)
}

/// Seeded sampler that turns belief distributions into ratings.
#[derive(Debug, Clone)]
pub struct AttitudeSampler {
    rng: StdRng,
}

impl AttitudeSampler {
    /// Create a sampler seeded with the run seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Rescale by `temperature`, then draw with no probability cutoff.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::DegenerateDistribution`] only if rescaling
    /// produced no positive mass, which floored inputs cannot do.
    pub fn temperature_sampling(
        &mut self,
        distribution: &AttitudeDistribution,
        temperature: f64,
    ) -> Result<SampledAttitude, AgentError> {
        let rescaled = apply_temperature(distribution, temperature);
        self.sample(&rescaled, 0.0)
    }

    /// Zero entries below `min_p`, renormalize, and draw one rating.
    ///
    /// Negative and non-finite entries are treated as zero.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::DegenerateDistribution`] if no entry keeps
    /// positive mass after the cutoff.
    pub fn sample(
        &mut self,
        distribution: &AttitudeDistribution,
        min_p: f64,
    ) -> Result<SampledAttitude, AgentError> {
        let values = *distribution.values();
        let kept = AttitudeDistribution::new(values.map(|value| {
            if value.is_finite() && value > 0.0 && value >= min_p {
                value
            } else {
                0.0
            }
        }));
        let normalized = kept
            .normalized()
            .ok_or(AgentError::DegenerateDistribution { values })?;

        let index = WeightedIndex::new(normalized.values())
            .map_err(|_err| AgentError::DegenerateDistribution { values })?;
        let rating = AttitudeRating::from_index(index.sample(&mut self.rng))
            .ok_or(AgentError::DegenerateDistribution { values })?;

        Ok(SampledAttitude {
            rating,
            distribution: normalized.rounded(2),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ranks(dist: &AttitudeDistribution) -> Vec<usize> {
        let mut order: Vec<usize> = (0..4).collect();
        order.sort_by(|a, b| {
            let va = dist.values().get(*a).copied().unwrap_or(0.0);
            let vb = dist.values().get(*b).copied().unwrap_or(0.0);
            vb.total_cmp(&va)
        });
        order
    }

    #[test]
    fn sample_always_returns_a_valid_rating() {
        let cases = [
            [0.25, 0.25, 0.25, 0.25],
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
            [0.0, 0.7, 0.3, 0.0],
            [3.0, 1.0, 0.5, 0.0],
            [0.1, -0.2, 0.0, 0.4],
        ];
        let mut sampler = AttitudeSampler::from_seed(42);
        for values in cases {
            for _ in 0..50 {
                let drawn = sampler.sample(&AttitudeDistribution::new(values), 0.0).unwrap();
                assert!((1..=4).contains(&drawn.rating.value()));
            }
        }
    }

    #[test]
    fn point_mass_always_draws_that_rating() {
        let mut sampler = AttitudeSampler::from_seed(7);
        let dist = AttitudeDistribution::new([0.0, 0.0, 1.0, 0.0]);
        for _ in 0..20 {
            let drawn = sampler.sample(&dist, 0.0).unwrap();
            assert_eq!(drawn.rating, AttitudeRating::Probably);
        }
    }

    #[test]
    fn min_p_cuts_small_entries() {
        let mut sampler = AttitudeSampler::from_seed(3);
        let dist = AttitudeDistribution::new([0.05, 0.05, 0.1, 0.8]);
        for _ in 0..20 {
            let drawn = sampler.sample(&dist, 0.5).unwrap();
            assert_eq!(drawn.rating, AttitudeRating::Will);
            assert!((drawn.distribution.get(AttitudeRating::Will) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn all_zero_is_degenerate() {
        let mut sampler = AttitudeSampler::from_seed(3);
        let result = sampler.sample(&AttitudeDistribution::new([0.0; 4]), 0.0);
        assert!(matches!(result, Err(AgentError::DegenerateDistribution { .. })));
    }

    #[test]
    fn unit_temperature_preserves_rank_order() {
        let inputs = [
            [0.1, 0.2, 0.3, 0.4],
            [0.7, 0.2, 0.06, 0.04],
            [0.05, 0.6, 0.3, 0.05 + 1e-3],
            [0.0, 0.1, 0.85, 0.05],
        ];
        for values in inputs {
            let dist = AttitudeDistribution::new(values);
            let rescaled = apply_temperature(&dist, 1.0);
            assert_eq!(ranks(&dist), ranks(&rescaled));
            assert!((rescaled.total() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn low_temperature_sharpens() {
        let dist = AttitudeDistribution::new([0.1, 0.2, 0.3, 0.4]);
        let sharp = apply_temperature(&dist, 0.1);
        assert!(sharp.get(AttitudeRating::Will) > 0.9);
        let flat = apply_temperature(&dist, 10.0);
        assert!(flat.get(AttitudeRating::Will) < 0.3);
    }

    #[test]
    fn zero_temperature_does_not_overflow() {
        let dist = AttitudeDistribution::new([0.1, 0.2, 0.3, 0.4]);
        let sharp = apply_temperature(&dist, 0.0);
        assert!(sharp.is_well_formed());
        assert!((sharp.get(AttitudeRating::Will) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn same_seed_same_draws() {
        let dist = AttitudeDistribution::new([0.25, 0.25, 0.25, 0.25]);
        let mut a = AttitudeSampler::from_seed(2621);
        let mut b = AttitudeSampler::from_seed(2621);
        for _ in 0..30 {
            let x = a.temperature_sampling(&dist, 1.0).unwrap();
            let y = b.temperature_sampling(&dist, 1.0).unwrap();
            assert_eq!(x.rating, y.rating);
        }
    }
}
