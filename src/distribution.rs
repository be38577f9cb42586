//! Weighted selection core.
//!
//! A [`Distribution`] is an ordered list of weights aligned with a parallel
//! list of alternatives (therapies or child strategies). Every strategy that
//! samples uses the same cumulative walk in [`Distribution::select_index`];
//! only the way the weights are produced differs.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::random::RandomSource;

/// Maximum distance between the weight sum and 1.
pub const DISTRIBUTION_SUM_TOLERANCE: f64 = 1e-6;

/// Lower bound applied to observed failure rates before inverting them.
pub const DEFAULT_FAILURE_RATE_FLOOR: f64 = 0.05;

/// A validated, non-empty list of weights in `[0, 1]` summing to 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Distribution(Vec<f64>);

impl Distribution {
    /// Validate `weights` as a distribution.
    ///
    /// # Errors
    /// - the list is empty
    /// - a weight is not finite, negative or greater than 1
    /// - the weights do not sum to 1 within [`DISTRIBUTION_SUM_TOLERANCE`]
    pub fn new(field: &str, weights: Vec<f64>) -> Result<Self, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidDistribution {
            field: field.to_string(),
            reason,
        };

        if weights.is_empty() {
            return Err(invalid("distribution cannot be empty".to_string()));
        }
        for (i, w) in weights.iter().enumerate() {
            if !w.is_finite() {
                return Err(invalid(format!("weight #{i} is not a finite number")));
            }
            if *w < 0.0 {
                return Err(invalid(format!("weight #{i} ({w}) is negative")));
            }
            if *w > 1.0 {
                return Err(invalid(format!("weight #{i} ({w}) is greater than 1")));
            }
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > DISTRIBUTION_SUM_TOLERANCE {
            return Err(invalid(format!("weights sum to {sum}, expected 1")));
        }
        Ok(Self(weights))
    }

    /// Like [`Self::new`] but additionally rejects zero weights.
    pub fn strictly_positive(field: &str, weights: Vec<f64>) -> Result<Self, ValidationError> {
        if let Some((i, w)) = weights.iter().enumerate().find(|(_, w)| **w <= 0.0) {
            return Err(ValidationError::InvalidDistribution {
                field: field.to_string(),
                reason: format!("weight #{i} ({w}) must be greater than zero"),
            });
        }
        Self::new(field, weights)
    }

    /// Equal weights over `n` alternatives. `n` must be at least 1.
    #[must_use]
    pub fn uniform(n: usize) -> Self {
        let n = n.max(1);
        #[allow(clippy::cast_precision_loss)]
        let w = 1.0 / n as f64;
        Self(vec![w; n])
    }

    /// Normalize non-negative raw weights so that they sum to 1.
    ///
    /// Falls back to [`Self::uniform`] when every raw weight is zero.
    #[must_use]
    pub fn normalized(raw: &[f64]) -> Self {
        let sum: f64 = raw.iter().map(|w| w.max(0.0)).sum();
        if raw.is_empty() || sum <= 0.0 || !sum.is_finite() {
            return Self::uniform(raw.len());
        }
        Self(raw.iter().map(|w| w.max(0.0) / sum).collect())
    }

    /// The weights.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.0
    }

    /// Number of alternatives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a validated distribution.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of the weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Index of the first alternative whose cumulative weight reaches `r`.
    ///
    /// When rounding leaves the cumulative sum just under `r`, the last
    /// alternative is returned, so the result is always a valid index.
    #[must_use]
    pub fn select_index(&self, r: f64) -> usize {
        let mut cumulative = 0.0;
        for (i, w) in self.0.iter().enumerate() {
            cumulative += w;
            if r <= cumulative {
                return i;
            }
        }
        self.0.len().saturating_sub(1)
    }

    /// Draw one value from `rng` and select an index with it.
    pub fn draw(&self, rng: &mut dyn RandomSource) -> usize {
        self.select_index(rng.random_flat())
    }

    /// Linear interpolation from `start` (fraction 0) to `peak` (fraction 1).
    ///
    /// Each weight is clamped between its start and peak value. A fraction of
    /// 1 or more yields a copy of `peak`.
    #[must_use]
    pub fn interpolate(start: &Self, peak: &Self, fraction: f64) -> Self {
        if fraction >= 1.0 {
            return peak.clone();
        }
        let fraction = fraction.max(0.0);
        let weights = start
            .0
            .iter()
            .zip(&peak.0)
            .map(|(&s, &p)| {
                let w = s + (p - s) * fraction;
                if p > s {
                    w.clamp(s, p)
                } else {
                    w.clamp(p, s)
                }
            })
            .collect();
        Self(weights)
    }

    /// Grow the first weight by `1 + inflation_factor / 12` and spread the
    /// remainder evenly over the other alternatives.
    ///
    /// The first weight is capped at 1 so the sum stays 1.
    pub fn inflate_first(&mut self, inflation_factor: f64) {
        let Some(first) = self.0.first().copied() else {
            return;
        };
        let grown = (first * (1.0 + inflation_factor / 12.0)).clamp(0.0, 1.0);
        let rest = self.0.len() - 1;
        if rest == 0 {
            self.0[0] = 1.0;
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let other = (1.0 - grown) / rest as f64;
        self.0[0] = grown;
        for w in &mut self.0[1..] {
            *w = other;
        }
    }
}

impl<'de> Deserialize<'de> for Distribution {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Vec::<f64>::deserialize(deserializer)?;
        Distribution::new("distribution", raw).map_err(serde::de::Error::custom)
    }
}

/// Unnormalized rebalancing weights: `1 / max(rate, floor)` per therapy.
#[must_use]
pub fn inverse_failure_weights(failure_rates: &[f64], floor: f64) -> Vec<f64> {
    failure_rates
        .iter()
        .map(|&rate| {
            let rate = if rate.is_finite() { rate } else { 0.0 };
            1.0 / rate.max(floor)
        })
        .collect()
}
