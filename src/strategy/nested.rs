//! Composition of child strategies with a time-driven distribution.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::distribution::Distribution;
use crate::error::ValidationError;
use crate::random::RandomSource;
use crate::strategy::{ChildRef, StrategyId};
use crate::time::Day;

/// How a ramp reaches its peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "days")]
pub enum PeakAfter {
    /// Linear ramp reaching the peak this many days after the start.
    /// Zero means the peak is in effect from the start.
    Days(Day),

    /// Open-ended growth of the first weight by `inflation_factor / 12` per
    /// month. Configured as `peak_after: -1`.
    Inflation,
}

impl PeakAfter {
    /// Configuration value selecting [`PeakAfter::Inflation`].
    pub const INFLATION: i64 = -1;

    /// Interpret a configured `peak_after`.
    ///
    /// # Errors
    /// Any negative value other than `-1`.
    pub fn from_config(peak_after: i64) -> Result<Self, ValidationError> {
        match peak_after {
            Self::INFLATION => Ok(Self::Inflation),
            days if days >= 0 => Ok(Self::Days(days)),
            other => Err(ValidationError::InvalidValue {
                field: "peak_after".to_string(),
                reason: format!("expected a non-negative number of days or -1, got {other}"),
            }),
        }
    }

    /// The configuration value this mode was read from.
    #[must_use]
    pub const fn as_config(self) -> i64 {
        match self {
            Self::Days(days) => days,
            Self::Inflation => Self::INFLATION,
        }
    }
}

/// One distribution moving from `start` towards `peak`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ramp {
    start: Distribution,
    peak: Distribution,
    current: Distribution,
    peak_after: PeakAfter,
}

impl Ramp {
    /// Creates a ramp whose live distribution begins at `start`, or at `peak`
    /// when `peak_after` is zero days.
    ///
    /// # Errors
    /// Returns an error when `start` and `peak` have different lengths.
    pub fn new(
        start: Distribution,
        peak: Distribution,
        peak_after: PeakAfter,
    ) -> Result<Self, ValidationError> {
        if start.len() != peak.len() {
            return Err(ValidationError::LengthMismatch {
                field: "peak_distribution".to_string(),
                expected: start.len(),
                actual: peak.len(),
            });
        }
        let current = if peak_after == PeakAfter::Days(0) {
            peak.clone()
        } else {
            start.clone()
        };
        Ok(Self {
            start,
            peak,
            current,
            peak_after,
        })
    }

    /// Live distribution.
    #[must_use]
    pub fn current(&self) -> &Distribution {
        &self.current
    }

    /// Distribution at the start of the ramp.
    #[must_use]
    pub fn start(&self) -> &Distribution {
        &self.start
    }

    /// Distribution at the end of the ramp.
    #[must_use]
    pub fn peak(&self) -> &Distribution {
        &self.peak
    }

    /// Ramp mode.
    #[must_use]
    pub const fn peak_after(&self) -> PeakAfter {
        self.peak_after
    }

    /// Number of alternatives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.start.len()
    }

    /// Always false for a validated ramp.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }

    /// Recompute the live distribution `elapsed` days after the start.
    pub fn update(&mut self, elapsed: Day, inflation_factor: f64) {
        match self.peak_after {
            PeakAfter::Inflation => self.current.inflate_first(inflation_factor),
            PeakAfter::Days(days) if days <= 0 || elapsed >= days => {
                self.current = self.peak.clone();
            }
            PeakAfter::Days(days) => {
                let t = elapsed.clamp(0, days);
                #[allow(clippy::cast_precision_loss)]
                let fraction = t as f64 / days as f64;
                self.current = Distribution::interpolate(&self.start, &self.peak, fraction);
            }
        }
    }
}

/// Weighted choice among child strategies.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedMftPolicy {
    children: Vec<ChildRef>,
    ramp: Ramp,
    starting_time: Day,
}

impl NestedMftPolicy {
    /// Creates the policy with the ramp anchored at day 0.
    ///
    /// # Errors
    /// - no children
    /// - ramp length differs from the child count
    pub fn new(children: Vec<ChildRef>, ramp: Ramp) -> Result<Self, ValidationError> {
        if children.is_empty() {
            return Err(ValidationError::missing("strategy_ids"));
        }
        if children.len() != ramp.len() {
            return Err(ValidationError::LengthMismatch {
                field: "start_distribution".to_string(),
                expected: children.len(),
                actual: ramp.len(),
            });
        }
        Ok(Self {
            children,
            ramp,
            starting_time: 0,
        })
    }

    /// Anchor the ramp at `day`.
    #[must_use]
    pub fn starting_at(mut self, day: Day) -> Self {
        self.starting_time = day;
        self
    }

    /// Draw a child according to the live distribution.
    pub fn select(&self, rng: &mut dyn RandomSource) -> ChildRef {
        self.children[self.select_index(rng)]
    }

    /// Index of the drawn child; 0 is the public sector.
    pub fn select_index(&self, rng: &mut dyn RandomSource) -> usize {
        self.ramp.current().draw(rng)
    }

    /// Children, index-aligned with the distribution.
    #[must_use]
    pub fn children(&self) -> &[ChildRef] {
        &self.children
    }

    pub(crate) fn first_child_mut(&mut self) -> &mut ChildRef {
        &mut self.children[0]
    }

    /// Live distribution.
    #[must_use]
    pub fn distribution(&self) -> &Distribution {
        self.ramp.current()
    }

    /// The ramp driving the distribution.
    #[must_use]
    pub fn ramp(&self) -> &Ramp {
        &self.ramp
    }

    /// Day the ramp started.
    #[must_use]
    pub const fn starting_time(&self) -> Day {
        self.starting_time
    }

    /// Monthly ramp step.
    pub fn monthly_update(&mut self, id: StrategyId, day: Day, inflation_factor: f64) {
        self.ramp.update(day - self.starting_time, inflation_factor);
        debug!(
            strategy_id = id,
            day,
            distribution = ?self.ramp.current().weights(),
            "Nested MFT distribution updated"
        );
    }

    /// Restart the ramp from `day`.
    pub fn adjust_started_time_point(&mut self, day: Day) {
        self.starting_time = day;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::ScriptedRandom;

    fn d(w: &[f64]) -> Distribution {
        Distribution::new("test", w.to_vec()).unwrap()
    }

    fn nested(peak_after: PeakAfter) -> NestedMftPolicy {
        let ramp = Ramp::new(d(&[1.0, 0.0]), d(&[0.4, 0.6]), peak_after).unwrap();
        NestedMftPolicy::new(vec![ChildRef::Strategy(0), ChildRef::Strategy(1)], ramp)
            .unwrap()
            .starting_at(100)
    }

    #[test]
    fn peak_after_from_config() {
        assert_eq!(PeakAfter::from_config(-1).unwrap(), PeakAfter::Inflation);
        assert_eq!(PeakAfter::from_config(365).unwrap(), PeakAfter::Days(365));
        assert!(PeakAfter::from_config(-2).is_err());
        assert_eq!(PeakAfter::Inflation.as_config(), -1);
    }

    #[test]
    fn ramp_start_midpoint_peak() {
        let mut p = nested(PeakAfter::Days(200));
        p.monthly_update(0, 100, 0.0);
        assert_eq!(p.distribution(), &d(&[1.0, 0.0]));

        p.monthly_update(0, 200, 0.0);
        assert!((p.distribution().weights()[0] - 0.7).abs() < 1e-12);
        assert!((p.distribution().weights()[1] - 0.3).abs() < 1e-12);

        p.monthly_update(0, 300, 0.0);
        assert_eq!(p.distribution(), &d(&[0.4, 0.6]));
        p.monthly_update(0, 900, 0.0);
        assert_eq!(p.distribution(), &d(&[0.4, 0.6]));
    }

    #[test]
    fn before_start_stays_at_start() {
        let mut p = nested(PeakAfter::Days(200));
        p.monthly_update(0, 50, 0.0);
        assert_eq!(p.distribution(), &d(&[1.0, 0.0]));
    }

    #[test]
    fn zero_peak_after_starts_at_peak() {
        let p = nested(PeakAfter::Days(0));
        assert_eq!(p.distribution(), &d(&[0.4, 0.6]));
    }

    #[test]
    fn inflation_grows_first_weight() {
        let ramp = Ramp::new(d(&[0.5, 0.25, 0.25]), d(&[0.5, 0.25, 0.25]), PeakAfter::Inflation)
            .unwrap();
        let children = vec![ChildRef::Strategy(0), ChildRef::Strategy(1), ChildRef::Strategy(2)];
        let mut p = NestedMftPolicy::new(children, ramp).unwrap();
        p.monthly_update(0, 30, 0.12);
        let w = p.distribution().weights();
        assert!((w[0] - 0.505).abs() < 1e-12);
        assert!((w[1] - 0.2475).abs() < 1e-12);
        assert!((w[2] - 0.2475).abs() < 1e-12);
    }

    #[test]
    fn selects_children_by_weight() {
        let p = nested(PeakAfter::Days(0));
        let mut rng = ScriptedRandom::new(vec![0.1, 0.9]);
        assert_eq!(p.select(&mut rng), ChildRef::Strategy(0));
        assert_eq!(p.select(&mut rng), ChildRef::Strategy(1));
    }

    #[test]
    fn reanchoring_restarts_ramp() {
        let mut p = nested(PeakAfter::Days(200));
        p.monthly_update(0, 400, 0.0);
        assert_eq!(p.distribution(), &d(&[0.4, 0.6]));
        p.adjust_started_time_point(400);
        p.monthly_update(0, 400, 0.0);
        assert_eq!(p.distribution(), &d(&[1.0, 0.0]));
    }

    #[test]
    fn child_count_must_match() {
        let ramp = Ramp::new(d(&[1.0]), d(&[1.0]), PeakAfter::Days(0)).unwrap();
        let err = NestedMftPolicy::new(vec![ChildRef::Strategy(0), ChildRef::Strategy(1)], ramp)
            .unwrap_err();
        assert!(matches!(err, ValidationError::LengthMismatch { .. }));
    }
}
