use tracing::info;

use crate::context::FeedbackSource;
use crate::distribution::{inverse_failure_weights, Distribution};
use crate::error::ValidationError;
use crate::random::RandomSource;
use crate::strategy::StrategyId;
use crate::therapy::TherapyRef;
use crate::time::Day;

/// MFT whose weights are periodically recomputed from failure feedback.
///
/// Recomputation and application are two phases: every
/// `update_duration_after_rebalancing` days a target distribution is staged,
/// and it becomes live `delay_until_actual_trigger` days later.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalancingPolicy {
    therapies: Vec<TherapyRef>,
    distribution: Distribution,
    next_distribution: Distribution,
    update_duration_after_rebalancing: Day,
    delay_until_actual_trigger: Day,
    next_update_time: Day,
    latest_adjust_distribution_time: Option<Day>,
}

impl RebalancingPolicy {
    /// Creates the policy. The first recomputation happens on day
    /// `update_duration_after_rebalancing`.
    ///
    /// # Errors
    /// - distribution length differs from the therapy count
    /// - `update_duration_after_rebalancing` is not positive
    /// - `delay_until_actual_trigger` is negative
    pub fn new(
        therapies: Vec<TherapyRef>,
        distribution: Distribution,
        update_duration_after_rebalancing: Day,
        delay_until_actual_trigger: Day,
    ) -> Result<Self, ValidationError> {
        if therapies.len() != distribution.len() {
            return Err(ValidationError::LengthMismatch {
                field: "distribution".to_string(),
                expected: therapies.len(),
                actual: distribution.len(),
            });
        }
        if update_duration_after_rebalancing <= 0 {
            return Err(ValidationError::InvalidValue {
                field: "update_duration_after_rebalancing".to_string(),
                reason: format!(
                    "must be a positive number of days, got {update_duration_after_rebalancing}"
                ),
            });
        }
        if delay_until_actual_trigger < 0 {
            return Err(ValidationError::InvalidValue {
                field: "delay_until_actual_trigger".to_string(),
                reason: format!("cannot be negative, got {delay_until_actual_trigger}"),
            });
        }
        Ok(Self {
            therapies,
            next_distribution: distribution.clone(),
            distribution,
            update_duration_after_rebalancing,
            delay_until_actual_trigger,
            next_update_time: update_duration_after_rebalancing,
            latest_adjust_distribution_time: None,
        })
    }

    /// Draw a therapy according to the live distribution.
    pub fn select(&self, rng: &mut dyn RandomSource) -> &TherapyRef {
        &self.therapies[self.distribution.draw(rng)]
    }

    /// Therapies, index-aligned with the distributions.
    #[must_use]
    pub fn therapies(&self) -> &[TherapyRef] {
        &self.therapies
    }

    /// Live distribution used for selection.
    #[must_use]
    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// Most recently computed target distribution.
    #[must_use]
    pub fn next_distribution(&self) -> &Distribution {
        &self.next_distribution
    }

    /// Day of the next recomputation.
    #[must_use]
    pub const fn next_update_time(&self) -> Day {
        self.next_update_time
    }

    /// Day on which the staged distribution goes live, if pending.
    #[must_use]
    pub const fn latest_adjust_distribution_time(&self) -> Option<Day> {
        self.latest_adjust_distribution_time
    }

    /// Days between recomputations.
    #[must_use]
    pub const fn update_duration_after_rebalancing(&self) -> Day {
        self.update_duration_after_rebalancing
    }

    /// Stage a new target from the current failure rates.
    fn recompute(&mut self, feedback: &dyn FeedbackSource, failure_rate_floor: f64) {
        let rates: Vec<f64> = self
            .therapies
            .iter()
            .map(|t| feedback.failure_rate(t.id()))
            .collect();
        let raw = inverse_failure_weights(&rates, failure_rate_floor);
        self.next_distribution = Distribution::normalized(&raw);
    }

    /// End-of-day check for both phases.
    pub fn update_end_of_time_step(
        &mut self,
        id: StrategyId,
        day: Day,
        feedback: &dyn FeedbackSource,
        failure_rate_floor: f64,
        date: &str,
    ) {
        if self.latest_adjust_distribution_time == Some(day) {
            self.distribution = self.next_distribution.clone();
            self.latest_adjust_distribution_time = None;
            info!(
                strategy_id = id,
                distribution = ?self.distribution.weights(),
                "{date}: MFT rebalancing adjusted distribution"
            );
        }

        if day != self.next_update_time {
            return;
        }

        self.recompute(feedback, failure_rate_floor);
        self.next_update_time = day + self.update_duration_after_rebalancing;

        if self.delay_until_actual_trigger == 0 {
            self.distribution = self.next_distribution.clone();
            info!(
                strategy_id = id,
                distribution = ?self.distribution.weights(),
                "{date}: MFT rebalancing adjusted distribution"
            );
        } else {
            self.latest_adjust_distribution_time = Some(day + self.delay_until_actual_trigger);
            info!(
                strategy_id = id,
                delay_days = self.delay_until_actual_trigger,
                next_distribution = ?self.next_distribution.weights(),
                "{date}: MFT rebalancing will adjust distribution"
            );
        }
    }

    /// Restart the recomputation schedule from `day` and drop any staged apply.
    pub fn adjust_started_time_point(&mut self, day: Day) {
        self.next_update_time = day + self.update_duration_after_rebalancing;
        self.latest_adjust_distribution_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InMemoryFeedback;
    use crate::distribution::DEFAULT_FAILURE_RATE_FLOOR;
    use crate::therapy::{InMemoryTherapyCatalog, TherapyCatalog};

    fn policy(update: Day, delay: Day) -> RebalancingPolicy {
        let catalog = InMemoryTherapyCatalog::with_ids([0, 1, 2]);
        let therapies = (0..3).map(|id| catalog.resolve(id).unwrap()).collect();
        let dist = Distribution::uniform(3);
        RebalancingPolicy::new(therapies, dist, update, delay).unwrap()
    }

    fn feedback() -> InMemoryFeedback {
        InMemoryFeedback::new()
            .with_failure_rate(0, 0.01)
            .with_failure_rate(1, 0.1)
            .with_failure_rate(2, 0.2)
    }

    #[test]
    fn recompute_then_apply_after_delay() {
        let mut p = policy(365, 30);
        let fb = feedback();
        let floor = DEFAULT_FAILURE_RATE_FLOOR;

        for day in 0..365 {
            p.update_end_of_time_step(0, day, &fb, floor, "");
        }
        assert_eq!(p.distribution(), &Distribution::uniform(3));

        p.update_end_of_time_step(0, 365, &fb, floor, "");
        assert_eq!(p.latest_adjust_distribution_time(), Some(395));
        assert_eq!(p.next_update_time(), 730);
        // staged but not live yet
        assert_eq!(p.distribution(), &Distribution::uniform(3));
        let expected = [20.0 / 35.0, 10.0 / 35.0, 5.0 / 35.0];
        for (w, e) in p.next_distribution().weights().iter().zip(expected) {
            assert!((w - e).abs() < 1e-12);
        }

        for day in 366..395 {
            p.update_end_of_time_step(0, day, &fb, floor, "");
        }
        assert_eq!(p.distribution(), &Distribution::uniform(3));
        p.update_end_of_time_step(0, 395, &fb, floor, "");
        assert_eq!(p.distribution(), p.next_distribution());
        assert!((p.distribution().sum() - 1.0).abs() < 1e-9);
        assert_eq!(p.latest_adjust_distribution_time(), None);
    }

    #[test]
    fn zero_delay_applies_immediately() {
        let mut p = policy(10, 0);
        p.update_end_of_time_step(0, 10, &feedback(), DEFAULT_FAILURE_RATE_FLOOR, "");
        assert_eq!(p.distribution(), p.next_distribution());
        assert_ne!(p.distribution(), &Distribution::uniform(3));
    }

    #[test]
    fn all_rates_under_floor_give_equal_weights() {
        let mut p = policy(10, 0);
        let fb = InMemoryFeedback::new();
        p.update_end_of_time_step(0, 10, &fb, DEFAULT_FAILURE_RATE_FLOOR, "");
        for w in p.distribution().weights() {
            assert!((w - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn reanchoring_reschedules() {
        let mut p = policy(100, 20);
        p.update_end_of_time_step(0, 100, &feedback(), DEFAULT_FAILURE_RATE_FLOOR, "");
        assert!(p.latest_adjust_distribution_time().is_some());
        p.adjust_started_time_point(150);
        assert_eq!(p.next_update_time(), 250);
        assert_eq!(p.latest_adjust_distribution_time(), None);
    }
}
