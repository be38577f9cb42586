use tracing::info;

use crate::error::ValidationError;
use crate::strategy::StrategyId;
use crate::therapy::TherapyRef;
use crate::time::Day;

/// Rotates through a fixed list of therapies every `cycling_time` days.
#[derive(Debug, Clone, PartialEq)]
pub struct CyclingPolicy {
    therapies: Vec<TherapyRef>,
    index: usize,
    cycling_time: Day,
    next_switching_day: Day,
}

impl CyclingPolicy {
    /// Creates the policy. The first switch happens on day `cycling_time`.
    ///
    /// # Errors
    /// - `therapies` is empty
    /// - `cycling_time` is not positive
    pub fn new(therapies: Vec<TherapyRef>, cycling_time: Day) -> Result<Self, ValidationError> {
        if therapies.is_empty() {
            return Err(ValidationError::missing("therapy_ids"));
        }
        if cycling_time <= 0 {
            return Err(ValidationError::InvalidValue {
                field: "cycling_time".to_string(),
                reason: format!("must be a positive number of days, got {cycling_time}"),
            });
        }
        Ok(Self {
            therapies,
            index: 0,
            cycling_time,
            next_switching_day: cycling_time,
        })
    }

    /// Therapy handed out today.
    #[must_use]
    pub fn current_therapy(&self) -> &TherapyRef {
        &self.therapies[self.index]
    }

    /// Position of the current therapy in the rotation.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Day of the next scheduled rotation.
    #[must_use]
    pub const fn next_switching_day(&self) -> Day {
        self.next_switching_day
    }

    /// Days each therapy stays in use.
    #[must_use]
    pub const fn cycling_time(&self) -> Day {
        self.cycling_time
    }

    /// Therapies in rotation order.
    #[must_use]
    pub fn therapies(&self) -> &[TherapyRef] {
        &self.therapies
    }

    /// End-of-day check. Returns true if the policy rotated.
    pub fn update_end_of_time_step(&mut self, id: StrategyId, day: Day, date: &str) -> bool {
        if day != self.next_switching_day {
            return false;
        }
        self.index = (self.index + 1) % self.therapies.len();
        self.next_switching_day = day + self.cycling_time;
        info!(
            strategy_id = id,
            therapy = %self.current_therapy(),
            next_switching_day = self.next_switching_day,
            "{date}: Cycling strategy switched therapy"
        );
        true
    }

    /// Restart the rotation from the first therapy.
    pub fn adjust_started_time_point(&mut self, day: Day) {
        self.index = 0;
        self.next_switching_day = day + self.cycling_time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::therapy::{InMemoryTherapyCatalog, TherapyCatalog};

    fn policy(ids: &[u32], cycling_time: Day) -> CyclingPolicy {
        let catalog = InMemoryTherapyCatalog::with_ids(ids.iter().copied());
        let therapies = ids.iter().map(|id| catalog.resolve(*id).unwrap()).collect();
        CyclingPolicy::new(therapies, cycling_time).unwrap()
    }

    #[test]
    fn advances_once_per_cycle_and_wraps() {
        let mut p = policy(&[1, 2, 3], 10);
        let mut switches = 0;
        for day in 0..=30 {
            if p.update_end_of_time_step(0, day, "") {
                switches += 1;
            }
            if day < 10 {
                assert_eq!(p.current_therapy().id(), 1);
            }
        }
        assert_eq!(switches, 3);
        assert_eq!(p.index(), 0);
        assert_eq!(p.next_switching_day(), 40);
    }

    #[test]
    fn exactly_one_step_after_cycling_time() {
        let mut p = policy(&[7, 8], 5);
        for day in 0..5 {
            assert!(!p.update_end_of_time_step(0, day, ""));
        }
        assert!(p.update_end_of_time_step(0, 5, ""));
        assert_eq!(p.current_therapy().id(), 8);
    }

    #[test]
    fn reanchoring_resets_index() {
        let mut p = policy(&[1, 2], 10);
        p.update_end_of_time_step(0, 10, "");
        assert_eq!(p.index(), 1);
        p.adjust_started_time_point(100);
        assert_eq!(p.index(), 0);
        assert_eq!(p.next_switching_day(), 110);
    }

    #[test]
    fn rejects_empty_and_non_positive_cycle() {
        assert!(CyclingPolicy::new(Vec::new(), 10).is_err());
        let catalog = InMemoryTherapyCatalog::with_ids([1]);
        assert!(CyclingPolicy::new(vec![catalog.resolve(1).unwrap()], 0).is_err());
    }
}
