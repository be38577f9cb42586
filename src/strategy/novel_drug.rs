//! One-shot introduction of a novel drug into the public sector.

use crate::distribution::Distribution;
use crate::error::ValidationError;
use crate::random::RandomSource;
use crate::strategy::nested::{NestedMftPolicy, PeakAfter, Ramp};
use crate::strategy::{ChildRef, SlotId, StrategyId};
use crate::time::Day;

/// Nested MFT that, once, phases a novel drug into its public-sector child.
///
/// The public-sector child (child 0) is held through a registry slot. When
/// the dominant public therapy starts failing, the slot is re-bound to a new
/// nested MFT that ramps from the old public policy towards a mix with the
/// newly introduced strategy. The registry performs the re-binding; this
/// type only decides when and with what.
#[derive(Debug, Clone, PartialEq)]
pub struct NovelDrugPolicy {
    nested: NestedMftPolicy,
    public_slot: SlotId,
    newly_introduced_strategy_id: StrategyId,
    tf_threshold: f64,
    replacement_fraction: f64,
    replacement_duration: Day,
    is_switched: bool,
    switched_on: Option<Day>,
    trigger_unavailable_reported: bool,
}

impl NovelDrugPolicy {
    /// Creates the policy in the not-yet-switched state.
    ///
    /// # Errors
    /// - the first child is not bound through a slot
    /// - `tf_threshold` or `replacement_fraction` outside `[0, 1]`
    /// - negative `replacement_duration`
    pub fn new(
        nested: NestedMftPolicy,
        newly_introduced_strategy_id: StrategyId,
        tf_threshold: f64,
        replacement_fraction: f64,
        replacement_duration: Day,
    ) -> Result<Self, ValidationError> {
        let Some(ChildRef::Slot(public_slot)) = nested.children().first().copied() else {
            return Err(ValidationError::InvalidValue {
                field: "strategy_ids".to_string(),
                reason: "the public-sector policy must be held through a slot".to_string(),
            });
        };
        for (field, value) in [
            ("tf_threshold", tf_threshold),
            ("replacement_fraction", replacement_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("must be in [0, 1], got {value}"),
                });
            }
        }
        if replacement_duration < 0 {
            return Err(ValidationError::InvalidValue {
                field: "replacement_duration".to_string(),
                reason: format!("cannot be negative, got {replacement_duration}"),
            });
        }
        Ok(Self {
            nested,
            public_slot,
            newly_introduced_strategy_id,
            tf_threshold,
            replacement_fraction,
            replacement_duration,
            is_switched: false,
            switched_on: None,
            trigger_unavailable_reported: false,
        })
    }

    /// Draw a child according to the live distribution.
    pub fn select(&self, rng: &mut dyn RandomSource) -> ChildRef {
        self.nested.select(rng)
    }

    /// Index of the drawn child; 0 is the public sector.
    pub fn select_index(&self, rng: &mut dyn RandomSource) -> usize {
        self.nested.select_index(rng)
    }

    /// Children; the first one is the public-sector policy.
    #[must_use]
    pub fn children(&self) -> &[ChildRef] {
        self.nested.children()
    }

    /// The wrapped composition.
    #[must_use]
    pub fn nested(&self) -> &NestedMftPolicy {
        &self.nested
    }

    /// Slot holding the public-sector policy.
    #[must_use]
    pub const fn public_slot(&self) -> SlotId {
        self.public_slot
    }

    /// Strategy phased in on introduction.
    #[must_use]
    pub const fn newly_introduced_strategy_id(&self) -> StrategyId {
        self.newly_introduced_strategy_id
    }

    /// Failure rate that must be exceeded to introduce the novel drug.
    #[must_use]
    pub const fn tf_threshold(&self) -> f64 {
        self.tf_threshold
    }

    /// Share of the novel drug at the end of the replacement ramp.
    #[must_use]
    pub const fn replacement_fraction(&self) -> f64 {
        self.replacement_fraction
    }

    /// Length of the replacement ramp in days.
    #[must_use]
    pub const fn replacement_duration(&self) -> Day {
        self.replacement_duration
    }

    /// True once the novel drug has been introduced.
    #[must_use]
    pub const fn is_switched(&self) -> bool {
        self.is_switched
    }

    /// Day of the introduction.
    #[must_use]
    pub const fn switched_on(&self) -> Option<Day> {
        self.switched_on
    }

    /// Monthly ramp step of the wrapped composition.
    pub fn monthly_update(&mut self, id: StrategyId, day: Day, inflation_factor: f64) {
        self.nested.monthly_update(id, day, inflation_factor);
    }

    /// Restart the wrapped ramp from `day`. The switch guard is kept.
    pub fn adjust_started_time_point(&mut self, day: Day) {
        self.nested.adjust_started_time_point(day);
    }

    /// Whether the introduction should happen today.
    ///
    /// `public_failure_rate` is `None` when the public policy has no
    /// dominant therapy, which suppresses the trigger.
    #[must_use]
    pub fn should_introduce(
        &self,
        day: Day,
        warmup_days: Day,
        public_failure_rate: Option<f64>,
    ) -> bool {
        !self.is_switched
            && day > warmup_days
            && public_failure_rate.is_some_and(|rate| rate > self.tf_threshold)
    }

    /// Composition replacing the public policy: `[current_public, novel]`
    /// ramping from `[1, 0]` to `[1 - f, f]` over the replacement duration,
    /// starting on `day`. A zero duration puts the final mix in effect
    /// immediately.
    ///
    /// # Errors
    /// Only if the replacement fraction yields an invalid distribution.
    pub fn replacement_policy(
        &self,
        current_public: StrategyId,
        day: Day,
    ) -> Result<NestedMftPolicy, ValidationError> {
        let f = self.replacement_fraction;
        let start = Distribution::new("start_distribution", vec![1.0, 0.0])?;
        let peak = Distribution::new("peak_distribution", vec![1.0 - f, f])?;
        let ramp = Ramp::new(start, peak, PeakAfter::Days(self.replacement_duration))?;
        Ok(NestedMftPolicy::new(
            vec![
                ChildRef::Strategy(current_public),
                ChildRef::Strategy(self.newly_introduced_strategy_id),
            ],
            ramp,
        )?
        .starting_at(day))
    }

    /// Record that the trigger could not be evaluated. Returns true only the
    /// first time, so the condition is reported once per run.
    pub fn note_trigger_unavailable(&mut self) -> bool {
        !std::mem::replace(&mut self.trigger_unavailable_reported, true)
    }

    /// Set the fires-once guard.
    pub fn mark_switched(&mut self, day: Day) {
        self.is_switched = true;
        self.switched_on = Some(day);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> NovelDrugPolicy {
        let d = Distribution::new("d", vec![1.0]).unwrap();
        let ramp = Ramp::new(d.clone(), d, PeakAfter::Days(0)).unwrap();
        let nested = NestedMftPolicy::new(vec![ChildRef::Slot(0)], ramp).unwrap();
        NovelDrugPolicy::new(nested, 3, 0.1, 0.4, 365).unwrap()
    }

    #[test]
    fn trigger_requires_warmup_and_threshold() {
        let p = policy();
        assert!(!p.should_introduce(3000, 3000, Some(0.5)));
        assert!(!p.should_introduce(3001, 3000, Some(0.1)));
        assert!(!p.should_introduce(3001, 3000, None));
        assert!(p.should_introduce(3001, 3000, Some(0.11)));
    }

    #[test]
    fn never_triggers_twice() {
        let mut p = policy();
        p.mark_switched(3100);
        assert!(p.is_switched());
        assert_eq!(p.switched_on(), Some(3100));
        assert!(!p.should_introduce(4000, 3000, Some(1.0)));
        p.adjust_started_time_point(5000);
        assert!(p.is_switched());
    }

    #[test]
    fn unavailable_trigger_reported_once() {
        let mut p = policy();
        assert!(p.note_trigger_unavailable());
        assert!(!p.note_trigger_unavailable());
        assert!(!p.note_trigger_unavailable());
    }

    #[test]
    fn replacement_ramps_towards_fraction() {
        let p = policy();
        assert_eq!(p.public_slot(), 0);
        let mut composite = p.replacement_policy(7, 3100).unwrap();
        assert_eq!(
            composite.children(),
            &[ChildRef::Strategy(7), ChildRef::Strategy(3)]
        );
        assert_eq!(composite.starting_time(), 3100);
        assert_eq!(composite.distribution().weights(), &[1.0, 0.0]);
        composite.monthly_update(0, 3100 + 365, 0.0);
        let w = composite.distribution().weights();
        assert!((w[0] - 0.6).abs() < 1e-12);
        assert!((w[1] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn invalid_parameters_rejected() {
        let d = Distribution::new("d", vec![1.0]).unwrap();
        let ramp = Ramp::new(d.clone(), d, PeakAfter::Days(0)).unwrap();
        let nested = NestedMftPolicy::new(vec![ChildRef::Slot(0)], ramp).unwrap();
        assert!(NovelDrugPolicy::new(nested.clone(), 1, 1.5, 0.2, 10).is_err());
        assert!(NovelDrugPolicy::new(nested.clone(), 1, 0.1, -0.2, 10).is_err());
        assert!(NovelDrugPolicy::new(nested, 1, 0.1, 0.2, -1).is_err());

        let d = Distribution::new("d", vec![1.0]).unwrap();
        let ramp = Ramp::new(d.clone(), d, PeakAfter::Days(0)).unwrap();
        let unslotted = NestedMftPolicy::new(vec![ChildRef::Strategy(0)], ramp).unwrap();
        assert!(NovelDrugPolicy::new(unslotted, 1, 0.1, 0.2, 10).is_err());
    }
}
