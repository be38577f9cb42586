use tracing::info;

use crate::context::FeedbackSource;
use crate::error::ValidationError;
use crate::strategy::StrategyId;
use crate::therapy::TherapyRef;
use crate::time::Day;

/// Rotates therapies when the current one fails too often.
///
/// Detection and action are separated: a failure rate above
/// `trigger_value` schedules a switch `delay_until_actual_trigger` days
/// later. After a switch no new switch is scheduled for `turn_off_days`.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveCyclingPolicy {
    therapies: Vec<TherapyRef>,
    index: usize,
    trigger_value: f64,
    delay_until_actual_trigger: Day,
    turn_off_days: Day,
    latest_switch_time: Option<Day>,
    switch_pending: bool,
}

impl AdaptiveCyclingPolicy {
    /// Creates the policy with no switch history.
    ///
    /// # Errors
    /// - `therapies` is empty
    /// - `trigger_value` is outside `[0, 1]`
    /// - a negative delay or cooldown
    pub fn new(
        therapies: Vec<TherapyRef>,
        trigger_value: f64,
        delay_until_actual_trigger: Day,
        turn_off_days: Day,
    ) -> Result<Self, ValidationError> {
        if therapies.is_empty() {
            return Err(ValidationError::missing("therapy_ids"));
        }
        if !(0.0..=1.0).contains(&trigger_value) {
            return Err(ValidationError::InvalidValue {
                field: "trigger_value".to_string(),
                reason: format!("must be a rate in [0, 1], got {trigger_value}"),
            });
        }
        for (field, value) in [
            ("delay_until_actual_trigger", delay_until_actual_trigger),
            ("turn_off_days", turn_off_days),
        ] {
            if value < 0 {
                return Err(ValidationError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("cannot be negative, got {value}"),
                });
            }
        }
        Ok(Self {
            therapies,
            index: 0,
            trigger_value,
            delay_until_actual_trigger,
            turn_off_days,
            latest_switch_time: None,
            switch_pending: false,
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

    /// Therapies in rotation order.
    #[must_use]
    pub fn therapies(&self) -> &[TherapyRef] {
        &self.therapies
    }

    /// Day of the pending switch, if one is scheduled.
    #[must_use]
    pub fn scheduled_switch(&self) -> Option<Day> {
        if self.switch_pending {
            self.latest_switch_time
        } else {
            None
        }
    }

    /// Day of the most recent switch, or of the pending one.
    #[must_use]
    pub const fn latest_switch_time(&self) -> Option<Day> {
        self.latest_switch_time
    }

    fn cooldown_elapsed(&self, day: Day) -> bool {
        self.latest_switch_time
            .map_or(true, |latest| day > latest + self.turn_off_days)
    }

    /// End-of-day check: perform a due switch, otherwise watch the feedback.
    pub fn update_end_of_time_step(
        &mut self,
        id: StrategyId,
        day: Day,
        feedback: &dyn FeedbackSource,
        date: &str,
    ) {
        if self.switch_pending && self.latest_switch_time.is_some_and(|at| day >= at) {
            self.index = (self.index + 1) % self.therapies.len();
            self.switch_pending = false;
            self.latest_switch_time = Some(day);
            info!(
                strategy_id = id,
                therapy = %self.current_therapy(),
                "{date}: Adaptive cycling strategy switched therapy"
            );
            return;
        }

        if self.switch_pending {
            return;
        }

        let failure_rate = feedback.failure_rate(self.current_therapy().id());
        if failure_rate > self.trigger_value && self.cooldown_elapsed(day) {
            let at = day + self.delay_until_actual_trigger;
            self.latest_switch_time = Some(at);
            self.switch_pending = true;
            info!(
                strategy_id = id,
                therapy = %self.current_therapy(),
                failure_rate,
                switch_day = at,
                "{date}: Adaptive cycling strategy scheduled a switch"
            );
        }
    }

    /// Forget the switch history and restart from the first therapy.
    pub fn adjust_started_time_point(&mut self) {
        self.index = 0;
        self.latest_switch_time = None;
        self.switch_pending = false;
    }
}
