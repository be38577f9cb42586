//! Collaborators passed explicitly into the engine.
//!
//! Nothing here is global: the host hands the engine a [`Patient`] on every
//! selection and an [`UpdateContext`] on every daily or monthly hook.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::therapy::TherapyId;
use crate::time::{Clock, Day};

/// 0-based contiguous location index.
pub type LocationIndex = usize;

/// District id as found in the district raster (0- or 1-based).
pub type DistrictId = i32;

/// The individual who needs treatment.
pub trait Patient {
    /// Location the person currently lives in.
    fn location(&self) -> LocationIndex;

    /// District containing the person's location, if known.
    fn district(&self) -> Option<DistrictId>;

    /// Age in (fractional) years.
    fn age_in_years(&self) -> f64;
}

/// Plain patient record for hosts that do not implement [`Patient`] themselves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatientSnapshot {
    /// Location index.
    pub location: LocationIndex,
    /// District id, if the location belongs to one.
    pub district: Option<DistrictId>,
    /// Age in years.
    pub age_years: f64,
}

impl PatientSnapshot {
    /// Adult living at `location`, outside any district.
    #[must_use]
    pub const fn at_location(location: LocationIndex) -> Self {
        Self {
            location,
            district: None,
            age_years: 30.0,
        }
    }

    /// Sets the district.
    #[must_use]
    pub const fn in_district(mut self, district: DistrictId) -> Self {
        self.district = Some(district);
        self
    }

    /// Sets the age.
    #[must_use]
    pub const fn aged(mut self, age_years: f64) -> Self {
        self.age_years = age_years;
        self
    }
}

impl Default for PatientSnapshot {
    fn default() -> Self {
        Self::at_location(0)
    }
}

impl Patient for PatientSnapshot {
    fn location(&self) -> LocationIndex {
        self.location
    }

    fn district(&self) -> Option<DistrictId> {
        self.district
    }

    fn age_in_years(&self) -> f64 {
        self.age_years
    }
}

/// Rolling treatment-failure statistics maintained by the data collector.
pub trait FeedbackSource {
    /// Current observed treatment-failure rate of a therapy, in `[0, 1]`.
    fn failure_rate(&self, therapy_id: TherapyId) -> f64;
}

/// Feedback source backed by a map. Unknown therapies report `0.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InMemoryFeedback {
    rates: HashMap<TherapyId, f64>,
}

impl InMemoryFeedback {
    /// Create an empty feedback source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current failure rate of a therapy.
    pub fn set_failure_rate(&mut self, therapy_id: TherapyId, rate: f64) {
        self.rates.insert(therapy_id, rate);
    }

    /// Builder-style variant of [`Self::set_failure_rate`].
    #[must_use]
    pub fn with_failure_rate(mut self, therapy_id: TherapyId, rate: f64) -> Self {
        self.set_failure_rate(therapy_id, rate);
        self
    }
}

impl FeedbackSource for InMemoryFeedback {
    fn failure_rate(&self, therapy_id: TherapyId) -> f64 {
        self.rates.get(&therapy_id).copied().unwrap_or(0.0)
    }
}

/// Everything a daily or monthly hook may consult.
pub struct UpdateContext<'a> {
    /// Treatment-failure feedback.
    pub feedback: &'a dyn FeedbackSource,
    /// Scheduler clock. Only novel drug introduction mutates it.
    pub clock: &'a mut dyn Clock,
}

impl<'a> UpdateContext<'a> {
    /// Bundle the collaborators for one hook invocation.
    pub fn new(feedback: &'a dyn FeedbackSource, clock: &'a mut dyn Clock) -> Self {
        Self { feedback, clock }
    }

    /// Shorthand for `clock.current_day()`.
    #[must_use]
    pub fn day(&self) -> Day {
        self.clock.current_day()
    }

    /// Current calendar date formatted for log lines.
    #[must_use]
    pub fn date_string(&self) -> String {
        self.clock.current_date().format("%Y/%m/%d").to_string()
    }
}
