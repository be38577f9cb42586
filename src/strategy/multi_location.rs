//! Location-keyed variants: one distribution row per location.

use tracing::debug;

use crate::context::LocationIndex;
use crate::distribution::Distribution;
use crate::error::{ExecutionError, ValidationError};
use crate::random::RandomSource;
use crate::strategy::nested::{PeakAfter, Ramp};
use crate::strategy::{ChildRef, StrategyId};
use crate::therapy::TherapyRef;
use crate::time::Day;

/// Per-location ramps sharing one `peak_after` and one starting time.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRows {
    rows: Vec<Ramp>,
    starting_time: Day,
}

impl LocationRows {
    /// Build one ramp per location.
    ///
    /// Each of `start` and `peak` must hold either a single row, which is
    /// used for every location, or exactly `number_of_locations` rows. Every
    /// row must have `width` entries.
    ///
    /// # Errors
    /// Row counts or row widths that do not fit.
    pub fn new(
        start: Vec<Distribution>,
        peak: Vec<Distribution>,
        peak_after: PeakAfter,
        number_of_locations: usize,
        width: usize,
    ) -> Result<Self, ValidationError> {
        let start = broadcast("start_distribution", start, number_of_locations)?;
        let peak = broadcast("peak_distribution", peak, number_of_locations)?;

        let mut rows = Vec::with_capacity(number_of_locations);
        for (start, peak) in start.into_iter().zip(peak) {
            if start.len() != width {
                return Err(ValidationError::LengthMismatch {
                    field: "start_distribution".to_string(),
                    expected: width,
                    actual: start.len(),
                });
            }
            rows.push(Ramp::new(start, peak, peak_after)?);
        }
        Ok(Self {
            rows,
            starting_time: 0,
        })
    }

    /// Live distribution for `location`.
    ///
    /// # Errors
    /// The location is outside the configured range.
    pub fn row(&self, location: LocationIndex) -> Result<&Distribution, ExecutionError> {
        self.rows
            .get(location)
            .map(Ramp::current)
            .ok_or(ExecutionError::LocationOutOfRange {
                location,
                locations: self.rows.len(),
            })
    }

    /// Number of locations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no location is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ramp mode shared by all rows.
    #[must_use]
    pub fn peak_after(&self) -> Option<PeakAfter> {
        self.rows.first().map(Ramp::peak_after)
    }

    /// Day the ramps started.
    #[must_use]
    pub const fn starting_time(&self) -> Day {
        self.starting_time
    }

    /// Apply the ramp rule to every row.
    pub fn update(&mut self, day: Day, inflation_factor: f64) {
        let elapsed = day - self.starting_time;
        for row in &mut self.rows {
            row.update(elapsed, inflation_factor);
        }
    }

    /// Restart every ramp from `day`.
    pub fn adjust_started_time_point(&mut self, day: Day) {
        self.starting_time = day;
    }
}

fn broadcast(
    field: &str,
    rows: Vec<Distribution>,
    number_of_locations: usize,
) -> Result<Vec<Distribution>, ValidationError> {
    match rows.len() {
        n if n == number_of_locations => Ok(rows),
        1 => Ok(vec![rows[0].clone(); number_of_locations]),
        n => Err(ValidationError::LengthMismatch {
            field: field.to_string(),
            expected: number_of_locations,
            actual: n,
        }),
    }
}

/// MFT with a separate, ramping distribution per location.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiLocationMftPolicy {
    therapies: Vec<TherapyRef>,
    rows: LocationRows,
}

impl MultiLocationMftPolicy {
    /// Creates the policy.
    ///
    /// # Errors
    /// `therapies` is empty.
    pub fn new(therapies: Vec<TherapyRef>, rows: LocationRows) -> Result<Self, ValidationError> {
        if therapies.is_empty() {
            return Err(ValidationError::missing("therapy_ids"));
        }
        Ok(Self { therapies, rows })
    }

    /// Draw a therapy from the row of `location`.
    ///
    /// # Errors
    /// The location is outside the configured range.
    pub fn select(
        &self,
        location: LocationIndex,
        rng: &mut dyn RandomSource,
    ) -> Result<&TherapyRef, ExecutionError> {
        let row = self.rows.row(location)?;
        Ok(&self.therapies[row.draw(rng)])
    }

    /// Therapies, index-aligned with every row.
    #[must_use]
    pub fn therapies(&self) -> &[TherapyRef] {
        &self.therapies
    }

    /// Per-location distributions.
    #[must_use]
    pub fn rows(&self) -> &LocationRows {
        &self.rows
    }

    /// Monthly ramp step for every location.
    pub fn monthly_update(&mut self, id: StrategyId, day: Day, inflation_factor: f64) {
        self.rows.update(day, inflation_factor);
        debug!(strategy_id = id, day, "MFT multi-location distributions updated");
    }

    /// Restart every ramp from `day`.
    pub fn adjust_started_time_point(&mut self, day: Day) {
        self.rows.adjust_started_time_point(day);
    }
}

/// Nested MFT with a separate, ramping distribution per location.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedMultiLocationPolicy {
    children: Vec<ChildRef>,
    rows: LocationRows,
}

impl NestedMultiLocationPolicy {
    /// Creates the policy.
    ///
    /// # Errors
    /// `children` is empty.
    pub fn new(children: Vec<ChildRef>, rows: LocationRows) -> Result<Self, ValidationError> {
        if children.is_empty() {
            return Err(ValidationError::missing("strategy_ids"));
        }
        Ok(Self { children, rows })
    }

    /// Draw a child from the row of `location`.
    ///
    /// # Errors
    /// The location is outside the configured range.
    pub fn select(
        &self,
        location: LocationIndex,
        rng: &mut dyn RandomSource,
    ) -> Result<ChildRef, ExecutionError> {
        let row = self.rows.row(location)?;
        Ok(self.children[row.draw(rng)])
    }

    /// Children, index-aligned with every row.
    #[must_use]
    pub fn children(&self) -> &[ChildRef] {
        &self.children
    }

    pub(crate) fn first_child_mut(&mut self) -> &mut ChildRef {
        &mut self.children[0]
    }

    /// Per-location distributions.
    #[must_use]
    pub fn rows(&self) -> &LocationRows {
        &self.rows
    }

    /// Monthly ramp step for every location.
    pub fn monthly_update(&mut self, id: StrategyId, day: Day, inflation_factor: f64) {
        self.rows.update(day, inflation_factor);
        debug!(strategy_id = id, day, "Nested MFT multi-location distributions updated");
    }

    /// Restart every ramp from `day`.
    pub fn adjust_started_time_point(&mut self, day: Day) {
        self.rows.adjust_started_time_point(day);
    }
}
