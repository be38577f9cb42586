//! Simulated time.
//!
//! The engine never advances time itself. It reads the current day and
//! calendar date from a [`Clock`] owned by the surrounding scheduler and, in
//! one case (novel drug introduction), asks that clock to run longer.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Monotonic simulated day count. Day 0 is the first simulated day.
pub type Day = i64;

/// Number of days used when a calendar span cannot be computed.
pub const DAYS_IN_YEAR: Day = 365;

/// Clock exposed by the discrete-event scheduler.
pub trait Clock {
    /// Current simulated day.
    fn current_day(&self) -> Day;

    /// Calendar date of the current simulated day.
    fn current_date(&self) -> NaiveDate;

    /// Total number of days the simulation is configured to run.
    fn total_days(&self) -> Day;

    /// Extend the run so it lasts `new_total_days` days in total.
    ///
    /// Implementations must ignore values that would shorten the run.
    fn extend_total_time(&mut self, new_total_days: Day);

    /// Restart the period over which outcome statistics are compared.
    fn set_start_of_comparison_period(&mut self, day: Day);
}

/// Number of days between `from` and the same calendar date `years` later.
///
/// Falls back to `years * 365` when the target date is out of chrono's range.
#[must_use]
pub fn days_to_next_n_years(from: NaiveDate, years: u32) -> Day {
    from.checked_add_months(Months::new(years.saturating_mul(12)))
        .map_or(Day::from(years) * DAYS_IN_YEAR, |to| {
            to.signed_duration_since(from).num_days()
        })
}

/// Simple day-stepped clock for embedded use and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationClock {
    /// Calendar date of day 0.
    pub start_date: NaiveDate,
    current_day: Day,
    total_days: Day,
    start_of_comparison_period: Day,
}

impl SimulationClock {
    /// Creates a clock at day 0 that runs for `total_days` days.
    #[must_use]
    pub fn new(start_date: NaiveDate, total_days: Day) -> Self {
        Self {
            start_date,
            current_day: 0,
            total_days,
            start_of_comparison_period: 0,
        }
    }

    /// Moves to the next day.
    pub fn advance(&mut self) {
        self.current_day += 1;
    }

    /// Jumps directly to `day`.
    pub fn set_current_day(&mut self, day: Day) {
        self.current_day = day;
    }

    /// Returns true while the current day is inside the configured run.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.current_day < self.total_days
    }

    /// Returns true when the current day is the first day of a calendar month.
    #[must_use]
    pub fn is_first_day_of_month(&self) -> bool {
        use chrono::Datelike;
        self.current_date().day() == 1
    }

    /// Day on which the current comparison period started.
    #[must_use]
    pub const fn start_of_comparison_period(&self) -> Day {
        self.start_of_comparison_period
    }
}

impl Clock for SimulationClock {
    fn current_day(&self) -> Day {
        self.current_day
    }

    fn current_date(&self) -> NaiveDate {
        self.start_date + chrono::Duration::days(self.current_day)
    }

    fn total_days(&self) -> Day {
        self.total_days
    }

    fn extend_total_time(&mut self, new_total_days: Day) {
        if new_total_days > self.total_days {
            self.total_days = new_total_days;
        }
    }

    fn set_start_of_comparison_period(&mut self, day: Day) {
        self.start_of_comparison_period = day;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn calendar_span_counts_leap_days() {
        assert_eq!(days_to_next_n_years(date(2023, 1, 1), 1), 365);
        assert_eq!(days_to_next_n_years(date(2024, 1, 1), 1), 366);
        assert_eq!(days_to_next_n_years(date(2020, 1, 1), 10), 3653);
    }

    #[test]
    fn clock_advances_and_reports_dates() {
        let mut clock = SimulationClock::new(date(2020, 1, 30), 100);
        assert!(!clock.is_first_day_of_month());
        clock.advance();
        clock.advance();
        assert_eq!(clock.current_day(), 2);
        assert_eq!(clock.current_date(), date(2020, 2, 1));
        assert!(clock.is_first_day_of_month());
    }

    #[test]
    fn extend_never_shortens() {
        let mut clock = SimulationClock::new(date(2020, 1, 1), 100);
        clock.extend_total_time(50);
        assert_eq!(clock.total_days(), 100);
        clock.extend_total_time(500);
        assert_eq!(clock.total_days(), 500);
    }

    #[test]
    fn running_until_total() {
        let mut clock = SimulationClock::new(date(2020, 1, 1), 2);
        assert!(clock.is_running());
        clock.set_current_day(2);
        assert!(!clock.is_running());
    }
}
