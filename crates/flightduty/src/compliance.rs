//! Rolling-window duty and flight time totals.
//!
//! Everything here is a pure function of the trip collection. Totals are
//! summed in whole minutes; [`hours`] converts at the display boundary.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::config::ComplianceConfig;
use crate::model::Trip;
use crate::timer::FallbackRule;

/// Trailing window for the duty limit.
pub const DUTY_WINDOW_DAYS: i64 = 7;

/// Trailing window for the monthly flight limit.
pub const FLIGHT_WINDOW_DAYS: i64 = 30;

/// Trailing window for the annual flight limit.
pub const ANNUAL_WINDOW_DAYS: i64 = 365;

/// Minutes as fractional hours, for display only.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn hours(minutes: i64) -> f64 {
    minutes as f64 / 60.0
}

/// Whether `date` falls in `[as_of - window_days, as_of]`.
fn in_window(date: NaiveDate, window_days: i64, as_of: NaiveDate) -> bool {
    date <= as_of && date >= as_of - Duration::days(window_days)
}

/// Duty minutes for one trip: the captured value, or the span rebuilt from
/// leg times when no timer ran.
#[must_use]
pub fn duty_minutes(trip: &Trip, rule: &FallbackRule) -> Option<i64> {
    trip.duty_minutes()
        .or_else(|| rule.span(trip).map(|span| span.minutes()))
}

/// Airborne minutes for one trip. Ground-ops and deadhead legs add nothing.
#[must_use]
pub fn flight_minutes(trip: &Trip) -> i64 {
    trip.legs().map(crate::model::Leg::flight_minutes).sum()
}

/// Duty minutes over trips dated within the window, using the default
/// fallback rule for trips without captured duty.
#[must_use]
pub fn rolling_duty_minutes(trips: &[Trip], window_days: i64, as_of: NaiveDate) -> i64 {
    rolling_duty_minutes_with(trips, window_days, as_of, &FallbackRule::default())
}

/// [`rolling_duty_minutes`] with an explicit fallback rule.
#[must_use]
pub fn rolling_duty_minutes_with(
    trips: &[Trip],
    window_days: i64,
    as_of: NaiveDate,
    rule: &FallbackRule,
) -> i64 {
    trips
        .iter()
        .filter(|t| in_window(t.date(), window_days, as_of))
        .filter_map(|t| duty_minutes(t, rule))
        .sum()
}

/// Airborne minutes over trips dated within the window.
#[must_use]
pub fn rolling_flight_minutes(trips: &[Trip], window_days: i64, as_of: NaiveDate) -> i64 {
    trips
        .iter()
        .filter(|t| in_window(t.date(), window_days, as_of))
        .map(flight_minutes)
        .sum()
}

/// Airborne minutes over the trailing 365 days.
#[must_use]
pub fn annual_flight_minutes(trips: &[Trip], as_of: NaiveDate) -> i64 {
    rolling_flight_minutes(trips, ANNUAL_WINDOW_DAYS, as_of)
}

/// Flight time in a single duty period against the daily ceiling.
///
/// Returns `None` when the check is switched off in configuration.
#[must_use]
pub fn per_fdp_flight_time(trip: &Trip, config: &ComplianceConfig) -> Option<LimitLine> {
    config.per_fdp_enabled.then(|| {
        LimitLine::new(
            "flight time this duty period",
            flight_minutes(trip),
            config.fdp_flight_limit_hours,
        )
    })
}

/// One total compared against its limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitLine {
    /// What is being measured.
    pub label: String,
    /// Accumulated minutes.
    pub minutes: i64,
    /// The limit, in minutes.
    pub limit_minutes: i64,
    /// Whether the total is over the limit.
    pub exceeded: bool,
}

impl LimitLine {
    fn new(label: &str, minutes: i64, limit_hours: u32) -> Self {
        let limit_minutes = i64::from(limit_hours) * 60;
        Self {
            label: label.to_string(),
            minutes,
            limit_minutes,
            exceeded: minutes > limit_minutes,
        }
    }

    /// Minutes left before the limit, never negative.
    #[must_use]
    pub fn remaining_minutes(&self) -> i64 {
        (self.limit_minutes - self.minutes).max(0)
    }
}

/// Every rolling total as of one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComplianceReport {
    /// The date the windows end on.
    pub as_of: NaiveDate,
    /// Duty over the trailing 7 days.
    pub duty_7d: LimitLine,
    /// Flight time over the trailing 30 days.
    pub flight_30d: LimitLine,
    /// Flight time over the trailing 365 days.
    pub flight_annual: LimitLine,
    /// Flight time in the most recent duty period, when enabled.
    pub per_fdp: Option<LimitLine>,
}

impl ComplianceReport {
    /// Build a report over `trips`.
    #[must_use]
    pub fn build(
        trips: &[Trip],
        as_of: NaiveDate,
        config: &ComplianceConfig,
        rule: &FallbackRule,
    ) -> Self {
        let latest = trips
            .iter()
            .filter(|t| t.date() <= as_of)
            .max_by_key(|t| t.date());

        Self {
            as_of,
            duty_7d: LimitLine::new(
                "duty, trailing 7 days",
                rolling_duty_minutes_with(trips, DUTY_WINDOW_DAYS, as_of, rule),
                config.duty_7d_limit_hours,
            ),
            flight_30d: LimitLine::new(
                "flight time, trailing 30 days",
                rolling_flight_minutes(trips, FLIGHT_WINDOW_DAYS, as_of),
                config.flight_30d_limit_hours,
            ),
            flight_annual: LimitLine::new(
                "flight time, trailing 365 days",
                annual_flight_minutes(trips, as_of),
                config.flight_annual_limit_hours,
            ),
            per_fdp: latest.and_then(|t| per_fdp_flight_time(t, config)),
        }
    }

    /// All lines that are present, in display order.
    pub fn lines(&self) -> impl Iterator<Item = &LimitLine> {
        [&self.duty_7d, &self.flight_30d, &self.flight_annual]
            .into_iter()
            .chain(self.per_fdp.as_ref())
    }

    /// Whether any line is over its limit.
    #[must_use]
    pub fn any_exceeded(&self) -> bool {
        self.lines().any(|l| l.exceeded)
    }
}
