//! Trips: dated, multi-leg duty periods.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::leg::{Leg, LegId, LegStatus};
use crate::error::{Error, Result};

/// Number of legs on one logbook page before a new group is started.
pub const LEGS_PER_GROUP: usize = 4;

/// Stable identifier for a trip.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(String);

impl TripId {
    /// Generate a fresh id for a trip on `date`.
    #[must_use]
    pub fn generate(date: NaiveDate) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let hash = blake3::hash(format!("{date}:{nanos}:{seq}").as_bytes());
        Self(hash.to_hex()[..12].to_string())
    }

    /// Borrow the id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TripId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TripId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Trip lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    /// Created ahead of time, not yet under way.
    #[default]
    Scheduled,
    /// Under way; the duty timer runs.
    Active,
    /// Finished; duty fields are history.
    Completed,
}

impl TripStatus {
    /// String form used for persistence.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    /// Parse the persisted form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A page of legs, kept for record-keeping layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LegGroup {
    legs: Vec<Leg>,
}

impl LegGroup {
    /// Legs on this page.
    #[must_use]
    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }
}

/// A captured duty span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutySpan {
    /// When duty started.
    pub start: DateTime<Utc>,
    /// When duty ended.
    pub end: DateTime<Utc>,
}

impl DutySpan {
    /// Whole minutes between start and end, never negative.
    #[must_use]
    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes().max(0)
    }
}

/// A trip and its legs.
///
/// Legs are addressed by a flat index across all leg groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    id: TripId,
    date: NaiveDate,
    status: TripStatus,
    groups: Vec<LegGroup>,
    duty_start: Option<DateTime<Utc>>,
    duty_end: Option<DateTime<Utc>>,
    duty_minutes: Option<i64>,
    manual_override: bool,
}

impl Trip {
    /// A new scheduled trip with no legs.
    #[must_use]
    pub fn new(date: NaiveDate) -> Self {
        Self::with_id(TripId::generate(date), date)
    }

    /// A new scheduled trip with a known id.
    #[must_use]
    pub fn with_id(id: TripId, date: NaiveDate) -> Self {
        Self {
            id,
            date,
            status: TripStatus::Scheduled,
            groups: Vec::new(),
            duty_start: None,
            duty_end: None,
            duty_minutes: None,
            manual_override: false,
        }
    }

    /// Rebuild a trip from persisted columns.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: TripId,
        date: NaiveDate,
        status: TripStatus,
        groups: Vec<LegGroup>,
        duty_start: Option<DateTime<Utc>>,
        duty_end: Option<DateTime<Utc>>,
        duty_minutes: Option<i64>,
        manual_override: bool,
    ) -> Self {
        Self {
            id,
            date,
            status,
            groups,
            duty_start,
            duty_end,
            duty_minutes,
            manual_override,
        }
    }

    /// Trip id.
    #[must_use]
    pub fn id(&self) -> &TripId {
        &self.id
    }

    /// Trip date.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Lifecycle status.
    #[must_use]
    pub fn status(&self) -> TripStatus {
        self.status
    }

    /// Leg groups in order.
    #[must_use]
    pub fn groups(&self) -> &[LegGroup] {
        &self.groups
    }

    /// When duty started: set when the trip's duty session starts, or when
    /// a span is captured.
    #[must_use]
    pub fn duty_start(&self) -> Option<DateTime<Utc>> {
        self.duty_start
    }

    /// When duty ended, once captured.
    #[must_use]
    pub fn duty_end(&self) -> Option<DateTime<Utc>> {
        self.duty_end
    }

    /// Captured duty minutes. Immutable once set.
    #[must_use]
    pub fn duty_minutes(&self) -> Option<i64> {
        self.duty_minutes
    }

    /// Whether the duty span was entered by hand.
    #[must_use]
    pub fn manual_override(&self) -> bool {
        self.manual_override
    }

    /// Captured duty as hours, for display.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total_duty_hours(&self) -> Option<f64> {
        self.duty_minutes.map(|m| m as f64 / 60.0)
    }

    /// Total legs across all groups.
    #[must_use]
    pub fn leg_count(&self) -> usize {
        self.groups.iter().map(|g| g.legs.len()).sum()
    }

    /// All legs in order.
    pub fn legs(&self) -> impl Iterator<Item = &Leg> {
        self.groups.iter().flat_map(|g| g.legs.iter())
    }

    /// Leg by flat index.
    #[must_use]
    pub fn leg(&self, index: usize) -> Option<&Leg> {
        self.legs().nth(index)
    }

    /// Index of the active leg, if any.
    #[must_use]
    pub fn active_index(&self) -> Option<usize> {
        self.legs().position(|l| l.status() == LegStatus::Active)
    }

    /// The active leg, if any.
    #[must_use]
    pub fn active_leg(&self) -> Option<&Leg> {
        self.legs().find(|l| l.status() == LegStatus::Active)
    }

    /// Lowest-index leg still on standby.
    #[must_use]
    pub fn first_standby_index(&self) -> Option<usize> {
        self.legs().position(|l| l.status() == LegStatus::Standby)
    }

    /// Whether every leg satisfies its completion rule.
    #[must_use]
    pub fn all_legs_complete(&self) -> bool {
        self.legs().all(Leg::is_complete)
    }

    pub(crate) fn leg_mut(&mut self, index: usize) -> Option<&mut Leg> {
        self.groups.iter_mut().flat_map(|g| g.legs.iter_mut()).nth(index)
    }

    pub(crate) fn legs_mut(&mut self) -> impl Iterator<Item = &mut Leg> {
        self.groups.iter_mut().flat_map(|g| g.legs.iter_mut())
    }

    pub(crate) fn set_status(&mut self, status: TripStatus) {
        self.status = status;
    }

    /// Make sure there is at least one group to put legs in. Returns `true`
    /// when a group had to be synthesized.
    pub(crate) fn ensure_group(&mut self) -> bool {
        if self.groups.is_empty() {
            self.groups.push(LegGroup::default());
            true
        } else {
            false
        }
    }

    /// Leg by its stable id.
    #[must_use]
    pub fn leg_by_id(&self, id: LegId) -> Option<&Leg> {
        self.legs().find(|l| l.id() == id)
    }

    /// Legs are never removed, so one past the highest id is always free.
    fn next_leg_id(&self) -> LegId {
        self.legs().map(Leg::id).max().unwrap_or(0) + 1
    }

    /// Append after the last leg, opening a new group when the last is full.
    pub(crate) fn push_leg(&mut self, mut leg: Leg) {
        leg.set_id(self.next_leg_id());
        self.ensure_group();
        let needs_page = self
            .groups
            .last()
            .is_some_and(|g| g.legs.len() >= LEGS_PER_GROUP);
        if needs_page {
            self.groups.push(LegGroup::default());
        }
        if let Some(group) = self.groups.last_mut() {
            group.legs.push(leg);
        }
    }

    /// Insert at a flat index. `index == leg_count()` appends.
    pub(crate) fn insert_leg(&mut self, index: usize, mut leg: Leg) -> Result<()> {
        let count = self.leg_count();
        if index > count {
            return Err(Error::LegIndexOutOfRange { index, count });
        }
        if index == count {
            self.push_leg(leg);
            return Ok(());
        }

        leg.set_id(self.next_leg_id());
        let mut offset = 0;
        for group in &mut self.groups {
            if index < offset + group.legs.len() {
                group.legs.insert(index - offset, leg);
                return Ok(());
            }
            offset += group.legs.len();
        }
        Err(Error::internal(format!(
            "leg index {index} not located in {count} legs"
        )))
    }

    /// Note when the duty session for this trip started. Ignored once a
    /// start is already known.
    pub(crate) fn mark_duty_start(&mut self, start: DateTime<Utc>) {
        if self.duty_start.is_none() {
            self.duty_start = Some(start);
        }
    }

    /// Record the duty span. Refused once duty minutes exist.
    pub(crate) fn capture_duty(&mut self, span: DutySpan, manual: bool) -> Result<()> {
        if self.duty_minutes.is_some() {
            return Err(Error::DutyAlreadyCaptured {
                id: self.id.to_string(),
            });
        }
        self.duty_start = Some(span.start);
        self.duty_end = Some(span.end);
        self.duty_minutes = Some(span.minutes());
        self.manual_override = manual;
        Ok(())
    }
}
