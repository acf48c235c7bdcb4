//! Legs and their per-type completion rules.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::time::{empty_as_none, ClockTime, TimeField};
use crate::error::{Error, Result};

/// What kind of segment a leg is. Exactly one applies to every leg.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegKind {
    /// A flown segment with out/off/on/in times.
    #[default]
    Normal,
    /// Taxi or repositioning with no airborne time (out/in only).
    GroundOps,
    /// The crew member rides as a non-operating passenger.
    Deadhead,
}

impl LegKind {
    /// The time fields this kind's completion rule reads.
    #[must_use]
    pub const fn fields(self) -> &'static [TimeField] {
        match self {
            Self::Normal => &[TimeField::Out, TimeField::Off, TimeField::On, TimeField::In],
            Self::GroundOps => &[TimeField::Out, TimeField::In],
            Self::Deadhead => &[TimeField::DeadheadOut, TimeField::DeadheadIn],
        }
    }

    /// Whether `field` belongs to this kind.
    #[must_use]
    pub fn uses(self, field: TimeField) -> bool {
        self.fields().contains(&field)
    }

    /// String form used for persistence and display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::GroundOps => "ground_ops",
            Self::Deadhead => "deadhead",
        }
    }
}

impl fmt::Display for LegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LegKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "normal" => Ok(Self::Normal),
            "ground_ops" | "groundops" | "ground" => Ok(Self::GroundOps),
            "deadhead" | "dh" => Ok(Self::Deadhead),
            _ => Err(Error::unknown_name("leg type", s)),
        }
    }
}

/// Where a leg is in its lifecycle. Only ever advances
/// `Standby -> Active -> Completed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    /// Not yet started.
    #[default]
    Standby,
    /// The leg currently being flown. At most one per trip.
    Active,
    /// All fields required by the leg's kind are filled.
    Completed,
}

impl LegStatus {
    /// String form used for display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Standby => "standby",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for LegStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn airport_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9]{3,4}$").expect("airport pattern is valid"))
}

/// Normalize an airport identifier: trimmed, upper-cased, 3-4 alphanumerics.
/// An empty code is allowed and means "not yet known".
///
/// # Errors
///
/// Returns [`Error::InvalidAirport`] when the code has the wrong shape.
pub fn normalize_airport(code: &str) -> Result<String> {
    let normalized = code.trim().to_ascii_uppercase();
    if normalized.is_empty() || airport_pattern().is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(Error::InvalidAirport {
            code: code.to_string(),
        })
    }
}

/// Identifies a leg within its trip. Assigned when the leg is added and
/// never reused, so it survives inserts that shift flat indices. Zero means
/// not yet assigned.
pub type LegId = u32;

/// One segment of a trip.
///
/// Status and structure are only changed by the
/// [`LegController`](crate::controller::LegController); everything here that
/// mutates is crate-private.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    #[serde(default)]
    id: LegId,
    departure: String,
    arrival: String,
    #[serde(with = "empty_as_none", default)]
    out: Option<ClockTime>,
    #[serde(with = "empty_as_none", default)]
    off: Option<ClockTime>,
    #[serde(with = "empty_as_none", default)]
    on: Option<ClockTime>,
    #[serde(rename = "in", with = "empty_as_none", default)]
    in_time: Option<ClockTime>,
    #[serde(with = "empty_as_none", default)]
    deadhead_out: Option<ClockTime>,
    #[serde(with = "empty_as_none", default)]
    deadhead_in: Option<ClockTime>,
    status: LegStatus,
    kind: LegKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    roster_source_id: Option<String>,
}

impl Leg {
    /// A standby normal leg between two airports.
    #[must_use]
    pub fn new(departure: impl Into<String>, arrival: impl Into<String>) -> Self {
        Self {
            departure: departure.into(),
            arrival: arrival.into(),
            ..Self::default()
        }
    }

    /// A standby ground-operations leg that starts and ends at `airport`.
    #[must_use]
    pub fn ground_ops(airport: impl Into<String>) -> Self {
        let airport = airport.into();
        Self {
            departure: airport.clone(),
            arrival: airport,
            kind: LegKind::GroundOps,
            ..Self::default()
        }
    }

    /// Set the external roster id this leg was imported from.
    #[must_use]
    pub fn with_roster_source(mut self, source_id: impl Into<String>) -> Self {
        self.roster_source_id = Some(source_id.into());
        self
    }

    /// Identity of this leg within its trip.
    #[must_use]
    pub fn id(&self) -> LegId {
        self.id
    }

    /// Departure airport code.
    #[must_use]
    pub fn departure(&self) -> &str {
        &self.departure
    }

    /// Arrival airport code.
    #[must_use]
    pub fn arrival(&self) -> &str {
        &self.arrival
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> LegStatus {
        self.status
    }

    /// Segment kind.
    #[must_use]
    pub fn kind(&self) -> LegKind {
        self.kind
    }

    /// External roster id, if the leg was imported.
    #[must_use]
    pub fn roster_source_id(&self) -> Option<&str> {
        self.roster_source_id.as_deref()
    }

    /// Read one time field.
    #[must_use]
    pub fn time(&self, field: TimeField) -> Option<ClockTime> {
        match field {
            TimeField::Out => self.out,
            TimeField::Off => self.off,
            TimeField::On => self.on,
            TimeField::In => self.in_time,
            TimeField::DeadheadOut => self.deadhead_out,
            TimeField::DeadheadIn => self.deadhead_in,
        }
    }

    /// Read one time field as its stored string (`""` when unset).
    #[must_use]
    pub fn time_str(&self, field: TimeField) -> String {
        self.time(field).map(|t| t.to_string()).unwrap_or_default()
    }

    /// Whether the fields this leg's kind requires are all filled.
    ///
    /// ```text
    /// ground_ops: out, in
    /// deadhead:   deadhead_out, deadhead_in
    /// normal:     out, off, on, in
    /// ```
    #[must_use]
    pub fn is_complete(&self) -> bool {
        match self.kind {
            LegKind::GroundOps => self.out.is_some() && self.in_time.is_some(),
            LegKind::Deadhead => self.deadhead_out.is_some() && self.deadhead_in.is_some(),
            LegKind::Normal => {
                self.out.is_some()
                    && self.off.is_some()
                    && self.on.is_some()
                    && self.in_time.is_some()
            }
        }
    }

    /// The time this leg starts, whichever departure field its kind uses.
    #[must_use]
    pub fn start_time(&self) -> Option<ClockTime> {
        match self.kind {
            LegKind::Deadhead => self.deadhead_out,
            LegKind::Normal | LegKind::GroundOps => self.out,
        }
    }

    /// The time this leg ends, whichever arrival field its kind uses.
    #[must_use]
    pub fn end_time(&self) -> Option<ClockTime> {
        match self.kind {
            LegKind::Deadhead => self.deadhead_in,
            LegKind::Normal | LegKind::GroundOps => self.in_time,
        }
    }

    /// Airborne block minutes (out to in). Ground-ops and deadhead legs
    /// contribute nothing.
    #[must_use]
    pub fn flight_minutes(&self) -> i64 {
        match (self.kind, self.out, self.in_time) {
            (LegKind::Normal, Some(out), Some(arrived)) => out.minutes_until(arrived),
            _ => 0,
        }
    }

    pub(crate) fn set_id(&mut self, id: LegId) {
        self.id = id;
    }

    pub(crate) fn set_arrival(&mut self, code: String) {
        self.arrival = code;
    }

    pub(crate) fn set_time(&mut self, field: TimeField, value: Option<ClockTime>) {
        let slot = match field {
            TimeField::Out => &mut self.out,
            TimeField::Off => &mut self.off,
            TimeField::On => &mut self.on,
            TimeField::In => &mut self.in_time,
            TimeField::DeadheadOut => &mut self.deadhead_out,
            TimeField::DeadheadIn => &mut self.deadhead_in,
        };
        *slot = value;
    }

    /// Switch kind and clear every field the new kind doesn't read.
    pub(crate) fn set_kind(&mut self, kind: LegKind) {
        self.kind = kind;
        for field in TimeField::ALL {
            if !kind.uses(field) {
                self.set_time(field, None);
            }
        }
    }

    /// Move the status forward. Returns `false` (and leaves the leg alone)
    /// for anything that isn't a forward step.
    pub(crate) fn advance(&mut self, next: LegStatus) -> bool {
        if next > self.status {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Put an active leg back on standby. Only used when a leg is inserted
    /// ahead of the active one.
    pub(crate) fn demote(&mut self) {
        if self.status == LegStatus::Active {
            self.status = LegStatus::Standby;
        }
    }
}
