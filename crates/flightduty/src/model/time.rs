//! Leg clock times.
//!
//! Leg times are entered as four-digit, zero-padded 24-hour strings
//! ("0930", "1430"). Whether they are read as UTC or local time is a display
//! preference; the core only ever stores the clock value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

const MINUTES_PER_DAY: i64 = 24 * 60;

/// A 24-hour clock value with minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    /// Build a clock time from hours and minutes.
    #[must_use]
    pub fn from_hm(hours: u16, minutes: u16) -> Option<Self> {
        (hours < 24 && minutes < 60).then_some(Self(hours * 60 + minutes))
    }

    /// Parse user input, treating an empty (or all-blank) value as "unset".
    ///
    /// Three-digit input is left-padded with a zero, so `"930"` reads as
    /// `"0930"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTime`] for anything that isn't 3 or 4 digits
    /// forming a valid 24-hour time.
    pub fn parse_optional(input: &str) -> Result<Option<Self>> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed.parse().map(Some)
    }

    /// Minutes since midnight.
    #[must_use]
    pub fn minutes(self) -> u16 {
        self.0
    }

    /// Minutes from `self` forward to `later`, wrapping past midnight.
    #[must_use]
    pub fn minutes_until(self, later: Self) -> i64 {
        (i64::from(later.0) - i64::from(self.0)).rem_euclid(MINUTES_PER_DAY)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for ClockTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidTime {
            value: s.to_string(),
        };

        let digits = s.trim();
        if !(3..=4).contains(&digits.len()) || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let padded = format!("{digits:0>4}");
        let hours: u16 = padded[..2].parse().map_err(|_| invalid())?;
        let minutes: u16 = padded[2..].parse().map_err(|_| invalid())?;
        Self::from_hm(hours, minutes).ok_or_else(invalid)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde adapter that writes an unset time as `""` rather than `null`.
pub(crate) mod empty_as_none {
    use super::ClockTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<ClockTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => serializer.collect_str(time),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<ClockTime>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        ClockTime::parse_optional(&raw).map_err(serde::de::Error::custom)
    }
}

/// One of the six time slots a leg can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeField {
    /// Block out (brakes released).
    Out,
    /// Wheels off.
    Off,
    /// Wheels on.
    On,
    /// Block in (parked).
    In,
    /// Deadhead departure.
    DeadheadOut,
    /// Deadhead arrival.
    DeadheadIn,
}

impl TimeField {
    /// Every field, in display order.
    pub const ALL: [Self; 6] = [
        Self::Out,
        Self::Off,
        Self::On,
        Self::In,
        Self::DeadheadOut,
        Self::DeadheadIn,
    ];

    /// The wire and display name of this field.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Out => "OUT",
            Self::Off => "OFF",
            Self::On => "ON",
            Self::In => "IN",
            Self::DeadheadOut => "DEADHEAD_OUT",
            Self::DeadheadIn => "DEADHEAD_IN",
        }
    }
}

impl fmt::Display for TimeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "OUT" => Ok(Self::Out),
            "OFF" => Ok(Self::Off),
            "ON" => Ok(Self::On),
            "IN" => Ok(Self::In),
            "DEADHEAD_OUT" | "DH_OUT" => Ok(Self::DeadheadOut),
            "DEADHEAD_IN" | "DH_IN" => Ok(Self::DeadheadIn),
            _ => Err(Error::unknown_name("time field", s)),
        }
    }
}
