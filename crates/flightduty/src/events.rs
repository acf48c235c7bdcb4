//! Events emitted by the lifecycle controller and the duty timer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Trip, TripId};

/// Elapsed-duty warning levels, in the order they are crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DutyThreshold {
    /// 14 hours on duty.
    #[serde(rename = "14h")]
    FourteenHours,
    /// 15 hours on duty.
    #[serde(rename = "15h")]
    FifteenHours,
    /// 15.5 hours on duty.
    #[serde(rename = "15.5h")]
    FifteenAndHalfHours,
    /// 16 hours on duty; the single-duty-period ceiling.
    #[serde(rename = "16h")]
    SixteenHours,
}

impl DutyThreshold {
    /// All thresholds in increasing order.
    pub const ALL: [Self; 4] = [
        Self::FourteenHours,
        Self::FifteenHours,
        Self::FifteenAndHalfHours,
        Self::SixteenHours,
    ];

    /// Elapsed minutes at which this threshold is crossed.
    #[must_use]
    pub const fn minutes(self) -> i64 {
        match self {
            Self::FourteenHours => 14 * 60,
            Self::FifteenHours => 15 * 60,
            Self::FifteenAndHalfHours => 15 * 60 + 30,
            Self::SixteenHours => 16 * 60,
        }
    }

    /// Bit in the fired-thresholds bitmap.
    #[must_use]
    pub const fn bit(self) -> u8 {
        match self {
            Self::FourteenHours => 0b0001,
            Self::FifteenHours => 0b0010,
            Self::FifteenAndHalfHours => 0b0100,
            Self::SixteenHours => 0b1000,
        }
    }
}

impl fmt::Display for DutyThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::FourteenHours => "14h",
            Self::FifteenHours => "15h",
            Self::FifteenAndHalfHours => "15.5h",
            Self::SixteenHours => "16h",
        };
        f.write_str(label)
    }
}

/// Something that happened to a trip or the duty session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A trip became active.
    TripActivated {
        /// The trip.
        trip_id: TripId,
    },
    /// A leg became the active leg.
    LegActivated {
        /// The trip.
        trip_id: TripId,
        /// Flat leg index.
        index: usize,
    },
    /// A leg satisfied its completion rule.
    LegCompleted {
        /// The trip.
        trip_id: TripId,
        /// Flat leg index.
        index: usize,
    },
    /// A trip was completed.
    TripCompleted {
        /// Snapshot of the trip after completion.
        trip: Box<Trip>,
    },
    /// Elapsed duty crossed a warning threshold.
    ThresholdCrossed {
        /// Which threshold.
        threshold: DutyThreshold,
    },
}
