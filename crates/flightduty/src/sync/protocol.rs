//! Companion wire messages.
//!
//! Messages travel as JSON objects tagged by `type`, with camelCase field
//! names and timestamps in whole seconds since the Unix epoch. Requests from
//! the companion carry a per-device sequence number: a retransmission repeats
//! it, a new action never does.

use serde::{Deserialize, Serialize};

use crate::controller::LegOperation;
use crate::error::Result;
use crate::model::{Leg, TimeField, Trip};

/// A 32-byte digest identifying one message on the wire.
pub type MessageDigest = [u8; 32];

/// A message exchanged between the primary and the companion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CompanionMessage {
    /// Primary to companion: a trip went under way.
    #[serde(rename_all = "camelCase")]
    TripStarted {
        /// Full snapshot of the trip.
        snapshot: Box<Trip>,
        /// When the message was sent.
        timestamp: i64,
    },
    /// Companion to primary: write one time field.
    #[serde(rename_all = "camelCase")]
    SetTime {
        /// Flat leg index.
        leg_index: usize,
        /// Which field.
        field: TimeField,
        /// `HHMM`, or empty to clear.
        value: String,
        /// Companion request sequence number.
        #[serde(default)]
        seq: u64,
        /// When the companion issued it.
        timestamp: i64,
    },
    /// Primary to companion: the active leg moved.
    #[serde(rename_all = "camelCase")]
    LegAdvanced {
        /// Index of the newly active leg.
        new_index: usize,
        /// Leg count after the move.
        total_legs: usize,
        /// Snapshot of the newly active leg.
        leg: Leg,
        /// When the message was sent.
        timestamp: i64,
    },
    /// Companion to primary: add a leg after the last one.
    #[serde(rename_all = "camelCase")]
    AddLeg {
        /// Departure airport for the new leg; empty inherits the previous
        /// arrival.
        origin_airport: String,
        /// Companion request sequence number.
        #[serde(default)]
        seq: u64,
        /// When the companion issued it.
        timestamp: i64,
    },
    /// Primary to companion: result of a forwarded `setTime` or `addLeg`.
    #[serde(rename_all = "camelCase")]
    LegUpdated {
        /// Flat index of the leg touched.
        leg_index: usize,
        /// Snapshot of the leg after the change.
        leg: Leg,
        /// Leg count after the change.
        total_legs: usize,
    },
    /// Primary to companion: the trip was completed.
    #[serde(rename_all = "camelCase")]
    TripEnded {
        /// Final snapshot of the trip.
        snapshot: Box<Trip>,
        /// When the message was sent.
        timestamp: i64,
    },
}

impl CompanionMessage {
    /// Encode for the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the wire.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed or unknown messages.
    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Digest of the canonical encoding. A retransmitted message has the
    /// same digest as the original; two requests with different sequence
    /// numbers never do.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn digest(&self) -> Result<MessageDigest> {
        Ok(*blake3::hash(self.encode()?.as_bytes()).as_bytes())
    }

    /// Wire name of the message type, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TripStarted { .. } => "tripStarted",
            Self::SetTime { .. } => "setTime",
            Self::LegAdvanced { .. } => "legAdvanced",
            Self::AddLeg { .. } => "addLeg",
            Self::LegUpdated { .. } => "legUpdated",
            Self::TripEnded { .. } => "tripEnded",
        }
    }

    /// Flat leg index the message addresses, if any.
    #[must_use]
    pub fn leg_index(&self) -> Option<usize> {
        match self {
            Self::SetTime { leg_index, .. } | Self::LegUpdated { leg_index, .. } => {
                Some(*leg_index)
            }
            Self::LegAdvanced { new_index, .. } => Some(*new_index),
            Self::TripStarted { .. } | Self::AddLeg { .. } | Self::TripEnded { .. } => None,
        }
    }

    /// The controller operation a companion-originated message maps to.
    /// Messages that only flow primary to companion map to nothing.
    #[must_use]
    pub fn to_operation(&self) -> Option<LegOperation> {
        match self {
            Self::SetTime {
                leg_index,
                field,
                value,
                ..
            } => Some(LegOperation::set_time(*leg_index, *field, value.clone())),
            Self::AddLeg { origin_airport, .. } => {
                let origin = origin_airport.trim();
                Some(LegOperation::append((!origin.is_empty()).then_some(origin)))
            }
            Self::TripStarted { .. }
            | Self::LegAdvanced { .. }
            | Self::LegUpdated { .. }
            | Self::TripEnded { .. } => None,
        }
    }
}
