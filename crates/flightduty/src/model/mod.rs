//! Trip and leg data model.
//!
//! The model types only expose read access publicly. Structural changes and
//! status transitions go through [`crate::controller::LegController`].

pub mod leg;
pub mod time;
pub mod trip;

pub use leg::{normalize_airport, Leg, LegId, LegKind, LegStatus};
pub use time::{ClockTime, TimeField};
pub use trip::{DutySpan, LegGroup, Trip, TripId, TripStatus, LEGS_PER_GROUP};
