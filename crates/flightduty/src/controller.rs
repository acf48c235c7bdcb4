//! Leg lifecycle controller.
//!
//! Every structural change to a trip and every leg status transition goes
//! through [`LegController`]. Local edits and companion messages both end up
//! in [`LegController::apply`], so there is exactly one mutation pipeline.
//!
//! Leg status follows `standby -> active -> completed`. When the active leg
//! completes, the lowest-index standby leg becomes active. After every
//! mutation the controller re-checks that at most one leg is active.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::LifecycleEvent;
use crate::model::{normalize_airport, ClockTime, Leg, LegKind, LegStatus, TimeField, Trip, TripStatus};

/// A single, narrowly scoped leg mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LegOperation {
    /// Add one leg after the last leg.
    AppendLeg {
        /// Departure airport; defaults to the previous leg's arrival.
        #[serde(default)]
        departure: Option<String>,
        /// Arrival airport, when already known.
        #[serde(default)]
        arrival: Option<String>,
        /// External roster id for imported legs.
        #[serde(default)]
        roster_source_id: Option<String>,
    },
    /// Insert a same-airport ground-ops leg at `index`.
    InsertLeg {
        /// Flat index to insert at (`leg_count` appends).
        index: usize,
        /// Airport for both ends of the leg.
        airport: String,
    },
    /// Write one time field.
    SetTime {
        /// Flat leg index.
        index: usize,
        /// Which field.
        field: TimeField,
        /// `HHMM` (or `HMM`); empty clears the field.
        value: String,
    },
    /// Set or correct the arrival airport.
    SetArrival {
        /// Flat leg index.
        index: usize,
        /// Arrival airport; empty clears it.
        airport: String,
    },
    /// Change the leg's kind. Refused once the leg is completed.
    ToggleType {
        /// Flat leg index.
        index: usize,
        /// The new kind.
        kind: LegKind,
    },
}

impl LegOperation {
    /// Shorthand for an append with an optional departure override.
    #[must_use]
    pub fn append(departure: Option<&str>) -> Self {
        Self::AppendLeg {
            departure: departure.map(str::to_string),
            arrival: None,
            roster_source_id: None,
        }
    }

    /// Shorthand for an append with both airports.
    #[must_use]
    pub fn append_route(departure: Option<&str>, arrival: &str) -> Self {
        Self::AppendLeg {
            departure: departure.map(str::to_string),
            arrival: Some(arrival.to_string()),
            roster_source_id: None,
        }
    }

    /// Shorthand for a time write.
    #[must_use]
    pub fn set_time(index: usize, field: TimeField, value: impl Into<String>) -> Self {
        Self::SetTime {
            index,
            field,
            value: value.into(),
        }
    }
}

/// Result of applying a [`LegOperation`].
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// Flat index of the leg the operation touched.
    pub leg_index: usize,
    /// Events produced, in order.
    pub events: Vec<LifecycleEvent>,
}

/// Owner of all leg structure and status changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegController;

impl LegController {
    /// Create a controller.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Apply one operation to `trip`.
    ///
    /// # Errors
    ///
    /// Validation failures (bad time, bad airport, index out of range, field
    /// not used by the leg's kind) and mutations on a completed trip are
    /// returned without touching the trip.
    pub fn apply(&self, trip: &mut Trip, op: &LegOperation) -> Result<Applied> {
        if trip.status() == TripStatus::Completed {
            return Err(Error::trip_closed(trip.id()));
        }

        let applied = match op {
            LegOperation::AppendLeg {
                departure,
                arrival,
                roster_source_id,
            } => self.append_leg(
                trip,
                departure.as_deref(),
                arrival.as_deref(),
                roster_source_id.as_deref(),
            ),
            LegOperation::InsertLeg { index, airport } => self.insert_leg(trip, *index, airport),
            LegOperation::SetArrival { index, airport } => self.set_arrival(trip, *index, airport),
            LegOperation::SetTime {
                index,
                field,
                value,
            } => self.set_time(trip, *index, *field, value),
            LegOperation::ToggleType { index, kind } => self.toggle_type(trip, *index, *kind),
        }?;

        enforce_single_active(trip);
        Ok(applied)
    }

    fn append_leg(
        &self,
        trip: &mut Trip,
        departure: Option<&str>,
        arrival: Option<&str>,
        roster_source_id: Option<&str>,
    ) -> Result<Applied> {
        let departure = match departure {
            Some(code) => normalize_airport(code)?,
            None => trip
                .legs()
                .last()
                .map(|l| l.arrival().to_string())
                .unwrap_or_default(),
        };
        let arrival = arrival.map(normalize_airport).transpose()?.unwrap_or_default();

        if trip.ensure_group() {
            debug!(trip = %trip.id(), "synthesized leg group for append");
        }

        let mut leg = Leg::new(departure, arrival);
        if let Some(source) = roster_source_id {
            leg = leg.with_roster_source(source);
        }

        let mut events = Vec::new();
        let index = trip.leg_count();
        let activate = trip.status() == TripStatus::Active && trip.all_legs_complete();
        if activate {
            leg.advance(LegStatus::Active);
        }
        trip.push_leg(leg);

        debug!(trip = %trip.id(), index, active = activate, "appended leg");
        if activate {
            events.push(LifecycleEvent::LegActivated {
                trip_id: trip.id().clone(),
                index,
            });
        }
        Ok(Applied {
            leg_index: index,
            events,
        })
    }

    fn insert_leg(&self, trip: &mut Trip, index: usize, airport: &str) -> Result<Applied> {
        let airport = normalize_airport(airport)?;
        let count = trip.leg_count();
        if index > count {
            return Err(Error::LegIndexOutOfRange { index, count });
        }
        if trip.ensure_group() {
            debug!(trip = %trip.id(), "synthesized leg group for insert");
        }

        let previously_active = trip.active_index();
        let takes_over = previously_active.is_some_and(|active| index <= active);
        let activate = takes_over
            || (previously_active.is_none()
                && trip.status() == TripStatus::Active
                && trip.all_legs_complete());

        let mut leg = Leg::ground_ops(airport);
        if activate {
            leg.advance(LegStatus::Active);
        }
        trip.insert_leg(index, leg)?;

        if takes_over {
            // The old active leg shifted one slot to the right.
            if let Some(active) = previously_active {
                if let Some(displaced) = trip.leg_mut(active + 1) {
                    displaced.demote();
                }
            }
        }

        debug!(trip = %trip.id(), index, active = activate, "inserted ground-ops leg");
        let mut events = Vec::new();
        if activate {
            events.push(LifecycleEvent::LegActivated {
                trip_id: trip.id().clone(),
                index,
            });
        }
        Ok(Applied {
            leg_index: index,
            events,
        })
    }

    fn set_arrival(&self, trip: &mut Trip, index: usize, airport: &str) -> Result<Applied> {
        let airport = normalize_airport(airport)?;
        let count = trip.leg_count();
        let leg = trip
            .leg_mut(index)
            .ok_or(Error::LegIndexOutOfRange { index, count })?;
        leg.set_arrival(airport);
        debug!(trip = %trip.id(), index, "set leg arrival");
        Ok(Applied {
            leg_index: index,
            events: Vec::new(),
        })
    }

    fn set_time(
        &self,
        trip: &mut Trip,
        index: usize,
        field: TimeField,
        value: &str,
    ) -> Result<Applied> {
        let count = trip.leg_count();
        let kind = trip
            .leg(index)
            .map(Leg::kind)
            .ok_or(Error::LegIndexOutOfRange { index, count })?;
        let parsed = ClockTime::parse_optional(value)?;
        if !kind.uses(field) {
            return Err(Error::FieldNotApplicable {
                field: field.to_string(),
                kind: kind.to_string(),
            });
        }

        if let Some(leg) = trip.leg_mut(index) {
            leg.set_time(field, parsed);
        }
        debug!(trip = %trip.id(), index, %field, value = %value, "set leg time");

        let mut events = Vec::new();
        let starts_trip = index == 0
            && parsed.is_some()
            && matches!(field, TimeField::Out | TimeField::DeadheadOut)
            && trip.status() == TripStatus::Scheduled;
        if starts_trip {
            events.extend(self.activate_trip(trip)?);
        }

        settle_leg(trip, index, &mut events);
        Ok(Applied {
            leg_index: index,
            events,
        })
    }

    fn toggle_type(&self, trip: &mut Trip, index: usize, kind: LegKind) -> Result<Applied> {
        let count = trip.leg_count();
        let leg = trip
            .leg_mut(index)
            .ok_or(Error::LegIndexOutOfRange { index, count })?;

        let mut events = Vec::new();
        if leg.kind() == kind {
            return Ok(Applied {
                leg_index: index,
                events,
            });
        }
        if leg.status() == LegStatus::Completed {
            return Err(Error::LegAlreadyCompleted { index });
        }
        leg.set_kind(kind);
        debug!(trip = %trip.id(), index, %kind, "changed leg type");

        settle_leg(trip, index, &mut events);
        Ok(Applied {
            leg_index: index,
            events,
        })
    }

    /// Put a scheduled trip under way and activate its first standby leg.
    /// Activating an already active trip does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TripClosed`] for a completed trip.
    pub fn activate_trip(&self, trip: &mut Trip) -> Result<Vec<LifecycleEvent>> {
        match trip.status() {
            TripStatus::Completed => return Err(Error::trip_closed(trip.id())),
            TripStatus::Active => return Ok(Vec::new()),
            TripStatus::Scheduled => {}
        }

        trip.set_status(TripStatus::Active);
        info!(trip = %trip.id(), "trip activated");
        let mut events = vec![LifecycleEvent::TripActivated {
            trip_id: trip.id().clone(),
        }];
        activate_next(trip, &mut events);
        enforce_single_active(trip);
        Ok(events)
    }

    /// Mark a trip completed. Duty capture happens before this, in the
    /// coordinator, so the emitted snapshot carries the duty fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TripClosed`] if the trip is already completed.
    pub fn complete_trip(&self, trip: &mut Trip) -> Result<Vec<LifecycleEvent>> {
        if trip.status() == TripStatus::Completed {
            return Err(Error::trip_closed(trip.id()));
        }
        trip.set_status(TripStatus::Completed);
        info!(trip = %trip.id(), legs = trip.leg_count(), "trip completed");
        Ok(vec![LifecycleEvent::TripCompleted {
            trip: Box::new(trip.clone()),
        }])
    }
}

/// Re-evaluate the completion rule of the leg at `index`, and hand the
/// active slot to the next standby leg if it just freed up.
fn settle_leg(trip: &mut Trip, index: usize, events: &mut Vec<LifecycleEvent>) {
    let Some(leg) = trip.leg_mut(index) else {
        return;
    };
    if leg.status() == LegStatus::Completed || !leg.is_complete() {
        return;
    }

    leg.advance(LegStatus::Active);
    leg.advance(LegStatus::Completed);
    debug!(trip = %trip.id(), index, "leg completed");
    events.push(LifecycleEvent::LegCompleted {
        trip_id: trip.id().clone(),
        index,
    });

    if trip.status() == TripStatus::Active {
        activate_next(trip, events);
    }
}

/// Activate the lowest-index standby leg when no leg is active.
fn activate_next(trip: &mut Trip, events: &mut Vec<LifecycleEvent>) {
    if trip.active_index().is_some() {
        return;
    }
    let Some(next) = trip.first_standby_index() else {
        return;
    };
    if let Some(leg) = trip.leg_mut(next) {
        leg.advance(LegStatus::Active);
    }
    debug!(trip = %trip.id(), index = next, "leg activated");
    events.push(LifecycleEvent::LegActivated {
        trip_id: trip.id().clone(),
        index: next,
    });
}

/// Keep the lowest-index active leg and put any others back on standby.
pub(crate) fn enforce_single_active(trip: &mut Trip) {
    let mut seen_active = false;
    let mut corrected = 0usize;
    for leg in trip.legs_mut() {
        if leg.status() == LegStatus::Active {
            if seen_active {
                leg.demote();
                corrected += 1;
            }
            seen_active = true;
        }
    }
    if corrected > 0 {
        warn!(
            trip = %trip.id(),
            corrected,
            "corrected invariant: more than one active leg"
        );
    }
}
