//! Trip-lifecycle coordinator.
//!
//! The coordinator owns the in-memory trips, the [`LegController`], and the
//! [`DutyTimer`]. Every mutation, whether it comes from the CLI or from the
//! companion bridge, is funneled through here so the timer sees trip
//! activations and completions in the same order the controller produced
//! them. Lifecycle events are fanned out over a broadcast channel.
//!
//! Writes to the [`TripStore`] are best-effort: a failure is logged, the trip
//! is remembered as dirty, and the write is retried on the next mutation or
//! tick. The in-memory state is never rolled back.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::compliance::{ComplianceReport, ANNUAL_WINDOW_DAYS};
use crate::config::{ComplianceConfig, Config};
use crate::controller::{Applied, LegController, LegOperation};
use crate::error::{Error, Result};
use crate::events::{DutyThreshold, LifecycleEvent};
use crate::model::{DutySpan, Trip, TripId, TripStatus};
use crate::storage::TripStore;
use crate::timer::{DutyTimer, FallbackRule};

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 256;

/// Owns trips and the duty session, and serializes all mutation.
#[derive(Debug)]
pub struct Coordinator {
    trips: BTreeMap<TripId, Trip>,
    controller: LegController,
    timer: DutyTimer,
    store: Arc<dyn TripStore>,
    events: broadcast::Sender<LifecycleEvent>,
    dirty: BTreeSet<TripId>,
    fallback: FallbackRule,
    compliance: ComplianceConfig,
}

impl Coordinator {
    /// Load every stored trip and take ownership of the duty timer.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored trips cannot be read.
    pub fn new(store: Arc<dyn TripStore>, timer: DutyTimer, config: &Config) -> Result<Self> {
        let trips: BTreeMap<TripId, Trip> = store
            .list_trips()?
            .into_iter()
            .map(|t| (t.id().clone(), t))
            .collect();
        debug!("Loaded {} trips", trips.len());

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            trips,
            controller: LegController::new(),
            timer,
            store,
            events,
            dirty: BTreeSet::new(),
            fallback: config.duty.fallback_rule(),
            compliance: config.compliance.clone(),
        })
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// The duty timer.
    #[must_use]
    pub fn timer(&self) -> &DutyTimer {
        &self.timer
    }

    /// Look up a trip.
    #[must_use]
    pub fn trip(&self, id: &TripId) -> Option<&Trip> {
        self.trips.get(id)
    }

    /// All trips, oldest date first.
    #[must_use]
    pub fn trips(&self) -> Vec<&Trip> {
        let mut trips: Vec<&Trip> = self.trips.values().collect();
        trips.sort_by(|a, b| a.date().cmp(&b.date()).then_with(|| a.id().cmp(b.id())));
        trips
    }

    /// The trip currently under way: the one the duty session belongs to,
    /// otherwise the most recently dated active trip.
    #[must_use]
    pub fn current_trip(&self) -> Option<&Trip> {
        self.timer
            .session_trip()
            .and_then(|id| self.trips.get(id))
            .filter(|t| t.status() == TripStatus::Active)
            .or_else(|| {
                self.trips
                    .values()
                    .filter(|t| t.status() == TripStatus::Active)
                    .max_by_key(|t| t.date())
            })
    }

    /// Ids of trips whose last write failed.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.dirty.len()
    }

    /// Create a trip, scheduled or already active.
    ///
    /// # Errors
    ///
    /// Activation errors are returned as-is; storage failures are not.
    pub fn create_trip(&mut self, date: NaiveDate, active: bool) -> Result<TripId> {
        let trip = Trip::new(date);
        let id = trip.id().clone();
        info!(trip = %id, %date, "trip created");
        self.trips.insert(id.clone(), trip);

        if active {
            self.activate_trip(&id)?;
        } else {
            self.save(&id);
        }
        Ok(id)
    }

    /// Put a scheduled trip under way. Starts the duty timer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TripNotFound`] or [`Error::TripClosed`].
    pub fn activate_trip(&mut self, id: &TripId) -> Result<Vec<LifecycleEvent>> {
        let trip = self.trips.get_mut(id).ok_or_else(|| Error::trip_not_found(id))?;
        let events = self.controller.activate_trip(trip)?;
        self.settle(id, &events);
        Ok(events)
    }

    /// Apply one leg operation to a trip.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TripNotFound`], or whatever validation error the
    /// controller raised; a rejected operation leaves the trip unchanged.
    pub fn apply(&mut self, id: &TripId, op: &LegOperation) -> Result<Applied> {
        let trip = self.trips.get_mut(id).ok_or_else(|| Error::trip_not_found(id))?;
        let applied = self.controller.apply(trip, op)?;
        self.settle(id, &applied.events);
        Ok(applied)
    }

    /// Complete a trip.
    ///
    /// When the running duty session belongs to this trip it is ended and
    /// its span captured, unless duty was already captured by hand.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TripNotFound`] or [`Error::TripClosed`].
    pub fn complete_trip(&mut self, id: &TripId) -> Result<Trip> {
        let trip = self.trips.get(id).ok_or_else(|| Error::trip_not_found(id))?;
        if trip.status() == TripStatus::Completed {
            return Err(Error::trip_closed(id));
        }

        let span = if self.timer.session_trip() == Some(id) {
            self.timer.end_duty()
        } else {
            None
        };

        let trip = self.trips.get_mut(id).ok_or_else(|| Error::trip_not_found(id))?;
        if let Some(span) = span {
            if trip.duty_minutes().is_none() {
                trip.capture_duty(span, false)?;
            } else {
                debug!(trip = %id, "keeping previously captured duty span");
            }
        }
        let events = self.controller.complete_trip(trip)?;
        let snapshot = trip.clone();
        self.settle(id, &events);
        Ok(snapshot)
    }

    /// Record a manually entered duty span.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDutySpan`] when `end` is not after `start`,
    /// and [`Error::DutyAlreadyCaptured`] once duty minutes exist.
    pub fn override_duty(
        &mut self,
        id: &TripId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        if end <= start {
            return Err(Error::InvalidDutySpan {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        let trip = self.trips.get_mut(id).ok_or_else(|| Error::trip_not_found(id))?;
        trip.capture_duty(DutySpan { start, end }, true)?;
        info!(trip = %id, minutes = ?trip.duty_minutes(), "duty entered manually");
        self.save(id);
        Ok(())
    }

    /// Advance the duty timer and publish any threshold crossings. Also
    /// retries pending trip writes.
    pub fn tick(&mut self) -> Vec<DutyThreshold> {
        let crossed = self.timer.tick();
        for threshold in &crossed {
            self.publish(LifecycleEvent::ThresholdCrossed {
                threshold: *threshold,
            });
        }
        self.retry_pending();
        crossed
    }

    /// Compliance totals as of `as_of`.
    ///
    /// Trips inside the widest window are read from the store by date; any
    /// trip whose last write is still pending is taken from memory instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored trips cannot be read.
    pub fn report(&self, as_of: NaiveDate) -> Result<ComplianceReport> {
        let since = as_of - Duration::days(ANNUAL_WINDOW_DAYS);
        let mut trips = self.store.trips_between(since, as_of)?;
        for id in &self.dirty {
            trips.retain(|t| t.id() != id);
            if let Some(trip) = self
                .trips
                .get(id)
                .filter(|t| (since..=as_of).contains(&t.date()))
            {
                trips.push(trip.clone());
            }
        }
        debug!(%as_of, trips = trips.len(), "building compliance report");
        Ok(ComplianceReport::build(
            &trips,
            as_of,
            &self.compliance,
            &self.fallback,
        ))
    }

    /// React to controller events, persist, and publish.
    fn settle(&mut self, id: &TripId, events: &[LifecycleEvent]) {
        for event in events {
            if let LifecycleEvent::TripActivated { trip_id } = event {
                if !self.timer.start_duty(trip_id) {
                    continue;
                }
                let started = self.timer.state().duty_start;
                if let (Some(trip), Some(start)) = (self.trips.get_mut(trip_id), started) {
                    trip.mark_duty_start(start);
                }
            }
        }
        self.save(id);
        self.retry_pending();
        for event in events {
            self.publish(event.clone());
        }
    }

    fn publish(&self, event: LifecycleEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn save(&mut self, id: &TripId) {
        let Some(trip) = self.trips.get(id) else {
            return;
        };
        match self.store.save_trip(trip) {
            Ok(()) => {
                self.dirty.remove(id);
            }
            Err(e) => {
                warn!(trip = %id, "Failed to save trip, will retry: {}", e);
                self.dirty.insert(id.clone());
            }
        }
    }

    fn retry_pending(&mut self) {
        let pending: Vec<TripId> = self.dirty.iter().cloned().collect();
        for id in pending {
            self.save(&id);
        }
    }
}
