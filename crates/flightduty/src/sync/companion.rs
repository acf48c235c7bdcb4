//! Companion-side mirror of the current trip.
//!
//! The mirror is owned by the companion and may be replaced wholesale by any
//! inbound snapshot. It never edits trip history itself: local actions only
//! produce requests for the primary. The completed-leg archive is
//! additive-only and survives every inbound push.
//!
//! Legs are tracked by [`LegId`] rather than by flat index, since an
//! inserted leg shifts every index after it.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::protocol::CompanionMessage;
use crate::model::{Leg, LegId, TimeField, Trip, TripId};
use crate::timer::Clock;

/// A leg the companion has filed as done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedLeg {
    /// Trip the leg belonged to, when a snapshot had been received.
    pub trip_id: Option<TripId>,
    /// Flat index of the leg when it was filed.
    pub index: usize,
    /// The leg as the companion last saw it.
    pub leg: Leg,
}

/// What the companion shows and remembers.
#[derive(Debug)]
pub struct CompanionMirror {
    trip: Option<Trip>,
    displayed: Option<(usize, Leg)>,
    total_legs: usize,
    archive: Vec<ArchivedLeg>,
    archived: HashSet<(Option<TripId>, LegId)>,
    next_seq: u64,
    clock: Arc<dyn Clock>,
}

impl CompanionMirror {
    /// An empty mirror.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            trip: None,
            displayed: None,
            total_legs: 0,
            archive: Vec::new(),
            archived: HashSet::new(),
            next_seq: 1,
            clock,
        }
    }

    /// The last trip snapshot received.
    #[must_use]
    pub fn trip(&self) -> Option<&Trip> {
        self.trip.as_ref()
    }

    /// The leg on screen and its index.
    #[must_use]
    pub fn displayed_leg(&self) -> Option<(usize, &Leg)> {
        self.displayed.as_ref().map(|(i, leg)| (*i, leg))
    }

    /// Leg count as last reported by the primary.
    #[must_use]
    pub fn total_legs(&self) -> usize {
        self.total_legs
    }

    /// Legs filed as done, oldest first.
    #[must_use]
    pub fn archive(&self) -> &[ArchivedLeg] {
        &self.archive
    }

    /// Apply one message from the primary.
    pub fn receive(&mut self, message: &CompanionMessage) {
        match message {
            CompanionMessage::TripStarted { snapshot, .. } => {
                self.total_legs = snapshot.leg_count();
                self.displayed = snapshot
                    .active_index()
                    .and_then(|i| snapshot.leg(i).map(|leg| (i, leg.clone())));
                self.trip = Some(snapshot.as_ref().clone());
                debug!(trip = %snapshot.id(), "mirror replaced from snapshot");
            }
            CompanionMessage::LegAdvanced {
                new_index,
                total_legs,
                leg,
                ..
            } => {
                let same = self
                    .displayed
                    .as_ref()
                    .is_some_and(|(_, shown)| shown.id() == leg.id());
                if !same {
                    self.archive_displayed();
                }
                self.displayed = Some((*new_index, leg.clone()));
                self.total_legs = *total_legs;
            }
            CompanionMessage::LegUpdated {
                leg_index,
                leg,
                total_legs,
            } => {
                self.total_legs = *total_legs;
                match &mut self.displayed {
                    Some((i, shown)) if shown.id() == leg.id() => {
                        *i = *leg_index;
                        *shown = leg.clone();
                    }
                    _ => debug!(index = leg_index, "update for a leg not on screen"),
                }
            }
            CompanionMessage::TripEnded { snapshot, .. } => self.end_trip(snapshot),
            CompanionMessage::SetTime { .. } | CompanionMessage::AddLeg { .. } => {
                warn!(kind = message.kind(), "Ignoring request sent to the companion");
            }
        }
    }

    /// Request a time write on the displayed leg. Returns `None` when no
    /// leg is on screen.
    #[must_use]
    pub fn set_time(&mut self, field: TimeField, value: &str) -> Option<CompanionMessage> {
        let (leg_index, _) = self.displayed_leg()?;
        Some(CompanionMessage::SetTime {
            leg_index,
            field,
            value: value.to_string(),
            seq: self.take_seq(),
            timestamp: self.clock.now().timestamp(),
        })
    }

    /// Request a new leg after the last one.
    #[must_use]
    pub fn add_leg(&mut self, origin_airport: &str) -> CompanionMessage {
        CompanionMessage::AddLeg {
            origin_airport: origin_airport.to_string(),
            seq: self.take_seq(),
            timestamp: self.clock.now().timestamp(),
        }
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// File the final state of the displayed leg and clear the screen. A
    /// snapshot for some other trip is ignored.
    fn end_trip(&mut self, snapshot: &Trip) {
        if self.trip.as_ref().is_some_and(|t| t.id() != snapshot.id()) {
            debug!(trip = %snapshot.id(), "ignoring end of a trip not mirrored here");
            return;
        }
        self.trip = Some(snapshot.clone());
        if let Some((index, shown)) = &mut self.displayed {
            if let Some(position) = snapshot.legs().position(|l| l.id() == shown.id()) {
                *index = position;
                if let Some(latest) = snapshot.leg(position) {
                    *shown = latest.clone();
                }
            }
        }
        self.archive_displayed();
        self.trip = None;
        self.total_legs = 0;
        debug!(trip = %snapshot.id(), "mirrored trip ended");
    }

    /// File the displayed leg if, on the data held here, it satisfies its
    /// completion rule.
    fn archive_displayed(&mut self) {
        let Some((index, leg)) = self.displayed.take() else {
            return;
        };
        if !leg.is_complete() {
            debug!(index, "not archiving incomplete leg");
            return;
        }
        let trip_id = self.trip.as_ref().map(|t| t.id().clone());
        if self.archived.insert((trip_id.clone(), leg.id())) {
            debug!(index, leg = leg.id(), "archived completed leg");
            self.archive.push(ArchivedLeg {
                trip_id,
                index,
                leg,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{LegController, LegOperation};
    use crate::timer::ManualClock;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn mirror() -> CompanionMirror {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 3, 7, 0, 0).unwrap());
        CompanionMirror::new(Arc::new(clock))
    }

    fn trip_with_legs(count: usize) -> Trip {
        let ctl = LegController::new();
        let mut trip = Trip::new(NaiveDate::from_ymd_opt(2026, 10, 3).unwrap());
        ctl.activate_trip(&mut trip).unwrap();
        for _ in 0..count {
            ctl.apply(&mut trip, &LegOperation::append(Some("KSEA"))).unwrap();
        }
        trip
    }

    /// An unfilled leg with a given id.
    fn standby(id: LegId) -> Leg {
        let mut leg = Leg::new("KSEA", "");
        leg.set_id(id);
        leg
    }

    /// A filled ground-ops leg; it gets id 1 from its trip.
    fn complete_ground_leg() -> Leg {
        let ctl = LegController::new();
        let mut trip = trip_with_legs(0);
        ctl.apply(
            &mut trip,
            &LegOperation::InsertLeg {
                index: 0,
                airport: "KSEA".to_string(),
            },
        )
        .unwrap();
        ctl.apply(&mut trip, &LegOperation::set_time(0, TimeField::Out, "0800"))
            .unwrap();
        ctl.apply(&mut trip, &LegOperation::set_time(0, TimeField::In, "0815"))
            .unwrap();
        trip.leg(0).unwrap().clone()
    }

    fn advanced(new_index: usize, leg: Leg) -> CompanionMessage {
        CompanionMessage::LegAdvanced {
            new_index,
            total_legs: 3,
            leg,
            timestamp: 0,
        }
    }

    #[test]
    fn test_trip_started_replaces_mirror() {
        let mut m = mirror();
        let trip = trip_with_legs(2);
        m.receive(&CompanionMessage::TripStarted {
            snapshot: Box::new(trip.clone()),
            timestamp: 0,
        });
        assert_eq!(m.trip(), Some(&trip));
        assert_eq!(m.displayed_leg().map(|(i, _)| i), Some(0));
        assert_eq!(m.total_legs(), 2);
    }

    #[test]
    fn test_advance_archives_complete_leg() {
        let mut m = mirror();
        m.receive(&advanced(0, complete_ground_leg()));
        m.receive(&advanced(1, standby(2)));

        assert_eq!(m.archive().len(), 1);
        assert_eq!(m.archive()[0].index, 0);
        assert_eq!(m.displayed_leg().map(|(i, _)| i), Some(1));
    }

    #[test]
    fn test_advance_skips_incomplete_leg() {
        let mut m = mirror();
        m.receive(&advanced(0, standby(1)));
        m.receive(&advanced(1, standby(2)));
        assert!(m.archive().is_empty());
    }

    #[test]
    fn test_leg_updated_refreshes_displayed_leg() {
        let mut m = mirror();
        m.receive(&advanced(0, standby(1)));
        m.receive(&CompanionMessage::LegUpdated {
            leg_index: 0,
            leg: complete_ground_leg(),
            total_legs: 3,
        });
        m.receive(&advanced(1, standby(2)));
        assert_eq!(m.archive().len(), 1);
    }

    #[test]
    fn test_leg_updated_follows_shifted_index() {
        let mut m = mirror();
        m.receive(&advanced(0, standby(1)));
        m.receive(&CompanionMessage::LegUpdated {
            leg_index: 1,
            leg: complete_ground_leg(),
            total_legs: 2,
        });
        let (index, shown) = m.displayed_leg().unwrap();
        assert_eq!(index, 1);
        assert!(shown.is_complete());

        m.receive(&CompanionMessage::LegUpdated {
            leg_index: 0,
            leg: standby(9),
            total_legs: 2,
        });
        assert_eq!(m.displayed_leg().unwrap().1.id(), 1);
    }

    #[test]
    fn test_repeated_advance_does_not_duplicate_archive() {
        let mut m = mirror();
        m.receive(&advanced(0, complete_ground_leg()));
        m.receive(&advanced(1, standby(2)));
        m.receive(&advanced(1, standby(2)));
        m.receive(&advanced(0, complete_ground_leg()));
        m.receive(&advanced(1, standby(2)));
        assert_eq!(m.archive().len(), 1);
    }

    #[test]
    fn test_distinct_legs_at_same_index_are_both_archived() {
        let mut m = mirror();
        let mut first = complete_ground_leg();
        first.set_id(5);
        m.receive(&advanced(0, first));
        m.receive(&advanced(0, complete_ground_leg()));
        m.receive(&advanced(1, standby(2)));

        let ids: Vec<LegId> = m.archive().iter().map(|a| a.leg.id()).collect();
        assert_eq!(ids, vec![5, 1]);
        assert!(m.archive().iter().all(|a| a.index == 0));
    }

    #[test]
    fn test_archive_survives_new_snapshot() {
        let mut m = mirror();
        m.receive(&advanced(0, complete_ground_leg()));
        m.receive(&advanced(1, standby(2)));
        m.receive(&CompanionMessage::TripStarted {
            snapshot: Box::new(trip_with_legs(1)),
            timestamp: 0,
        });
        assert_eq!(m.archive().len(), 1);
    }

    #[test]
    fn test_trip_ended_archives_final_leg() {
        let ctl = LegController::new();
        let mut trip = trip_with_legs(1);
        let mut m = mirror();
        m.receive(&CompanionMessage::TripStarted {
            snapshot: Box::new(trip.clone()),
            timestamp: 0,
        });
        ctl.apply(
            &mut trip,
            &LegOperation::ToggleType {
                index: 0,
                kind: crate::model::LegKind::GroundOps,
            },
        )
        .unwrap();
        ctl.apply(&mut trip, &LegOperation::set_time(0, TimeField::Out, "0900"))
            .unwrap();
        ctl.apply(&mut trip, &LegOperation::set_time(0, TimeField::In, "0910"))
            .unwrap();
        ctl.complete_trip(&mut trip).unwrap();

        m.receive(&CompanionMessage::TripEnded {
            snapshot: Box::new(trip.clone()),
            timestamp: 0,
        });
        assert_eq!(m.archive().len(), 1);
        assert_eq!(m.archive()[0].trip_id.as_ref(), Some(trip.id()));
        assert!(m.archive()[0].leg.is_complete());
        assert!(m.displayed_leg().is_none());
        assert!(m.trip().is_none());
    }

    #[test]
    fn test_trip_ended_for_other_trip_is_ignored() {
        let mut m = mirror();
        let mirrored = trip_with_legs(1);
        m.receive(&CompanionMessage::TripStarted {
            snapshot: Box::new(mirrored.clone()),
            timestamp: 0,
        });
        m.receive(&CompanionMessage::TripEnded {
            snapshot: Box::new(trip_with_legs(1)),
            timestamp: 0,
        });
        assert_eq!(m.trip(), Some(&mirrored));
        assert!(m.displayed_leg().is_some());
    }

    #[test]
    fn test_local_actions_only_produce_requests() {
        let mut m = mirror();
        assert!(m.set_time(TimeField::Out, "0900").is_none());

        m.receive(&advanced(2, standby(3)));
        let request = m.set_time(TimeField::Out, "0900").unwrap();
        assert!(matches!(
            request,
            CompanionMessage::SetTime { leg_index: 2, .. }
        ));
        assert!(m.displayed_leg().unwrap().1.time(TimeField::Out).is_none());

        let add = m.add_leg("KBOI");
        assert!(matches!(add, CompanionMessage::AddLeg { ref origin_airport, .. } if origin_airport == "KBOI"));
        assert_eq!(m.total_legs(), 3);
    }

    #[test]
    fn test_requests_get_increasing_sequence_numbers() {
        let mut m = mirror();
        m.receive(&advanced(0, standby(1)));
        let seqs: Vec<u64> = [
            m.add_leg(""),
            m.add_leg(""),
            m.set_time(TimeField::Out, "0600").unwrap(),
        ]
        .iter()
        .map(|msg| match msg {
            CompanionMessage::AddLeg { seq, .. } | CompanionMessage::SetTime { seq, .. } => *seq,
            other => panic!("unexpected request: {other:?}"),
        })
        .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
