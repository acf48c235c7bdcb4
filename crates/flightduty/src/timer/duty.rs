//! The duty timer.
//!
//! Elapsed duty is always recomputed from the persisted start timestamp, so
//! a restart loses nothing. The session state is written through a
//! [`KeyValueStore`] on every change; a failed write is logged, remembered
//! as dirty, and retried on the next tick or state change.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::clock::Clock;
use crate::events::DutyThreshold;
use crate::model::{DutySpan, Trip, TripId};
use crate::storage::KeyValueStore;

/// The single-duty-period ceiling, in minutes.
pub const DUTY_CEILING_MINUTES: i64 = 16 * 60;

/// Key the session state is stored under.
pub const STATE_KEY: &str = "duty_timer.state";

/// Persisted duty session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyTimerState {
    /// Whether a duty session is running.
    pub on_duty: bool,
    /// When the session started.
    pub duty_start: Option<DateTime<Utc>>,
    /// The trip the session belongs to.
    pub trip_id: Option<TripId>,
    /// Bitmap of [`DutyThreshold::bit`] values already raised this session.
    #[serde(default)]
    pub fired: u8,
}

/// Tracks elapsed duty time and raises threshold events.
#[derive(Debug)]
pub struct DutyTimer {
    state: DutyTimerState,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    last_elapsed: Duration,
    dirty: bool,
}

impl DutyTimer {
    /// Load the session from `store`, or start idle if nothing usable is
    /// stored.
    ///
    /// The previous-tick baseline starts at zero, so a threshold that was
    /// crossed while the process was down fires once on the first tick.
    pub fn restore(clock: Arc<dyn Clock>, store: Arc<dyn KeyValueStore>) -> Self {
        let state = match store.get(STATE_KEY) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!("Discarding unreadable duty timer state: {}", e);
                DutyTimerState::default()
            }),
            Ok(None) => DutyTimerState::default(),
            Err(e) => {
                warn!("Failed to read duty timer state: {}", e);
                DutyTimerState::default()
            }
        };

        if state.on_duty {
            info!(
                trip = ?state.trip_id,
                start = ?state.duty_start,
                "restored running duty session"
            );
        }

        Self {
            state,
            clock,
            store,
            last_elapsed: Duration::zero(),
            dirty: false,
        }
    }

    /// Snapshot of the session state.
    #[must_use]
    pub fn state(&self) -> &DutyTimerState {
        &self.state
    }

    /// Whether a session is running.
    #[must_use]
    pub fn is_on_duty(&self) -> bool {
        self.state.on_duty
    }

    /// The trip the running session belongs to.
    #[must_use]
    pub fn session_trip(&self) -> Option<&TripId> {
        self.state.trip_id.as_ref().filter(|_| self.state.on_duty)
    }

    /// Whether the last write to the store failed and is still pending.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The current instant on this timer's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Start a session for `trip_id`.
    ///
    /// Returns `false` without touching anything when a session is already
    /// running, whether for this trip or another one.
    pub fn start_duty(&mut self, trip_id: &TripId) -> bool {
        if self.state.on_duty {
            match &self.state.trip_id {
                Some(current) if current == trip_id => {
                    debug!(trip = %trip_id, "duty already running for trip");
                }
                current => {
                    info!(
                        trip = %trip_id,
                        running = ?current,
                        "ignoring duty start: a session is already running"
                    );
                }
            }
            return false;
        }

        let now = self.clock.now();
        self.state = DutyTimerState {
            on_duty: true,
            duty_start: Some(now),
            trip_id: Some(trip_id.clone()),
            fired: 0,
        };
        self.last_elapsed = Duration::zero();
        info!(trip = %trip_id, start = %now, "duty started");
        self.persist();
        true
    }

    /// End the running session and return its span. Any threshold not yet
    /// raised is cancelled.
    pub fn end_duty(&mut self) -> Option<DutySpan> {
        if !self.state.on_duty {
            return None;
        }
        let end = self.clock.now();
        let start = self.state.duty_start.unwrap_or(end);
        let span = DutySpan { start, end };

        info!(
            trip = ?self.state.trip_id,
            minutes = span.minutes(),
            "duty ended"
        );
        self.state = DutyTimerState::default();
        self.last_elapsed = Duration::zero();
        self.persist();
        Some(span)
    }

    /// Time on duty so far; zero when idle.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match (self.state.on_duty, self.state.duty_start) {
            (true, Some(start)) => (self.clock.now() - start).max(Duration::zero()),
            _ => Duration::zero(),
        }
    }

    /// Time left before the single-duty-period ceiling, never negative.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        (Duration::minutes(DUTY_CEILING_MINUTES) - self.elapsed()).max(Duration::zero())
    }

    /// Recompute elapsed time and return the thresholds crossed since the
    /// previous tick, in increasing order. Each fires at most once per
    /// session.
    pub fn tick(&mut self) -> Vec<DutyThreshold> {
        if !self.state.on_duty {
            self.flush();
            return Vec::new();
        }

        let elapsed = self.elapsed();
        let mut crossed = Vec::new();
        for threshold in DutyThreshold::ALL {
            let at = Duration::minutes(threshold.minutes());
            let already = self.state.fired & threshold.bit() != 0;
            if !already && self.last_elapsed < at && elapsed >= at {
                self.state.fired |= threshold.bit();
                crossed.push(threshold);
            }
        }
        self.last_elapsed = elapsed;

        if crossed.is_empty() {
            self.flush();
        } else {
            for threshold in &crossed {
                warn!(
                    trip = ?self.state.trip_id,
                    %threshold,
                    elapsed_minutes = elapsed.num_minutes(),
                    "duty threshold crossed"
                );
            }
            self.persist();
        }
        crossed
    }

    /// Retry a pending write. Returns `true` when the store is up to date.
    pub fn flush(&mut self) -> bool {
        if self.dirty {
            self.persist();
        }
        !self.dirty
    }

    fn persist(&mut self) {
        let result = if self.state == DutyTimerState::default() {
            self.store.remove(STATE_KEY)
        } else {
            serde_json::to_string(&self.state)
                .map_err(Into::into)
                .and_then(|json| self.store.put(STATE_KEY, &json))
        };

        match result {
            Ok(()) => {
                if self.dirty {
                    info!("duty timer state written after earlier failure");
                }
                self.dirty = false;
            }
            Err(e) => {
                warn!("Failed to persist duty timer state, will retry: {}", e);
                self.dirty = true;
            }
        }
    }
}

/// Duty reconstructed from leg times when no timer ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackRule {
    /// Minutes of report time before the first leg starts.
    pub report_minutes: i64,
    /// Minutes of release time after the last leg ends.
    pub release_minutes: i64,
}

impl Default for FallbackRule {
    fn default() -> Self {
        Self {
            report_minutes: 60,
            release_minutes: 15,
        }
    }
}

impl FallbackRule {
    /// Derive a duty span from the trip's leg times.
    ///
    /// Times are laid out on the trip date (UTC) in leg order; a time earlier
    /// than the one before it rolls over to the next day. Returns `None` when
    /// there is no start time or no end time to anchor on.
    #[must_use]
    pub fn span(&self, trip: &Trip) -> Option<DutySpan> {
        let midnight = trip.date().and_hms_opt(0, 0, 0)?;
        let base = Utc.from_utc_datetime(&midnight);

        let mut day = 0i64;
        let mut previous: Option<u16> = None;
        let mut first_start = None;
        let mut last_end = None;

        for leg in trip.legs() {
            for (time, is_end) in [(leg.start_time(), false), (leg.end_time(), true)] {
                let Some(time) = time else {
                    continue;
                };
                if previous.is_some_and(|p| time.minutes() < p) {
                    day += 1;
                }
                previous = Some(time.minutes());

                let instant =
                    base + Duration::days(day) + Duration::minutes(i64::from(time.minutes()));
                if is_end {
                    last_end = Some(instant);
                } else if first_start.is_none() {
                    first_start = Some(instant);
                }
            }
        }

        let start = first_start? - Duration::minutes(self.report_minutes);
        let end = last_end? + Duration::minutes(self.release_minutes);
        (end > start).then_some(DutySpan { start, end })
    }
}

/// [`FallbackRule::span`] with the default report and release times.
#[must_use]
pub fn fallback_span(trip: &Trip) -> Option<DutySpan> {
    FallbackRule::default().span(trip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{LegController, LegOperation};
    use crate::model::{LegKind, TimeField};
    use crate::storage::MemoryStore;
    use crate::timer::ManualClock;
    use chrono::NaiveDate;

    fn start_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 4, 5, 0, 0).unwrap()
    }

    fn timer_with(store: &Arc<MemoryStore>) -> (DutyTimer, ManualClock) {
        let clock = ManualClock::new(start_instant());
        let timer = DutyTimer::restore(Arc::new(clock.clone()), store.clone());
        (timer, clock)
    }

    #[test]
    fn test_idle_timer() {
        let store = Arc::new(MemoryStore::new());
        let (mut timer, _) = timer_with(&store);
        assert!(!timer.is_on_duty());
        assert_eq!(timer.elapsed(), Duration::zero());
        assert_eq!(timer.remaining(), Duration::hours(16));
        assert!(timer.tick().is_empty());
        assert!(timer.end_duty().is_none());
    }

    #[test]
    fn test_three_hour_duty_span() {
        let store = Arc::new(MemoryStore::new());
        let (mut timer, clock) = timer_with(&store);
        let trip = TripId::from("t1");

        assert!(timer.start_duty(&trip));
        clock.advance(Duration::hours(3));
        assert_eq!(timer.elapsed(), Duration::hours(3));
        assert_eq!(timer.remaining(), Duration::hours(13));

        let span = timer.end_duty().unwrap();
        assert_eq!(span.minutes(), 180);
        assert!(!timer.is_on_duty());
        assert_eq!(store.get(STATE_KEY).unwrap(), None);
    }

    #[test]
    fn test_start_duty_ignored_while_running() {
        let store = Arc::new(MemoryStore::new());
        let (mut timer, clock) = timer_with(&store);
        assert!(timer.start_duty(&TripId::from("a")));
        clock.advance(Duration::hours(1));

        assert!(!timer.start_duty(&TripId::from("b")));
        assert!(!timer.start_duty(&TripId::from("a")));
        assert_eq!(timer.session_trip(), Some(&TripId::from("a")));
        assert_eq!(timer.state().duty_start, Some(start_instant()));
    }

    #[test]
    fn test_fourteen_hour_threshold_fires_once() {
        let store = Arc::new(MemoryStore::new());
        let (mut timer, clock) = timer_with(&store);
        timer.start_duty(&TripId::from("t1"));

        clock.advance(Duration::hours(13) + Duration::minutes(58));
        assert!(timer.tick().is_empty());

        let mut fired = Vec::new();
        for _ in 0..10 {
            clock.advance(Duration::seconds(30));
            fired.extend(timer.tick());
        }
        assert_eq!(fired, vec![DutyThreshold::FourteenHours]);
    }

    #[test]
    fn test_thresholds_fire_in_order_after_long_gap() {
        let store = Arc::new(MemoryStore::new());
        let (mut timer, clock) = timer_with(&store);
        timer.start_duty(&TripId::from("t1"));

        clock.advance(Duration::hours(17));
        assert_eq!(timer.tick(), DutyThreshold::ALL.to_vec());
        assert_eq!(timer.remaining(), Duration::zero());
        assert!(timer.tick().is_empty());
    }

    #[test]
    fn test_session_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        let (mut timer, clock) = timer_with(&store);
        timer.start_duty(&TripId::from("t1"));
        clock.advance(Duration::hours(14) + Duration::minutes(10));
        assert_eq!(timer.tick(), vec![DutyThreshold::FourteenHours]);
        drop(timer);

        clock.advance(Duration::hours(1));
        let mut restored = DutyTimer::restore(Arc::new(clock.clone()), store.clone());
        assert!(restored.is_on_duty());
        assert_eq!(
            restored.elapsed(),
            Duration::hours(15) + Duration::minutes(10)
        );
        assert_eq!(restored.tick(), vec![DutyThreshold::FifteenHours]);
    }

    #[test]
    fn test_new_session_resets_fired_bitmap() {
        let store = Arc::new(MemoryStore::new());
        let (mut timer, clock) = timer_with(&store);
        timer.start_duty(&TripId::from("a"));
        clock.advance(Duration::hours(15));
        assert_eq!(timer.tick().len(), 2);
        timer.end_duty();

        timer.start_duty(&TripId::from("b"));
        assert_eq!(timer.state().fired, 0);
        clock.advance(Duration::hours(14));
        assert_eq!(timer.tick(), vec![DutyThreshold::FourteenHours]);
    }

    #[test]
    fn test_persistence_failure_is_retried() {
        let store = Arc::new(MemoryStore::new());
        let (mut timer, clock) = timer_with(&store);

        store.set_fail_writes(true);
        assert!(timer.start_duty(&TripId::from("t1")));
        assert!(timer.is_on_duty());
        assert!(timer.is_dirty());
        assert_eq!(store.get(STATE_KEY).unwrap(), None);

        store.set_fail_writes(false);
        clock.advance(Duration::minutes(1));
        timer.tick();
        assert!(!timer.is_dirty());

        let restored = DutyTimer::restore(Arc::new(clock.clone()), store.clone());
        assert_eq!(restored.session_trip(), Some(&TripId::from("t1")));
    }

    #[test]
    fn test_unreadable_state_starts_idle() {
        let store = Arc::new(MemoryStore::new());
        store.put(STATE_KEY, "{not json").unwrap();
        let (timer, _) = timer_with(&store);
        assert!(!timer.is_on_duty());
    }

    fn imported_trip() -> Trip {
        let ctl = LegController::new();
        let mut trip = Trip::new(NaiveDate::from_ymd_opt(2026, 7, 4).unwrap());
        ctl.apply(&mut trip, &LegOperation::append(Some("KSEA"))).unwrap();
        ctl.apply(&mut trip, &LegOperation::append(None)).unwrap();
        trip
    }

    #[test]
    fn test_fallback_span() {
        let ctl = LegController::new();
        let mut trip = imported_trip();
        ctl.apply(&mut trip, &LegOperation::set_time(0, TimeField::Out, "0700"))
            .unwrap();
        ctl.apply(&mut trip, &LegOperation::set_time(0, TimeField::In, "0900"))
            .unwrap();
        ctl.apply(&mut trip, &LegOperation::set_time(1, TimeField::Out, "1000"))
            .unwrap();
        ctl.apply(&mut trip, &LegOperation::set_time(1, TimeField::In, "1330"))
            .unwrap();

        let span = fallback_span(&trip).unwrap();
        assert_eq!(span.start, Utc.with_ymd_and_hms(2026, 7, 4, 6, 0, 0).unwrap());
        assert_eq!(span.end, Utc.with_ymd_and_hms(2026, 7, 4, 13, 45, 0).unwrap());
        assert_eq!(span.minutes(), 465);
    }

    #[test]
    fn test_fallback_span_crosses_midnight() {
        let ctl = LegController::new();
        let mut trip = imported_trip();
        ctl.apply(
            &mut trip,
            &LegOperation::ToggleType {
                index: 1,
                kind: LegKind::Deadhead,
            },
        )
        .unwrap();
        ctl.apply(&mut trip, &LegOperation::set_time(0, TimeField::Out, "2100"))
            .unwrap();
        ctl.apply(&mut trip, &LegOperation::set_time(0, TimeField::In, "2330"))
            .unwrap();
        ctl.apply(
            &mut trip,
            &LegOperation::set_time(1, TimeField::DeadheadOut, "0030"),
        )
        .unwrap();
        ctl.apply(
            &mut trip,
            &LegOperation::set_time(1, TimeField::DeadheadIn, "0200"),
        )
        .unwrap();

        let span = fallback_span(&trip).unwrap();
        assert_eq!(span.end, Utc.with_ymd_and_hms(2026, 7, 5, 2, 15, 0).unwrap());
        assert_eq!(span.minutes(), 6 * 60 + 15);
    }

    #[test]
    fn test_fallback_needs_both_ends() {
        let ctl = LegController::new();
        let mut trip = imported_trip();
        assert!(fallback_span(&trip).is_none());
        ctl.apply(&mut trip, &LegOperation::set_time(0, TimeField::Out, "0700"))
            .unwrap();
        assert!(fallback_span(&trip).is_none());
    }

    #[test]
    fn test_custom_fallback_rule() {
        let ctl = LegController::new();
        let mut trip = imported_trip();
        ctl.apply(&mut trip, &LegOperation::set_time(0, TimeField::Out, "0800"))
            .unwrap();
        ctl.apply(&mut trip, &LegOperation::set_time(0, TimeField::In, "0900"))
            .unwrap();
        let rule = FallbackRule {
            report_minutes: 45,
            release_minutes: 30,
        };
        assert_eq!(rule.span(&trip).unwrap().minutes(), 45 + 60 + 30);
    }
}
