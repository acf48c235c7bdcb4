//! Periodic duty tick.
//!
//! The tick only recomputes elapsed time and raises threshold events; the
//! coordinator lock serializes it with every other mutation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::coordinator::Coordinator;

/// A cloneable stop signal for background tasks.
#[derive(Debug, Clone, Default)]
pub struct TickHandle {
    stop_signal: Arc<AtomicBool>,
}

impl TickHandle {
    /// Create a new handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the task to stop.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Reset the stop signal.
    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }
}

/// Tick the coordinator every `interval` until `handle` is stopped.
#[must_use]
pub fn spawn_duty_ticker(
    coordinator: Arc<Mutex<Coordinator>>,
    interval: Duration,
    handle: TickHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Duty ticker started ({}s interval)", interval.as_secs_f64());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if handle.should_stop() {
                break;
            }
            let crossed = coordinator.lock().await.tick();
            if !crossed.is_empty() {
                debug!("Tick raised {} thresholds", crossed.len());
            }
        }
        info!("Duty ticker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::{DutyThreshold, LifecycleEvent};
    use crate::storage::MemoryStore;
    use crate::timer::{DutyTimer, ManualClock};
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn test_handle_stop_and_reset() {
        let handle = TickHandle::new();
        let clone = handle.clone();
        assert!(!handle.should_stop());

        clone.stop();
        assert!(handle.should_stop());

        handle.reset();
        assert!(!clone.should_stop());
    }

    #[tokio::test]
    async fn test_ticker_raises_thresholds() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 1, 4, 0, 0).unwrap());
        let timer = DutyTimer::restore(Arc::new(clock.clone()), store.clone());
        let mut coordinator = Coordinator::new(store, timer, &Config::default()).unwrap();
        coordinator
            .create_trip(NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(), true)
            .unwrap();
        let mut rx = coordinator.subscribe();
        let coordinator = Arc::new(Mutex::new(coordinator));

        clock.advance(chrono::Duration::hours(15) + chrono::Duration::minutes(45));
        let handle = TickHandle::new();
        let task = spawn_duty_ticker(
            coordinator.clone(),
            Duration::from_millis(10),
            handle.clone(),
        );

        let mut crossed = Vec::new();
        while crossed.len() < 3 {
            if let LifecycleEvent::ThresholdCrossed { threshold } = rx.recv().await.unwrap() {
                crossed.push(threshold);
            }
        }
        handle.stop();
        task.await.unwrap();

        assert_eq!(
            crossed,
            vec![
                DutyThreshold::FourteenHours,
                DutyThreshold::FifteenHours,
                DutyThreshold::FifteenAndHalfHours
            ]
        );
        assert!(coordinator.lock().await.tick().is_empty());
    }
}
