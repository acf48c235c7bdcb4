//! Primary-side end of the companion link.
//!
//! Inbound `setTime` and `addLeg` messages are turned into the same
//! [`LegOperation`](crate::controller::LegOperation)s the CLI issues and
//! applied through the [`Coordinator`]; there is no second mutation path.
//! Controller events flowing the other way are relayed as `tripStarted`,
//! `legUpdated`, `legAdvanced` and `tripEnded`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use super::link::CompanionLink;
use super::protocol::{CompanionMessage, MessageDigest};
use crate::coordinator::Coordinator;
use crate::events::LifecycleEvent;
use crate::model::TripId;
use crate::ticker::TickHandle;

/// How often the run loop checks its stop signal while idle.
const STOP_POLL: Duration = Duration::from_millis(250);

/// Health of the link as last observed by a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// The last send succeeded.
    #[default]
    Connected,
    /// The last send failed; the companion mirror may be behind.
    Stale,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Applied to the current trip; the touched leg index.
    Applied(usize),
    /// A retransmission of a message already applied.
    Duplicate,
    /// Stale, out of range, malformed, or rejected by validation.
    Dropped,
}

/// Forwards companion requests into the coordinator and relays lifecycle
/// events back out.
pub struct SyncBridge<L> {
    coordinator: Arc<Mutex<Coordinator>>,
    link: L,
    state: LinkState,
    recent: VecDeque<MessageDigest>,
    window: usize,
    mirrored: Option<TripId>,
}

impl<L> fmt::Debug for SyncBridge<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncBridge")
            .field("state", &self.state)
            .field("recent", &self.recent.len())
            .field("window", &self.window)
            .field("mirrored", &self.mirrored)
            .finish_non_exhaustive()
    }
}

impl<L: CompanionLink> SyncBridge<L> {
    /// Create a bridge that remembers the last `dedup_window` applied
    /// messages.
    #[must_use]
    pub fn new(coordinator: Arc<Mutex<Coordinator>>, link: L, dedup_window: usize) -> Self {
        Self {
            coordinator,
            link,
            state: LinkState::Connected,
            recent: VecDeque::with_capacity(dedup_window),
            window: dedup_window.max(1),
            mirrored: None,
        }
    }

    /// Current link health.
    #[must_use]
    pub fn link_state(&self) -> LinkState {
        self.state
    }

    /// The trip the companion was last sent a snapshot of.
    #[must_use]
    pub fn mirrored_trip(&self) -> Option<&TripId> {
        self.mirrored.as_ref()
    }

    /// Send the companion a snapshot of the trip under way, if any. Used
    /// when the link comes up after the trip was activated.
    pub async fn sync_current(&mut self) {
        let message = {
            let coordinator = self.coordinator.lock().await;
            let now = coordinator.timer().now().timestamp();
            coordinator
                .current_trip()
                .map(|trip| CompanionMessage::TripStarted {
                    snapshot: Box::new(trip.clone()),
                    timestamp: now,
                })
        };
        match message {
            Some(message) => self.send(&message).await,
            None => debug!("no trip under way to mirror"),
        }
    }

    /// Decode and handle one raw message from the companion.
    pub async fn handle_raw(&mut self, raw: &str) -> InboundOutcome {
        match CompanionMessage::decode(raw) {
            Ok(message) => self.handle_inbound(&message).await,
            Err(e) => {
                warn!("Dropping malformed companion message: {}", e);
                InboundOutcome::Dropped
            }
        }
    }

    /// Apply one message from the companion to the current trip and reply
    /// with the resulting leg.
    pub async fn handle_inbound(&mut self, message: &CompanionMessage) -> InboundOutcome {
        let Some(op) = message.to_operation() else {
            warn!(kind = message.kind(), "Dropping message not meant for the primary");
            return InboundOutcome::Dropped;
        };
        let digest = match message.digest() {
            Ok(digest) => digest,
            Err(e) => {
                warn!(kind = message.kind(), "Dropping undigestable message: {}", e);
                return InboundOutcome::Dropped;
            }
        };
        if self.recent.contains(&digest) {
            debug!(kind = message.kind(), "ignoring retransmitted message");
            return InboundOutcome::Duplicate;
        }

        let reply = {
            let mut coordinator = self.coordinator.lock().await;
            let Some(trip) = coordinator.current_trip() else {
                warn!(kind = message.kind(), "Dropping message: no trip under way");
                return InboundOutcome::Dropped;
            };
            let id = trip.id().clone();
            let count = trip.leg_count();
            if let Some(index) = message.leg_index() {
                if index >= count {
                    warn!(
                        kind = message.kind(),
                        index, count, "Dropping stale message: leg index out of range"
                    );
                    return InboundOutcome::Dropped;
                }
            }

            let applied = match coordinator.apply(&id, &op) {
                Ok(applied) => applied,
                Err(e) => {
                    warn!(kind = message.kind(), "Dropping rejected message: {}", e);
                    return InboundOutcome::Dropped;
                }
            };
            leg_updated(&coordinator, &id, applied.leg_index)
        };

        self.remember(digest);
        let outcome = match &reply {
            Some(CompanionMessage::LegUpdated { leg_index, .. }) => {
                InboundOutcome::Applied(*leg_index)
            }
            _ => InboundOutcome::Dropped,
        };
        if let Some(reply) = reply {
            self.send(&reply).await;
        }
        outcome
    }

    /// Relay one lifecycle event to the companion, if it concerns the
    /// current trip and the companion cares about it.
    pub async fn relay(&mut self, event: &LifecycleEvent) {
        let message = {
            let coordinator = self.coordinator.lock().await;
            let now = coordinator.timer().now().timestamp();
            let current = coordinator.current_trip().map(|t| t.id().clone());
            match event {
                LifecycleEvent::TripActivated { trip_id } if current.as_ref() == Some(trip_id) => {
                    coordinator
                        .trip(trip_id)
                        .map(|trip| CompanionMessage::TripStarted {
                            snapshot: Box::new(trip.clone()),
                            timestamp: now,
                        })
                }
                LifecycleEvent::LegCompleted { trip_id, index }
                    if current.as_ref() == Some(trip_id) =>
                {
                    leg_updated(&coordinator, trip_id, *index)
                }
                LifecycleEvent::LegActivated { trip_id, index }
                    if current.as_ref() == Some(trip_id) =>
                {
                    coordinator.trip(trip_id).and_then(|trip| {
                        trip.leg(*index).map(|leg| CompanionMessage::LegAdvanced {
                            new_index: *index,
                            total_legs: trip.leg_count(),
                            leg: leg.clone(),
                            timestamp: now,
                        })
                    })
                }
                // The coordinator has already moved on from this trip, so
                // match on the event's own snapshot.
                LifecycleEvent::TripCompleted { trip }
                    if self.mirrored.is_none() || self.mirrored.as_ref() == Some(trip.id()) =>
                {
                    Some(CompanionMessage::TripEnded {
                        snapshot: trip.clone(),
                        timestamp: now,
                    })
                }
                _ => None,
            }
        };

        if let Some(message) = message {
            self.send(&message).await;
        }
    }

    /// Serve the link until `handle` is stopped or both inputs close.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<String>,
        mut events: broadcast::Receiver<LifecycleEvent>,
        handle: TickHandle,
    ) {
        info!("Companion bridge started");
        let mut stop_poll = tokio::time::interval(STOP_POLL);
        let mut inbound_open = true;

        loop {
            if handle.should_stop() {
                break;
            }
            tokio::select! {
                raw = inbound.recv(), if inbound_open => match raw {
                    Some(raw) => {
                        self.handle_raw(&raw).await;
                    }
                    None => {
                        debug!("companion inbound channel closed");
                        inbound_open = false;
                    }
                },
                event = events.recv() => match event {
                    Ok(event) => self.relay(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Companion bridge missed {} lifecycle events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = stop_poll.tick() => {}
            }
        }
        info!("Companion bridge stopped");
    }

    async fn send(&mut self, message: &CompanionMessage) {
        match message {
            CompanionMessage::TripStarted { snapshot, .. } => {
                self.mirrored = Some(snapshot.id().clone());
            }
            CompanionMessage::TripEnded { .. } => self.mirrored = None,
            _ => {}
        }
        match self.link.send(message).await {
            Ok(()) => {
                if self.state == LinkState::Stale {
                    info!("Companion link restored");
                }
                self.state = LinkState::Connected;
                debug!(kind = message.kind(), "sent companion message");
            }
            Err(e) => {
                if self.state == LinkState::Connected {
                    warn!(kind = message.kind(), "Companion link is stale: {}", e);
                }
                self.state = LinkState::Stale;
            }
        }
    }

    fn remember(&mut self, digest: MessageDigest) {
        if self.recent.len() >= self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(digest);
    }
}

fn leg_updated(coordinator: &Coordinator, id: &TripId, index: usize) -> Option<CompanionMessage> {
    let trip = coordinator.trip(id)?;
    let leg = trip.leg(index)?;
    Some(CompanionMessage::LegUpdated {
        leg_index: index,
        leg: leg.clone(),
        total_legs: trip.leg_count(),
    })
}
