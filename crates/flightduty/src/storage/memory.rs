//! In-memory store for tests and for embedders that keep no database.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::model::{Trip, TripId};

use super::{KeyValueStore, TripStore};

/// A [`TripStore`] and [`KeyValueStore`] held entirely in memory.
///
/// Writes can be made to fail on demand to exercise retry paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    trips: Mutex<BTreeMap<TripId, Trip>>,
    values: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(Error::Io(std::io::Error::other("writes disabled")))
        } else {
            Ok(())
        }
    }

    fn trips(&self) -> MutexGuard<'_, BTreeMap<TripId, Trip>> {
        self.trips.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TripStore for MemoryStore {
    fn save_trip(&self, trip: &Trip) -> Result<()> {
        self.check_writable()?;
        self.trips().insert(trip.id().clone(), trip.clone());
        Ok(())
    }

    fn load_trip(&self, id: &TripId) -> Result<Option<Trip>> {
        Ok(self.trips().get(id).cloned())
    }

    fn list_trips(&self) -> Result<Vec<Trip>> {
        let mut trips: Vec<Trip> = self.trips().values().cloned().collect();
        trips.sort_by(|a, b| a.date().cmp(&b.date()).then_with(|| a.id().cmp(b.id())));
        Ok(trips)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.values().remove(key);
        Ok(())
    }
}
