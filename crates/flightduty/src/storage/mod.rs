//! Storage layer for flightduty.
//!
//! Two small traits sit at the persistence seam: [`TripStore`] for trips and
//! [`KeyValueStore`] for the duty timer's session state. [`Storage`] backs
//! both with `SQLite`; [`MemoryStore`] backs both in memory for tests.

pub mod memory;
pub mod migrations;
pub mod schema;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{LegGroup, Trip, TripId, TripStatus};

pub use memory::MemoryStore;

/// Date format used for the `trips.date` column.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Persistence for whole trips.
pub trait TripStore: Send + Sync + fmt::Debug {
    /// Insert or replace a trip.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn save_trip(&self, trip: &Trip) -> Result<()>;

    /// Load one trip.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn load_trip(&self, id: &TripId) -> Result<Option<Trip>>;

    /// Load every trip, oldest date first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn list_trips(&self) -> Result<Vec<Trip>>;

    /// Trips dated within `[since, until]`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn trips_between(&self, since: NaiveDate, until: NaiveDate) -> Result<Vec<Trip>> {
        Ok(self
            .list_trips()?
            .into_iter()
            .filter(|t| t.date() >= since && t.date() <= until)
            .collect())
    }
}

/// A minimal string key-value store.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn remove(&self, key: &str) -> Result<()>;
}

/// `SQLite`-backed trip and key-value storage.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening trip database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Trip database opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("storage connection lock poisoned"))
    }

    /// Count stored trips.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM trips", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_trips = self.count()?;

        let (oldest, newest): (Option<String>, Option<String>) = self.conn()?.query_row(
            "SELECT MIN(date), MAX(date) FROM trips",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let parse = |s: Option<String>| {
            s.and_then(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT).ok())
        };

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_trips,
            oldest_trip: parse(oldest),
            newest_trip: parse(newest),
            db_size_bytes,
        })
    }

    fn row_to_trip(row: &rusqlite::Row) -> rusqlite::Result<Trip> {
        let id: String = row.get(0)?;
        let date_str: String = row.get(1)?;
        let status_str: String = row.get(2)?;
        let duty_start: Option<String> = row.get(3)?;
        let duty_end: Option<String> = row.get(4)?;
        let duty_minutes: Option<i64> = row.get(5)?;
        let manual_override: bool = row.get(6)?;
        let legs_json: String = row.get(7)?;

        let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
        let groups: Vec<LegGroup> = serde_json::from_str(&legs_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

        let status = TripStatus::parse(&status_str).unwrap_or_else(|| {
            warn!(
                "Unknown trip status: {}, defaulting to scheduled",
                status_str
            );
            TripStatus::Scheduled
        });

        Ok(Trip::from_parts(
            TripId::from(id),
            date,
            status,
            groups,
            parse_timestamp(duty_start),
            parse_timestamp(duty_end),
            duty_minutes,
            manual_override,
        ))
    }
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl TripStore for Storage {
    fn save_trip(&self, trip: &Trip) -> Result<()> {
        let legs = serde_json::to_string(trip.groups())?;
        self.conn()?.execute(
            r"
            INSERT INTO trips
                (id, date, status, duty_start, duty_end, duty_minutes, manual_override, legs, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                date = excluded.date,
                status = excluded.status,
                duty_start = excluded.duty_start,
                duty_end = excluded.duty_end,
                duty_minutes = excluded.duty_minutes,
                manual_override = excluded.manual_override,
                legs = excluded.legs,
                updated_at = excluded.updated_at
            ",
            params![
                trip.id().as_str(),
                trip.date().format(DATE_FORMAT).to_string(),
                trip.status().as_str(),
                trip.duty_start().map(|t| t.to_rfc3339()),
                trip.duty_end().map(|t| t.to_rfc3339()),
                trip.duty_minutes(),
                trip.manual_override(),
                legs,
            ],
        )?;
        debug!("Saved trip {}", trip.id());
        Ok(())
    }

    fn load_trip(&self, id: &TripId) -> Result<Option<Trip>> {
        let trip = self
            .conn()?
            .query_row(
                r"
                SELECT id, date, status, duty_start, duty_end, duty_minutes, manual_override, legs
                FROM trips WHERE id = ?1
                ",
                [id.as_str()],
                Self::row_to_trip,
            )
            .optional()?;
        Ok(trip)
    }

    fn list_trips(&self) -> Result<Vec<Trip>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r"
            SELECT id, date, status, duty_start, duty_end, duty_minutes, manual_override, legs
            FROM trips ORDER BY date ASC, id ASC
            ",
        )?;
        let trips = stmt
            .query_map([], Self::row_to_trip)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(trips)
    }

    fn trips_between(&self, since: NaiveDate, until: NaiveDate) -> Result<Vec<Trip>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r"
            SELECT id, date, status, duty_start, duty_end, duty_minutes, manual_override, legs
            FROM trips WHERE date >= ?1 AND date <= ?2
            ORDER BY date ASC, id ASC
            ",
        )?;
        let trips = stmt
            .query_map(
                params![
                    since.format(DATE_FORMAT).to_string(),
                    until.format(DATE_FORMAT).to_string()
                ],
                Self::row_to_trip,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(trips)
    }
}

impl KeyValueStore for Storage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            (key, value),
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM metadata WHERE key = ?1", [key])?;
        Ok(())
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total number of trips stored.
    pub total_trips: i64,
    /// Date of the oldest trip.
    pub oldest_trip: Option<NaiveDate>,
    /// Date of the newest trip.
    pub newest_trip: Option<NaiveDate>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{LegController, LegOperation};
    use crate::model::{LegKind, TimeField};
    use chrono::Duration;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, day).unwrap()
    }

    fn trip_with_legs(day: u32) -> Trip {
        let ctl = LegController::new();
        let mut trip = Trip::new(date(day));
        ctl.activate_trip(&mut trip).unwrap();
        ctl.apply(&mut trip, &LegOperation::append(Some("KSEA"))).unwrap();
        ctl.apply(&mut trip, &LegOperation::set_time(0, TimeField::Out, "0715"))
            .unwrap();
        ctl.apply(&mut trip, &LegOperation::append(None)).unwrap();
        ctl.apply(
            &mut trip,
            &LegOperation::ToggleType {
                index: 1,
                kind: LegKind::Deadhead,
            },
        )
        .unwrap();
        trip
    }

    #[test]
    fn test_open_in_memory() {
        assert!(Storage::open_in_memory().is_ok());
    }

    #[test]
    fn test_save_and_load_trip() {
        let storage = create_test_storage();
        let trip = trip_with_legs(3);
        storage.save_trip(&trip).unwrap();

        let loaded = storage.load_trip(trip.id()).unwrap().unwrap();
        assert_eq!(loaded, trip);
        assert_eq!(loaded.leg(0).unwrap().time_str(TimeField::Out), "0715");
        assert_eq!(loaded.leg(1).unwrap().kind(), LegKind::Deadhead);
    }

    #[test]
    fn test_save_trip_replaces_existing() {
        let storage = create_test_storage();
        let mut trip = trip_with_legs(3);
        storage.save_trip(&trip).unwrap();

        LegController::new()
            .apply(&mut trip, &LegOperation::append(None))
            .unwrap();
        storage.save_trip(&trip).unwrap();

        assert_eq!(storage.count().unwrap(), 1);
        let loaded = storage.load_trip(trip.id()).unwrap().unwrap();
        assert_eq!(loaded.leg_count(), 3);
    }

    #[test]
    fn test_duty_fields_round_trip() {
        let storage = create_test_storage();
        let mut trip = trip_with_legs(3);
        let start = DateTime::parse_from_rfc3339("2026-04-03T06:15:00Z")
            .unwrap()
            .with_timezone(&Utc);
        trip.capture_duty(
            crate::model::DutySpan {
                start,
                end: start + Duration::minutes(545),
            },
            true,
        )
        .unwrap();
        storage.save_trip(&trip).unwrap();

        let loaded = storage.load_trip(trip.id()).unwrap().unwrap();
        assert_eq!(loaded.duty_start(), Some(start));
        assert_eq!(loaded.duty_minutes(), Some(545));
        assert!(loaded.manual_override());
    }

    #[test]
    fn test_load_missing_trip() {
        let storage = create_test_storage();
        assert!(storage.load_trip(&TripId::from("nope")).unwrap().is_none());
    }

    #[test]
    fn test_list_trips_ordered_by_date() {
        let storage = create_test_storage();
        for day in [9, 2, 5] {
            storage.save_trip(&Trip::new(date(day))).unwrap();
        }
        let dates: Vec<NaiveDate> = storage
            .list_trips()
            .unwrap()
            .iter()
            .map(Trip::date)
            .collect();
        assert_eq!(dates, vec![date(2), date(5), date(9)]);
    }

    #[test]
    fn test_trips_between_inclusive() {
        let storage = create_test_storage();
        for day in 1..=10 {
            storage.save_trip(&Trip::new(date(day))).unwrap();
        }
        let trips = storage.trips_between(date(3), date(6)).unwrap();
        assert_eq!(trips.len(), 4);
        assert_eq!(trips[0].date(), date(3));
        assert_eq!(trips[3].date(), date(6));
    }

    #[test]
    fn test_key_value_round_trip() {
        let storage = create_test_storage();
        assert_eq!(storage.get("k").unwrap(), None);
        storage.put("k", "one").unwrap();
        storage.put("k", "two").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("two"));
        storage.remove("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
        storage.remove("k").unwrap();
    }

    #[test]
    fn test_stats() {
        let storage = create_test_storage();
        let empty = storage.stats().unwrap();
        assert_eq!(empty.total_trips, 0);
        assert!(empty.oldest_trip.is_none());

        storage.save_trip(&Trip::new(date(4))).unwrap();
        storage.save_trip(&Trip::new(date(8))).unwrap();
        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_trips, 2);
        assert_eq!(stats.oldest_trip, Some(date(4)));
        assert_eq!(stats.newest_trip, Some(date(8)));
    }

    #[test]
    fn test_open_file_based() {
        let db_path =
            std::env::temp_dir().join(format!("flightduty_test_{}.db", std::process::id()));

        let storage = Storage::open(&db_path).unwrap();
        let trip = Trip::new(date(1));
        storage.save_trip(&trip).unwrap();
        drop(storage);

        let reopened = Storage::open(&db_path).unwrap();
        assert!(reopened.load_trip(trip.id()).unwrap().is_some());
        assert_eq!(reopened.path(), db_path);

        drop(reopened);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let root = std::env::temp_dir().join(format!("flightduty_nested_{}", std::process::id()));
        let nested_path = root.join("deeper/trips.db");
        let _ = std::fs::remove_dir_all(&root);

        let storage = Storage::open(&nested_path).unwrap();
        assert!(nested_path.exists());

        drop(storage);
        let _ = std::fs::remove_dir_all(&root);
    }
}
