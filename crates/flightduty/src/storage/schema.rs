//! `SQLite` schema definitions for flightduty.

/// SQL statement to create the trips table.
///
/// Legs are stored as a JSON array of leg groups; the trip is always read
/// and written as a whole.
pub const CREATE_TRIPS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS trips (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    status TEXT NOT NULL,
    duty_start TEXT,
    duty_end TEXT,
    duty_minutes INTEGER,
    manual_override INTEGER NOT NULL DEFAULT 0,
    legs TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create an index on date for rolling-window queries.
pub const CREATE_DATE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_trips_date ON trips(date)
";

/// SQL statement to create an index on status for finding the active trip.
pub const CREATE_STATUS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_trips_status ON trips(status)
";

/// SQL statement to create the metadata table for storing key-value pairs.
///
/// Holds the schema version and the persisted duty timer state.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_TRIPS_TABLE,
    CREATE_DATE_INDEX,
    CREATE_STATUS_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.is_empty());
        }
    }

    #[test]
    fn test_trips_table_columns() {
        assert!(CREATE_TRIPS_TABLE.contains("id TEXT PRIMARY KEY"));
        assert!(CREATE_TRIPS_TABLE.contains("date TEXT NOT NULL"));
        assert!(CREATE_TRIPS_TABLE.contains("duty_minutes INTEGER"));
        assert!(CREATE_TRIPS_TABLE.contains("legs TEXT NOT NULL"));
    }
}
