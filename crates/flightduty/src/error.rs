//! Error types for flightduty.
//!
//! Validation errors are returned synchronously to whoever issued the
//! mutation. Structural problems inside a trip are self-healed by the
//! controller and never show up here.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for flightduty operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Validation Errors ===
    /// A leg time was not a 3 or 4 digit 24-hour clock value.
    #[error("invalid time '{value}': expected HHMM")]
    InvalidTime {
        /// The rejected input.
        value: String,
    },

    /// An airport code was not 3 or 4 alphanumeric characters.
    #[error("invalid airport code '{code}'")]
    InvalidAirport {
        /// The rejected input.
        code: String,
    },

    /// A leg type or time field name was not recognized.
    #[error("unknown {what} '{value}'")]
    UnknownName {
        /// What kind of name was expected.
        what: &'static str,
        /// The rejected input.
        value: String,
    },

    /// A manually entered duty span ends before it starts.
    #[error("invalid duty span: end {end} is not after start {start}")]
    InvalidDutySpan {
        /// The entered start.
        start: String,
        /// The entered end.
        end: String,
    },

    /// A leg index was outside the trip.
    #[error("leg index {index} out of range (trip has {count} legs)")]
    LegIndexOutOfRange {
        /// The requested index.
        index: usize,
        /// Number of legs in the trip.
        count: usize,
    },

    /// A time field does not belong to the leg's type.
    #[error("field {field} does not apply to {kind} legs")]
    FieldNotApplicable {
        /// The field that was written.
        field: String,
        /// The leg type.
        kind: String,
    },

    /// A completed leg cannot change kind.
    #[error("leg {index} is completed and cannot change type")]
    LegAlreadyCompleted {
        /// The leg's flat index.
        index: usize,
    },

    // === Lifecycle Errors ===
    /// No trip with the given id.
    #[error("trip not found: {id}")]
    TripNotFound {
        /// The requested trip id.
        id: String,
    },

    /// The trip is completed and no longer accepts mutations.
    #[error("trip {id} is completed")]
    TripClosed {
        /// The trip id.
        id: String,
    },

    /// Duty minutes were already captured for the trip.
    #[error("duty time already captured for trip {id}")]
    DutyAlreadyCaptured {
        /// The trip id.
        id: String,
    },

    // === Transport Errors ===
    /// The companion link failed to deliver a message.
    #[error("companion link error: {0}")]
    Link(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for flightduty operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a new companion link error.
    #[must_use]
    pub fn link(message: impl Into<String>) -> Self {
        Self::Link(message.into())
    }

    /// Create an unknown-name error.
    #[must_use]
    pub fn unknown_name(what: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownName {
            what,
            value: value.into(),
        }
    }

    /// Create a trip-not-found error.
    #[must_use]
    pub fn trip_not_found(id: impl ToString) -> Self {
        Self::TripNotFound { id: id.to_string() }
    }

    /// Create a trip-closed error.
    #[must_use]
    pub fn trip_closed(id: impl ToString) -> Self {
        Self::TripClosed { id: id.to_string() }
    }

    /// Check if this error is a caller-visible validation failure.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTime { .. }
                | Self::InvalidAirport { .. }
                | Self::UnknownName { .. }
                | Self::InvalidDutySpan { .. }
                | Self::LegIndexOutOfRange { .. }
                | Self::FieldNotApplicable { .. }
                | Self::LegAlreadyCompleted { .. }
        )
    }

    /// Check if this error came from the companion transport.
    #[must_use]
    pub fn is_link_error(&self) -> bool {
        matches!(self, Self::Link(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_time_display() {
        let err = Error::InvalidTime {
            value: "2561".to_string(),
        };
        assert_eq!(err.to_string(), "invalid time '2561': expected HHMM");
    }

    #[test]
    fn test_index_out_of_range_display() {
        let err = Error::LegIndexOutOfRange { index: 5, count: 2 };
        let msg = err.to_string();
        assert!(msg.contains('5'));
        assert!(msg.contains("2 legs"));
    }

    #[test]
    fn test_is_validation() {
        assert!(Error::InvalidAirport {
            code: "X".to_string()
        }
        .is_validation());
        assert!(Error::FieldNotApplicable {
            field: "OFF".to_string(),
            kind: "ground_ops".to_string()
        }
        .is_validation());
        assert!(Error::unknown_name("time field", "LUNCH").is_validation());
        assert!(Error::LegAlreadyCompleted { index: 0 }.is_validation());
        assert!(!Error::trip_not_found("abc").is_validation());
        assert!(!Error::internal("boom").is_validation());
    }

    #[test]
    fn test_is_link_error() {
        assert!(Error::link("closed").is_link_error());
        assert!(!Error::trip_closed("abc").is_link_error());
    }

    #[test]
    fn test_trip_closed_display() {
        let err = Error::trip_closed("t-1");
        assert_eq!(err.to_string(), "trip t-1 is completed");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_database_migration_error_display() {
        let err = Error::DatabaseMigration {
            message: "version mismatch".to_string(),
        };
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
