//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};

use crate::model::{LegKind, TimeField};

/// Trip management commands.
#[derive(Debug, Subcommand)]
pub enum TripCommand {
    /// Create a trip
    New {
        /// Trip date (YYYY-MM-DD, defaults to today in UTC)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Put the trip under way immediately and start the duty timer
        #[arg(short, long)]
        start: bool,
    },

    /// Put a scheduled trip under way
    Start {
        /// Trip id
        id: String,
    },

    /// Complete a trip and capture its duty time
    Complete {
        /// Trip id
        id: String,
    },

    /// Show one trip with its legs
    Show {
        /// Trip id
        id: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List all trips
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Enter duty time by hand (RFC 3339 timestamps)
    Override {
        /// Trip id
        id: String,

        /// Duty start, e.g. 2026-10-03T06:00:00Z
        start: DateTime<Utc>,

        /// Duty end
        end: DateTime<Utc>,
    },
}

/// Leg editing commands.
#[derive(Debug, Subcommand)]
pub enum LegCommand {
    /// Append a leg after the last one
    Add {
        /// Trip id
        trip: String,

        /// Departure airport (defaults to the previous leg's arrival)
        #[arg(short, long)]
        from: Option<String>,

        /// Arrival airport, if already known
        #[arg(short, long)]
        to: Option<String>,

        /// Roster source id for imported legs
        #[arg(long)]
        roster: Option<String>,
    },

    /// Insert a ground-ops leg at an index
    Insert {
        /// Trip id
        trip: String,

        /// Flat leg index to insert at
        index: usize,

        /// Airport for both ends of the leg
        airport: String,
    },

    /// Set or correct a leg's arrival airport ("" to clear)
    Arrive {
        /// Trip id
        trip: String,

        /// Flat leg index
        index: usize,

        /// Arrival airport
        airport: String,
    },

    /// Write one time field (HHMM, or "" to clear)
    Time {
        /// Trip id
        trip: String,

        /// Flat leg index
        index: usize,

        /// OUT, OFF, ON, IN, DEADHEAD_OUT or DEADHEAD_IN
        field: TimeField,

        /// Time value
        value: String,
    },

    /// Change a leg's kind
    Type {
        /// Trip id
        trip: String,

        /// Flat leg index
        index: usize,

        /// normal, ground_ops or deadhead
        kind: LegKind,
    },
}

/// Duty timer commands.
#[derive(Debug, Subcommand)]
pub enum DutyCommand {
    /// Show the running duty session
    Status {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Keep ticking the duty timer and print threshold warnings
    Watch,
}

/// Companion link commands.
#[derive(Debug, Subcommand)]
pub enum CompanionCommand {
    /// Serve the companion protocol as JSON lines on stdin and stdout
    Serve,
}

/// Compliance report arguments.
#[derive(Debug, Args)]
pub struct ReportCommand {
    /// Last day of every rolling window (defaults to today in UTC)
    #[arg(long)]
    pub as_of: Option<NaiveDate>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        file: Option<PathBuf>,
    },
}
