//! `flightduty` - Pilot duty-time tracking
//!
//! This library records trips as ordered legs, drives each leg through its
//! `standby -> active -> completed` lifecycle, runs a restart-safe duty timer
//! with 14h/15h/15.5h/16h warnings, aggregates rolling duty and flight time,
//! and keeps a companion device's mirror of the current trip in sync.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod compliance;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod storage;
pub mod sync;
pub mod ticker;
pub mod timer;

pub use compliance::ComplianceReport;
pub use config::Config;
pub use controller::{LegController, LegOperation};
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use events::{DutyThreshold, LifecycleEvent};
pub use logging::init_logging;
pub use model::{Leg, LegKind, LegStatus, TimeField, Trip, TripId, TripStatus};
pub use storage::{Storage, StorageStats};
pub use timer::DutyTimer;
