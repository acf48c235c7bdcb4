//! Command-line interface for flightduty.
//!
//! This module provides the CLI structure for the `fduty` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CompanionCommand, ConfigCommand, DutyCommand, LegCommand, ReportCommand, TripCommand,
};

/// fduty - Track trips, legs and duty time
///
/// Records the legs flown on each trip, runs the duty timer with its 14h,
/// 15h, 15.5h and 16h warnings, and reports rolling duty and flight totals.
#[derive(Debug, Parser)]
#[command(name = "fduty")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create, start, complete and inspect trips
    #[command(subcommand)]
    Trip(TripCommand),

    /// Add and edit legs
    #[command(subcommand)]
    Leg(LegCommand),

    /// Inspect or watch the duty timer
    #[command(subcommand)]
    Duty(DutyCommand),

    /// Rolling duty and flight time totals
    Report(ReportCommand),

    /// Mirror the current trip to a companion device
    #[command(subcommand)]
    Companion(CompanionCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.quiet, self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Verbosity;
    use crate::model::{LegKind, TimeField};
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "fduty");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(parse(&["fduty", "-q", "trip", "list"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["fduty", "trip", "list"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["fduty", "-v", "trip", "list"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["fduty", "-vv", "trip", "list"]).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_trip_new() {
        let cli = parse(&["fduty", "trip", "new", "--date", "2026-10-03", "--start"]);
        match cli.command {
            Command::Trip(TripCommand::New { date, start }) => {
                assert_eq!(date.map(|d| d.to_string()).as_deref(), Some("2026-10-03"));
                assert!(start);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_leg_time() {
        let cli = parse(&["fduty", "leg", "time", "abc123", "1", "off", "0815"]);
        match cli.command {
            Command::Leg(LegCommand::Time {
                trip,
                index,
                field,
                value,
            }) => {
                assert_eq!(trip, "abc123");
                assert_eq!(index, 1);
                assert_eq!(field, TimeField::Off);
                assert_eq!(value, "0815");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_leg_add_with_route() {
        let cli = parse(&["fduty", "leg", "add", "abc123", "--from", "KSEA", "--to", "KPDX"]);
        match cli.command {
            Command::Leg(LegCommand::Add { from, to, roster, .. }) => {
                assert_eq!(from.as_deref(), Some("KSEA"));
                assert_eq!(to.as_deref(), Some("KPDX"));
                assert!(roster.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_leg_arrive() {
        let cli = parse(&["fduty", "leg", "arrive", "abc123", "1", "kboi"]);
        assert!(matches!(
            cli.command,
            Command::Leg(LegCommand::Arrive { index: 1, ref airport, .. }) if airport == "kboi"
        ));
    }

    #[test]
    fn test_parse_companion_serve() {
        let cli = parse(&["fduty", "companion", "serve"]);
        assert!(matches!(cli.command, Command::Companion(CompanionCommand::Serve)));
    }

    #[test]
    fn test_parse_leg_time_accepts_empty_value() {
        let cli = parse(&["fduty", "leg", "time", "abc123", "0", "IN", ""]);
        assert!(matches!(
            cli.command,
            Command::Leg(LegCommand::Time { ref value, .. }) if value.is_empty()
        ));
    }

    #[test]
    fn test_parse_leg_type() {
        let cli = parse(&["fduty", "leg", "type", "abc123", "2", "deadhead"]);
        assert!(matches!(
            cli.command,
            Command::Leg(LegCommand::Type {
                index: 2,
                kind: LegKind::Deadhead,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_field() {
        let args = ["fduty", "leg", "time", "abc123", "0", "LUNCH", "1200"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_parse_trip_override() {
        let cli = parse(&[
            "fduty",
            "trip",
            "override",
            "abc123",
            "2026-10-03T06:00:00Z",
            "2026-10-03T17:30:00Z",
        ]);
        match cli.command {
            Command::Trip(TripCommand::Override { start, end, .. }) => {
                assert_eq!((end - start).num_minutes(), 11 * 60 + 30);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_report_as_of() {
        let cli = parse(&["fduty", "report", "--as-of", "2026-10-10", "--json"]);
        match cli.command {
            Command::Report(report) => {
                assert!(report.json);
                assert!(report.as_of.is_some());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_with_config() {
        let cli = parse(&["fduty", "-c", "/custom/config.toml", "duty", "status"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
        assert!(matches!(
            cli.command,
            Command::Duty(DutyCommand::Status { json: false })
        ));
    }

    #[test]
    fn test_parse_config_path() {
        let cli = parse(&["fduty", "config", "path"]);
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Path)));
    }
}
