//! `fduty` - CLI for flightduty
//!
//! This binary provides the command-line interface for recording trips and
//! legs, watching the duty timer, and reporting rolling totals.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};

use flightduty::cli::{
    Cli, Command, CompanionCommand, ConfigCommand, DutyCommand, LegCommand, ReportCommand,
    TripCommand,
};
use flightduty::compliance::hours;
use flightduty::controller::LegOperation;
use flightduty::events::LifecycleEvent;
use flightduty::model::{Trip, TripId};
use flightduty::storage::{KeyValueStore, TripStore};
use flightduty::sync::{ChannelLink, SyncBridge};
use flightduty::ticker::{spawn_duty_ticker, TickHandle};
use flightduty::timer::{DutyTimer, SystemClock};
use flightduty::{init_logging, Config, Coordinator, Storage};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
        Command::Trip(trip_cmd) => handle_trip(&config, trip_cmd),
        Command::Leg(leg_cmd) => handle_leg(&config, leg_cmd),
        Command::Duty(DutyCommand::Status { json }) => handle_duty_status(&config, json),
        Command::Duty(DutyCommand::Watch) => handle_duty_watch(&config),
        Command::Report(report_cmd) => handle_report(&config, &report_cmd),
        Command::Companion(CompanionCommand::Serve) => handle_companion_serve(&config),
    }
}

fn open_storage(config: &Config) -> Result<Arc<Storage>> {
    let path = config.database_path();
    let storage =
        Storage::open(&path).with_context(|| format!("opening database {}", path.display()))?;
    Ok(Arc::new(storage))
}

/// Build a coordinator over the database, restoring any running duty session.
fn coordinator_over(storage: &Arc<Storage>, config: &Config) -> Result<Coordinator> {
    let kv: Arc<dyn KeyValueStore> = storage.clone();
    let trips: Arc<dyn TripStore> = storage.clone();
    let timer = DutyTimer::restore(Arc::new(SystemClock), kv);
    Ok(Coordinator::new(trips, timer, config)?)
}

fn open_coordinator(config: &Config) -> Result<Coordinator> {
    coordinator_over(&open_storage(config)?, config)
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn format_instant(config: &Config, instant: DateTime<Utc>) -> String {
    if config.display.utc {
        instant.format("%Y-%m-%d %H:%MZ").to_string()
    } else {
        instant
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M %Z")
            .to_string()
    }
}

fn format_minutes(minutes: i64) -> String {
    format!("{}:{:02}", minutes / 60, minutes % 60)
}

fn handle_trip(config: &Config, cmd: TripCommand) -> Result<()> {
    let mut coordinator = open_coordinator(config)?;

    match cmd {
        TripCommand::New { date, start } => {
            let id = coordinator.create_trip(date.unwrap_or_else(today), start)?;
            println!("{id}");
        }
        TripCommand::Start { id } => {
            coordinator.activate_trip(&TripId::from(id.as_str()))?;
            println!("Trip {id} started; duty timer running.");
        }
        TripCommand::Complete { id } => {
            let trip = coordinator.complete_trip(&TripId::from(id.as_str()))?;
            match trip.duty_minutes() {
                Some(minutes) => {
                    println!("Trip {id} completed. Duty: {}", format_minutes(minutes));
                }
                None => println!("Trip {id} completed. No duty time captured."),
            }
        }
        TripCommand::Show { id, json } => {
            let trip = coordinator
                .trip(&TripId::from(id.as_str()))
                .with_context(|| format!("trip not found: {id}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(trip)?);
            } else {
                print_trip(config, trip);
            }
        }
        TripCommand::List { json } => {
            let trips = coordinator.trips();
            if json {
                println!("{}", serde_json::to_string_pretty(&trips)?);
            } else if trips.is_empty() {
                println!("No trips recorded.");
            } else {
                println!("{:<14} {:<10} {:<10} {:>5} {:>8}", "ID", "DATE", "STATUS", "LEGS", "DUTY");
                for trip in trips {
                    let duty = trip
                        .duty_minutes()
                        .map_or_else(|| "-".to_string(), format_minutes);
                    println!(
                        "{:<14} {:<10} {:<10} {:>5} {:>8}",
                        trip.id().as_str(),
                        trip.date(),
                        trip.status().as_str(),
                        trip.leg_count(),
                        duty
                    );
                }
            }
        }
        TripCommand::Override { id, start, end } => {
            coordinator.override_duty(&TripId::from(id.as_str()), start, end)?;
            println!(
                "Duty for trip {id} set to {}.",
                format_minutes((end - start).num_minutes())
            );
        }
    }

    warn_pending(&coordinator);
    Ok(())
}

fn print_trip(config: &Config, trip: &Trip) {
    println!("Trip {} ({})", trip.id(), trip.date());
    println!("  Status:  {}", trip.status());
    if let (Some(start), Some(end)) = (trip.duty_start(), trip.duty_end()) {
        println!(
            "  Duty:    {} to {}{}",
            format_instant(config, start),
            format_instant(config, end),
            if trip.manual_override() { " (manual)" } else { "" }
        );
    }
    if let Some(minutes) = trip.duty_minutes() {
        println!("  Minutes: {minutes}");
    }
    println!();

    let mut index = 0;
    for (number, group) in trip.groups().iter().enumerate() {
        println!("  Group {}", number + 1);
        for leg in group.legs() {
            let times: Vec<String> = leg
                .kind()
                .fields()
                .iter()
                .map(|field| format!("{}={}", field, display_time(&leg.time_str(*field))))
                .collect();
            println!(
                "    [{index}] {:>4} -> {:<4} {:<10} {:<9} {}",
                leg.departure(),
                leg.arrival(),
                leg.kind(),
                leg.status(),
                times.join(" ")
            );
            index += 1;
        }
    }
    if index == 0 {
        println!("  (no legs)");
    }
}

fn display_time(value: &str) -> &str {
    if value.is_empty() {
        "----"
    } else {
        value
    }
}

fn handle_leg(config: &Config, cmd: LegCommand) -> Result<()> {
    let mut coordinator = open_coordinator(config)?;

    let (trip, op) = match cmd {
        LegCommand::Add {
            trip,
            from,
            to,
            roster,
        } => (
            trip,
            LegOperation::AppendLeg {
                departure: from,
                arrival: to,
                roster_source_id: roster,
            },
        ),
        LegCommand::Insert {
            trip,
            index,
            airport,
        } => (trip, LegOperation::InsertLeg { index, airport }),
        LegCommand::Arrive {
            trip,
            index,
            airport,
        } => (trip, LegOperation::SetArrival { index, airport }),
        LegCommand::Time {
            trip,
            index,
            field,
            value,
        } => (trip, LegOperation::set_time(index, field, value)),
        LegCommand::Type { trip, index, kind } => {
            (trip, LegOperation::ToggleType { index, kind })
        }
    };

    let id = TripId::from(trip.as_str());
    let applied = coordinator.apply(&id, &op)?;
    if let Some(leg) = coordinator.trip(&id).and_then(|t| t.leg(applied.leg_index)) {
        println!(
            "[{}] {} -> {} {} {}",
            applied.leg_index,
            leg.departure(),
            leg.arrival(),
            leg.kind(),
            leg.status()
        );
    }
    for event in &applied.events {
        match event {
            LifecycleEvent::LegCompleted { index, .. } => println!("Leg {index} completed."),
            LifecycleEvent::LegActivated { index, .. } => println!("Leg {index} is now active."),
            LifecycleEvent::TripActivated { .. } => println!("Trip started; duty timer running."),
            _ => {}
        }
    }

    warn_pending(&coordinator);
    Ok(())
}

fn handle_duty_status(config: &Config, json: bool) -> Result<()> {
    let storage = open_storage(config)?;
    let stats = storage.stats()?;
    let mut coordinator = coordinator_over(&storage, config)?;
    let crossed = coordinator.tick();
    let timer = coordinator.timer();

    if json {
        let status = serde_json::json!({
            "on_duty": timer.is_on_duty(),
            "trip_id": timer.session_trip(),
            "duty_start": timer.state().duty_start,
            "elapsed_minutes": timer.elapsed().num_minutes(),
            "remaining_minutes": timer.remaining().num_minutes(),
            "thresholds_crossed": crossed,
            "storage": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("fduty status");
    println!("------------");
    println!("Database:   {}", storage.path().display());
    println!(
        "Trips:      {} ({} bytes)",
        stats.total_trips, stats.db_size_bytes
    );
    if let (Some(oldest), Some(newest)) = (stats.oldest_trip, stats.newest_trip) {
        println!("Dates:      {oldest} to {newest}");
    }
    if !timer.is_on_duty() {
        println!("Duty:       off duty");
        return Ok(());
    }
    if let Some(trip) = timer.session_trip() {
        println!("Trip:       {trip}");
    }
    if let Some(start) = timer.state().duty_start {
        println!("Started:    {}", format_instant(config, start));
    }
    println!("Elapsed:    {}", format_minutes(timer.elapsed().num_minutes()));
    println!("Remaining:  {}", format_minutes(timer.remaining().num_minutes()));
    for threshold in crossed {
        println!("Warning:    duty passed {threshold}");
    }
    Ok(())
}

fn handle_duty_watch(config: &Config) -> Result<()> {
    let coordinator = open_coordinator(config)?;
    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;

    runtime.block_on(async move {
        let mut events = coordinator.subscribe();
        let coordinator = Arc::new(Mutex::new(coordinator));
        let handle = TickHandle::new();
        let ticker = spawn_duty_ticker(coordinator.clone(), config.tick_interval(), handle.clone());

        println!("Watching duty timer (Ctrl-C to stop)...");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Ok(LifecycleEvent::ThresholdCrossed { threshold }) => {
                        let remaining = coordinator.lock().await.timer().remaining();
                        println!(
                            "Duty passed {threshold}; {} remaining",
                            format_minutes(remaining.num_minutes())
                        );
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Missed {missed} duty events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        handle.stop();
        ticker.abort();
        Ok(())
    })
}

/// Bridge the current trip to a companion speaking JSON lines on stdio.
/// Runs until stdin closes or Ctrl-C.
fn handle_companion_serve(config: &Config) -> Result<()> {
    let coordinator = open_coordinator(config)?;
    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;

    let served = runtime.block_on(async move {
        let events = coordinator.subscribe();
        let coordinator = Arc::new(Mutex::new(coordinator));
        let handle = TickHandle::new();
        let ticker = spawn_duty_ticker(coordinator.clone(), config.tick_interval(), handle.clone());

        let (link, mut outbound) = ChannelLink::pair(64);
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(line) = outbound.recv().await {
                if let Err(e) = write_line(&mut stdout, &line).await {
                    tracing::warn!("Companion output closed: {e}");
                    break;
                }
            }
        });

        let (inbound_tx, inbound) = mpsc::channel(64);
        let mut reader = tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        if inbound_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Companion input failed: {e}");
                        break;
                    }
                }
            }
        });

        let mut bridge = SyncBridge::new(coordinator, link, config.companion.dedup_window);
        bridge.sync_current().await;
        let task = tokio::spawn(bridge.run(inbound, events, handle.clone()));
        tracing::info!("Serving companion link on stdio");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => reader.abort(),
            _ = &mut reader => {}
        }

        handle.stop();
        task.await.context("companion bridge task")?;
        writer.await.context("companion writer task")?;
        ticker.abort();
        Ok(())
    });

    // A read on stdin may still be parked in a blocking thread.
    runtime.shutdown_background();
    served
}

async fn write_line(stdout: &mut tokio::io::Stdout, line: &str) -> std::io::Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

fn handle_report(config: &Config, cmd: &ReportCommand) -> Result<()> {
    let coordinator = open_coordinator(config)?;
    let report = coordinator.report(cmd.as_of.unwrap_or_else(today))?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Compliance as of {}", report.as_of);
    println!("==========================");
    for line in report.lines() {
        println!(
            "  {:<32} {:>7.1}h / {:>5.0}h{}",
            line.label,
            hours(line.minutes),
            hours(line.limit_minutes),
            if line.exceeded { "  EXCEEDED" } else { "" }
        );
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Duty]");
                println!("  Tick interval (s):  {}", config.duty.tick_interval_secs);
                println!("  Report (min):       {}", config.duty.report_minutes);
                println!("  Release (min):      {}", config.duty.release_minutes);
                println!();
                println!("[Compliance]");
                println!("  Per-FDP check:      {}", config.compliance.per_fdp_enabled);
                println!(
                    "  FDP flight (h):     {}",
                    config.compliance.fdp_flight_limit_hours
                );
                println!("  Duty 7d (h):        {}", config.compliance.duty_7d_limit_hours);
                println!(
                    "  Flight 30d (h):     {}",
                    config.compliance.flight_30d_limit_hours
                );
                println!(
                    "  Flight annual (h):  {}",
                    config.compliance.flight_annual_limit_hours
                );
                println!();
                println!("[Companion]");
                println!("  Dedup window:       {}", config.companion.dedup_window);
                println!();
                println!("[Display]");
                println!("  UTC:                {}", config.display.utc);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn warn_pending(coordinator: &Coordinator) {
    let pending = coordinator.pending_writes();
    if pending > 0 {
        eprintln!("warning: {pending} trip(s) could not be saved");
    }
}
