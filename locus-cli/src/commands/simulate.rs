//! Run a scripted acquisition scenario.
//!
//! Builds a `SimulatedSource` from the command line, starts a manager on it
//! and issues several concurrent requests. Every caller's outcome is printed
//! together with the event timeline and coalescing statistics.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::info;

use locus::coalescer::CoalescerStats;
use locus::error::{LocationResult, SourceError, LOCATION_ERROR_DOMAIN};
use locus::source::{
    source_channel, AuthorizationStatus, PositionSource, ScriptedEvent, SimulatedSource,
};
use locus::{AccuracyTier, LocationEvent, LocationManager};

use crate::error::CliError;
use crate::runner::CliRunner;

/// A scripted fix: `<seconds>:<meters>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptedFix {
    pub after: Duration,
    pub accuracy: f64,
}

impl FromStr for ScriptedFix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (secs, meters) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <seconds>:<meters>, got '{}'", s))?;
        let secs: f64 = secs
            .trim()
            .parse()
            .map_err(|_| format!("invalid delay '{}'", secs))?;
        let accuracy: f64 = meters
            .trim()
            .parse()
            .map_err(|_| format!("invalid accuracy '{}'", meters))?;
        let after = Duration::try_from_secs_f64(secs)
            .map_err(|_| format!("delay must be zero or more seconds, got {}", secs))?;
        Ok(Self { after, accuracy })
    }
}

/// Arguments for `locus simulate`.
#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Number of concurrent callers
    #[arg(long, default_value_t = 3)]
    pub callers: usize,

    /// Fix reported after start, as <seconds>:<meters> (repeatable)
    #[arg(long = "fix", value_name = "SECS:METERS")]
    pub fixes: Vec<ScriptedFix>,

    /// Source reports denied authorization
    #[arg(long)]
    pub deny: bool,

    /// Source fails this many seconds after start
    #[arg(long, value_name = "SECS")]
    pub fail_at: Option<f64>,

    /// Starting tier (overrides config)
    #[arg(long)]
    pub desired_accuracy: Option<AccuracyTier>,

    /// Timeout multiplier (overrides config)
    #[arg(long)]
    pub interval_modifier: Option<f64>,

    /// Keep the source running after the first outcome
    #[arg(long)]
    pub continuous: bool,

    /// Latitude reported by scripted fixes
    #[arg(long, default_value_t = 53.5511, allow_negative_numbers = true)]
    pub latitude: f64,

    /// Longitude reported by scripted fixes
    #[arg(long, default_value_t = 9.9937, allow_negative_numbers = true)]
    pub longitude: f64,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Outcome of one caller.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeReport {
    Fix {
        latitude: f64,
        longitude: f64,
        accuracy_m: f64,
    },
    Error {
        domain: &'static str,
        code: i64,
        message: String,
    },
}

impl From<&LocationResult> for OutcomeReport {
    fn from(outcome: &LocationResult) -> Self {
        match outcome {
            Ok(fix) => OutcomeReport::Fix {
                latitude: fix.coordinate.latitude,
                longitude: fix.coordinate.longitude,
                accuracy_m: fix.horizontal_accuracy,
            },
            Err(e) => OutcomeReport::Error {
                domain: LOCATION_ERROR_DOMAIN,
                code: e.code(),
                message: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct CallerReport {
    caller: usize,
    elapsed_ms: u64,
    outcome: OutcomeReport,
}

/// One entry of the event timeline.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventReport {
    Updated { accuracy_m: f64 },
    CycleStarted { cycle: u64, tier: &'static str },
    TierRelaxed { cycle: u64, tier: &'static str },
    CycleFinished { cycle: u64, waiters: usize, success: bool },
}

impl From<&LocationEvent> for EventReport {
    fn from(event: &LocationEvent) -> Self {
        match event {
            LocationEvent::Updated(fix) => EventReport::Updated {
                accuracy_m: fix.horizontal_accuracy,
            },
            LocationEvent::CycleStarted { cycle, tier } => EventReport::CycleStarted {
                cycle: cycle.get(),
                tier: tier.as_str(),
            },
            LocationEvent::TierRelaxed { cycle, tier } => EventReport::TierRelaxed {
                cycle: cycle.get(),
                tier: tier.as_str(),
            },
            LocationEvent::CycleFinished {
                cycle,
                outcome,
                waiters,
            } => EventReport::CycleFinished {
                cycle: cycle.get(),
                waiters: *waiters,
                success: outcome.is_ok(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct StatsReport {
    total_requests: u64,
    cache_hits: u64,
    coalesced_requests: u64,
    cycles_started: u64,
    coalescing_ratio: f64,
}

impl From<CoalescerStats> for StatsReport {
    fn from(stats: CoalescerStats) -> Self {
        Self {
            coalescing_ratio: stats.coalescing_ratio(),
            total_requests: stats.total_requests,
            cache_hits: stats.cache_hits,
            coalesced_requests: stats.coalesced_requests,
            cycles_started: stats.cycles_started,
        }
    }
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    callers: Vec<CallerReport>,
    events: Vec<EventReport>,
    stats: StatsReport,
    source_starts: usize,
    source_stops: usize,
}

/// Build the source script from the arguments.
pub fn build_script(args: &SimulateArgs) -> Result<Vec<ScriptedEvent>, CliError> {
    let mut script: Vec<ScriptedEvent> = args
        .fixes
        .iter()
        .map(|f| ScriptedEvent::fix(f.after, args.latitude, args.longitude, f.accuracy))
        .collect();

    if let Some(secs) = args.fail_at {
        let after = Duration::try_from_secs_f64(secs).map_err(|_| {
            CliError::InvalidArgument(format!(
                "--fail-at must be zero or more seconds, got {}",
                secs
            ))
        })?;
        script.push(ScriptedEvent::error(
            after,
            SourceError::Transient("simulated source failure".to_string()),
        ));
    }
    Ok(script)
}

/// Run the simulate command.
pub async fn run(args: SimulateArgs, runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("simulate");

    if args.callers == 0 {
        return Err(CliError::InvalidArgument(
            "--callers must be at least 1".to_string(),
        ));
    }

    let mut config = runner.config().manager.clone();
    if let Some(tier) = args.desired_accuracy {
        config.desired_accuracy = tier;
    }
    if let Some(modifier) = args.interval_modifier {
        config = config.with_interval_modifier(modifier);
    }
    if args.continuous {
        config.update_continuously = true;
    }

    let (events_tx, events_rx) = source_channel();
    let mut source = SimulatedSource::new(events_tx).with_script(build_script(&args)?);
    if args.deny {
        source = source.with_authorization(AuthorizationStatus::Denied);
    }
    let source = Arc::new(source);

    let manager = LocationManager::start(
        config,
        Arc::clone(&source) as Arc<dyn PositionSource>,
        events_rx,
    )?;
    let mut timeline = manager.subscribe();

    info!(callers = args.callers, "Issuing concurrent requests");
    let started = Instant::now();
    let requests = (0..args.callers).map(|caller| {
        let ticket = manager.locate();
        async move {
            let outcome = ticket.await;
            CallerReport {
                caller,
                elapsed_ms: started.elapsed().as_millis() as u64,
                outcome: OutcomeReport::from(&outcome),
            }
        }
    });
    let callers = join_all(requests).await;

    manager.shutdown();
    manager.stopped().await;

    let report = SimulationReport {
        callers,
        events: drain(&mut timeline),
        stats: manager.stats().into(),
        source_starts: source.start_count(),
        source_stops: source.stop_count(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn drain(timeline: &mut broadcast::Receiver<LocationEvent>) -> Vec<EventReport> {
    let mut events = Vec::new();
    loop {
        match timeline.try_recv() {
            Ok(event) => events.push(EventReport::from(&event)),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

fn print_report(report: &SimulationReport) {
    println!("Callers:");
    for caller in &report.callers {
        let outcome = match &caller.outcome {
            OutcomeReport::Fix {
                latitude,
                longitude,
                accuracy_m,
            } => format!("{:.6}, {:.6} (±{}m)", latitude, longitude, accuracy_m),
            OutcomeReport::Error { code, message, .. } => {
                format!("error {}: {}", code, message)
            }
        };
        println!("  #{:<3} {:>7}ms  {}", caller.caller, caller.elapsed_ms, outcome);
    }

    println!();
    println!("Events:");
    for event in &report.events {
        let line = match event {
            EventReport::Updated { accuracy_m } => format!("cache updated (±{}m)", accuracy_m),
            EventReport::CycleStarted { cycle, tier } => {
                format!("cycle #{} started at {}", cycle, tier)
            }
            EventReport::TierRelaxed { cycle, tier } => {
                format!("cycle #{} relaxed to {}", cycle, tier)
            }
            EventReport::CycleFinished {
                cycle,
                waiters,
                success,
            } => format!(
                "cycle #{} {} ({} waiters)",
                cycle,
                if *success { "resolved" } else { "failed" },
                waiters
            ),
        };
        println!("  {}", line);
    }

    println!();
    println!("Statistics:");
    println!("  Requests:      {}", report.stats.total_requests);
    println!("  Cache hits:    {}", report.stats.cache_hits);
    println!("  Coalesced:     {}", report.stats.coalesced_requests);
    println!("  Cycles:        {}", report.stats.cycles_started);
    println!(
        "  Coalescing:    {:.1}%",
        report.stats.coalescing_ratio * 100.0
    );
    println!(
        "  Source:        {} start(s), {} stop(s)",
        report.source_starts, report.source_stops
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use locus::error::LocationError;
    use locus::Fix;

    fn args() -> SimulateArgs {
        SimulateArgs {
            callers: 3,
            fixes: Vec::new(),
            deny: false,
            fail_at: None,
            desired_accuracy: None,
            interval_modifier: None,
            continuous: false,
            latitude: 1.0,
            longitude: 2.0,
            json: false,
        }
    }

    #[test]
    fn test_parse_scripted_fix() {
        let fix: ScriptedFix = "2.5:30".parse().unwrap();
        assert_eq!(fix.after, Duration::from_millis(2_500));
        assert_eq!(fix.accuracy, 30.0);

        assert!("30".parse::<ScriptedFix>().is_err());
        assert!("x:30".parse::<ScriptedFix>().is_err());
        assert!("-1:30".parse::<ScriptedFix>().is_err());
        assert!("1e30:30".parse::<ScriptedFix>().is_err());
    }

    #[test]
    fn test_build_script_appends_failure() {
        let mut a = args();
        a.fixes = vec!["1:50".parse().unwrap()];
        a.fail_at = Some(3.0);

        let script = build_script(&a).unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script[1].after, Duration::from_secs(3));

        for secs in [f64::NAN, -1.0, 1e30] {
            a.fail_at = Some(secs);
            assert!(matches!(
                build_script(&a),
                Err(CliError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_outcome_report() {
        let fix = Fix::new(1.0, 2.0, 8.0);
        assert_eq!(
            OutcomeReport::from(&Ok(fix)),
            OutcomeReport::Fix {
                latitude: 1.0,
                longitude: 2.0,
                accuracy_m: 8.0
            }
        );

        let denied = OutcomeReport::from(&Err(LocationError::PermissionDenied));
        assert!(matches!(denied, OutcomeReport::Error { code: 1, .. }));
    }

    #[test]
    fn test_outcome_report_json_shape() {
        let report = OutcomeReport::from(&Err(LocationError::Cancelled));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["domain"], LOCATION_ERROR_DOMAIN);
        assert_eq!(json["code"], 3);
    }
}
