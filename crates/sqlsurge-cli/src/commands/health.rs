//! `sqlsurge-health`: one session, one probe per interval.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;

use sqlsurge_core::{AttemptError, ConnectError, Target};
use sqlsurge_driver::{
    AttemptEvent, HealthCheck, HealthCheckConfig, HealthReport, NullReporter, Reporter,
};
use sqlsurge_metrics::Stats;

use crate::args::{Format, HealthArgs};
use crate::console::{
    NARROW, field, heading, latency, millis, percent, print_json, print_lines, session_id, span,
    timestamp, totals,
};
use crate::interrupt;

pub async fn run(args: HealthArgs) -> Result<ExitCode> {
    let config = args.health_config();
    let connector = args.connector();

    let reporter: Arc<dyn Reporter> = match args.output.format {
        Format::Text => {
            print_lines(&banner(connector.target(), &args.target.username, &config));
            Arc::new(HealthConsole {
                planned: config.duration,
            })
        }
        Format::Json => Arc::new(NullReporter),
    };

    let report = HealthCheck::new(config, Arc::new(connector))
        .with_reporter(reporter)
        .run(interrupt::on_ctrl_c())
        .await;

    if args.output.format == Format::Json {
        print_json(&report)?;
    }
    Ok(ExitCode::from(report.exit_code()))
}

pub fn banner(target: &Target, user: &str, config: &HealthCheckConfig) -> Vec<String> {
    vec![
        "=== Database Connection Health Test ===".to_string(),
        field("Target", target.address()),
        field("Database", &target.database),
        field("Username", user),
        field("Duration", format!("{} minutes", config.duration.as_secs() / 60)),
        field("Query interval", format!("{}ms", config.interval.as_millis())),
        field("Start time", timestamp(&Local::now())),
        String::new(),
        "Establishing initial connection...".to_string(),
    ]
}

/// Whole minutes, rounded down.
fn whole_minutes(duration: Duration) -> u64 {
    duration.as_secs() / 60
}

pub fn attempt_line(event: &AttemptEvent<'_>, planned: Duration) -> String {
    match event.outcome {
        Ok(row) => format!(
            "[{:3}] ✓ SUCCESS - {:.1}ms - Time: {} - Session: {} - Elapsed: {}m - Remaining: {}m",
            event.seq,
            millis(event.latency),
            row.get("CurrentTime").unwrap_or("?"),
            session_id(row),
            whole_minutes(event.elapsed),
            whole_minutes(planned.saturating_sub(event.elapsed)),
        ),
        Err(AttemptError::Remote(message)) => {
            format!("[{:3}] ✗ QUERY FAILED - {message}", event.seq)
        }
        Err(error) => format!("[{:3}] ✗ UNEXPECTED ERROR - {error}", event.seq),
    }
}

pub fn periodic_lines(elapsed: Duration, stats: &Stats) -> Vec<String> {
    vec![
        String::new(),
        format!(
            "--- Statistics after {} queries ({}) ---",
            stats.total,
            span(elapsed)
        ),
        format!(
            "Successful: {} | Failed: {} | Success Rate: {}",
            stats.successes,
            stats.failures,
            percent(stats.success_rate)
        ),
        String::new(),
    ]
}

pub fn final_block(report: &HealthReport) -> Vec<String> {
    let mut lines = vec![String::new()];
    if report.interrupted {
        lines.push("Test interrupted by user".to_string());
        lines.push(String::new());
    }
    lines.push(heading("Test Complete", NARROW));
    lines.push(field("End time", timestamp(&report.finished_at)));
    lines.push(field("Total duration", span(report.elapsed)));
    lines.extend(totals(&report.stats, "queries"));
    lines.push(field("Reconnects", report.reconnects));
    if report.reconnect_failures > 0 {
        lines.push(field("Failed reconnects", report.reconnect_failures));
    }
    if let Some(summary) = &report.stats.latency {
        lines.extend(latency(summary, true));
    }
    lines
}

/// Console rendering of a health check.
pub struct HealthConsole {
    pub planned: Duration,
}

impl Reporter for HealthConsole {
    fn health_connect(&self, reconnect: bool, outcome: Result<(), &ConnectError>) {
        match (reconnect, outcome) {
            (false, Ok(())) => println!("✓ Initial connection successful!\n"),
            (false, Err(e)) => println!("✗ Initial connection failed: {e}"),
            (true, Ok(())) => println!("    ✓ Reconnection successful"),
            (true, Err(e)) => println!("    ✗ Reconnection failed: {e}"),
        }
    }

    fn attempt(&self, event: &AttemptEvent<'_>) {
        println!("{}", attempt_line(event, self.planned));
    }

    fn periodic(&self, elapsed: Duration, _planned: Duration, stats: &Stats) {
        print_lines(&periodic_lines(elapsed, stats));
    }

    fn health_finished(&self, report: &HealthReport) {
        print_lines(&final_block(report));
    }
}
