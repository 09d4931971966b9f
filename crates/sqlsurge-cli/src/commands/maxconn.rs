//! `sqlsurge-maxconn`: batches of held connections, peak concurrency.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;

use sqlsurge_core::Target;
use sqlsurge_driver::{
    BatchStatus, CapacityConfig, CapacityEvent, CapacityProbe, CapacityReport, NullReporter,
    Reporter,
};
use sqlsurge_metrics::Stats;

use crate::args::{Format, MaxconnArgs};
use crate::console::{NARROW, heading, percent, print_json, print_lines, rule, span, timestamp};
use crate::interrupt;

/// Distinct connection errors listed in the summary.
const ERRORS_SHOWN: usize = 10;

pub async fn run(args: MaxconnArgs) -> Result<ExitCode> {
    let config = args.capacity_config();
    let connector = args.connector();

    let reporter: Arc<dyn Reporter> = match args.output.format {
        Format::Text => {
            print_lines(&banner(connector.target(), &args.target.username, &config));
            Arc::new(CapacityConsole)
        }
        Format::Json => Arc::new(NullReporter),
    };

    let report = CapacityProbe::new(config, Arc::new(connector))
        .with_reporter(reporter)
        .run(interrupt::on_ctrl_c())
        .await;

    if args.output.format == Format::Json {
        print_json(&report)?;
    }
    Ok(ExitCode::from(report.exit_code()))
}

pub fn banner(target: &Target, user: &str, config: &CapacityConfig) -> Vec<String> {
    vec![
        "=== SQL Server Maximum Connection Test ===".to_string(),
        format!("Target: {}", target.address()),
        format!("Database: {}", target.database),
        format!("Username: {user}"),
        format!("Start time: {}", timestamp(&Local::now())),
        String::new(),
        "Configuration:".to_string(),
        format!("  Max connections: {}", config.max_connections),
        format!("  Batch size: {}", config.batch_size),
        format!("  Batch delay: {}s", config.batch_delay.as_secs_f64()),
        format!("  Hold time: {}s", config.hold.as_secs()),
    ]
}

pub fn event_line(event: &CapacityEvent) -> String {
    match event {
        CapacityEvent::Connected {
            task,
            session,
            active,
            ..
        } => format!(
            "[Conn {task:3}] ✓ Connected (Session {}) - Active: {active}",
            session.as_deref().unwrap_or("?")
        ),
        CapacityEvent::Failed { task, error } => {
            format!("[Conn {task:3}] ✗ Connection failed: {error}")
        }
        CapacityEvent::Closed { task, active } => {
            format!("[Conn {task:3}] Connection closed - Active: {active}")
        }
    }
}

pub fn status_line(status: &BatchStatus) -> String {
    format!(
        "Status: Active={}, Success={}, Failed={}, Max={}",
        status.active, status.successes, status.failures, status.peak
    )
}

pub fn final_block(report: &CapacityReport) -> Vec<String> {
    let stats = &report.stats;
    let mut lines = vec![String::new()];
    if report.interrupted {
        lines.push("⚠️  Test interrupted by user".to_string());
        lines.push(String::new());
    }
    lines.extend([
        heading("Test Complete", NARROW),
        format!("End time: {}", timestamp(&report.finished_at)),
        format!("Total duration: {}", span(report.elapsed)),
        String::new(),
        "Results:".to_string(),
        format!("  Total connection attempts: {}", stats.total),
        format!("  Successful connections: {}", stats.successes),
        format!("  Failed connections: {}", stats.failures),
        format!("  Maximum concurrent connections: {}", report.peak_concurrent),
    ]);
    if stats.total > 0 {
        lines.push(format!("  Success rate: {}", percent(stats.success_rate)));
    }
    if report.aborted {
        lines.push("  Stopped early: high failure rate".to_string());
    }
    if report.stragglers > 0 {
        lines.push(format!("  Still open at exit: {}", report.stragglers));
    }
    if !stats.errors.is_empty() {
        lines.push(String::new());
        lines.push("Connection Errors (unique):".to_string());
        lines.extend(
            stats
                .errors
                .iter()
                .take(ERRORS_SHOWN)
                .map(|e| format!("  - {e}")),
        );
    }
    lines.push(rule(NARROW));
    lines
}

/// Console rendering of a capacity probe.
pub struct CapacityConsole;

impl Reporter for CapacityConsole {
    fn capacity_batch_started(&self, first: usize, last: usize) {
        println!("\n--- Starting batch: connections {first} to {last} ---");
    }

    fn capacity_event(&self, event: &CapacityEvent) {
        println!("{}", event_line(event));
    }

    fn capacity_batch_status(&self, status: &BatchStatus) {
        println!("{}", status_line(status));
    }

    fn capacity_aborted(&self, _stats: &Stats) {
        println!("\n⚠️  High failure rate detected. Stopping test.");
    }

    fn capacity_draining(&self, timeout: Duration) {
        println!(
            "\n--- Waiting for all connections to close (up to {}s) ---",
            timeout.as_secs()
        );
    }

    fn capacity_finished(&self, report: &CapacityReport) {
        print_lines(&final_block(report));
    }
}
