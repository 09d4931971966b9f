//! `sqlsurge`: pooled concurrent workload.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use tracing::info;

use sqlsurge_core::{ConnectError, Target, WorkloadConfig};
use sqlsurge_driver::{
    AttemptEvent, FailureRatio, NullReporter, Reporter, RunReport, StopReason, WorkerSummary,
    WorkloadDriver,
};
use sqlsurge_metrics::Stats;
use sqlsurge_pool::WarmupReport;

use crate::args::{Format, WorkloadArgs};
use crate::console::{
    ERRORS_SHOWN, WIDE, clock, errors, failure_label, field, heading, latency, millis,
    print_json, print_lines, rule, session_id, span, timestamp, totals,
};
use crate::interrupt;

pub async fn run(args: WorkloadArgs) -> Result<ExitCode> {
    let config = args.workload_config()?;
    let connector = args.connector();
    let text = args.output.format == Format::Text;

    info!(server = %connector.target(), pool_size = config.pool_size, "starting workload");
    if text {
        print_lines(&banner(connector.target(), &args.target.username, &config));
    }

    let reporter: Arc<dyn Reporter> = match args.output.format {
        Format::Text => Arc::new(WorkloadConsole),
        Format::Json => Arc::new(NullReporter),
    };
    let mut driver = WorkloadDriver::new(config, Arc::new(connector)).with_reporter(reporter);
    if let Some(ratio) = args.abort_ratio {
        driver = driver.with_policy(FailureRatio(ratio));
    }
    let report = driver.run(interrupt::on_ctrl_c()).await?;

    if !text {
        print_json(&report)?;
    }
    Ok(ExitCode::from(report.exit_code()))
}

fn planned(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs % 60 == 0 {
        format!("{} minutes", secs / 60)
    } else {
        span(duration)
    }
}

pub fn banner(target: &Target, user: &str, config: &WorkloadConfig) -> Vec<String> {
    vec![
        String::new(),
        heading("Realistic SQL Server Workload Simulation", WIDE),
        field("Target", target.address()),
        field("Database", &target.database),
        field("Username", user),
        field("Duration", planned(config.duration)),
        field(
            "Query interval",
            format!(
                "{:.1}s - {:.1}s (random)",
                config.min_interval.as_secs_f64(),
                config.max_interval.as_secs_f64()
            ),
        ),
        field("Connection pool", format!("{} connections", config.pool_size)),
        field("Workers", config.worker_count()),
        field("Start time", timestamp(&Local::now())),
        rule(WIDE),
        String::new(),
        format!(
            "Initializing connection pool (size={}) to {}...",
            config.pool_size,
            target.address()
        ),
    ]
}

pub fn attempt_line(event: &AttemptEvent<'_>) -> String {
    let prefix = format!("[Worker {:2}] Query #{:3}", event.worker, event.seq);
    match event.outcome {
        Ok(row) => format!(
            "{prefix} ✓ {:6.1}ms - Session {} - Elapsed: {}",
            millis(event.latency),
            session_id(row),
            clock(event.elapsed)
        ),
        Err(error) => format!("{prefix} ✗ {}", failure_label(error)),
    }
}

pub fn periodic_block(elapsed: Duration, planned: Duration, stats: &Stats) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        rule(WIDE),
        format!("Statistics at {} / {}", clock(elapsed), clock(planned)),
        rule(WIDE),
    ];
    lines.extend(totals(stats, "Queries"));
    if let Some(summary) = &stats.latency {
        lines.extend(latency(summary, true));
    }
    lines.extend(errors("Connection Errors", &stats.errors, ERRORS_SHOWN));
    lines.push(rule(WIDE));
    lines
}

pub fn final_block(report: &RunReport) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        heading("FINAL RESULTS", WIDE),
        field("End time", timestamp(&report.finished_at)),
        field("Total duration", span(report.elapsed)),
        field("Stopped by", report.reason),
        field(
            "Warm-up",
            format!(
                "{}/{} connections",
                report.warmup_ready, report.warmup_requested
            ),
        ),
        String::new(),
    ];
    lines.extend(totals(&report.stats, "Queries"));
    if report.stats.total > 0 {
        lines.push(field(
            "  Queries/second",
            format!("{:.2}", report.queries_per_second()),
        ));
    }
    if let Some(summary) = &report.stats.latency {
        lines.extend(latency(summary, false));
    }
    if report.pool.replaced > 0 || report.pool.lost > 0 {
        lines.push(String::new());
        lines.push(field("Replaced conns", report.pool.replaced));
        lines.push(field("Lost conns", report.pool.lost));
    }
    if report.stragglers > 0 {
        lines.push(field("Stragglers", report.stragglers));
    }
    lines.extend(errors("Connection Errors", &report.stats.errors, ERRORS_SHOWN));
    lines.push(rule(WIDE));
    lines
}

/// Console rendering of a workload run.
pub struct WorkloadConsole;

impl Reporter for WorkloadConsole {
    fn warmup_finished(&self, report: &WarmupReport) {
        for failure in &report.failures {
            println!(
                "  ✗ Failed to create connection {}/{}: {}",
                failure.slot + 1,
                report.requested,
                failure.error
            );
        }
        println!("✓ Connection pool ready with {} connections\n", report.ready);
    }

    fn worker_started(&self, worker: usize) {
        println!("[Worker {worker:2}] Started");
    }

    fn workers_started(&self, count: usize) {
        println!("\n✓ All {count} workers started\n");
    }

    fn attempt(&self, event: &AttemptEvent<'_>) {
        println!("{}", attempt_line(event));
    }

    fn connection_lost(&self, worker: usize, error: &ConnectError) {
        println!("⚠️  [Worker {worker:2}] Failed to recreate dead connection: {error}");
    }

    fn worker_finished(&self, summary: &WorkerSummary) {
        println!(
            "[Worker {:2}] Finished - Queries: {}, Success: {}, Failed: {}",
            summary.id, summary.attempts, summary.successes, summary.failures
        );
    }

    fn periodic(&self, elapsed: Duration, planned: Duration, stats: &Stats) {
        print_lines(&periodic_block(elapsed, planned, stats));
    }

    fn stopping(&self, reason: StopReason) {
        match reason {
            StopReason::DeadlineReached => {
                println!("\n⏰ Test duration reached. Stopping workers...\n")
            }
            StopReason::Interrupted => println!("\n\n⚠️  Test interrupted by user\n"),
            StopReason::PolicyAbort => {
                println!("\n⚠️  Failure rate too high. Stopping workers...\n")
            }
        }
    }

    fn pool_closed(&self, closed: usize) {
        println!("\nClosing connection pool...");
        println!("✓ Closed {closed} connections");
    }

    fn run_finished(&self, report: &RunReport) {
        print_lines(&final_block(report));
    }
}
