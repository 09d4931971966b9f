//! `sqlsurge-ramp`: one connection at a time until the server refuses.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;

use sqlsurge_core::{AttemptError, FailureKind, Target};
use sqlsurge_driver::{
    NullReporter, RampConfig, RampProbe, RampProgress, RampReport, RampStep, Reporter,
};

use crate::args::{Format, RampArgs};
use crate::console::{
    WIDE, field, heading, millis, percent, print_json, print_lines, rule, session_id, span,
    timestamp,
};
use crate::interrupt;

pub async fn run(args: RampArgs) -> Result<ExitCode> {
    let config = args.ramp_config()?;
    let connector = args.connector();

    let reporter: Arc<dyn Reporter> = match args.output.format {
        Format::Text => {
            print_lines(&banner(connector.target(), &args.target.username, &config));
            Arc::new(RampConsole)
        }
        Format::Json => Arc::new(NullReporter),
    };

    let report = RampProbe::new(config, Arc::new(connector))
        .with_reporter(reporter)
        .run(interrupt::on_ctrl_c())
        .await;

    if args.output.format == Format::Json {
        print_json(&report)?;
    }
    Ok(ExitCode::from(report.exit_code()))
}

pub fn banner(target: &Target, user: &str, config: &RampConfig) -> Vec<String> {
    vec![
        heading("Gradual Connection Test", WIDE),
        field("Target", target.address()),
        field("Database", &target.database),
        field("Username", user),
        field("Max connections", config.max_connections),
        field("Delay per conn", format!("{}s", config.delay.as_secs_f64())),
        field("Start time", timestamp(&Local::now())),
        rule(WIDE),
        String::new(),
        "Creating connections one by one...".to_string(),
        "Watch for the point where connections start failing.".to_string(),
    ]
}

fn failure_class(error: &AttemptError) -> &'static str {
    match error.kind() {
        FailureKind::Remote => "Database error",
        FailureKind::PoolExhausted | FailureKind::Unexpected => "Unexpected error",
    }
}

pub fn step_lines(step: &RampStep<'_>) -> Vec<String> {
    let mut lines = match step.outcome {
        Ok(row) => vec![format!(
            "[{:3}] ✓ SUCCESS - Session {} - {:.1}ms",
            step.attempt,
            session_id(row),
            millis(step.latency)
        )],
        Err(error) => vec![
            format!("[{:3}] ✗ FAILED - {}", step.attempt, failure_class(error)),
            format!("      Error: {error}"),
        ],
    };
    lines.push(format!("      Total active connections: {}", step.active));
    lines
}

pub fn progress_lines(progress: &RampProgress) -> Vec<String> {
    vec![
        String::new(),
        format!(
            "--- Progress: {}/{} attempts ({}s elapsed) ---",
            progress.attempt,
            progress.max,
            progress.elapsed.as_secs()
        ),
        format!(
            "    Active: {}, Success: {}, Failed: {}",
            progress.active, progress.successes, progress.failures
        ),
        String::new(),
    ]
}

pub fn final_block(report: &RampReport) -> Vec<String> {
    let stats = &report.stats;
    let mut lines = vec![String::new()];
    if report.interrupted {
        lines.push("⚠️  Test interrupted by user".to_string());
        lines.push(String::new());
    }
    lines.extend([
        heading("Test Results", WIDE),
        field("End time", timestamp(&report.finished_at)),
        field("Total duration", span(report.elapsed)),
        String::new(),
        field("Attempts", stats.total),
        field("Successful", stats.successes),
        field("Failed", stats.failures),
        String::new(),
    ]);

    match report.first_failure {
        Some(first) => {
            lines.push("Key finding:".to_string());
            lines.push(format!("   First failure at:     Connection #{}", first.attempt));
            lines.push(format!(
                "   Active connections:   {} when first failure occurred",
                first.active
            ));
            lines.push(format!(
                "   Maximum achieved:     {} concurrent connections",
                report.peak_held
            ));
        }
        None => {
            lines.push(format!("✓ All {} connections succeeded!", stats.successes));
            lines.push(format!(
                "  No connection limit hit within {} connections",
                report.max_connections
            ));
        }
    }
    if stats.total > 0 {
        lines.push(format!("   Success rate:         {}", percent(stats.success_rate)));
    }
    lines.push(rule(WIDE));
    lines
}

/// Console rendering of a ramp.
pub struct RampConsole;

impl Reporter for RampConsole {
    fn ramp_step(&self, step: &RampStep<'_>) {
        print_lines(&step_lines(step));
    }

    fn ramp_first_failure(&self, attempt: usize, active: usize) {
        println!("\n⚠️  FIRST FAILURE at connection #{attempt}");
        println!("    Active connections when failure occurred: {active}");
    }

    fn ramp_progress(&self, progress: &RampProgress) {
        print_lines(&progress_lines(progress));
    }

    fn ramp_stalled(&self, consecutive: usize, active: usize) {
        println!("\n⚠️  {consecutive} consecutive failures detected.");
        println!("    Connection limit appears to be around {active} connections");
        println!("    Stopping test...");
    }

    fn ramp_holding(&self, active: usize, hold: Duration) {
        println!(
            "\n\n⏸️  Holding all {active} connections for {} seconds...",
            hold.as_secs()
        );
    }

    fn ramp_finished(&self, report: &RampReport) {
        println!("\nClosed {} connections", report.closed);
        print_lines(&final_block(report));
    }
}
