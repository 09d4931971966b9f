//! Text building blocks for the console reports.
//!
//! Everything here returns strings; the per-mode reporters in
//! [`crate::commands`] decide when to print them.

use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use sqlsurge_core::{AttemptError, Row};
use sqlsurge_metrics::{LatencySummary, Stats};

pub const WIDE: usize = 70;
pub const NARROW: usize = 60;

/// How many distinct error messages a summary lists.
pub const ERRORS_SHOWN: usize = 5;

pub fn rule(width: usize) -> String {
    "=".repeat(width)
}

/// Ruled `=== title ===` heading.
pub fn heading(title: &str, width: usize) -> String {
    format!("{}\n=== {title} ===\n{}", rule(width), rule(width))
}

/// `Label:` padded to a fixed column, then the value.
pub fn field(label: &str, value: impl Display) -> String {
    format!("{:<20}{value}", format!("{label}:"))
}

pub fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Compact elapsed time, `4m07s`.
pub fn clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}m{:02}s", secs / 60, secs % 60)
}

/// Spaced elapsed time, `4m 7s`.
pub fn span(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

pub fn timestamp(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

pub fn percent(rate: Option<f64>) -> String {
    match rate {
        Some(rate) => format!("{rate:.1}%"),
        None => "n/a".to_string(),
    }
}

/// Session id reported by the probe row, or `?`.
pub fn session_id(row: &Row) -> &str {
    row.get("SessionID").or_else(|| row.value(0)).unwrap_or("?")
}

/// Short failure description used on per-attempt lines.
pub fn failure_label(error: &AttemptError) -> String {
    match error {
        AttemptError::PoolExhausted(_) => "POOL EXHAUSTED".to_string(),
        AttemptError::Remote(message) => format!("DB ERROR: {message}"),
        AttemptError::Unexpected(message) => format!("ERROR: {message}"),
    }
}

/// Attempt totals with the failure breakdown when anything failed.
pub fn totals(stats: &Stats, noun: &str) -> Vec<String> {
    let mut lines = vec![
        field(&format!("Total {noun}"), stats.total),
        field("  Successful", stats.successes),
        field("  Failed", stats.failures),
    ];
    if stats.failures > 0 {
        let kinds = &stats.failures_by_kind;
        lines.push(field("    Pool exhausted", kinds.pool_exhausted));
        lines.push(field("    Server/network", kinds.remote));
        lines.push(field("    Unexpected", kinds.unexpected));
    }
    if stats.total > 0 {
        lines.push(field("  Success Rate", percent(stats.success_rate)));
    }
    lines
}

/// Latency block; `full` adds min and max.
pub fn latency(summary: &LatencySummary, full: bool) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        "Query Latency (ms):".to_string(),
        field("  Average", format!("{:.1}ms", summary.mean_ms)),
    ];
    if full {
        lines.push(field("  Min", format!("{:.1}ms", summary.min_ms)));
        lines.push(field("  Max", format!("{:.1}ms", summary.max_ms)));
    }
    lines.push(field("  P50 (median)", format!("{:.1}ms", summary.p50_ms)));
    lines.push(field("  P95", format!("{:.1}ms", summary.p95_ms)));
    lines.push(field("  P99", format!("{:.1}ms", summary.p99_ms)));
    lines
}

/// Up to `shown` distinct errors, then a count of the rest.
pub fn errors(title: &str, errors: &[String], shown: usize) -> Vec<String> {
    if errors.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![String::new(), format!("{title}:")];
    lines.extend(errors.iter().take(shown).map(|e| format!("  - {e}")));
    if errors.len() > shown {
        lines.push(format!("  ... and {} more", errors.len() - shown));
    }
    lines
}

pub fn print_lines(lines: &[String]) {
    println!("{}", lines.join("\n"));
}

pub fn print_json<T: Serialize>(report: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
