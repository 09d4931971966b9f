//! Progress sink for every run mode.
//!
//! The driver and probes never print. They describe what happened through a
//! [`Reporter`]; the CLI renders it to the console, tests record it.
//! Every method has a no-op default so a sink only implements what it shows.

use std::time::Duration;

use sqlsurge_core::{AttemptError, ConnectError, Row};
use sqlsurge_metrics::Stats;
use sqlsurge_pool::WarmupReport;

use crate::capacity::{BatchStatus, CapacityEvent, CapacityReport};
use crate::driver::{RunReport, StopReason};
use crate::health::HealthReport;
use crate::ramp::{RampProgress, RampReport, RampStep};
use crate::worker::WorkerSummary;

/// One measured probe as seen by a worker or the health check.
#[derive(Debug)]
pub struct AttemptEvent<'a> {
    pub worker: usize,
    /// Per-worker attempt sequence, starting at 1.
    pub seq: u64,
    /// Time since the run started.
    pub elapsed: Duration,
    pub latency: Duration,
    pub outcome: Result<&'a Row, &'a AttemptError>,
}

pub trait Reporter: Send + Sync {
    // ── workload ────────────────────────────────────────────────────

    fn warmup_finished(&self, _report: &WarmupReport) {}
    fn worker_started(&self, _worker: usize) {}
    fn workers_started(&self, _count: usize) {}
    fn attempt(&self, _event: &AttemptEvent<'_>) {}
    /// A dead connection could not be replaced; the pool shrank.
    fn connection_lost(&self, _worker: usize, _error: &ConnectError) {}
    fn worker_finished(&self, _summary: &WorkerSummary) {}
    fn periodic(&self, _elapsed: Duration, _planned: Duration, _stats: &Stats) {}
    fn stopping(&self, _reason: StopReason) {}
    fn pool_closed(&self, _closed: usize) {}
    fn run_finished(&self, _report: &RunReport) {}

    // ── single-session health check ─────────────────────────────────

    /// `reconnect` is false for the initial connection.
    fn health_connect(&self, _reconnect: bool, _outcome: Result<(), &ConnectError>) {}
    fn health_finished(&self, _report: &HealthReport) {}

    // ── gradual ramp ────────────────────────────────────────────────

    fn ramp_step(&self, _step: &RampStep<'_>) {}
    fn ramp_first_failure(&self, _attempt: usize, _active: usize) {}
    fn ramp_progress(&self, _progress: &RampProgress) {}
    fn ramp_stalled(&self, _consecutive: usize, _active: usize) {}
    fn ramp_holding(&self, _active: usize, _hold: Duration) {}
    fn ramp_finished(&self, _report: &RampReport) {}

    // ── batched capacity probe ──────────────────────────────────────

    fn capacity_batch_started(&self, _first: usize, _last: usize) {}
    fn capacity_event(&self, _event: &CapacityEvent) {}
    fn capacity_batch_status(&self, _status: &BatchStatus) {}
    fn capacity_aborted(&self, _stats: &Stats) {}
    fn capacity_draining(&self, _timeout: Duration) {}
    fn capacity_finished(&self, _report: &CapacityReport) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {}
