//! Shared mocks for the driver scenarios.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sqlsurge_core::{ConnectError, Connector, QueryError, Row, Session};
use sqlsurge_driver::{
    AttemptEvent, BatchStatus, CapacityEvent, CapacityReport, HealthReport, RampProgress,
    RampReport, RampStep, Reporter, RunReport, StopReason, WorkerSummary,
};
use sqlsurge_metrics::Stats;
use sqlsurge_pool::WarmupReport;

// ── Mock session and connector ──────────────────────────────────────

#[derive(Debug)]
struct MockSession {
    spid: u64,
    latency: Duration,
    healthy: Arc<AtomicBool>,
    query_calls: Arc<AtomicU64>,
    failing_queries: Arc<Vec<u64>>,
    closes: Arc<AtomicU64>,
}

#[async_trait]
impl Session for MockSession {
    async fn execute(&mut self, _query: &str) -> Result<Row, QueryError> {
        let call = self.query_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if !self.healthy.load(Ordering::SeqCst) || self.failing_queries.contains(&call) {
            return Err(QueryError::Broken("connection reset by peer".into()));
        }
        Ok(Row::new()
            .with_column("SessionID", &self.spid.to_string())
            .with_column("QueryTime", "2025-06-01 12:00:00.000"))
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector whose failures are scripted by call index.
pub struct MockConnector {
    connects: AtomicU64,
    /// Zero-based connect calls that fail.
    failing_connects: Vec<u64>,
    /// Every connect call at or after this index fails.
    fail_from: u64,
    latency: Duration,
    healthy: Arc<AtomicBool>,
    query_calls: Arc<AtomicU64>,
    failing_queries: Arc<Vec<u64>>,
    closes: Arc<AtomicU64>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            connects: AtomicU64::new(0),
            failing_connects: Vec::new(),
            fail_from: u64::MAX,
            latency: Duration::ZERO,
            healthy: Arc::new(AtomicBool::new(true)),
            query_calls: Arc::new(AtomicU64::new(0)),
            failing_queries: Arc::new(Vec::new()),
            closes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn failing_connects(mut self, calls: Vec<u64>) -> Self {
        self.failing_connects = calls;
        self
    }

    pub fn failing_from(mut self, call: u64) -> Self {
        self.fail_from = call;
        self
    }

    /// Queries (by global zero-based call index) that fail.
    pub fn failing_queries(mut self, calls: Vec<u64>) -> Self {
        self.failing_queries = Arc::new(calls);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn unhealthy(self) -> Self {
        self.healthy.store(false, Ordering::SeqCst);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _timeout: Duration) -> Result<Box<dyn Session>, ConnectError> {
        let call = self.connects.fetch_add(1, Ordering::SeqCst);
        if call >= self.fail_from || self.failing_connects.contains(&call) {
            return Err(ConnectError::Rejected(
                "Login failed: maximum connections reached".into(),
            ));
        }
        Ok(Box::new(MockSession {
            spid: 50 + call,
            latency: self.latency,
            healthy: self.healthy.clone(),
            query_calls: self.query_calls.clone(),
            failing_queries: self.failing_queries.clone(),
            closes: self.closes.clone(),
        }))
    }
}

// ── Recording reporter ──────────────────────────────────────────────

/// Records a short tag per event.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<String>>,
}

impl RecordingReporter {
    fn push(&self, tag: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(tag);
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of events whose tag starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

impl Reporter for RecordingReporter {
    fn warmup_finished(&self, report: &WarmupReport) {
        self.push(format!("warmup {}/{}", report.ready, report.requested));
    }

    fn worker_started(&self, worker: usize) {
        self.push(format!("worker-started {worker}"));
    }

    fn attempt(&self, event: &AttemptEvent<'_>) {
        let tag = match event.outcome {
            Ok(_) => "attempt ok".to_string(),
            Err(e) => format!("attempt {}", e.kind()),
        };
        self.push(tag);
    }

    fn connection_lost(&self, worker: usize, _error: &ConnectError) {
        self.push(format!("lost {worker}"));
    }

    fn worker_finished(&self, summary: &WorkerSummary) {
        self.push(format!("worker-finished {}", summary.id));
    }

    fn periodic(&self, _elapsed: Duration, _planned: Duration, stats: &Stats) {
        self.push(format!("periodic {}", stats.total));
    }

    fn stopping(&self, reason: StopReason) {
        self.push(format!("stopping {reason}"));
    }

    fn pool_closed(&self, closed: usize) {
        self.push(format!("pool-closed {closed}"));
    }

    fn run_finished(&self, _report: &RunReport) {
        self.push("run-finished".into());
    }

    fn health_connect(&self, reconnect: bool, outcome: Result<(), &ConnectError>) {
        let verb = if reconnect { "reconnect" } else { "connect" };
        let result = if outcome.is_ok() { "ok" } else { "failed" };
        self.push(format!("health-{verb} {result}"));
    }

    fn health_finished(&self, _report: &HealthReport) {
        self.push("health-finished".into());
    }

    fn ramp_step(&self, step: &RampStep<'_>) {
        let result = if step.outcome.is_ok() { "ok" } else { "failed" };
        self.push(format!("ramp-step {} {result}", step.attempt));
    }

    fn ramp_first_failure(&self, attempt: usize, active: usize) {
        self.push(format!("ramp-first-failure {attempt} {active}"));
    }

    fn ramp_progress(&self, progress: &RampProgress) {
        self.push(format!("ramp-progress {}", progress.attempt));
    }

    fn ramp_stalled(&self, consecutive: usize, active: usize) {
        self.push(format!("ramp-stalled {consecutive} {active}"));
    }

    fn ramp_holding(&self, active: usize, _hold: Duration) {
        self.push(format!("ramp-holding {active}"));
    }

    fn ramp_finished(&self, _report: &RampReport) {
        self.push("ramp-finished".into());
    }

    fn capacity_batch_started(&self, first: usize, last: usize) {
        self.push(format!("batch {first}-{last}"));
    }

    fn capacity_event(&self, event: &CapacityEvent) {
        let tag = match event {
            CapacityEvent::Connected { task, .. } => format!("capacity-connected {task}"),
            CapacityEvent::Failed { task, .. } => format!("capacity-failed {task}"),
            CapacityEvent::Closed { task, .. } => format!("capacity-closed {task}"),
        };
        self.push(tag);
    }

    fn capacity_batch_status(&self, status: &BatchStatus) {
        self.push(format!("batch-status {}", status.batch));
    }

    fn capacity_aborted(&self, _stats: &Stats) {
        self.push("capacity-aborted".into());
    }

    fn capacity_finished(&self, _report: &CapacityReport) {
        self.push("capacity-finished".into());
    }
}
