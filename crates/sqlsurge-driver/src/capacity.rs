//! Batched max-connection probe.
//!
//! One task per attempted connection, spawned in batches. Each task
//! connects, reads its session id, holds the connection and closes it.
//! Active and peak concurrency are tracked with atomics so the hot path
//! never waits on the aggregator lock for them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use sqlsurge_core::duration::serialize_secs;
use sqlsurge_core::{AttemptError, Connection, Connector};
use sqlsurge_metrics::{Aggregator, AttemptRecord, DEFAULT_ERROR_CAP, Stats};

use crate::policy::{AbortPolicy, FailureRatio};
use crate::ramp::SESSION_QUERY;
use crate::reporter::{NullReporter, Reporter};
use crate::signal;

#[derive(Clone, Debug)]
pub struct CapacityConfig {
    pub max_connections: usize,
    pub batch_size: usize,
    /// Gap between task spawns inside a batch (default: 100ms).
    pub spawn_spacing: Duration,
    /// Wait after a batch before reading its status (default: 1s).
    pub settle: Duration,
    /// Gap between batches (default: 2s).
    pub batch_delay: Duration,
    /// How long each task keeps its connection (default: 30s).
    pub hold: Duration,
    /// Extra join allowance on top of `hold` (default: 10s).
    pub join_grace: Duration,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    pub query: String,
    pub error_cap: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            max_connections: 200,
            batch_size: 10,
            spawn_spacing: Duration::from_millis(100),
            settle: Duration::from_secs(1),
            batch_delay: Duration::from_secs(2),
            hold: Duration::from_secs(30),
            join_grace: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(30),
            query: SESSION_QUERY.to_string(),
            error_cap: DEFAULT_ERROR_CAP,
        }
    }
}

/// Lock-free active/peak connection counter.
#[derive(Debug, Default)]
pub struct ConnectionGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConnectionGauge {
    /// Count one more open connection; returns the new active count.
    pub fn open(&self) -> usize {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        now
    }

    /// Count one closed connection; returns the new active count.
    pub fn close(&self) -> usize {
        self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapacityEvent {
    Connected {
        task: usize,
        session: Option<String>,
        active: usize,
        latency: Duration,
    },
    Failed {
        task: usize,
        error: AttemptError,
    },
    Closed {
        task: usize,
        active: usize,
    },
}

/// Snapshot taken after each batch settles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchStatus {
    /// 1-based batch number.
    pub batch: usize,
    pub active: usize,
    pub peak: usize,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CapacityReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub max_connections: usize,
    /// Tasks actually spawned.
    pub attempted: usize,
    pub peak_concurrent: usize,
    pub aborted: bool,
    pub interrupted: bool,
    /// Tasks still running when the join timeout expired.
    pub stragglers: usize,
    pub stats: Stats,
}

impl CapacityReport {
    pub fn exit_code(&self) -> u8 {
        0
    }
}

#[derive(Clone)]
struct TaskContext {
    connector: Arc<dyn Connector>,
    aggregator: Arc<Aggregator>,
    reporter: Arc<dyn Reporter>,
    gauge: Arc<ConnectionGauge>,
    config: Arc<CapacityConfig>,
    interrupt: watch::Receiver<bool>,
}

async fn hold_connection(task: usize, mut ctx: TaskContext) {
    let began = Instant::now();
    let mut conn =
        match Connection::create(&*ctx.connector, task as u64, ctx.config.connect_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                let error = AttemptError::from(e);
                ctx.reporter.capacity_event(&CapacityEvent::Failed {
                    task,
                    error: error.clone(),
                });
                ctx.aggregator
                    .record(AttemptRecord::failure(error, began.elapsed()))
                    .await;
                return;
            }
        };

    let active = ctx.gauge.open();
    let probe = conn.probe(&ctx.config.query, ctx.config.probe_timeout).await;
    match probe.outcome {
        Ok(row) => {
            let latency = began.elapsed();
            ctx.aggregator.record(AttemptRecord::success(latency)).await;
            let session = row.get("SessionID").or_else(|| row.value(0));
            ctx.reporter.capacity_event(&CapacityEvent::Connected {
                task,
                session: session.map(str::to_string),
                active,
                latency,
            });

            tokio::select! {
                _ = tokio::time::sleep(ctx.config.hold) => {}
                _ = signal::triggered(&mut ctx.interrupt) => {
                    debug!(task, "releasing held connection early");
                }
            }
        }
        Err(e) => {
            let error = AttemptError::from(e);
            ctx.reporter.capacity_event(&CapacityEvent::Failed {
                task,
                error: error.clone(),
            });
            ctx.aggregator
                .record(AttemptRecord::failure(error, began.elapsed()))
                .await;
        }
    }

    conn.close().await;
    let active = ctx.gauge.close();
    ctx.reporter
        .capacity_event(&CapacityEvent::Closed { task, active });
}

pub struct CapacityProbe {
    config: CapacityConfig,
    connector: Arc<dyn Connector>,
    reporter: Arc<dyn Reporter>,
    policy: Box<dyn AbortPolicy>,
}

impl CapacityProbe {
    /// Probe with the default `FailureRatio(0.5)` abort policy.
    pub fn new(config: CapacityConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            reporter: Arc::new(NullReporter),
            policy: Box::new(FailureRatio(0.5)),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_policy(mut self, policy: impl AbortPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub async fn run(self, mut interrupt: watch::Receiver<bool>) -> CapacityReport {
        let started_at = Local::now();
        let started = Instant::now();
        let config = Arc::new(self.config.clone());
        let max = config.max_connections;
        let batch_size = config.batch_size.max(1);

        let ctx = TaskContext {
            connector: self.connector.clone(),
            aggregator: Arc::new(Aggregator::new(config.error_cap)),
            reporter: self.reporter.clone(),
            gauge: Arc::new(ConnectionGauge::default()),
            config: config.clone(),
            interrupt: interrupt.clone(),
        };

        info!(max, batch_size, hold = ?config.hold, "capacity probe started");

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(max);
        let mut aborted = false;
        let mut interrupted = signal::is_set(&interrupt);

        'batches: for (index, first) in (0..max).step_by(batch_size).enumerate() {
            if interrupted {
                break;
            }
            let last = (first + batch_size).min(max);
            self.reporter.capacity_batch_started(first + 1, last);

            for task in first + 1..=last {
                handles.push(tokio::spawn(hold_connection(task, ctx.clone())));
                tokio::select! {
                    _ = tokio::time::sleep(config.spawn_spacing) => {}
                    _ = signal::triggered(&mut interrupt) => {
                        interrupted = true;
                        break 'batches;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(config.settle) => {}
                _ = signal::triggered(&mut interrupt) => {
                    interrupted = true;
                    break 'batches;
                }
            }

            let stats = ctx.aggregator.snapshot().await;
            self.reporter.capacity_batch_status(&BatchStatus {
                batch: index + 1,
                active: ctx.gauge.active(),
                peak: ctx.gauge.peak(),
                successes: stats.successes,
                failures: stats.failures,
            });

            if self.policy.should_abort(&stats) {
                warn!(
                    failures = stats.failures,
                    successes = stats.successes,
                    "high failure rate, no further batches"
                );
                self.reporter.capacity_aborted(&stats);
                aborted = true;
                break;
            }

            if last < max {
                tokio::select! {
                    _ = tokio::time::sleep(config.batch_delay) => {}
                    _ = signal::triggered(&mut interrupt) => {
                        interrupted = true;
                        break 'batches;
                    }
                }
            }
        }

        // Holders watch the same interrupt and release early on their own.
        let join_timeout = config.hold.saturating_add(config.join_grace);
        self.reporter.capacity_draining(join_timeout);
        let attempted = handles.len();
        let mut stragglers = 0;
        for handle in handles {
            match tokio::time::timeout(join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "connection task failed"),
                Err(_) => stragglers += 1,
            }
        }

        let report = CapacityReport {
            started_at,
            finished_at: Local::now(),
            elapsed: started.elapsed(),
            max_connections: max,
            attempted,
            peak_concurrent: ctx.gauge.peak(),
            aborted,
            interrupted: interrupted || signal::is_set(&interrupt),
            stragglers,
            stats: ctx.aggregator.snapshot().await,
        };
        info!(
            attempted,
            peak = report.peak_concurrent,
            failures = report.stats.failures,
            "capacity probe finished"
        );
        self.reporter.capacity_finished(&report);
        report
    }
}
