//! Workload driver: warm the pool, run the workers, stop them, report.
//!
//! ```text
//! Initializing ─validate─▶ Warming ─warm_up─▶ Running ──┬─ deadline
//!                                                        ├─ interrupt
//!                                                        └─ policy abort
//!                                                             │
//!                         Closed ◀─close_all─ Stopping ◀──────┘
//!                                   (join workers, detach stragglers)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use sqlsurge_core::duration::serialize_secs;
use sqlsurge_core::{ConfigResult, Connector, WorkloadConfig};
use sqlsurge_metrics::{Aggregator, Stats};
use sqlsurge_pool::{ConnectionPool, PoolConfig, PoolStats};

use crate::policy::AbortPolicy;
use crate::reporter::{NullReporter, Reporter};
use crate::signal;
use crate::worker::{Worker, WorkerContext, WorkerSummary};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Initializing,
    Warming,
    Running,
    Stopping,
    Closed,
}

/// Why the Running phase ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    DeadlineReached,
    Interrupted,
    PolicyAbort,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::DeadlineReached => write!(f, "deadline reached"),
            StopReason::Interrupted => write!(f, "interrupted"),
            StopReason::PolicyAbort => write!(f, "aborted by policy"),
        }
    }
}

/// Final outcome of a workload run.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub reason: StopReason,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub planned: Duration,
    pub warmup_ready: usize,
    pub warmup_requested: usize,
    pub stats: Stats,
    pub pool: PoolStats,
    pub workers: Vec<WorkerSummary>,
    /// Workers that missed the join timeout and were left running.
    pub stragglers: usize,
    /// Idle connections closed at shutdown.
    pub connections_closed: usize,
}

impl RunReport {
    /// 0 iff no attempt failed.
    pub fn exit_code(&self) -> u8 {
        if self.stats.is_clean() { 0 } else { 1 }
    }

    pub fn queries_per_second(&self) -> f64 {
        self.stats.throughput(self.elapsed)
    }
}

/// Orchestrates one workload run against a single target.
pub struct WorkloadDriver {
    config: WorkloadConfig,
    connector: Arc<dyn Connector>,
    reporter: Arc<dyn Reporter>,
    policy: Option<Box<dyn AbortPolicy>>,
    state: DriverState,
}

impl WorkloadDriver {
    pub fn new(config: WorkloadConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            reporter: Arc::new(NullReporter),
            policy: None,
            state: DriverState::Initializing,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Evaluate `policy` on every periodic statistics tick.
    pub fn with_policy(mut self, policy: impl AbortPolicy + 'static) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    fn transition(&mut self, next: DriverState) {
        info!(from = ?self.state, to = ?next, "driver state change");
        self.state = next;
    }

    /// Run to completion. Only configuration errors are returned; every
    /// attempt-level failure ends up in the report instead.
    pub async fn run(mut self, mut interrupt: watch::Receiver<bool>) -> ConfigResult<RunReport> {
        self.config.validate()?;
        let started_at = Local::now();
        let config = Arc::new(self.config.clone());

        self.transition(DriverState::Warming);
        let pool = Arc::new(ConnectionPool::new(
            PoolConfig::from(config.as_ref()),
            self.connector.clone(),
        ));
        let warmup = pool.warm_up().await;
        self.reporter.warmup_finished(&warmup);

        let aggregator = Arc::new(Aggregator::new(config.error_cap));
        let (stop_tx, stop_rx) = watch::channel(false);
        let started = Instant::now();

        self.transition(DriverState::Running);
        let ctx = WorkerContext {
            pool: pool.clone(),
            aggregator: aggregator.clone(),
            reporter: self.reporter.clone(),
            config: config.clone(),
            started,
            stop: stop_rx,
        };
        let (handles, early_stop) = self.spawn_workers(&ctx, &mut interrupt).await;
        self.reporter.workers_started(handles.len());

        let reason = match early_stop {
            Some(reason) => reason,
            None => self.supervise(started, &aggregator, &mut interrupt).await,
        };

        self.transition(DriverState::Stopping);
        info!(%reason, "stopping workers");
        self.reporter.stopping(reason);
        // Err only if every worker already dropped its receiver.
        let _ = stop_tx.send(true);

        let (workers, stragglers) = join_workers(handles, config.join_timeout).await;

        let connections_closed = pool.close_all().await;
        self.reporter.pool_closed(connections_closed);
        self.transition(DriverState::Closed);

        let report = RunReport {
            reason,
            started_at,
            finished_at: Local::now(),
            elapsed: started.elapsed(),
            planned: config.duration,
            warmup_ready: warmup.ready,
            warmup_requested: warmup.requested,
            stats: aggregator.snapshot().await,
            pool: pool.stats().await,
            workers,
            stragglers,
            connections_closed,
        };
        self.reporter.run_finished(&report);
        Ok(report)
    }

    /// Spawn workers one stagger apart. An interrupt during the ramp stops
    /// spawning and is returned as the stop reason.
    async fn spawn_workers(
        &self,
        ctx: &WorkerContext,
        interrupt: &mut watch::Receiver<bool>,
    ) -> (Vec<JoinHandle<WorkerSummary>>, Option<StopReason>) {
        let count = self.config.worker_count();
        let stagger = self.config.worker_stagger;
        let mut handles = Vec::with_capacity(count);

        for id in 1..=count {
            handles.push(tokio::spawn(Worker::new(id, ctx.clone()).run()));
            if id == count || stagger.is_zero() {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(stagger) => {}
                _ = signal::triggered(interrupt) => {
                    info!(spawned = id, requested = count, "interrupted while starting workers");
                    return (handles, Some(StopReason::Interrupted));
                }
            }
        }

        (handles, None)
    }

    /// Wait for the deadline, an interrupt or a policy abort, emitting
    /// periodic statistics in the meantime.
    async fn supervise(
        &self,
        started: Instant,
        aggregator: &Aggregator,
        interrupt: &mut watch::Receiver<bool>,
    ) -> StopReason {
        let deadline = signal::deadline(started, self.config.duration);
        let every = self.config.stats_interval;
        let mut ticker = tokio::time::interval_at(signal::deadline(started, every), every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return StopReason::DeadlineReached,
                _ = signal::triggered(interrupt) => return StopReason::Interrupted,
                _ = ticker.tick() => {
                    let stats = aggregator.snapshot().await;
                    self.reporter.periodic(started.elapsed(), self.config.duration, &stats);
                    if let Some(policy) = &self.policy {
                        if policy.should_abort(&stats) {
                            warn!(
                                failures = stats.failures,
                                successes = stats.successes,
                                "abort policy triggered"
                            );
                            return StopReason::PolicyAbort;
                        }
                    }
                }
            }
        }
    }
}

/// Join each worker with its own timeout. Workers that miss it are
/// detached, not aborted, and counted as stragglers.
async fn join_workers(
    handles: Vec<JoinHandle<WorkerSummary>>,
    timeout: Duration,
) -> (Vec<WorkerSummary>, usize) {
    let mut summaries = Vec::with_capacity(handles.len());
    let mut stragglers = 0;

    for handle in handles {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(summary)) => summaries.push(summary),
            Ok(Err(e)) => warn!(error = %e, "worker task failed"),
            Err(_) => {
                stragglers += 1;
                warn!(timeout = ?timeout, "worker did not stop in time, detaching");
            }
        }
    }

    (summaries, stragglers)
}

impl std::fmt::Debug for WorkloadDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadDriver")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("policy", &self.policy.is_some())
            .finish_non_exhaustive()
    }
}
