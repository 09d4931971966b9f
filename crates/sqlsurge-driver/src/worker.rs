//! Worker task: sleep, acquire, probe, record, release, repeat.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use sqlsurge_core::{AttemptError, WorkloadConfig};
use sqlsurge_metrics::{Aggregator, AttemptRecord};
use sqlsurge_pool::{ConnectionPool, ReleaseOutcome};

use crate::reporter::{AttemptEvent, Reporter};
use crate::signal;

/// Lifecycle of one worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Stopping,
    Done,
}

/// Per-worker totals returned when the task ends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub id: usize,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Everything a worker shares with the driver and its siblings.
#[derive(Clone)]
pub struct WorkerContext {
    pub pool: Arc<ConnectionPool>,
    pub aggregator: Arc<Aggregator>,
    pub reporter: Arc<dyn Reporter>,
    pub config: Arc<WorkloadConfig>,
    /// When the run entered Running; the worker stops at `started + duration`.
    pub started: Instant,
    pub stop: watch::Receiver<bool>,
}

pub struct Worker {
    id: usize,
    ctx: WorkerContext,
    rng: StdRng,
    state: WorkerState,
    summary: WorkerSummary,
}

impl Worker {
    pub fn new(id: usize, ctx: WorkerContext) -> Self {
        Self {
            id,
            ctx,
            rng: StdRng::from_os_rng(),
            state: WorkerState::Running,
            summary: WorkerSummary {
                id,
                ..Default::default()
            },
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Uniform draw from `[min_interval, max_interval]`.
    fn next_pause(&mut self) -> Duration {
        let min = self.ctx.config.min_interval.as_secs_f64();
        let max = self.ctx.config.max_interval.as_secs_f64();
        if max <= min {
            return self.ctx.config.min_interval;
        }
        Duration::from_secs_f64(self.rng.random_range(min..=max))
    }

    pub async fn run(mut self) -> WorkerSummary {
        let deadline = signal::deadline(self.ctx.started, self.ctx.config.duration);
        self.ctx.reporter.worker_started(self.id);
        debug!(worker = self.id, "worker started");

        while self.state == WorkerState::Running {
            let wake = signal::deadline(Instant::now(), self.next_pause()).min(deadline);
            let mut stop = self.ctx.stop.clone();
            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                _ = signal::triggered(&mut stop) => {}
            }

            if signal::is_set(&self.ctx.stop) || Instant::now() >= deadline {
                self.state = WorkerState::Stopping;
                break;
            }

            self.attempt().await;
        }

        self.state = WorkerState::Done;
        debug!(
            worker = self.id,
            attempts = self.summary.attempts,
            failures = self.summary.failures,
            "worker finished"
        );
        self.ctx.reporter.worker_finished(&self.summary);
        self.summary
    }

    async fn attempt(&mut self) {
        self.summary.attempts += 1;
        let seq = self.summary.attempts;
        let began = Instant::now();
        let config = self.ctx.config.clone();

        let mut conn = match self.ctx.pool.acquire(config.acquire_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                let error = AttemptError::from(e);
                self.fail(seq, error, began.elapsed()).await;
                return;
            }
        };

        let probe = conn.probe(&config.probe_query, config.probe_timeout).await;
        match probe.outcome {
            Ok(row) => {
                self.summary.successes += 1;
                self.ctx
                    .aggregator
                    .record(AttemptRecord::success(probe.latency))
                    .await;
                self.ctx.reporter.attempt(&AttemptEvent {
                    worker: self.id,
                    seq,
                    elapsed: self.ctx.started.elapsed(),
                    latency: probe.latency,
                    outcome: Ok(&row),
                });
            }
            Err(e) => {
                self.fail(seq, AttemptError::from(e), probe.latency).await;
            }
        }

        // Released whether or not the probe succeeded.
        if let ReleaseOutcome::Shrunk(error) = self.ctx.pool.release(conn).await {
            warn!(worker = self.id, error = %error, "pool lost a connection");
            self.ctx.reporter.connection_lost(self.id, &error);
        }
    }

    async fn fail(&mut self, seq: u64, error: AttemptError, duration: Duration) {
        self.summary.failures += 1;
        self.ctx.reporter.attempt(&AttemptEvent {
            worker: self.id,
            seq,
            elapsed: self.ctx.started.elapsed(),
            latency: duration,
            outcome: Err(&error),
        });
        debug!(worker = self.id, seq, kind = %error.kind(), error = %error, "attempt failed");
        self.ctx
            .aggregator
            .record(AttemptRecord::failure(error, duration))
            .await;
    }
}
