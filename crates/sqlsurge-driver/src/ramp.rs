//! Gradual ramp: open connections one at a time and keep them open until
//! the server starts refusing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use sqlsurge_core::duration::serialize_secs;
use sqlsurge_core::{AttemptError, Connection, Connector, Row};
use sqlsurge_metrics::{Aggregator, AttemptRecord, DEFAULT_ERROR_CAP, Stats};

use crate::reporter::{NullReporter, Reporter};
use crate::signal;

pub const SESSION_QUERY: &str = "SELECT @@SPID AS SessionID, GETDATE() AS ConnTime";

#[derive(Clone, Debug)]
pub struct RampConfig {
    pub max_connections: usize,
    /// Pause between attempts (default: 2s).
    pub delay: Duration,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    pub query: String,
    /// Consecutive failures that end the ramp (default: 3).
    pub stall_after: usize,
    /// How long every held connection stays open once the ramp ends.
    pub hold: Duration,
    /// Emit a progress line every this many attempts.
    pub progress_every: usize,
    pub error_cap: usize,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(30),
            query: SESSION_QUERY.to_string(),
            stall_after: 3,
            hold: Duration::from_secs(10),
            progress_every: 10,
            error_cap: DEFAULT_ERROR_CAP,
        }
    }
}

/// One connection attempt.
#[derive(Debug)]
pub struct RampStep<'a> {
    /// 1-based attempt number.
    pub attempt: usize,
    /// Connections held after this attempt.
    pub active: usize,
    pub latency: Duration,
    pub outcome: Result<&'a Row, &'a AttemptError>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RampProgress {
    pub attempt: usize,
    pub max: usize,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub active: usize,
    pub successes: u64,
    pub failures: u64,
}

/// Where the server first refused a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FirstFailure {
    pub attempt: usize,
    /// Connections held when it happened.
    pub active: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct RampReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub max_connections: usize,
    pub first_failure: Option<FirstFailure>,
    /// Most connections held at once.
    pub peak_held: usize,
    /// Ended on consecutive failures rather than by reaching the maximum.
    pub stalled: bool,
    pub interrupted: bool,
    pub closed: usize,
    pub stats: Stats,
}

impl RampReport {
    /// Hitting a limit is the finding, not an error.
    pub fn exit_code(&self) -> u8 {
        0
    }
}

pub struct RampProbe {
    config: RampConfig,
    connector: Arc<dyn Connector>,
    reporter: Arc<dyn Reporter>,
}

impl RampProbe {
    pub fn new(config: RampConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            reporter: Arc::new(NullReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Dial and verify one connection; a connection whose query fails is closed.
    async fn open(&self, id: u64) -> Result<(Connection, Row), AttemptError> {
        let mut conn = Connection::create(&*self.connector, id, self.config.connect_timeout).await?;
        let probe = conn.probe(&self.config.query, self.config.probe_timeout).await;
        match probe.outcome {
            Ok(row) => Ok((conn, row)),
            Err(e) => {
                conn.close().await;
                Err(e.into())
            }
        }
    }

    pub async fn run(self, mut interrupt: watch::Receiver<bool>) -> RampReport {
        let started_at = Local::now();
        let started = Instant::now();
        let aggregator = Aggregator::new(self.config.error_cap);
        let max = self.config.max_connections;

        let mut held: Vec<Connection> = Vec::new();
        let mut peak_held = 0;
        let mut first_failure = None;
        let mut consecutive = 0;
        let mut stalled = false;
        let mut interrupted = signal::is_set(&interrupt);

        info!(max, delay = ?self.config.delay, "ramp started");

        for attempt in 1..=max {
            if interrupted {
                break;
            }
            let began = Instant::now();
            let result = self.open(attempt as u64).await;
            let latency = began.elapsed();

            match result {
                Ok((conn, row)) => {
                    held.push(conn);
                    peak_held = peak_held.max(held.len());
                    consecutive = 0;
                    aggregator.record(AttemptRecord::success(latency)).await;
                    self.reporter.ramp_step(&RampStep {
                        attempt,
                        active: held.len(),
                        latency,
                        outcome: Ok(&row),
                    });
                }
                Err(error) => {
                    consecutive += 1;
                    self.reporter.ramp_step(&RampStep {
                        attempt,
                        active: held.len(),
                        latency,
                        outcome: Err(&error),
                    });
                    if first_failure.is_none() {
                        warn!(attempt, active = held.len(), "first connection failure");
                        first_failure = Some(FirstFailure {
                            attempt,
                            active: held.len(),
                        });
                        self.reporter.ramp_first_failure(attempt, held.len());
                    }
                    aggregator.record(AttemptRecord::failure(error, latency)).await;
                }
            }

            if attempt % self.config.progress_every.max(1) == 0 {
                let stats = aggregator.snapshot().await;
                self.reporter.ramp_progress(&RampProgress {
                    attempt,
                    max,
                    elapsed: started.elapsed(),
                    active: held.len(),
                    successes: stats.successes,
                    failures: stats.failures,
                });
            }

            if consecutive >= self.config.stall_after {
                warn!(consecutive, active = held.len(), "connection limit reached, stopping ramp");
                self.reporter.ramp_stalled(consecutive, held.len());
                stalled = true;
                break;
            }

            if attempt < max {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.delay) => {}
                    _ = signal::triggered(&mut interrupt) => interrupted = true,
                }
            }
        }

        if !held.is_empty() && !interrupted {
            self.reporter.ramp_holding(held.len(), self.config.hold);
            tokio::select! {
                _ = tokio::time::sleep(self.config.hold) => {}
                _ = signal::triggered(&mut interrupt) => interrupted = true,
            }
        }

        let closed = held.len();
        for mut conn in held {
            conn.close().await;
        }
        info!(closed, peak_held, "ramp finished");

        let report = RampReport {
            started_at,
            finished_at: Local::now(),
            elapsed: started.elapsed(),
            max_connections: max,
            first_failure,
            peak_held,
            stalled,
            interrupted,
            closed,
            stats: aggregator.snapshot().await,
        };
        self.reporter.ramp_finished(&report);
        report
    }
}
