//! Single-session health check: one connection, one probe per interval,
//! reconnect when the server side breaks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use sqlsurge_core::duration::serialize_secs;
use sqlsurge_core::{AttemptError, Connection, Connector, FailureKind};
use sqlsurge_metrics::{Aggregator, AttemptRecord, DEFAULT_ERROR_CAP, Stats};

use crate::reporter::{AttemptEvent, NullReporter, Reporter};
use crate::signal;

pub const HEALTH_QUERY: &str = "SELECT GETDATE() AS CurrentTime, @@SPID AS SessionID";

#[derive(Clone, Debug)]
pub struct HealthCheckConfig {
    pub duration: Duration,
    /// Pause between probes (default: 5s).
    pub interval: Duration,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    /// Cadence of periodic statistics (default: 5m).
    pub stats_interval: Duration,
    pub query: String,
    pub error_cap: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10 * 60),
            interval: Duration::from_millis(5000),
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(30),
            stats_interval: Duration::from_secs(5 * 60),
            query: HEALTH_QUERY.to_string(),
            error_cap: DEFAULT_ERROR_CAP,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub interrupted: bool,
    pub stats: Stats,
    /// Successful reconnections after the initial connection.
    pub reconnects: u64,
    pub reconnect_failures: u64,
}

impl HealthReport {
    pub fn exit_code(&self) -> u8 {
        if self.stats.is_clean() { 0 } else { 1 }
    }
}

pub struct HealthCheck {
    config: HealthCheckConfig,
    connector: Arc<dyn Connector>,
    reporter: Arc<dyn Reporter>,
    aggregator: Aggregator,
    conn: Option<Connection>,
    next_id: u64,
    seq: u64,
    reconnects: u64,
    reconnect_failures: u64,
}

impl HealthCheck {
    pub fn new(config: HealthCheckConfig, connector: Arc<dyn Connector>) -> Self {
        let aggregator = Aggregator::new(config.error_cap);
        Self {
            config,
            connector,
            reporter: Arc::new(NullReporter),
            aggregator,
            conn: None,
            next_id: 1,
            seq: 0,
            reconnects: 0,
            reconnect_failures: 0,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    async fn connect(&mut self) -> Result<(), AttemptError> {
        let id = self.next_id;
        self.next_id += 1;
        let reconnect = id > 1;

        match Connection::create(&*self.connector, id, self.config.connect_timeout).await {
            Ok(conn) => {
                self.conn = Some(conn);
                if reconnect {
                    self.reconnects += 1;
                }
                self.reporter.health_connect(reconnect, Ok(()));
                Ok(())
            }
            Err(e) => {
                if reconnect {
                    self.reconnect_failures += 1;
                }
                warn!(reconnect, error = %e, "health check connection failed");
                self.reporter.health_connect(reconnect, Err(&e));
                Err(AttemptError::from(e))
            }
        }
    }

    async fn drop_connection(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
    }

    async fn record_failure(&mut self, started: Instant, error: AttemptError, latency: Duration) {
        self.reporter.attempt(&AttemptEvent {
            worker: 1,
            seq: self.seq,
            elapsed: started.elapsed(),
            latency,
            outcome: Err(&error),
        });
        self.aggregator
            .record(AttemptRecord::failure(error, latency))
            .await;
    }

    /// One tick: make sure a session exists, probe it, react to failure.
    async fn tick(&mut self, started: Instant) {
        self.seq += 1;

        if self.conn.is_none() {
            let began = Instant::now();
            if let Err(error) = self.connect().await {
                self.record_failure(started, error, began.elapsed()).await;
                return;
            }
        }
        let Some(conn) = self.conn.as_mut() else {
            return;
        };

        let probe = conn.probe(&self.config.query, self.config.probe_timeout).await;
        match probe.outcome {
            Ok(row) => {
                self.aggregator
                    .record(AttemptRecord::success(probe.latency))
                    .await;
                self.reporter.attempt(&AttemptEvent {
                    worker: 1,
                    seq: self.seq,
                    elapsed: started.elapsed(),
                    latency: probe.latency,
                    outcome: Ok(&row),
                });
            }
            Err(e) => {
                let error = AttemptError::from(e);
                let remote = error.kind() == FailureKind::Remote;
                self.record_failure(started, error, probe.latency).await;
                if remote {
                    // Replace the session once; a failed reconnect is retried
                    // at the next tick.
                    self.drop_connection().await;
                    let _ = self.connect().await;
                }
            }
        }
    }

    pub async fn run(mut self, mut interrupt: watch::Receiver<bool>) -> HealthReport {
        let started_at = Local::now();
        let started = Instant::now();
        let deadline = signal::deadline(started, self.config.duration);
        let every = self.config.stats_interval;
        let mut ticker = tokio::time::interval_at(signal::deadline(started, every), every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(duration = ?self.config.duration, interval = ?self.config.interval, "health check started");

        // The first tick opens the initial session.
        let mut interrupted = signal::is_set(&interrupt);
        'ticks: while !interrupted && Instant::now() < deadline {
            self.tick(started).await;

            let wake = signal::deadline(Instant::now(), self.config.interval).min(deadline);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(wake) => break,
                    _ = signal::triggered(&mut interrupt) => {
                        interrupted = true;
                        break 'ticks;
                    }
                    _ = ticker.tick() => {
                        let stats = self.aggregator.snapshot().await;
                        self.reporter.periodic(started.elapsed(), self.config.duration, &stats);
                    }
                }
            }
        }

        self.drop_connection().await;

        let report = HealthReport {
            started_at,
            finished_at: Local::now(),
            elapsed: started.elapsed(),
            interrupted,
            stats: self.aggregator.snapshot().await,
            reconnects: self.reconnects,
            reconnect_failures: self.reconnect_failures,
        };
        info!(
            total = report.stats.total,
            failures = report.stats.failures,
            "health check finished"
        );
        self.reporter.health_finished(&report);
        report
    }
}
