//! Attempt aggregator: one mutex, linearized records, snapshot reads.

use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tracing::trace;

use sqlsurge_core::AttemptError;

use crate::stats::{FailureCounts, LatencySummary, Stats};

/// Unique error messages kept when no cap is configured.
pub const DEFAULT_ERROR_CAP: usize = 10;

/// Outcome of one probe attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptRecord {
    pub timestamp: SystemTime,
    pub duration: Duration,
    pub outcome: Result<(), AttemptError>,
}

impl AttemptRecord {
    pub fn success(latency: Duration) -> Self {
        Self {
            timestamp: SystemTime::now(),
            duration: latency,
            outcome: Ok(()),
        }
    }

    pub fn failure(error: AttemptError, duration: Duration) -> Self {
        Self {
            timestamp: SystemTime::now(),
            duration,
            outcome: Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Clone, Debug, Default)]
struct AggregatorState {
    total: u64,
    successes: u64,
    failures: u64,
    by_kind: FailureCounts,
    /// Successful latencies in arrival order.
    latencies: Vec<Duration>,
    errors: Vec<String>,
}

/// Shared accounting for every worker's attempts.
///
/// Pass it around in an `Arc`; `record` and `snapshot` serialize on one lock
/// and the derived statistics are computed after the lock is released.
#[derive(Debug)]
pub struct Aggregator {
    state: Mutex<AggregatorState>,
    error_cap: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_CAP)
    }
}

impl Aggregator {
    pub fn new(error_cap: usize) -> Self {
        Self {
            state: Mutex::new(AggregatorState::default()),
            error_cap,
        }
    }

    pub async fn record(&self, record: AttemptRecord) {
        let mut state = self.state.lock().await;
        state.total += 1;
        match record.outcome {
            Ok(()) => {
                state.successes += 1;
                state.latencies.push(record.duration);
            }
            Err(error) => {
                state.failures += 1;
                state.by_kind.bump(error.kind());
                let message = error.to_string();
                if state.errors.len() < self.error_cap && !state.errors.contains(&message) {
                    state.errors.push(message);
                }
            }
        }
        trace!(total = state.total, "attempt recorded");
    }

    pub async fn snapshot(&self) -> Stats {
        let state = self.state.lock().await.clone();

        let success_rate = (state.total > 0)
            .then(|| state.successes as f64 / state.total as f64 * 100.0);

        Stats {
            total: state.total,
            successes: state.successes,
            failures: state.failures,
            failures_by_kind: state.by_kind,
            success_rate,
            latency: LatencySummary::from_samples(&state.latencies),
            errors: state.errors,
        }
    }
}
