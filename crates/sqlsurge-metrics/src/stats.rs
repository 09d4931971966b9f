//! Derived statistics computed from an aggregator snapshot.

use std::time::Duration;

use serde::Serialize;

use sqlsurge_core::FailureKind;

/// Failed attempts broken down by classification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub pool_exhausted: u64,
    pub remote: u64,
    pub unexpected: u64,
}

impl FailureCounts {
    pub(crate) fn bump(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::PoolExhausted => self.pool_exhausted += 1,
            FailureKind::Remote => self.remote += 1,
            FailureKind::Unexpected => self.unexpected += 1,
        }
    }

    pub fn get(&self, kind: FailureKind) -> u64 {
        match kind {
            FailureKind::PoolExhausted => self.pool_exhausted,
            FailureKind::Remote => self.remote,
            FailureKind::Unexpected => self.unexpected,
        }
    }
}

/// Latency distribution of successful attempts, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencySummary {
    /// Summarize `latencies`; `None` for an empty sample set.
    pub fn from_samples(latencies: &[Duration]) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }

        let mut sorted = latencies.to_vec();
        sorted.sort_unstable();

        let total_nanos: u128 = sorted.iter().map(Duration::as_nanos).sum();
        let mean_nanos = total_nanos as f64 / sorted.len() as f64;

        Some(Self {
            samples: sorted.len(),
            mean_ms: mean_nanos / 1_000_000.0,
            min_ms: millis(sorted[0]),
            max_ms: millis(sorted[sorted.len() - 1]),
            p50_ms: millis(percentile(&sorted, 0.50)),
            p95_ms: millis(percentile(&sorted, 0.95)),
            p99_ms: millis(percentile(&sorted, 0.99)),
        })
    }
}

/// Value at index `floor(rank * len)` of a sorted, non-empty sample,
/// clamped to the last element.
pub fn percentile(sorted: &[Duration], rank: f64) -> Duration {
    let idx = (sorted.len() as f64 * rank) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Point-in-time view of everything recorded so far.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Stats {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub failures_by_kind: FailureCounts,
    /// Successes over total, as a percentage. `None` before the first attempt.
    pub success_rate: Option<f64>,
    /// `None` until at least one attempt succeeded.
    pub latency: Option<LatencySummary>,
    /// First unique error messages, in arrival order.
    pub errors: Vec<String>,
}

impl Stats {
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }

    /// Attempts per second over `elapsed`.
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total as f64 / secs
        } else {
            0.0
        }
    }
}
