//! Early-abort hooks evaluated against live statistics.

use sqlsurge_metrics::Stats;

/// Decides, from a statistics snapshot, whether a run should stop early.
pub trait AbortPolicy: Send + Sync {
    fn should_abort(&self, stats: &Stats) -> bool;
}

impl<F> AbortPolicy for F
where
    F: Fn(&Stats) -> bool + Send + Sync,
{
    fn should_abort(&self, stats: &Stats) -> bool {
        self(stats)
    }
}

/// Abort once failures outnumber successes by more than `ratio`.
///
/// `FailureRatio(0.5)` trips when `failures > successes * 0.5`, i.e. above
/// roughly a one-in-three failure rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FailureRatio(pub f64);

impl AbortPolicy for FailureRatio {
    fn should_abort(&self, stats: &Stats) -> bool {
        stats.failures as f64 > stats.successes as f64 * self.0
    }
}
