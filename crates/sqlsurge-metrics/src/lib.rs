//! sqlsurge-metrics: outcome accounting shared by every worker.
//!
//! # Architecture
//!
//! ```text
//! Aggregator (Arc, one mutex)
//!   ├── record(AttemptRecord) ← called by every worker after each attempt
//!   └── snapshot() → Stats    ← periodic reporter and final summary
//!         └── LatencySummary (mean, min, max, P50, P95, P99)
//! ```

pub mod aggregator;
pub mod stats;

pub use aggregator::{Aggregator, AttemptRecord, DEFAULT_ERROR_CAP};
pub use stats::{FailureCounts, LatencySummary, Stats};
