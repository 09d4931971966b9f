//! sqlsurge-driver: runs load against a target and reports what happened.
//!
//! # Architecture
//!
//! ```text
//! WorkloadDriver
//!   ├── ConnectionPool::warm_up()
//!   ├── Worker × N (staggered) ── acquire → probe → record → release
//!   ├── periodic tick → Aggregator::snapshot() → Reporter::periodic()
//!   │                                       └──→ AbortPolicy::should_abort()
//!   └── stop signal → join workers → close_all() → RunReport
//!
//! HealthCheck    - one session, probe per interval, reconnect on failure
//! RampProbe      - one connection at a time until the server refuses
//! CapacityProbe  - batches of concurrent holders, peak concurrency
//! ```

pub mod capacity;
pub mod driver;
pub mod health;
pub mod policy;
pub mod ramp;
pub mod reporter;
pub mod signal;
pub mod worker;

pub use capacity::{
    BatchStatus, CapacityConfig, CapacityEvent, CapacityProbe, CapacityReport, ConnectionGauge,
};
pub use driver::{DriverState, RunReport, StopReason, WorkloadDriver};
pub use health::{HEALTH_QUERY, HealthCheck, HealthCheckConfig, HealthReport};
pub use policy::{AbortPolicy, FailureRatio};
pub use ramp::{FirstFailure, RampConfig, RampProbe, RampProgress, RampReport, RampStep, SESSION_QUERY};
pub use reporter::{AttemptEvent, NullReporter, Reporter};
pub use worker::{Worker, WorkerContext, WorkerState, WorkerSummary};
