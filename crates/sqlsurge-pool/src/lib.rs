//! sqlsurge-pool: the bounded connection pool the workload runs against.
//!
//! # Architecture
//!
//! ```text
//! ConnectionPool::warm_up()
//!   → Connector::connect × size (sequential, failures shrink the pool)
//!
//! Worker
//!   → acquire(timeout)  - wait on the semaphore, pop an idle connection
//!   → probe
//!   → release(conn)     - liveness probe outside the lock
//!       → healthy → back to the idle set
//!       → dead    → close, dial one replacement
//!           → dialled → Replaced
//!           → failed  → Shrunk (capacity lost for good)
//!
//! Driver
//!   → close_all()       - close the semaphore and every idle connection
//! ```

pub mod pool;

pub use pool::{ConnectionPool, PoolConfig, PoolStats, ReleaseOutcome, WarmupFailure, WarmupReport};
