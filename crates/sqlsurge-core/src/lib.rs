//! sqlsurge-core: shared types for the sqlsurge load harness.
//!
//! Defines the target and credentials under test, the error taxonomy every
//! attempt is classified into, the `Session`/`Connector` seam to the
//! database protocol, the `Connection` wrapper the pool hands out, and
//! the workload configuration.

pub mod config;
pub mod connection;
pub mod duration;
pub mod error;
pub mod target;

pub use config::{DEFAULT_PROBE_QUERY, LIVENESS_QUERY, TuningProfile, WorkloadConfig};
pub use connection::{Connection, Connector, ProbeResult, Row, Session};
pub use duration::{MAX_SPAN, parse_duration};
pub use error::{
    AttemptError, ConfigError, ConfigResult, ConnectError, FailureKind, PoolError, QueryError,
};
pub use target::{Credentials, DEFAULT_PORT, Target};
