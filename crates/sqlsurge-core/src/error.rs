//! Error taxonomy for connection, pool, query and attempt failures.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Result type alias for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Establishing a session failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("login rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// A query on an established session failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("server rejected query: {0}")]
    Rejected(String),

    #[error("connection broken: {0}")]
    Broken(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("query returned no rows")]
    NoRow,

    #[error("connection already closed")]
    Closed,
}

/// Checking a connection out of the pool failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("connection pool exhausted (waited {0:?})")]
    Exhausted(Duration),

    #[error("connection pool is closed")]
    Closed,
}

/// Classification stored with every failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// No pooled connection became available in time.
    PoolExhausted,
    /// The database or the path to it reported a failure.
    Remote,
    /// Anything else.
    Unexpected,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::PoolExhausted => write!(f, "pool-exhausted"),
            FailureKind::Remote => write!(f, "remote"),
            FailureKind::Unexpected => write!(f, "unexpected"),
        }
    }
}

/// A failed attempt as seen by a worker.
///
/// Every lower-level error converts into one of these at the worker
/// boundary; none of them propagate further.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptError {
    #[error("connection pool exhausted (waited {0:?})")]
    PoolExhausted(Duration),

    #[error("{0}")]
    Remote(String),

    #[error("{0}")]
    Unexpected(String),
}

impl AttemptError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AttemptError::PoolExhausted(_) => FailureKind::PoolExhausted,
            AttemptError::Remote(_) => FailureKind::Remote,
            AttemptError::Unexpected(_) => FailureKind::Unexpected,
        }
    }
}

impl From<PoolError> for AttemptError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted(waited) => AttemptError::PoolExhausted(waited),
            PoolError::Closed => AttemptError::Unexpected(err.to_string()),
        }
    }
}

impl From<QueryError> for AttemptError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Rejected(_) | QueryError::Broken(_) | QueryError::Timeout(_) => {
                AttemptError::Remote(err.to_string())
            }
            QueryError::NoRow | QueryError::Closed => AttemptError::Unexpected(err.to_string()),
        }
    }
}

impl From<ConnectError> for AttemptError {
    fn from(err: ConnectError) -> Self {
        AttemptError::Remote(err.to_string())
    }
}

/// Loading or validating configuration failed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse tuning profile: {0}")]
    Parse(#[from] toml::de::Error),
}
