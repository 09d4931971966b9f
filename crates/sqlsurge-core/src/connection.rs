//! Connection abstraction over an opaque database session.
//!
//! The wire protocol is an external collaborator: a [`Connector`] dials the
//! server and hands back a boxed [`Session`] that can run a query and close.
//! [`Connection`] wraps one session with the metadata the pool needs
//! (id, creation time, liveness) and turns query execution into a timed
//! [`ProbeResult`].
//!
//! ```text
//! Connector::connect(timeout) → Box<dyn Session>
//!   → Connection { id, created_at, alive }
//!     → probe(query, timeout) → ProbeResult { latency, outcome }
//!     → close()  (idempotent)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ConnectError, QueryError};

/// First row of a query result, rendered as `(column, value)` text pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: append a column.
    pub fn with_column(mut self, name: &str, value: &str) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.columns.push((name.into(), value.into()));
    }

    /// Value of the first column named `name` (case-insensitive, as T-SQL is).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Value at a zero-based column position.
    pub fn value(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Trait abstracting one live database session.
///
/// `sqlsurge-mssql` implements this over a TDS client; tests use mocks.
#[async_trait]
pub trait Session: Send + std::fmt::Debug {
    /// Run `query` and return its first row.
    async fn execute(&mut self, query: &str) -> Result<Row, QueryError>;
    /// Release the session. Must tolerate being called on a broken session.
    async fn close(&mut self);
}

/// Factory for new sessions, capturing address and credentials.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish one session. No retry: callers decide what a failure means.
    async fn connect(&self, timeout: Duration) -> Result<Box<dyn Session>, ConnectError>;
}

/// Outcome of one timed round trip.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub latency: Duration,
    pub outcome: Result<Row, QueryError>,
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// One established session plus the bookkeeping the pool relies on.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    created_at: Instant,
    alive: bool,
    closed: bool,
    session: Box<dyn Session>,
}

impl Connection {
    /// Dial a new session through `connector`.
    pub async fn create(
        connector: &dyn Connector,
        id: u64,
        timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let session = connector.connect(timeout).await?;
        debug!(id, "connection established");
        Ok(Self::from_session(id, session))
    }

    /// Wrap an already-established session.
    pub fn from_session(id: u64, session: Box<dyn Session>) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            alive: true,
            closed: false,
            session,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// False once any probe has failed or the connection was closed.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run `query` with a deadline and time it.
    ///
    /// A failed or timed-out probe marks the connection dead; the session
    /// state after a timeout is unknown, so it is never reused.
    pub async fn probe(&mut self, query: &str, timeout: Duration) -> ProbeResult {
        if self.closed {
            return ProbeResult {
                latency: Duration::ZERO,
                outcome: Err(QueryError::Closed),
            };
        }

        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, self.session.execute(query)).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout(timeout)),
        };
        let latency = started.elapsed();

        if let Err(e) = &outcome {
            self.alive = false;
            debug!(id = self.id, error = %e, "probe failed, connection marked dead");
        }

        ProbeResult { latency, outcome }
    }

    /// Close the underlying session. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.alive = false;
        self.session.close().await;
        debug!(id = self.id, age_ms = self.age().as_millis() as u64, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Debug)]
    struct MockSession {
        healthy: Arc<AtomicBool>,
        closes: Arc<AtomicU32>,
        delay: Duration,
    }

    #[async_trait]
    impl Session for MockSession {
        async fn execute(&mut self, _query: &str) -> Result<Row, QueryError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.healthy.load(Ordering::Relaxed) {
                Ok(Row::new().with_column("SessionID", "57"))
            } else {
                Err(QueryError::Broken("connection reset by peer".into()))
            }
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct MockConnector {
        fail: bool,
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, _timeout: Duration) -> Result<Box<dyn Session>, ConnectError> {
            if self.fail {
                return Err(ConnectError::Transport("connection refused".into()));
            }
            Ok(Box::new(MockSession {
                healthy: Arc::new(AtomicBool::new(true)),
                closes: Arc::new(AtomicU32::new(0)),
                delay: Duration::ZERO,
            }))
        }
    }

    fn mock_connection(delay: Duration) -> (Connection, Arc<AtomicBool>, Arc<AtomicU32>) {
        let healthy = Arc::new(AtomicBool::new(true));
        let closes = Arc::new(AtomicU32::new(0));
        let session = MockSession {
            healthy: healthy.clone(),
            closes: closes.clone(),
            delay,
        };
        (Connection::from_session(1, Box::new(session)), healthy, closes)
    }

    // ── Row ─────────────────────────────────────────────────────────

    #[test]
    fn row_lookup_by_name_is_case_insensitive() {
        let row = Row::new()
            .with_column("QueryTime", "2025-01-01 10:00:00.000")
            .with_column("SessionID", "57");
        assert_eq!(row.get("sessionid"), Some("57"));
        assert_eq!(row.value(0), Some("2025-01-01 10:00:00.000"));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 2);
    }

    // ── create ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_wraps_session() {
        let connector = MockConnector { fail: false };
        let conn = Connection::create(&connector, 7, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(conn.id(), 7);
        assert!(conn.is_alive());
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn create_propagates_connect_error() {
        let connector = MockConnector { fail: true };
        let err = Connection::create(&connector, 1, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Transport(_)));
    }

    // ── probe ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn successful_probe_keeps_connection_alive() {
        let (mut conn, _, _) = mock_connection(Duration::ZERO);
        let probe = conn.probe("SELECT 1", Duration::from_secs(1)).await;
        assert!(probe.is_success());
        assert_eq!(probe.outcome.unwrap().get("SessionID"), Some("57"));
        assert!(conn.is_alive());
    }

    #[tokio::test]
    async fn failed_probe_marks_connection_dead() {
        let (mut conn, healthy, _) = mock_connection(Duration::ZERO);
        healthy.store(false, Ordering::Relaxed);

        let probe = conn.probe("SELECT 1", Duration::from_secs(1)).await;
        assert!(matches!(probe.outcome, Err(QueryError::Broken(_))));
        assert!(!conn.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_times_out() {
        let (mut conn, _, _) = mock_connection(Duration::from_secs(60));
        let probe = conn.probe("SELECT 1", Duration::from_millis(100)).await;
        assert_eq!(
            probe.outcome.unwrap_err(),
            QueryError::Timeout(Duration::from_millis(100))
        );
        assert!(!conn.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_measures_latency() {
        let (mut conn, _, _) = mock_connection(Duration::from_millis(250));
        let probe = conn.probe("SELECT 1", Duration::from_secs(5)).await;
        assert!(probe.is_success());
        assert!(probe.latency >= Duration::from_millis(250));
    }

    // ── close ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut conn, _, closes) = mock_connection(Duration::ZERO);
        conn.close().await;
        conn.close().await;
        assert_eq!(closes.load(Ordering::Relaxed), 1);
        assert!(conn.is_closed());
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn probe_after_close_fails_without_touching_session() {
        let (mut conn, _, _) = mock_connection(Duration::ZERO);
        conn.close().await;
        let probe = conn.probe("SELECT 1", Duration::from_secs(1)).await;
        assert_eq!(probe.outcome.unwrap_err(), QueryError::Closed);
        assert_eq!(probe.latency, Duration::ZERO);
    }
}
