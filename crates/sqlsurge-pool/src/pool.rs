//! Connection pool with semaphore-bounded checkout.
//!
//! The semaphore's permit count always equals the number of idle
//! connections: a permit is added right after a connection is pushed and
//! forgotten right before one is popped. Waiting for a permit is therefore
//! waiting for an idle connection.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use sqlsurge_core::{
    ConnectError, Connection, Connector, LIVENESS_QUERY, PoolError, WorkloadConfig,
};

/// Configuration for the connection pool.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Connections attempted during warm-up (default: 10).
    pub size: usize,
    /// Deadline for dialing one connection (default: 10s).
    pub connect_timeout: Duration,
    /// Query run on release to decide whether a connection is reusable.
    pub liveness_query: String,
    /// Deadline for the liveness query (default: 5s).
    pub liveness_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 10,
            connect_timeout: Duration::from_secs(10),
            liveness_query: LIVENESS_QUERY.to_string(),
            liveness_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&WorkloadConfig> for PoolConfig {
    fn from(config: &WorkloadConfig) -> Self {
        Self {
            size: config.pool_size,
            connect_timeout: config.connect_timeout,
            liveness_query: config.liveness_query.clone(),
            liveness_timeout: config.liveness_timeout,
        }
    }
}

/// One slot that could not be filled during warm-up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WarmupFailure {
    /// Zero-based warm-up slot.
    pub slot: usize,
    pub error: ConnectError,
}

/// Result of the initial bulk connection phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WarmupReport {
    pub ready: usize,
    pub requested: usize,
    pub failures: Vec<WarmupFailure>,
}

impl WarmupReport {
    pub fn is_complete(&self) -> bool {
        self.ready == self.requested
    }
}

/// What `release` did with the connection it was handed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Passed the liveness probe and went back to the idle set.
    Returned,
    /// Was dead; a fresh connection with this id took its place.
    Replaced { id: u64 },
    /// Was dead and the replacement could not be dialed; capacity is one lower.
    Shrunk(ConnectError),
    /// The pool was already closed; the connection was closed instead.
    ClosedAfterShutdown,
}

/// Pool-level statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Target size the pool was configured with.
    pub requested: usize,
    /// Connections that exist right now (idle + checked out).
    pub live: usize,
    /// Idle connections ready for checkout.
    pub available: usize,
    /// Connections currently held by callers.
    pub checked_out: usize,
    pub acquired: u64,
    pub released: u64,
    /// Acquire calls that timed out waiting.
    pub exhausted: u64,
    /// Dead connections replaced by a fresh one.
    pub replaced: u64,
    /// Dead connections closed on release.
    pub discarded: u64,
    /// Replacements that failed, each shrinking capacity by one.
    pub lost: u64,
}

#[derive(Debug, Default)]
struct PoolInner {
    idle: VecDeque<Connection>,
    live: usize,
    checked_out: usize,
    closed: bool,
    acquired: u64,
    released: u64,
    exhausted: u64,
    replaced: u64,
    discarded: u64,
    lost: u64,
}

/// A fixed-size pool of connections to one target.
///
/// Connections are dialed once during [`warm_up`](Self::warm_up) and only
/// ever replaced one-for-one when found dead on release. The pool never
/// grows past its configured size.
pub struct ConnectionPool {
    inner: Mutex<PoolInner>,
    /// Permits == idle connections.
    available: Semaphore,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    next_id: AtomicU64,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            available: Semaphore::new(0),
            connector,
            config,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Dial `size` connections one after another.
    ///
    /// A failed slot is logged and skipped; the pool simply starts smaller.
    pub async fn warm_up(&self) -> WarmupReport {
        let requested = self.config.size;
        let mut failures = Vec::new();
        let mut ready = 0;

        for slot in 0..requested {
            let id = self.allocate_id();
            match Connection::create(&*self.connector, id, self.config.connect_timeout).await {
                Ok(conn) => {
                    let mut inner = self.inner.lock().await;
                    inner.idle.push_back(conn);
                    inner.live += 1;
                    self.available.add_permits(1);
                    ready += 1;
                    debug!(slot, id, "warm-up connection ready");
                }
                Err(error) => {
                    warn!(slot, error = %error, "warm-up connection failed");
                    failures.push(WarmupFailure { slot, error });
                }
            }
        }

        info!(ready, requested, "connection pool warmed up");
        WarmupReport {
            ready,
            requested,
            failures,
        }
    }

    /// Check out an idle connection, waiting up to `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> Result<Connection, PoolError> {
        let permit = match tokio::time::timeout(timeout, self.available.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                self.inner.lock().await.exhausted += 1;
                debug!(timeout = ?timeout, "connection pool exhausted");
                return Err(PoolError::Exhausted(timeout));
            }
        };
        // The permit stands for the connection popped below.
        permit.forget();

        let mut inner = self.inner.lock().await;
        match inner.idle.pop_front() {
            Some(conn) => {
                inner.checked_out += 1;
                inner.acquired += 1;
                debug!(id = conn.id(), checked_out = inner.checked_out, "acquired connection");
                Ok(conn)
            }
            // Only reachable when close_all drained the idle set under us.
            None => Err(PoolError::Closed),
        }
    }

    /// Hand a checked-out connection back.
    ///
    /// A connection already marked dead skips the liveness probe. Dead
    /// connections are closed and replaced by exactly one dial attempt.
    pub async fn release(&self, mut conn: Connection) -> ReleaseOutcome {
        if self.is_closed().await {
            return self.close_after_shutdown(conn).await;
        }

        let healthy = conn.is_alive()
            && conn
                .probe(&self.config.liveness_query, self.config.liveness_timeout)
                .await
                .is_success();

        if healthy {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                drop(inner);
                return self.close_after_shutdown(conn).await;
            }
            let id = conn.id();
            inner.idle.push_back(conn);
            inner.checked_out = inner.checked_out.saturating_sub(1);
            inner.released += 1;
            self.available.add_permits(1);
            debug!(id, idle = inner.idle.len(), "returned connection to pool");
            return ReleaseOutcome::Returned;
        }

        let dead_id = conn.id();
        conn.close().await;
        debug!(id = dead_id, "discarded dead connection");

        let id = self.allocate_id();
        let replacement =
            Connection::create(&*self.connector, id, self.config.connect_timeout).await;

        let mut inner = self.inner.lock().await;
        inner.checked_out = inner.checked_out.saturating_sub(1);
        inner.released += 1;
        inner.discarded += 1;

        match replacement {
            Ok(mut fresh) => {
                if inner.closed {
                    inner.live = inner.live.saturating_sub(1);
                    drop(inner);
                    fresh.close().await;
                    return ReleaseOutcome::ClosedAfterShutdown;
                }
                inner.idle.push_back(fresh);
                inner.replaced += 1;
                self.available.add_permits(1);
                info!(old = dead_id, new = id, "replaced dead connection");
                ReleaseOutcome::Replaced { id }
            }
            Err(error) => {
                inner.live = inner.live.saturating_sub(1);
                inner.lost += 1;
                warn!(
                    old = dead_id,
                    error = %error,
                    live = inner.live,
                    "replacement connection failed, pool capacity reduced"
                );
                ReleaseOutcome::Shrunk(error)
            }
        }
    }

    async fn close_after_shutdown(&self, mut conn: Connection) -> ReleaseOutcome {
        {
            let mut inner = self.inner.lock().await;
            inner.checked_out = inner.checked_out.saturating_sub(1);
            inner.released += 1;
            inner.live = inner.live.saturating_sub(1);
        }
        debug!(id = conn.id(), "pool closed, closing released connection");
        conn.close().await;
        ReleaseOutcome::ClosedAfterShutdown
    }

    /// Stop handing out connections and close every idle one.
    ///
    /// Checked-out connections are not reclaimed; their holders close them
    /// through `release`. Returns how many connections were closed here.
    pub async fn close_all(&self) -> usize {
        self.available.close();

        let (drained, still_out) = {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
            let drained: Vec<Connection> = inner.idle.drain(..).collect();
            inner.live = inner.live.saturating_sub(drained.len());
            (drained, inner.checked_out)
        };

        let closed = drained.len();
        for mut conn in drained {
            conn.close().await;
        }

        info!(closed, checked_out = still_out, "connection pool closed");
        closed
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        PoolStats {
            requested: self.config.size,
            live: inner.live,
            available: inner.idle.len(),
            checked_out: inner.checked_out,
            acquired: inner.acquired,
            released: inner.released,
            exhausted: inner.exhausted,
            replaced: inner.replaced,
            discarded: inner.discarded,
            lost: inner.lost,
        }
    }
}

// ── Debug impl (cannot auto-derive due to dyn trait) ────────────────

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("available_permits", &self.available.available_permits())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqlsurge_core::{QueryError, Row, Session};
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    // ── Mock session and connector ──────────────────────────────────

    #[derive(Debug)]
    struct MockSession {
        healthy: Arc<AtomicBool>,
        closes: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Session for MockSession {
        async fn execute(&mut self, _query: &str) -> Result<Row, QueryError> {
            if self.healthy.load(Ordering::Relaxed) {
                Ok(Row::new().with_column("", "1"))
            } else {
                Err(QueryError::Broken("connection reset".into()))
            }
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct MockConnector {
        connects: AtomicU64,
        /// Zero-based connect calls that fail.
        fail_calls: Vec<u64>,
        fail_all: AtomicBool,
        healthy: Arc<AtomicBool>,
        closes: Arc<AtomicU64>,
    }

    impl MockConnector {
        fn new() -> Self {
            Self::failing_on(vec![])
        }

        fn failing_on(fail_calls: Vec<u64>) -> Self {
            Self {
                connects: AtomicU64::new(0),
                fail_calls,
                fail_all: AtomicBool::new(false),
                healthy: Arc::new(AtomicBool::new(true)),
                closes: Arc::new(AtomicU64::new(0)),
            }
        }

        fn closes(&self) -> u64 {
            self.closes.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(
            &self,
            _timeout: Duration,
        ) -> Result<Box<dyn sqlsurge_core::Session>, ConnectError> {
            let call = self.connects.fetch_add(1, Ordering::Relaxed);
            if self.fail_all.load(Ordering::Relaxed) || self.fail_calls.contains(&call) {
                return Err(ConnectError::Transport("connection refused".into()));
            }
            Ok(Box::new(MockSession {
                healthy: self.healthy.clone(),
                closes: self.closes.clone(),
            }))
        }
    }

    fn pool_of(size: usize, connector: Arc<MockConnector>) -> ConnectionPool {
        let config = PoolConfig {
            size,
            ..Default::default()
        };
        ConnectionPool::new(config, connector)
    }

    const WAIT: Duration = Duration::from_millis(100);

    // ── Warm-up ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn warm_up_fills_pool() {
        let pool = pool_of(4, Arc::new(MockConnector::new()));
        let report = pool.warm_up().await;

        assert!(report.is_complete());
        assert_eq!(report.ready, 4);
        let stats = pool.stats().await;
        assert_eq!(stats.live, 4);
        assert_eq!(stats.available, 4);
        assert_eq!(stats.checked_out, 0);
    }

    #[tokio::test]
    async fn warm_up_tolerates_partial_failure() {
        // Connections 3 and 4 (slots 2 and 3) fail.
        let pool = pool_of(5, Arc::new(MockConnector::failing_on(vec![2, 3])));
        let report = pool.warm_up().await;

        assert_eq!(report.ready, 3);
        assert_eq!(report.requested, 5);
        let slots: Vec<usize> = report.failures.iter().map(|f| f.slot).collect();
        assert_eq!(slots, vec![2, 3]);
        assert_eq!(pool.stats().await.available, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn warm_up_total_failure_leaves_empty_pool() {
        let connector = Arc::new(MockConnector::new());
        connector.fail_all.store(true, Ordering::Relaxed);
        let pool = pool_of(2, connector);

        let report = pool.warm_up().await;
        assert_eq!(report.ready, 0);
        assert_eq!(pool.acquire(WAIT).await.unwrap_err(), PoolError::Exhausted(WAIT));
    }

    // ── Acquire / release ───────────────────────────────────────────

    #[tokio::test]
    async fn acquire_then_release_returns_connection() {
        let pool = pool_of(2, Arc::new(MockConnector::new()));
        pool.warm_up().await;

        let conn = pool.acquire(WAIT).await.unwrap();
        let stats = pool.stats().await;
        assert_eq!(stats.checked_out, 1);
        assert_eq!(stats.available, 1);

        assert_eq!(pool.release(conn).await, ReleaseOutcome::Returned);
        let stats = pool.stats().await;
        assert_eq!(stats.checked_out, 0);
        assert_eq!(stats.available, 2);
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.released, 1);
    }

    #[tokio::test]
    async fn acquire_hands_out_distinct_connections() {
        let pool = pool_of(3, Arc::new(MockConnector::new()));
        pool.warm_up().await;

        let a = pool.acquire(WAIT).await.unwrap();
        let b = pool.acquire(WAIT).await.unwrap();
        let c = pool.acquire(WAIT).await.unwrap();
        let mut ids = vec![a.id(), b.id(), c.id()];
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_times_out_when_exhausted() {
        let pool = pool_of(1, Arc::new(MockConnector::new()));
        pool.warm_up().await;

        let _held = pool.acquire(WAIT).await.unwrap();
        let err = pool.acquire(WAIT).await.unwrap_err();
        assert_eq!(err, PoolError::Exhausted(WAIT));
        assert_eq!(pool.stats().await.exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_wakes_on_release() {
        let pool = Arc::new(pool_of(1, Arc::new(MockConnector::new())));
        pool.warm_up().await;

        let held = pool.acquire(WAIT).await.unwrap();
        let held_id = held.id();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.release(held).await;

        let conn = waiter.await.unwrap().unwrap();
        assert_eq!(conn.id(), held_id);
    }

    #[tokio::test]
    async fn checked_out_never_exceeds_size() {
        let pool = Arc::new(pool_of(3, Arc::new(MockConnector::new())));
        pool.warm_up().await;

        let in_hand = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let pool = pool.clone();
            let in_hand = in_hand.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..20 {
                    if let Ok(conn) = pool.acquire(Duration::from_secs(5)).await {
                        let now = in_hand.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        in_hand.fetch_sub(1, Ordering::SeqCst);
                        pool.release(conn).await;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        let stats = pool.stats().await;
        assert_eq!(stats.acquired, stats.released);
        assert_eq!(stats.checked_out, 0);
        assert_eq!(stats.available, 3);
    }

    // ── Dead connections ────────────────────────────────────────────

    #[tokio::test]
    async fn failed_liveness_probe_replaces_connection() {
        let connector = Arc::new(MockConnector::new());
        let pool = pool_of(1, connector.clone());
        pool.warm_up().await;

        let conn = pool.acquire(WAIT).await.unwrap();
        let old_id = conn.id();
        connector.healthy.store(false, Ordering::Relaxed);

        let outcome = pool.release(conn).await;
        let ReleaseOutcome::Replaced { id } = outcome else {
            panic!("expected replacement, got {outcome:?}");
        };
        assert_ne!(id, old_id);
        assert_eq!(connector.closes(), 1);

        let stats = pool.stats().await;
        assert_eq!(stats.available, 1);
        assert_eq!(stats.live, 1);
        assert_eq!(stats.replaced, 1);
        assert_eq!(stats.discarded, 1);
    }

    #[tokio::test]
    async fn connection_marked_dead_skips_liveness_probe() {
        let connector = Arc::new(MockConnector::new());
        let pool = pool_of(1, connector.clone());
        pool.warm_up().await;

        let mut conn = pool.acquire(WAIT).await.unwrap();
        connector.healthy.store(false, Ordering::Relaxed);
        assert!(!conn.probe("SELECT 1", WAIT).await.is_success());
        connector.healthy.store(true, Ordering::Relaxed);

        assert!(matches!(
            pool.release(conn).await,
            ReleaseOutcome::Replaced { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_replacement_shrinks_pool() {
        let connector = Arc::new(MockConnector::new());
        let pool = pool_of(1, connector.clone());
        pool.warm_up().await;

        let conn = pool.acquire(WAIT).await.unwrap();
        connector.healthy.store(false, Ordering::Relaxed);
        connector.fail_all.store(true, Ordering::Relaxed);

        let outcome = pool.release(conn).await;
        assert!(matches!(outcome, ReleaseOutcome::Shrunk(ConnectError::Transport(_))));

        let stats = pool.stats().await;
        assert_eq!(stats.live, 0);
        assert_eq!(stats.available, 0);
        assert_eq!(stats.lost, 1);
        // Capacity is not restored even once the server recovers.
        connector.fail_all.store(false, Ordering::Relaxed);
        assert_eq!(pool.acquire(WAIT).await.unwrap_err(), PoolError::Exhausted(WAIT));
    }

    // ── Shutdown ────────────────────────────────────────────────────

    #[tokio::test]
    async fn close_all_closes_idle_connections() {
        let connector = Arc::new(MockConnector::new());
        let pool = pool_of(3, connector.clone());
        pool.warm_up().await;

        assert_eq!(pool.close_all().await, 3);
        assert_eq!(connector.closes(), 3);
        assert!(pool.is_closed().await);
        // Second call finds nothing left.
        assert_eq!(pool.close_all().await, 0);
    }

    #[tokio::test]
    async fn acquire_after_close_fails() {
        let pool = pool_of(2, Arc::new(MockConnector::new()));
        pool.warm_up().await;
        pool.close_all().await;

        assert_eq!(pool.acquire(WAIT).await.unwrap_err(), PoolError::Closed);
    }

    #[tokio::test]
    async fn release_after_close_closes_connection() {
        let connector = Arc::new(MockConnector::new());
        let pool = pool_of(2, connector.clone());
        pool.warm_up().await;

        let conn = pool.acquire(WAIT).await.unwrap();
        assert_eq!(pool.close_all().await, 1);
        assert_eq!(pool.stats().await.checked_out, 1);

        assert_eq!(pool.release(conn).await, ReleaseOutcome::ClosedAfterShutdown);
        assert_eq!(connector.closes(), 2);
        let stats = pool.stats().await;
        assert_eq!(stats.checked_out, 0);
        assert_eq!(stats.live, 0);
    }

    #[test]
    fn pool_config_from_workload() {
        let workload = WorkloadConfig {
            pool_size: 3,
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let config = PoolConfig::from(&workload);
        assert_eq!(config.size, 3);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.liveness_query, "SELECT 1");
    }
}
