//! Workload driver scenarios against scripted mock connections.
//!
//! All scenarios run on a paused clock, so sleeps, acquire timeouts and
//! join timeouts advance virtually and the counts below are deterministic.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use common::{MockConnector, RecordingReporter};
use sqlsurge_core::WorkloadConfig;
use sqlsurge_driver::{FailureRatio, RunReport, StopReason, WorkloadDriver};

fn config(pool_size: usize, duration: Duration, interval: Duration) -> WorkloadConfig {
    WorkloadConfig {
        pool_size,
        duration,
        min_interval: interval,
        max_interval: interval,
        ..Default::default()
    }
}

async fn run(
    config: WorkloadConfig,
    connector: Arc<MockConnector>,
    reporter: Arc<RecordingReporter>,
) -> RunReport {
    let (_tx, rx) = watch::channel(false);
    let driver = WorkloadDriver::new(config, connector).with_reporter(reporter);
    tokio::time::timeout(Duration::from_secs(3600), driver.run(rx))
        .await
        .expect("driver terminates")
        .expect("valid config")
}

#[tokio::test(start_paused = true)]
async fn steady_single_worker_succeeds() {
    let reporter = Arc::new(RecordingReporter::default());
    let report = run(
        config(1, Duration::from_secs(2), Duration::from_millis(500)),
        Arc::new(MockConnector::new()),
        reporter.clone(),
    )
    .await;

    assert_eq!(report.reason, StopReason::DeadlineReached);
    assert!(
        (3..=5).contains(&report.stats.successes),
        "successes: {}",
        report.stats.successes
    );
    assert_eq!(report.stats.failures, 0);
    assert_eq!(report.exit_code(), 0);
    assert!(report.stats.latency.is_some());
    assert_eq!(report.workers.len(), 1);
    assert_eq!(report.stragglers, 0);
    assert_eq!(reporter.count("run-finished"), 1);
}

#[tokio::test(start_paused = true)]
async fn undersized_pool_reports_exhaustion() {
    let cfg = WorkloadConfig {
        workers: Some(5),
        acquire_timeout: Duration::from_millis(20),
        worker_stagger: Duration::ZERO,
        ..config(3, Duration::from_secs(1), Duration::ZERO)
    };
    let connector = Arc::new(MockConnector::new().with_latency(Duration::from_millis(50)));
    let report = run(cfg, connector, Arc::new(RecordingReporter::default())).await;

    assert_eq!(report.reason, StopReason::DeadlineReached);
    assert!(report.stats.failures_by_kind.pool_exhausted >= 2);
    assert_eq!(report.stats.failures_by_kind.remote, 0);
    assert!(report.stats.successes > 0);
    assert_eq!(report.stragglers, 0);
    assert_eq!(report.workers.len(), 5);
    assert_eq!(report.exit_code(), 1);

    // Every checkout came back before the pool was torn down.
    assert_eq!(report.pool.acquired, report.pool.released);
    assert_eq!(report.pool.checked_out, 0);
    assert_eq!(report.connections_closed, 3);
}

#[tokio::test(start_paused = true)]
async fn partial_warmup_still_runs() {
    let reporter = Arc::new(RecordingReporter::default());
    let connector = Arc::new(MockConnector::new().failing_connects(vec![2, 3]));
    let cfg = WorkloadConfig {
        workers: Some(2),
        ..config(5, Duration::from_secs(1), Duration::from_millis(200))
    };
    let report = run(cfg, connector, reporter.clone()).await;

    assert_eq!(report.warmup_ready, 3);
    assert_eq!(report.warmup_requested, 5);
    assert_eq!(reporter.count("warmup 3/5"), 1);
    assert!(report.stats.successes > 0);
    assert_eq!(report.stats.failures, 0);
    assert_eq!(report.connections_closed, 3);
}

#[tokio::test(start_paused = true)]
async fn dead_connections_without_replacement_shrink_the_pool() {
    let reporter = Arc::new(RecordingReporter::default());
    // Warm-up dials two; every later dial is refused.
    let connector = Arc::new(
        MockConnector::new()
            .failing_from(2)
            .unhealthy()
            .with_latency(Duration::from_millis(10)),
    );
    let cfg = WorkloadConfig {
        acquire_timeout: Duration::from_millis(50),
        ..config(2, Duration::from_secs(1), Duration::from_millis(100))
    };
    let report = run(cfg, connector, reporter.clone()).await;

    assert_eq!(report.pool.lost, 2);
    assert_eq!(report.pool.live, 0);
    assert_eq!(reporter.count("lost"), 2);
    assert!(report.stats.failures_by_kind.remote >= 2);
    assert!(report.stats.failures_by_kind.pool_exhausted >= 1);
    assert_eq!(report.stats.successes, 0);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn dead_connections_are_replaced() {
    let connector = Arc::new(
        MockConnector::new()
            .failing_queries(vec![0])
            .with_latency(Duration::from_millis(10)),
    );
    let report = run(
        config(1, Duration::from_secs(2), Duration::from_millis(500)),
        connector.clone(),
        Arc::new(RecordingReporter::default()),
    )
    .await;

    assert_eq!(report.stats.failures_by_kind.remote, 1);
    assert!(report.stats.successes >= 2);
    assert_eq!(report.pool.replaced, 1);
    assert_eq!(report.pool.live, 0);
    // Warm-up plus one replacement.
    assert_eq!(connector.connects(), 2);
    // The dead one on release, the replacement at shutdown.
    assert_eq!(connector.closes(), 2);
}

#[tokio::test(start_paused = true)]
async fn failure_ratio_aborts_on_periodic_tick() {
    let reporter = Arc::new(RecordingReporter::default());
    let connector = Arc::new(MockConnector::new().unhealthy());
    let cfg = WorkloadConfig {
        stats_interval: Duration::from_secs(1),
        ..config(2, Duration::from_secs(600), Duration::from_millis(100))
    };
    let (_tx, rx) = watch::channel(false);
    let report = WorkloadDriver::new(cfg, connector)
        .with_reporter(reporter.clone())
        .with_policy(FailureRatio(0.5))
        .run(rx)
        .await
        .unwrap();

    assert_eq!(report.reason, StopReason::PolicyAbort);
    assert!(report.elapsed < Duration::from_secs(5));
    assert_eq!(reporter.count("periodic"), 1);
    assert_eq!(reporter.count("stopping aborted by policy"), 1);
}

#[tokio::test(start_paused = true)]
async fn interrupt_stops_gracefully() {
    let reporter = Arc::new(RecordingReporter::default());
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let _ = tx.send(true);
        // Keep the sender alive until the driver has observed it.
        tokio::time::sleep(Duration::from_secs(3600)).await;
    });

    let driver = WorkloadDriver::new(
        config(2, Duration::from_secs(600), Duration::from_millis(300)),
        Arc::new(MockConnector::new()),
    )
    .with_reporter(reporter.clone());
    let report = driver.run(rx).await.unwrap();

    assert_eq!(report.reason, StopReason::Interrupted);
    assert!(report.elapsed < Duration::from_secs(3));
    assert_eq!(report.stragglers, 0);
    assert_eq!(report.workers.len(), 2);
    assert!(report.stats.successes > 0);
    assert_eq!(reporter.count("worker-finished"), 2);
    assert_eq!(reporter.count("pool-closed 2"), 1);
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_staggered_start() {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let _ = tx.send(true);
        tokio::time::sleep(Duration::from_secs(3600)).await;
    });

    let cfg = WorkloadConfig {
        workers: Some(10),
        worker_stagger: Duration::from_secs(1),
        ..config(10, Duration::from_secs(600), Duration::from_secs(1))
    };
    let report = WorkloadDriver::new(cfg, Arc::new(MockConnector::new()))
        .run(rx)
        .await
        .unwrap();

    assert_eq!(report.reason, StopReason::Interrupted);
    // Spawned at 0s, 1s and 2s.
    assert_eq!(report.workers.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn slow_probe_leaves_a_straggler() {
    let connector = Arc::new(MockConnector::new().with_latency(Duration::from_secs(30)));
    let cfg = WorkloadConfig {
        probe_timeout: Duration::from_secs(60),
        join_timeout: Duration::from_secs(2),
        ..config(1, Duration::from_secs(1), Duration::ZERO)
    };
    let report = run(cfg, connector, Arc::new(RecordingReporter::default())).await;

    assert_eq!(report.stragglers, 1);
    assert!(report.workers.is_empty());
    assert_eq!(report.pool.checked_out, 1);
    assert_eq!(report.connections_closed, 0);
}

#[tokio::test(start_paused = true)]
async fn periodic_statistics_follow_the_clock() {
    let reporter = Arc::new(RecordingReporter::default());
    let cfg = WorkloadConfig {
        stats_interval: Duration::from_secs(1),
        ..config(1, Duration::from_millis(3500), Duration::from_millis(250))
    };
    run(cfg, Arc::new(MockConnector::new()), reporter.clone()).await;

    assert_eq!(reporter.count("periodic"), 3);
}

#[tokio::test(start_paused = true)]
async fn report_serializes_to_json() {
    let report = run(
        config(1, Duration::from_secs(1), Duration::from_millis(400)),
        Arc::new(MockConnector::new()),
        Arc::new(RecordingReporter::default()),
    )
    .await;

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["reason"], "deadline-reached");
    assert_eq!(json["warmup_ready"], 1);
    assert_eq!(json["stats"]["failures"], 0);
    assert!(json["elapsed"].as_f64().unwrap() >= 1.0);
}

#[tokio::test(start_paused = true)]
async fn oversized_duration_is_a_config_error() {
    let (_tx, rx) = watch::channel(false);
    let connector = Arc::new(MockConnector::new());
    let result = WorkloadDriver::new(
        config(1, Duration::from_secs(u64::MAX), Duration::from_millis(500)),
        connector.clone(),
    )
    .run(rx)
    .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("duration must be at most"));
    assert_eq!(connector.connects(), 0);
}
