//! Integration tests for batching, routing, retry and drain.
//!
//! Timer-driven tests run on a paused clock, so delays and timeouts are
//! exact and the suite stays fast.

use super::common::{
    config_with, dropped, lane, log_records, logs_pipeline, resource, wait_until,
    ScriptedDestination, Step,
};
use collector::pipeline::{ComponentStatus, DropReason, OverallStatus, QueueError, Supervisor};
use shared::config::{BatchConfig, RetryPolicy};
use shared::destination::{ExportError, MemoryDestination};
use shared::models::{LogRecord, Severity, SignalKind, Span, SpanId, TraceId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn batch(max_batch_size: usize, max_batch_age_ms: u64) -> BatchConfig {
    BatchConfig {
        max_batch_size,
        max_batch_age_ms,
        ..BatchConfig::default()
    }
}

fn retry(max_attempts: u32, base_delay_ms: u64, attempt_timeout_ms: u64) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms,
        max_delay_ms: 5_000,
        attempt_timeout_ms,
    }
}

fn transient() -> Step {
    Step::Fail(ExportError::Transient("store unavailable".to_string()))
}

// ========== Scenarios ==========

#[tokio::test(start_paused = true)]
async fn scenario_first_try_success() {
    let backend = ScriptedDestination::new("logs-backend", vec![]);
    let supervisor = logs_pipeline(
        config_with(&batch(10, 200), &RetryPolicy::default()),
        vec![lane(&backend, 2)],
    );

    supervisor
        .ingest()
        .enqueue(SignalKind::Logs, resource("checkout"), log_records("a", 3))
        .unwrap();

    assert!(wait_until(Duration::from_secs(1), || backend.delivered().len() == 1).await);
    assert_eq!(backend.attempts(), 1);

    let stats = supervisor.stats().snapshot();
    let destination = &stats.destinations["logs-backend"];
    assert_eq!(destination.batches_sent, 1);
    assert_eq!(destination.records_sent, 3);
    assert_eq!(destination.retries, 0);
    assert_eq!(dropped(&supervisor, "logs-backend", DropReason::RetryExhausted), 0);

    supervisor.drain().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_two_timeouts_then_success() {
    let backend = ScriptedDestination::new("logs-backend", vec![Step::Hang, Step::Hang]);
    let supervisor = logs_pipeline(
        config_with(&batch(10, 50), &retry(4, 100, 1_000)),
        vec![lane(&backend, 4)],
    );

    supervisor
        .ingest()
        .enqueue(SignalKind::Logs, resource("checkout"), log_records("a", 1))
        .unwrap();

    assert!(wait_until(Duration::from_secs(10), || backend.delivered().len() == 1).await);
    assert_eq!(backend.attempts(), 3);

    let times = backend.attempt_times();
    // timeout + base before the second attempt, then timeout + 2·base
    assert!(times[1] - times[0] >= Duration::from_millis(1_100));
    assert!(times[2] - times[0] >= Duration::from_millis(2_300));
    assert!(times[2] - times[0] >= Duration::from_millis(300));

    let stats = supervisor.stats().snapshot();
    let destination = &stats.destinations["logs-backend"];
    assert_eq!(destination.batches_sent, 1);
    assert_eq!(destination.retries, 2);

    supervisor.drain().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_retry_exhausted_pipeline_keeps_serving() {
    let backend = ScriptedDestination::new(
        "logs-backend",
        vec![transient(), transient(), transient(), transient()],
    );
    let supervisor = logs_pipeline(
        config_with(&batch(10, 50), &retry(4, 100, 1_000)),
        vec![lane(&backend, 2)],
    );
    let ingest = supervisor.ingest();

    ingest
        .enqueue(SignalKind::Logs, resource("checkout"), log_records("lost", 2))
        .unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || {
            dropped(&supervisor, "logs-backend", DropReason::RetryExhausted) == 1
        })
        .await
    );
    assert_eq!(backend.attempts(), 4);
    assert!(
        wait_until(Duration::from_secs(1), || {
            supervisor.health().component("destination:logs-backend") == Some(ComponentStatus::Degraded)
        })
        .await
    );
    let report = supervisor.health().report();
    assert_eq!(report.status, OverallStatus::Degraded);
    assert!(report.is_serving());

    ingest
        .enqueue(SignalKind::Logs, resource("checkout"), log_records("kept", 1))
        .unwrap();
    assert!(wait_until(Duration::from_secs(10), || backend.delivered().len() == 1).await);
    assert_eq!(
        backend.delivered()[0].logs().next().unwrap().body,
        "kept-0"
    );
    assert!(
        wait_until(Duration::from_secs(1), || {
            supervisor.health().component("destination:logs-backend") == Some(ComponentStatus::Up)
        })
        .await
    );

    let stats = supervisor.stats().snapshot();
    let destination = &stats.destinations["logs-backend"];
    assert_eq!(destination.batches_sent, 1);
    assert_eq!(destination.dropped_records.get(&DropReason::RetryExhausted), Some(&2));

    supervisor.drain().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_drain_interrupts_waiting_batch() {
    let backend = ScriptedDestination::with_fallback("logs-backend", vec![], transient());
    let mut config = config_with(&batch(10, 50), &retry(4, 1_000, 1_000));
    config.drain_timeout_ms = 300;
    let supervisor = logs_pipeline(config, vec![lane(&backend, 1)]);

    supervisor
        .ingest()
        .enqueue(SignalKind::Logs, resource("checkout"), log_records("a", 1))
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || backend.attempts() == 1).await);

    let stats = Arc::clone(supervisor.stats());
    let report = supervisor.drain().await;

    assert!(report.timed_out);
    assert_eq!(report.dropped_batches, 1);
    assert_eq!(backend.attempts(), 1);

    let destination = &stats.snapshot().destinations["logs-backend"];
    assert_eq!(destination.dropped_batches.get(&DropReason::DrainTimeout), Some(&1));
    assert_eq!(destination.dropped_batches.values().sum::<u64>(), 1);
    assert_eq!(destination.batches_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_drain_interrupts_hanging_attempt() {
    let backend = ScriptedDestination::with_fallback("logs-backend", vec![], Step::Hang);
    let mut config = config_with(&batch(10, 50), &retry(4, 100, 60_000));
    config.drain_timeout_ms = 500;
    let supervisor = logs_pipeline(config, vec![lane(&backend, 1)]);

    supervisor
        .ingest()
        .enqueue(SignalKind::Logs, resource("checkout"), log_records("a", 1))
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || backend.attempts() == 1).await);

    let report = supervisor.drain().await;
    assert!(report.timed_out);
    assert_eq!(report.dropped_batches, 1);
}

#[tokio::test(start_paused = true)]
async fn drain_delivers_open_batches_without_timeout() {
    let backend = ScriptedDestination::new("logs-backend", vec![]);
    let supervisor = logs_pipeline(
        config_with(&batch(100, 60_000), &RetryPolicy::default()),
        vec![lane(&backend, 2)],
    );

    for service in ["a", "b", "c"] {
        supervisor
            .ingest()
            .enqueue(SignalKind::Logs, resource(service), log_records(service, 5))
            .unwrap();
    }

    let report = supervisor.drain().await;
    assert!(!report.timed_out);
    assert_eq!(report.dropped_batches, 0);
    assert_eq!(backend.delivered().len(), 3);
}

// ========== Properties ==========

#[tokio::test(start_paused = true)]
async fn liveness_one_attempt_per_destination_within_age_bound() {
    let first = ScriptedDestination::new("logs-first", vec![]);
    let second = ScriptedDestination::new("logs-second", vec![]);
    let supervisor = logs_pipeline(
        config_with(&batch(512, 200), &RetryPolicy::default()),
        vec![lane(&first, 2), lane(&second, 2)],
    );

    supervisor
        .ingest()
        .enqueue(SignalKind::Logs, resource("checkout"), log_records("a", 1))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(first.attempts(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(first.attempts(), 1);
    assert_eq!(second.attempts(), 1);

    supervisor.drain().await;
    assert_eq!(first.attempts(), 1);
    assert_eq!(second.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn ordering_per_resource_per_destination() {
    let mut script = Vec::new();
    for i in 0..40 {
        script.push(if i % 3 == 1 { transient() } else { Step::Delay(Duration::from_millis(5)) });
    }
    let backend = ScriptedDestination::new("logs-backend", script);
    let supervisor = logs_pipeline(
        config_with(&batch(1, 1_000), &retry(20, 10, 1_000)),
        vec![lane(&backend, 4)],
    );

    let services = ["alpha", "beta", "gamma"];
    for i in 0..8 {
        for service in services {
            supervisor
                .ingest()
                .enqueue(
                    SignalKind::Logs,
                    resource(service),
                    vec![LogRecord::new(Severity::Info, format!("{service}-{i}")).into()],
                )
                .unwrap();
        }
    }

    assert!(wait_until(Duration::from_secs(30), || backend.delivered().len() == 24).await);

    let mut seen: HashMap<String, Vec<(u64, String)>> = HashMap::new();
    for batch in backend.delivered() {
        let service = batch.resource().service_name().unwrap().to_string();
        let body = batch.logs().next().unwrap().body.clone();
        seen.entry(service).or_default().push((batch.sequence(), body));
    }
    for service in services {
        let delivered = &seen[service];
        let expected: Vec<String> = (0..8).map(|i| format!("{service}-{i}")).collect();
        let bodies: Vec<String> = delivered.iter().map(|(_, b)| b.clone()).collect();
        assert_eq!(bodies, expected, "{service} delivered out of order");
        assert!(delivered.windows(2).all(|w| w[0].0 < w[1].0));
    }

    supervisor.drain().await;
}

#[tokio::test(start_paused = true)]
async fn drops_are_counted_exactly_once_per_destination() {
    let rejecting = ScriptedDestination::with_fallback(
        "logs-rejecting",
        vec![],
        Step::Fail(ExportError::Rejected("HTTP 400: bad payload".to_string())),
    );
    let healthy = ScriptedDestination::new("logs-healthy", vec![]);
    let supervisor = logs_pipeline(
        config_with(&batch(1, 1_000), &RetryPolicy::default()),
        vec![lane(&rejecting, 2), lane(&healthy, 2)],
    );

    for i in 0..5 {
        supervisor
            .ingest()
            .enqueue(SignalKind::Logs, resource(&format!("svc-{i}")), log_records("r", 1))
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || healthy.delivered().len() == 5).await);
    assert!(
        wait_until(Duration::from_secs(5), || {
            dropped(&supervisor, "logs-rejecting", DropReason::Rejected) == 5
        })
        .await
    );
    assert_eq!(rejecting.attempts(), 5);

    let stats = Arc::clone(supervisor.stats());
    let report = supervisor.drain().await;
    assert_eq!(report.dropped_batches, 0);

    let snapshot = stats.snapshot();
    let rejected = &snapshot.destinations["logs-rejecting"];
    assert_eq!(rejected.batches_sent, 0);
    assert_eq!(rejected.dropped_batches.values().sum::<u64>(), 5);
    assert_eq!(rejected.retries, 0);
    let sent = &snapshot.destinations["logs-healthy"];
    assert_eq!(sent.batches_sent, 5);
    assert!(sent.dropped_batches.values().all(|&n| n == 0));
}

#[tokio::test(start_paused = true)]
async fn capacity_is_bounded_and_released_after_delivery() {
    let backend = ScriptedDestination::new(
        "logs-backend",
        vec![Step::Delay(Duration::from_millis(500)), Step::Delay(Duration::from_millis(500))],
    );
    let mut config = config_with(&batch(4, 50), &RetryPolicy::default());
    config.pipelines.logs.batch.max_buffered_records = 8;
    let supervisor = logs_pipeline(config, vec![lane(&backend, 2)]);
    let ingest = supervisor.ingest();
    let queue = ingest.queue(SignalKind::Logs);

    ingest
        .enqueue(SignalKind::Logs, resource("a"), log_records("a", 4))
        .unwrap();
    ingest
        .enqueue(SignalKind::Logs, resource("b"), log_records("b", 4))
        .unwrap();
    assert_eq!(queue.buffered(), 8);

    let err = ingest
        .enqueue(SignalKind::Logs, resource("c"), log_records("c", 1))
        .unwrap_err();
    assert!(matches!(err, QueueError::Full { capacity: 8, .. }));

    // Flushed batches still hold capacity while the destination works on them.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(backend.attempts() >= 1);
    assert_eq!(queue.buffered(), 8);

    assert!(wait_until(Duration::from_secs(2), || queue.buffered() == 0).await);
    assert_eq!(backend.delivered().len(), 2);
    ingest
        .enqueue(SignalKind::Logs, resource("c"), log_records("c", 1))
        .unwrap();

    let signals = supervisor.stats().snapshot().signals;
    assert_eq!(signals[&SignalKind::Logs].refused, 1);
    supervisor.drain().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_log_destination_does_not_block_traces() {
    let stalled = ScriptedDestination::with_fallback("logs-stalled", vec![], Step::Hang);
    let traces = Arc::new(MemoryDestination::new("traces-memory", SignalKind::Traces));
    let mut config = config_with(&batch(1, 50), &retry(4, 100, 60_000));
    config.drain_timeout_ms = 100;
    let supervisor = Supervisor::builder(config)
        .with_destination(traces.clone(), 1)
        .with_destination(stalled.clone(), 1)
        .with_destination(
            Arc::new(MemoryDestination::new("metrics-memory", SignalKind::Metrics)),
            1,
        )
        .start()
        .unwrap();
    let ingest = supervisor.ingest();

    for i in 0..3 {
        ingest
            .enqueue(SignalKind::Logs, resource("svc"), log_records(&format!("l{i}"), 1))
            .unwrap();
    }
    for i in 0..3u8 {
        let span = Span::new(
            TraceId::from_bytes([i + 1; 16]),
            SpanId::from_bytes([i + 1; 8]),
            format!("span-{i}"),
        );
        ingest
            .enqueue(SignalKind::Traces, resource("svc"), vec![span.into()])
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(1), || traces.record_count() == 3).await);
    assert_eq!(stalled.attempts(), 1);

    let report = supervisor.drain().await;
    assert!(report.timed_out);
    assert_eq!(report.dropped_batches, 3);
}
