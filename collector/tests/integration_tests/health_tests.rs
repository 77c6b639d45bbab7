//! Integration tests for the health and stats endpoints.

use super::common::{
    config_with, get, lane, log_records, logs_pipeline, resource, wait_until, ScriptedDestination,
    Step,
};
use axum::http::StatusCode;
use collector::pipeline::DropReason;
use collector::{create_router, AppState};
use shared::config::{BatchConfig, RetryPolicy};
use shared::destination::ExportError;
use shared::models::SignalKind;
use std::time::Duration;

#[tokio::test]
async fn test_health_reports_all_components() {
    let c = super::common::test_collector();

    let (status, health) = get(c.app.clone(), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    for kind in ["traces", "logs", "metrics"] {
        assert_eq!(health["components"][format!("queue:{kind}")], "up");
        assert_eq!(health["components"][format!("router:{kind}")], "up");
    }
    assert_eq!(health["components"]["destination:logs-memory"], "up");
    c.supervisor.drain().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_destination_degrades_but_serves() {
    let backend = ScriptedDestination::with_fallback(
        "logs-backend",
        vec![],
        Step::Fail(ExportError::Rejected("HTTP 400".to_string())),
    );
    let supervisor = logs_pipeline(
        config_with(
            &BatchConfig {
                max_batch_age_ms: 50,
                ..BatchConfig::default()
            },
            &RetryPolicy::default(),
        ),
        vec![lane(&backend, 1)],
    );
    let app = create_router(AppState::from_supervisor(&supervisor, 1024 * 1024));

    supervisor
        .ingest()
        .enqueue(SignalKind::Logs, resource("svc"), log_records("a", 1))
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || backend.attempts() == 1).await);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let (status, health) = get(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["destination:logs-backend"], "degraded");

    let (status, stats) = get(app.clone(), "/api/v1/stats").await;
    assert_eq!(status, StatusCode::OK);
    let destination = &stats["destinations"]["logs-backend"];
    assert_eq!(destination["kind"], "logs");
    assert_eq!(destination["dropped_batches"][DropReason::Rejected.as_str()], 1);

    supervisor.drain().await;
}

#[tokio::test]
async fn test_draining_collector_is_unavailable() {
    let c = super::common::test_collector();
    let app = c.app.clone();
    c.supervisor.drain().await;

    let (status, health) = get(app, "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "draining");
    assert_eq!(health["components"]["queue:traces"], "down");
}

#[tokio::test]
async fn test_stats_shape() {
    let c = super::common::test_collector();

    let (status, stats) = get(c.app.clone(), "/api/v1/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert!(stats["started_at"].is_string());
    for kind in ["traces", "logs", "metrics"] {
        assert_eq!(stats["signals"][kind]["accepted"], 0);
        assert_eq!(stats["signals"][kind]["batches_flushed"], 0);
    }
    assert_eq!(stats["destinations"]["traces-memory"]["batches_sent"], 0);
    assert_eq!(stats["scrape"]["successes"], 0);
    c.supervisor.drain().await;
}
