//! Integration tests for the OTLP HTTP receiver.
//!
//! Requests go through the full application router; delivery is checked on
//! the in-memory destinations after a drain.

use super::common::{
    config_with, get, otlp_gauge_request, otlp_log, otlp_logs_request, otlp_span, otlp_traces_request,
    post_json, post_protobuf, test_collector, test_collector_with,
};
use axum::http::StatusCode;
use collector::OtlpError;
use prost::Message;
use serde_json::json;
use shared::config::{BatchConfig, RetryPolicy};
use shared::models::{Severity, SignalKind};
use shared::otlp::proto::collector::logs::v1::ExportLogsServiceResponse;
use shared::otlp::proto::collector::trace::v1::ExportTraceServiceResponse;

#[tokio::test]
async fn scenario_missing_timestamp_rejected_siblings_accepted() {
    let c = test_collector();
    let request = otlp_logs_request(
        "checkout",
        vec![
            otlp_log(1_700_000_000_000_000_000, "first"),
            otlp_log(0, "no timestamp"),
            otlp_log(1_700_000_000_000_000_002, "third"),
        ],
    );

    let (status, body) = post_protobuf(c.app.clone(), "/v1/logs", request.encode_to_vec()).await;

    assert_eq!(status, StatusCode::OK);
    let partial = ExportLogsServiceResponse::decode(body)
        .unwrap()
        .partial_success
        .unwrap();
    assert_eq!(partial.rejected_log_records, 1);
    assert!(partial.error_message.contains("time_unix_nano"));

    let report = c.supervisor.drain().await;
    assert!(!report.timed_out);

    let batches = c.logs.batches();
    assert_eq!(batches.len(), 1);
    let bodies: Vec<&str> = batches[0].logs().map(|l| l.body.as_str()).collect();
    assert_eq!(bodies, ["first", "third"]);
    assert_eq!(batches[0].resource().service_name(), Some("checkout"));

    let stats = c.state.ingest().stats().snapshot();
    assert_eq!(stats.signals[&SignalKind::Logs].accepted, 2);
    assert_eq!(stats.signals[&SignalKind::Logs].rejected, 1);
}

#[tokio::test]
async fn test_json_logs_flow() {
    let c = test_collector();

    let (status, body) = post_json(
        c.app.clone(),
        "/v1/logs",
        json!({
            "resourceLogs": [{
                "resource": {
                    "attributes": [{"key": "service.name", "value": {"stringValue": "json-service"}}]
                },
                "scopeLogs": [{
                    "logRecords": [
                        {
                            "timeUnixNano": "1700000000000000000",
                            "severityNumber": 17,
                            "body": {"stringValue": "payment failed"},
                            "traceId": "5b8efff798038103d269b633813fc60c",
                            "spanId": "eee19b7ec3c1b174"
                        },
                        {
                            "observedTimeUnixNano": "1700000000000000001",
                            "severityNumber": 9,
                            "body": {"stringValue": "observed only"}
                        }
                    ]
                }]
            }]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.get("partialSuccess").is_none_or(serde_json::Value::is_null));

    c.supervisor.drain().await;
    let batches = c.logs.batches();
    assert_eq!(batches.len(), 1);
    let logs: Vec<_> = batches[0].logs().collect();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].severity, Severity::Error);
    assert_eq!(
        logs[0].trace_id.map(|id| id.to_string()).as_deref(),
        Some("5b8efff798038103d269b633813fc60c")
    );
    assert_eq!(logs[1].body, "observed only");
}

#[tokio::test]
async fn test_traces_grouped_by_resource() {
    let c = test_collector();

    for service in ["frontend", "backend", "frontend"] {
        let request = otlp_traces_request(service, vec![otlp_span(1, 2, "GET /")]);
        let (status, body) = post_protobuf(c.app.clone(), "/v1/traces", request.encode_to_vec()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(ExportTraceServiceResponse::decode(body)
            .unwrap()
            .partial_success
            .is_none());
    }

    c.supervisor.drain().await;
    let mut batches = c.traces.batches();
    batches.sort_by_key(|b| b.resource().service_name().map(ToString::to_string));
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].resource().service_name(), Some("backend"));
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[1].resource().service_name(), Some("frontend"));
    assert_eq!(batches[1].len(), 2);
}

#[tokio::test]
async fn test_span_with_end_before_start_rejected() {
    let c = test_collector();
    let mut backwards = otlp_span(3, 4, "backwards");
    backwards.end_time_unix_nano = backwards.start_time_unix_nano - 1;

    let request = otlp_traces_request("svc", vec![backwards, otlp_span(3, 5, "fine")]);
    let (status, body) = post_protobuf(c.app.clone(), "/v1/traces", request.encode_to_vec()).await;

    assert_eq!(status, StatusCode::OK);
    let partial = ExportTraceServiceResponse::decode(body)
        .unwrap()
        .partial_success
        .unwrap();
    assert_eq!(partial.rejected_spans, 1);

    c.supervisor.drain().await;
    assert_eq!(c.traces.record_count(), 1);
}

#[tokio::test]
async fn test_all_invalid_request_is_client_error() {
    let c = test_collector();
    let request = otlp_logs_request("svc", vec![otlp_log(0, "a"), otlp_log(0, "b")]);

    let (status, body) = post_protobuf(c.app.clone(), "/v1/logs", request.encode_to_vec()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: OtlpError = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.code, 400);
    assert!(error.message.contains("time_unix_nano"));

    c.supervisor.drain().await;
    assert_eq!(c.logs.record_count(), 0);
}

#[tokio::test]
async fn test_metrics_flow_and_stats() {
    let c = test_collector();
    let request = otlp_gauge_request("node", "cpu_usage", 0.75);

    let (status, _) = post_protobuf(c.app.clone(), "/v1/metrics", request.encode_to_vec()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, stats) = get(c.app.clone(), "/api/v1/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["signals"]["metrics"]["accepted"], 1);
    assert_eq!(stats["signals"]["metrics"]["buffered"], 1);

    c.supervisor.drain().await;
    let batches = c.metrics.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].metrics().next().unwrap().name, "cpu_usage");
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let c = test_collector();
    let records = (0..2_000)
        .map(|i| otlp_log(1_700_000_000_000_000_000 + i, &"x".repeat(64)))
        .collect();
    let request = otlp_logs_request("svc", records);
    assert!(request.encoded_len() > 64 * 1024);

    let (status, _) = post_protobuf(c.app.clone(), "/v1/logs", request.encode_to_vec()).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    c.supervisor.drain().await;
    assert_eq!(c.logs.record_count(), 0);
}

#[tokio::test]
async fn test_closed_queue_is_unavailable() {
    let c = test_collector();
    let app = c.app.clone();
    c.supervisor.drain().await;

    let request = otlp_logs_request("svc", vec![otlp_log(1_700_000_000_000_000_000, "late")]);
    let (status, body) = post_protobuf(app, "/v1/logs", request.encode_to_vec()).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let error: OtlpError = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.code, 503);
}

#[tokio::test]
async fn test_request_larger_than_queue_is_not_retryable() {
    let c = test_collector_with(config_with(
        &BatchConfig {
            max_batch_age_ms: 60_000,
            max_buffered_records: 4,
            ..BatchConfig::default()
        },
        &RetryPolicy::default(),
    ));
    let records = (0..5)
        .map(|i| otlp_log(1_700_000_000_000_000_000 + i, "record"))
        .collect();
    let body = otlp_logs_request("svc", records).encode_to_vec();

    for _ in 0..2 {
        let (status, response) = post_protobuf(c.app.clone(), "/v1/logs", body.clone()).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        let error: OtlpError = serde_json::from_slice(&response).unwrap();
        assert_eq!(error.code, 413);
        assert!(error.message.contains("capacity (4 records)"));
    }

    let stats = c.state.ingest().stats_snapshot();
    assert_eq!(stats.signals[&SignalKind::Logs].refused, 10);
    assert_eq!(stats.signals[&SignalKind::Logs].buffered, 0);

    c.supervisor.drain().await;
    assert_eq!(c.logs.record_count(), 0);
}
