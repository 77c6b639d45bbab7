//! Integration tests for OTLP gRPC services.
//!
//! These tests call the service implementations the gRPC server mounts and
//! check what reaches the destinations.

use super::common::{
    config_with, otlp_gauge_request, otlp_log, otlp_logs_request, otlp_span, otlp_traces_request,
    test_collector, test_collector_with,
};
use collector::grpc::{LogsServiceImpl, MetricsServiceImpl, TraceServiceImpl};
use shared::config::{BatchConfig, RetryPolicy};
use shared::otlp::proto::collector::{
    logs::v1::{logs_service_server::LogsService, ExportLogsServiceRequest},
    metrics::v1::metrics_service_server::MetricsService,
    trace::v1::trace_service_server::TraceService,
};

#[tokio::test]
async fn test_grpc_logs_service_integration() {
    let c = test_collector();
    let service = LogsServiceImpl::new(c.state.ingest().clone());

    let request = tonic::Request::new(otlp_logs_request(
        "integration-test-service",
        vec![otlp_log(1_700_000_000_000_000_000, "Integration test log message")],
    ));
    let response = tokio_test::assert_ok!(service.export(request).await).into_inner();
    assert!(response.partial_success.is_none());

    c.supervisor.drain().await;
    let batches = c.logs.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0].resource().service_name(),
        Some("integration-test-service")
    );
    assert_eq!(
        batches[0].logs().next().unwrap().body,
        "Integration test log message"
    );
}

#[tokio::test]
async fn test_grpc_partial_success() {
    let c = test_collector();
    let service = LogsServiceImpl::new(c.state.ingest().clone());

    let request = tonic::Request::new(otlp_logs_request(
        "svc",
        vec![otlp_log(1_700_000_000_000_000_000, "kept"), otlp_log(0, "dropped")],
    ));
    let partial = service
        .export(request)
        .await
        .unwrap()
        .into_inner()
        .partial_success
        .unwrap();

    assert_eq!(partial.rejected_log_records, 1);
    assert!(partial.error_message.contains("time_unix_nano"));
    c.supervisor.drain().await;
    assert_eq!(c.logs.record_count(), 1);
}

#[tokio::test]
async fn test_grpc_all_invalid_is_invalid_argument() {
    let c = test_collector();
    let service = TraceServiceImpl::new(c.state.ingest().clone());

    let mut span = otlp_span(1, 2, "no-trace-id");
    span.trace_id.clear();
    let status = tokio_test::assert_err!(
        service
            .export(tonic::Request::new(otlp_traces_request("svc", vec![span])))
            .await
    );

    assert_eq!(status.code(), tonic::Code::InvalidArgument);
    assert!(status.message().contains("trace_id"));
    c.supervisor.drain().await;
}

#[tokio::test]
async fn test_grpc_traces_service_integration() {
    let c = test_collector();
    let service = TraceServiceImpl::new(c.state.ingest().clone());

    let request = otlp_traces_request(
        "trace-test-service",
        vec![otlp_span(7, 1, "parent"), otlp_span(7, 2, "child")],
    );
    service.export(tonic::Request::new(request)).await.unwrap();

    c.supervisor.drain().await;
    let batches = c.traces.batches();
    assert_eq!(batches.len(), 1);
    let names: Vec<_> = batches[0].spans().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["parent", "child"]);
}

#[tokio::test]
async fn test_grpc_metrics_service_integration() {
    let c = test_collector();
    let service = MetricsServiceImpl::new(c.state.ingest().clone());

    service
        .export(tonic::Request::new(otlp_gauge_request("node", "memory_usage", 512.0)))
        .await
        .unwrap();

    c.supervisor.drain().await;
    assert_eq!(c.metrics.record_count(), 1);
}

fn small_queue_collector(capacity: usize) -> super::common::TestCollector {
    test_collector_with(config_with(
        &BatchConfig {
            max_batch_age_ms: 60_000,
            max_buffered_records: capacity,
            ..BatchConfig::default()
        },
        &RetryPolicy::default(),
    ))
}

fn logs(count: u64) -> ExportLogsServiceRequest {
    otlp_logs_request(
        "svc",
        (0..count)
            .map(|i| otlp_log(1_700_000_000_000_000_000 + i, "record"))
            .collect(),
    )
}

#[tokio::test]
async fn test_grpc_capacity_exhaustion_is_unavailable() {
    let c = small_queue_collector(3);
    let service = LogsServiceImpl::new(c.state.ingest().clone());

    tokio_test::assert_ok!(service.export(tonic::Request::new(logs(2))).await);
    let status = tokio_test::assert_err!(service.export(tonic::Request::new(logs(2))).await);

    assert_eq!(status.code(), tonic::Code::Unavailable);
    c.supervisor.drain().await;
    assert_eq!(c.logs.record_count(), 2);
}

#[tokio::test]
async fn test_grpc_request_larger_than_queue_is_invalid_argument() {
    let c = small_queue_collector(2);
    let service = LogsServiceImpl::new(c.state.ingest().clone());

    let status = tokio_test::assert_err!(service.export(tonic::Request::new(logs(3))).await);

    assert_eq!(status.code(), tonic::Code::InvalidArgument);
    assert!(status.message().contains("exceed"));
    c.supervisor.drain().await;
    assert_eq!(c.logs.record_count(), 0);
}
