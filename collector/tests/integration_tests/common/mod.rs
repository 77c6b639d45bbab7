//! Common test utilities and helpers for integration tests.
//!
//! This module provides shared functionality used across all integration tests,
//! including collector setup, a scriptable destination and HTTP request helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use collector::pipeline::{DropReason, Supervisor};
use collector::{create_router, AppState};
use http_body_util::BodyExt;
use serde_json::Value;
use shared::config::{BatchConfig, RetryPolicy, TributaryConfig};
use shared::destination::{Destination, ExportError, MemoryDestination};
use shared::models::{Batch, LogRecord, Resource, Severity, SignalKind, SignalRecord};
use shared::otlp::proto;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// A collector over in-memory destinations, with its HTTP router.
pub struct TestCollector {
    pub app: Router,
    pub state: AppState,
    pub supervisor: Supervisor,
    pub traces: Arc<MemoryDestination>,
    pub logs: Arc<MemoryDestination>,
    pub metrics: Arc<MemoryDestination>,
}

/// Returns a configuration without destinations whose batches flush only
/// when full or drained.
pub fn slow_flush_config() -> TributaryConfig {
    let mut config = TributaryConfig::default();
    for kind in SignalKind::ALL {
        config.pipelines.get_mut(kind).batch.max_batch_age_ms = 60_000;
    }
    config
}

/// Applies `batch` and `retry` to every pipeline.
pub fn config_with(batch: &BatchConfig, retry: &RetryPolicy) -> TributaryConfig {
    let mut config = TributaryConfig::default();
    for kind in SignalKind::ALL {
        let pipeline = config.pipelines.get_mut(kind);
        pipeline.batch = batch.clone();
        pipeline.retry = retry.clone();
    }
    config
}

/// Starts a collector with one memory destination per kind.
pub fn test_collector() -> TestCollector {
    test_collector_with(slow_flush_config())
}

/// Starts a collector from `config` with one memory destination per kind.
pub fn test_collector_with(config: TributaryConfig) -> TestCollector {
    let traces = Arc::new(MemoryDestination::new("traces-memory", SignalKind::Traces));
    let logs = Arc::new(MemoryDestination::new("logs-memory", SignalKind::Logs));
    let metrics = Arc::new(MemoryDestination::new("metrics-memory", SignalKind::Metrics));
    let supervisor = Supervisor::builder(config)
        .with_destination(traces.clone(), 2)
        .with_destination(logs.clone(), 2)
        .with_destination(metrics.clone(), 2)
        .start()
        .unwrap();
    let state = AppState::from_supervisor(&supervisor, 64 * 1024);

    TestCollector {
        app: create_router(state.clone()),
        state,
        supervisor,
        traces,
        logs,
        metrics,
    }
}

/// Starts a pipeline whose log destinations are `logs`; traces and metrics
/// go to memory.
pub fn logs_pipeline(
    config: TributaryConfig,
    logs: Vec<(Arc<dyn Destination>, usize)>,
) -> Supervisor {
    let mut builder = Supervisor::builder(config)
        .with_destination(Arc::new(MemoryDestination::new("traces-memory", SignalKind::Traces)), 1)
        .with_destination(Arc::new(MemoryDestination::new("metrics-memory", SignalKind::Metrics)), 1);
    for (destination, max_in_flight) in logs {
        builder = builder.with_destination(destination, max_in_flight);
    }
    builder.start().unwrap()
}

/// Pairs a scripted destination with its concurrency bound.
pub fn lane(
    destination: &Arc<ScriptedDestination>,
    max_in_flight: usize,
) -> (Arc<dyn Destination>, usize) {
    (destination.clone(), max_in_flight)
}

/// Returns the batches `destination` dropped for `reason`.
pub fn dropped(supervisor: &Supervisor, destination: &str, reason: DropReason) -> u64 {
    supervisor
        .stats()
        .snapshot()
        .destinations
        .get(destination)
        .and_then(|d| d.dropped_batches.get(&reason).copied())
        .unwrap_or(0)
}

/// Returns a resource for `service`.
pub fn resource(service: &str) -> Arc<Resource> {
    Arc::new(Resource::new().with_attribute("service.name", service))
}

/// Returns `count` log records whose bodies are `prefix-<i>`.
pub fn log_records(prefix: &str, count: usize) -> Vec<SignalRecord> {
    (0..count)
        .map(|i| LogRecord::new(Severity::Info, format!("{prefix}-{i}")).into())
        .collect()
}

/// What a [`ScriptedDestination`] does on one attempt.
#[derive(Debug, Clone)]
pub enum Step {
    /// Accept the batch.
    Succeed,
    /// Fail with the given error.
    Fail(ExportError),
    /// Never answer.
    Hang,
    /// Accept the batch after a delay.
    Delay(Duration),
}

/// A log destination that plays back a script of steps, then succeeds.
pub struct ScriptedDestination {
    name: String,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    attempts: AtomicU32,
    attempt_times: Mutex<Vec<Instant>>,
    delivered: Mutex<Vec<Batch>>,
}

impl ScriptedDestination {
    pub fn new(name: &str, script: Vec<Step>) -> Arc<Self> {
        Self::with_fallback(name, script, Step::Succeed)
    }

    /// Plays `script`, then repeats `fallback` forever.
    pub fn with_fallback(name: &str, script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            fallback,
            attempts: AtomicU32::new(0),
            attempt_times: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempt_times.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<Batch> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Destination for ScriptedDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SignalKind {
        SignalKind::Logs
    }

    async fn export(&self, batch: &Batch) -> Result<(), ExportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempt_times.lock().unwrap().push(Instant::now());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Succeed => {}
            Step::Fail(err) => return Err(err),
            Step::Hang => std::future::pending::<()>().await,
            Step::Delay(delay) => tokio::time::sleep(delay).await,
        }
        self.delivered.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

/// Waits (in virtual or real time) until `condition` holds, polling every 10ms.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Returns a string `AnyValue`.
pub fn string_value(s: &str) -> Option<proto::common::v1::AnyValue> {
    Some(proto::common::v1::AnyValue {
        value: Some(proto::common::v1::any_value::Value::StringValue(s.to_string())),
    })
}

/// Returns an OTLP resource named `service`.
pub fn otlp_resource(service: &str) -> Option<proto::resource::v1::Resource> {
    Some(proto::resource::v1::Resource {
        attributes: vec![proto::common::v1::KeyValue {
            key: "service.name".to_string(),
            value: string_value(service),
        }],
        ..Default::default()
    })
}

/// Returns an OTLP log record; a zero `time_unix_nano` makes it invalid.
pub fn otlp_log(time_unix_nano: u64, body: &str) -> proto::logs::v1::LogRecord {
    proto::logs::v1::LogRecord {
        time_unix_nano,
        severity_number: 9,
        body: string_value(body),
        ..Default::default()
    }
}

/// Returns a logs export request for one resource.
pub fn otlp_logs_request(
    service: &str,
    records: Vec<proto::logs::v1::LogRecord>,
) -> proto::collector::logs::v1::ExportLogsServiceRequest {
    proto::collector::logs::v1::ExportLogsServiceRequest {
        resource_logs: vec![proto::logs::v1::ResourceLogs {
            resource: otlp_resource(service),
            scope_logs: vec![proto::logs::v1::ScopeLogs {
                log_records: records,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// Returns a valid OTLP span.
pub fn otlp_span(trace_byte: u8, span_byte: u8, name: &str) -> proto::trace::v1::Span {
    proto::trace::v1::Span {
        trace_id: vec![trace_byte; 16],
        span_id: vec![span_byte; 8],
        name: name.to_string(),
        start_time_unix_nano: 1_700_000_000_000_000_000,
        end_time_unix_nano: 1_700_000_000_050_000_000,
        ..Default::default()
    }
}

/// Returns a traces export request for one resource.
pub fn otlp_traces_request(
    service: &str,
    spans: Vec<proto::trace::v1::Span>,
) -> proto::collector::trace::v1::ExportTraceServiceRequest {
    proto::collector::trace::v1::ExportTraceServiceRequest {
        resource_spans: vec![proto::trace::v1::ResourceSpans {
            resource: otlp_resource(service),
            scope_spans: vec![proto::trace::v1::ScopeSpans {
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// Returns a metrics export request holding one gauge point.
pub fn otlp_gauge_request(
    service: &str,
    name: &str,
    value: f64,
) -> proto::collector::metrics::v1::ExportMetricsServiceRequest {
    proto::collector::metrics::v1::ExportMetricsServiceRequest {
        resource_metrics: vec![proto::metrics::v1::ResourceMetrics {
            resource: otlp_resource(service),
            scope_metrics: vec![proto::metrics::v1::ScopeMetrics {
                metrics: vec![proto::metrics::v1::Metric {
                    name: name.to_string(),
                    data: Some(proto::metrics::v1::metric::Data::Gauge(
                        proto::metrics::v1::Gauge {
                            data_points: vec![proto::metrics::v1::NumberDataPoint {
                                time_unix_nano: 1_700_000_000_000_000_000,
                                value: Some(
                                    proto::metrics::v1::number_data_point::Value::AsDouble(value),
                                ),
                                ..Default::default()
                            }],
                        },
                    )),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// Helper to make a POST request with a protobuf body.
pub async fn post_protobuf(app: Router, uri: &str, body: Vec<u8>) -> (StatusCode, Bytes) {
    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-protobuf")
            .body(Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

/// Helper to make a POST request with JSON body.
pub async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
    )
    .await
    .unwrap();

    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

    (status, json)
}

/// Helper to make a GET request.
pub async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get_raw(app, uri).await;
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// Helper to make a GET request and keep the raw body.
pub async fn get_raw(app: Router, uri: &str) -> (StatusCode, Bytes) {
    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}
