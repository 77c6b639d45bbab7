//! OTLP gRPC receiver services.
//!
//! Implements the OpenTelemetry Protocol `Export` RPCs for traces, logs and
//! metrics. They work with the standard OpenTelemetry SDK exporters.
//!
//! # Services
//!
//! - `TraceService` - Receives spans via gRPC
//! - `LogsService` - Receives log records via gRPC
//! - `MetricsService` - Receives metric points via gRPC

mod services;

pub use services::{ingest_status, LogsServiceImpl, MetricsServiceImpl, TraceServiceImpl};

use crate::ingest::Ingest;
use shared::otlp::proto::collector::{
    logs::v1::logs_service_server::LogsServiceServer,
    metrics::v1::metrics_service_server::MetricsServiceServer,
    trace::v1::trace_service_server::TraceServiceServer,
};
use tonic::service::Routes;

/// Builds the gRPC routes serving all three OTLP services.
#[must_use]
pub fn grpc_routes(ingest: &Ingest, max_message_bytes: usize) -> Routes {
    Routes::new(
        TraceServiceServer::new(TraceServiceImpl::new(ingest.clone()))
            .max_decoding_message_size(max_message_bytes),
    )
    .add_service(
        LogsServiceServer::new(LogsServiceImpl::new(ingest.clone()))
            .max_decoding_message_size(max_message_bytes),
    )
    .add_service(
        MetricsServiceServer::new(MetricsServiceImpl::new(ingest.clone()))
            .max_decoding_message_size(max_message_bytes),
    )
}
