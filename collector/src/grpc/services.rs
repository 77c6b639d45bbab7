//! gRPC service implementations for the OTLP collector services.

use crate::ingest::{Ingest, IngestError};
use crate::pipeline::QueueError;
use shared::otlp::conversions::{decode_logs_request, decode_metrics_request, decode_trace_request};
use shared::otlp::proto::collector::{
    logs::v1::{
        logs_service_server::LogsService, ExportLogsPartialSuccess, ExportLogsServiceRequest,
        ExportLogsServiceResponse,
    },
    metrics::v1::{
        metrics_service_server::MetricsService, ExportMetricsPartialSuccess,
        ExportMetricsServiceRequest, ExportMetricsServiceResponse,
    },
    trace::v1::{
        trace_service_server::TraceService, ExportTracePartialSuccess, ExportTraceServiceRequest,
        ExportTraceServiceResponse,
    },
};
use tonic::{Request, Response, Status};

/// Maps an ingest failure onto a gRPC status.
///
/// A request whose records all failed validation is `INVALID_ARGUMENT`; a
/// full or closed queue is `UNAVAILABLE`, which OTLP clients retry.
#[must_use]
pub fn ingest_status(err: &IngestError) -> Status {
    if err.is_retryable() {
        Status::unavailable(err.to_string())
    } else {
        match err {
            IngestError::AllRejected { .. }
            | IngestError::Queue(QueueError::TooLarge { .. }) => {
                Status::invalid_argument(err.to_string())
            }
            IngestError::Queue(_) => Status::internal(err.to_string()),
        }
    }
}

/// Implementation of the OTLP `TraceService` gRPC service.
#[derive(Clone)]
pub struct TraceServiceImpl {
    ingest: Ingest,
}

impl TraceServiceImpl {
    /// Creates the service over `ingest`.
    #[must_use]
    pub fn new(ingest: Ingest) -> Self {
        Self { ingest }
    }
}

#[tonic::async_trait]
impl TraceService for TraceServiceImpl {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let decoded = decode_trace_request(request.get_ref());
        let outcome = self.ingest.submit(decoded).map_err(|e| ingest_status(&e))?;
        tracing::debug!(
            signal = "traces",
            accepted = outcome.accepted,
            rejected = outcome.rejected,
            "Processed OTLP gRPC traces"
        );

        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: outcome.partial_success().map(|(count, message)| ExportTracePartialSuccess {
                rejected_spans: count,
                error_message: message,
            }),
        }))
    }
}

/// Implementation of the OTLP `LogsService` gRPC service.
#[derive(Clone)]
pub struct LogsServiceImpl {
    ingest: Ingest,
}

impl LogsServiceImpl {
    /// Creates the service over `ingest`.
    #[must_use]
    pub fn new(ingest: Ingest) -> Self {
        Self { ingest }
    }
}

#[tonic::async_trait]
impl LogsService for LogsServiceImpl {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        let decoded = decode_logs_request(request.get_ref());
        let outcome = self.ingest.submit(decoded).map_err(|e| ingest_status(&e))?;
        tracing::debug!(
            signal = "logs",
            accepted = outcome.accepted,
            rejected = outcome.rejected,
            "Processed OTLP gRPC logs"
        );

        Ok(Response::new(ExportLogsServiceResponse {
            partial_success: outcome.partial_success().map(|(count, message)| ExportLogsPartialSuccess {
                rejected_log_records: count,
                error_message: message,
            }),
        }))
    }
}

/// Implementation of the OTLP `MetricsService` gRPC service.
#[derive(Clone)]
pub struct MetricsServiceImpl {
    ingest: Ingest,
}

impl MetricsServiceImpl {
    /// Creates the service over `ingest`.
    #[must_use]
    pub fn new(ingest: Ingest) -> Self {
        Self { ingest }
    }
}

#[tonic::async_trait]
impl MetricsService for MetricsServiceImpl {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        let decoded = decode_metrics_request(request.get_ref());
        let outcome = self.ingest.submit(decoded).map_err(|e| ingest_status(&e))?;
        tracing::debug!(
            signal = "metrics",
            accepted = outcome.accepted,
            rejected = outcome.rejected,
            "Processed OTLP gRPC metrics"
        );

        Ok(Response::new(ExportMetricsServiceResponse {
            partial_success: outcome.partial_success().map(|(count, message)| {
                ExportMetricsPartialSuccess {
                    rejected_data_points: count,
                    error_message: message,
                }
            }),
        }))
    }
}
