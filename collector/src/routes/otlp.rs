//! OTLP HTTP receiver endpoints.
//!
//! Implements OpenTelemetry Protocol HTTP endpoints for ingesting logs, metrics, and traces.
//! Supports both protobuf (`application/x-protobuf`) and JSON (`application/json`) content types;
//! the response is encoded the same way as the request.
//!
//! # Endpoints
//!
//! - `POST /v1/logs` - Ingest OTLP logs
//! - `POST /v1/metrics` - Ingest OTLP metrics
//! - `POST /v1/traces` - Ingest OTLP traces

use crate::ingest::IngestError;
use crate::pipeline::QueueError;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use prost::Message;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::otlp::conversions::{decode_logs_request, decode_metrics_request, decode_trace_request};
use shared::otlp::proto::collector::{
    logs::v1::{ExportLogsPartialSuccess, ExportLogsServiceRequest, ExportLogsServiceResponse},
    metrics::v1::{
        ExportMetricsPartialSuccess, ExportMetricsServiceRequest, ExportMetricsServiceResponse,
    },
    trace::v1::{ExportTracePartialSuccess, ExportTraceServiceRequest, ExportTraceServiceResponse},
};

/// Content type for protobuf requests.
const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";

/// Content type for JSON requests.
const CONTENT_TYPE_JSON: &str = "application/json";

/// Error response for OTLP endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct OtlpError {
    /// Error code.
    pub code: u16,
    /// Error message.
    pub message: String,
}

type OtlpRejection = (StatusCode, Json<OtlpError>);

fn rejection(status: StatusCode, message: impl Into<String>) -> OtlpRejection {
    (
        status,
        Json(OtlpError {
            code: status.as_u16(),
            message: message.into(),
        }),
    )
}

/// Body encoding of a request and its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Protobuf,
    Json,
}

impl Encoding {
    /// Reads the encoding from the `Content-Type` header; JSON when absent.
    fn from_headers(headers: &HeaderMap) -> Result<Self, OtlpRejection> {
        let Some(value) = headers.get(header::CONTENT_TYPE) else {
            return Ok(Self::Json);
        };
        let content_type = value.to_str().unwrap_or_default();
        let mime = content_type.split(';').next().unwrap_or_default().trim();

        if mime.eq_ignore_ascii_case(CONTENT_TYPE_PROTOBUF) {
            Ok(Self::Protobuf)
        } else if mime.eq_ignore_ascii_case(CONTENT_TYPE_JSON) {
            Ok(Self::Json)
        } else {
            Err(rejection(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!("Unsupported content type: {content_type}"),
            ))
        }
    }

    fn decode<T>(self, body: &Bytes, signal: &'static str) -> Result<T, OtlpRejection>
    where
        T: Message + Default + DeserializeOwned,
    {
        match self {
            Self::Protobuf => T::decode(body.as_ref()).map_err(|e| {
                tracing::warn!(signal, error = %e, "Failed to decode protobuf request");
                rejection(StatusCode::BAD_REQUEST, format!("Failed to decode protobuf: {e}"))
            }),
            Self::Json => serde_json::from_slice(body).map_err(|e| {
                tracing::warn!(signal, error = %e, "Failed to decode JSON request");
                rejection(StatusCode::BAD_REQUEST, format!("Failed to decode JSON: {e}"))
            }),
        }
    }

    fn encode<T>(self, message: &T) -> Response
    where
        T: Message + Serialize,
    {
        match self {
            Self::Protobuf => (
                [(header::CONTENT_TYPE, CONTENT_TYPE_PROTOBUF)],
                message.encode_to_vec(),
            )
                .into_response(),
            Self::Json => Json(message).into_response(),
        }
    }
}

/// Maps an ingest failure onto an HTTP status.
fn ingest_rejection(err: &IngestError) -> OtlpRejection {
    let status = if err.is_retryable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        match err {
            IngestError::AllRejected { .. } => StatusCode::BAD_REQUEST,
            IngestError::Queue(QueueError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            IngestError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    };
    rejection(status, err.to_string())
}

/// Creates the OTLP routes with application state.
pub fn otlp_routes(state: AppState) -> Router {
    let max_body_bytes = state.max_body_bytes();
    Router::new()
        .route("/v1/logs", post(ingest_logs))
        .route("/v1/metrics", post(ingest_metrics))
        .route("/v1/traces", post(ingest_traces))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Handler for OTLP traces ingestion.
async fn ingest_traces(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, OtlpRejection> {
    let encoding = Encoding::from_headers(&headers)?;
    let request: ExportTraceServiceRequest = encoding.decode(&body, "traces")?;

    let outcome = state
        .ingest()
        .submit(decode_trace_request(&request))
        .map_err(|e| ingest_rejection(&e))?;
    tracing::debug!(
        signal = "traces",
        accepted = outcome.accepted,
        rejected = outcome.rejected,
        "Processed OTLP traces"
    );

    let response = ExportTraceServiceResponse {
        partial_success: outcome
            .partial_success()
            .map(|(count, message)| ExportTracePartialSuccess {
                rejected_spans: count,
                error_message: message,
            }),
    };
    Ok(encoding.encode(&response))
}

/// Handler for OTLP logs ingestion.
async fn ingest_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, OtlpRejection> {
    let encoding = Encoding::from_headers(&headers)?;
    let request: ExportLogsServiceRequest = encoding.decode(&body, "logs")?;

    let outcome = state
        .ingest()
        .submit(decode_logs_request(&request))
        .map_err(|e| ingest_rejection(&e))?;
    tracing::debug!(
        signal = "logs",
        accepted = outcome.accepted,
        rejected = outcome.rejected,
        "Processed OTLP logs"
    );

    let response = ExportLogsServiceResponse {
        partial_success: outcome
            .partial_success()
            .map(|(count, message)| ExportLogsPartialSuccess {
                rejected_log_records: count,
                error_message: message,
            }),
    };
    Ok(encoding.encode(&response))
}

/// Handler for OTLP metrics ingestion.
async fn ingest_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, OtlpRejection> {
    let encoding = Encoding::from_headers(&headers)?;
    let request: ExportMetricsServiceRequest = encoding.decode(&body, "metrics")?;

    let outcome = state
        .ingest()
        .submit(decode_metrics_request(&request))
        .map_err(|e| ingest_rejection(&e))?;
    tracing::debug!(
        signal = "metrics",
        accepted = outcome.accepted,
        rejected = outcome.rejected,
        "Processed OTLP metrics"
    );

    let response = ExportMetricsServiceResponse {
        partial_success: outcome
            .partial_success()
            .map(|(count, message)| ExportMetricsPartialSuccess {
                rejected_data_points: count,
                error_message: message,
            }),
    };
    Ok(encoding.encode(&response))
}
