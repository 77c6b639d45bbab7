//! OTLP gRPC push destination.

use super::{BuildError, Destination, ExportError};
use crate::models::{Batch, SignalKind};
use crate::otlp::encode;
use crate::otlp::proto::collector::{
    logs::v1::logs_service_client::LogsServiceClient,
    metrics::v1::metrics_service_client::MetricsServiceClient,
    trace::v1::trace_service_client::TraceServiceClient,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::str::FromStr;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};

/// Pushes batches to an OTLP gRPC receiver.
///
/// The channel connects lazily, so an unreachable backend surfaces as a
/// retryable export error rather than a startup failure.
pub struct OtlpGrpcDestination {
    name: String,
    kind: SignalKind,
    channel: Channel,
    metadata: MetadataMap,
}

impl OtlpGrpcDestination {
    /// Creates a destination for `endpoint`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] if the endpoint URI or a metadata entry is
    /// invalid.
    pub fn new(
        name: &str,
        kind: SignalKind,
        endpoint: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, BuildError> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| BuildError::InvalidEndpoint {
                name: name.to_string(),
                reason: e.to_string(),
            })?
            .connect_timeout(std::time::Duration::from_secs(5))
            .connect_lazy();

        let mut metadata = MetadataMap::new();
        for (key, value) in headers {
            let invalid = || BuildError::InvalidHeader {
                name: name.to_string(),
                header: key.clone(),
            };
            let key = AsciiMetadataKey::from_str(&key.to_ascii_lowercase()).map_err(|_| invalid())?;
            let value = AsciiMetadataValue::from_str(value).map_err(|_| invalid())?;
            metadata.insert(key, value);
        }

        Ok(Self {
            name: name.to_string(),
            kind,
            channel,
            metadata,
        })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        *request.metadata_mut() = self.metadata.clone();
        request
    }
}

/// Classifies a gRPC status.
///
/// `UNAVAILABLE` and `RESOURCE_EXHAUSTED` mean busy; `DEADLINE_EXCEEDED`,
/// `ABORTED`, `INTERNAL` and `UNKNOWN` are transient; everything else is a
/// permanent rejection.
#[must_use]
pub fn classify_status(status: &Status) -> ExportError {
    let message = format!("{:?}: {}", status.code(), status.message());
    match status.code() {
        Code::Unavailable | Code::ResourceExhausted => ExportError::Busy(message),
        Code::DeadlineExceeded | Code::Aborted | Code::Internal | Code::Unknown => {
            ExportError::Transient(message)
        }
        _ => ExportError::Rejected(message),
    }
}

#[async_trait]
impl Destination for OtlpGrpcDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SignalKind {
        self.kind
    }

    async fn export(&self, batch: &Batch) -> Result<(), ExportError> {
        let result = match self.kind {
            SignalKind::Traces => TraceServiceClient::new(self.channel.clone())
                .export(self.request(encode::trace_request(batch)))
                .await
                .map(|_| ()),
            SignalKind::Logs => LogsServiceClient::new(self.channel.clone())
                .export(self.request(encode::logs_request(batch)))
                .await
                .map(|_| ()),
            SignalKind::Metrics => MetricsServiceClient::new(self.channel.clone())
                .export(self.request(encode::metrics_request(batch)))
                .await
                .map(|_| ()),
        };
        result.map_err(|status| classify_status(&status))
    }
}
