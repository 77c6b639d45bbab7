//! Destination backends that receive exported batches.
//!
//! A destination is bound to one signal kind at construction and accepts
//! batches of that kind only. Failures are classified so the exporter can
//! decide between retrying, slowing down, and giving up:
//!
//! | Error                   | Retried | Halves in-flight credits |
//! |-------------------------|---------|--------------------------|
//! | [`ExportError::Busy`]      | yes     | yes                      |
//! | [`ExportError::Timeout`]   | yes     | yes                      |
//! | [`ExportError::Transient`] | yes     | no                       |
//! | [`ExportError::Rejected`]  | no      | no                       |

pub mod json_http;
pub mod memory;
pub mod otlp_grpc;
pub mod otlp_http;
pub mod prometheus;

pub use json_http::JsonHttpDestination;
pub use memory::MemoryDestination;
pub use otlp_grpc::OtlpGrpcDestination;
pub use otlp_http::OtlpHttpDestination;
pub use prometheus::PrometheusDestination;

use crate::config::{DestinationConfig, DestinationType};
use crate::models::{Batch, SignalKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a single export attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExportError {
    /// The backend explicitly asked the sender to slow down.
    #[error("destination busy: {0}")]
    Busy(String),

    /// The attempt did not finish in time.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// A failure that may succeed on retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The backend permanently refused the batch.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl ExportError {
    /// Returns true if the batch should be attempted again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    /// Returns true if the failure signals backend overload.
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Timeout(_))
    }

    /// Classifies an HTTP response status.
    ///
    /// 429, 502, 503 and 504 mean busy; other 5xx and 408 are transient;
    /// any other 4xx is a permanent rejection.
    #[must_use]
    pub fn from_http_status(status: u16, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", truncate(body, 256))
        };
        match status {
            429 | 502 | 503 | 504 => Self::Busy(message),
            408 | 500..=599 => Self::Transient(message),
            _ => Self::Rejected(message),
        }
    }

    /// Classifies a transport-level HTTP client error.
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_builder() {
            Self::Rejected(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((index, _)) => &s[..index],
        None => s,
    }
}

/// Errors raised while constructing a destination.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A push destination has no endpoint.
    #[error("destination {0} requires an endpoint")]
    MissingEndpoint(String),

    /// The endpoint could not be parsed.
    #[error("destination {name}: invalid endpoint: {reason}")]
    InvalidEndpoint {
        /// Destination name.
        name: String,
        /// Why it is invalid.
        reason: String,
    },

    /// A configured header is not a valid HTTP header or gRPC metadata entry.
    #[error("destination {name}: invalid header {header}")]
    InvalidHeader {
        /// Destination name.
        name: String,
        /// Header name.
        header: String,
    },

    /// The destination type cannot serve the signal kind.
    #[error("destination {name} ({kind}) cannot serve {signal}")]
    Unsupported {
        /// Destination name.
        name: String,
        /// Destination type.
        kind: DestinationType,
        /// Requested signal kind.
        signal: SignalKind,
    },
}

/// A backend that accepts batches of one signal kind.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Unique destination name.
    fn name(&self) -> &str;

    /// The signal kind this destination serves.
    fn kind(&self) -> SignalKind;

    /// Sends one batch.
    ///
    /// # Errors
    ///
    /// Returns an [`ExportError`] classifying why the batch was not accepted.
    async fn export(&self, batch: &Batch) -> Result<(), ExportError>;

    /// Renders held state for pull-based scraping, if this destination is scraped.
    fn exposition(&self) -> Option<String> {
        None
    }
}

fn endpoint(config: &DestinationConfig) -> Result<&str, BuildError> {
    config
        .endpoint
        .as_deref()
        .filter(|e| !e.is_empty())
        .ok_or_else(|| BuildError::MissingEndpoint(config.name.clone()))
}

/// Builds the destination described by `config` for signal `kind`.
///
/// # Errors
///
/// Returns a [`BuildError`] if the type cannot serve `kind`, or the endpoint
/// or headers are invalid.
pub fn build_destination(
    config: &DestinationConfig,
    kind: SignalKind,
) -> Result<Arc<dyn Destination>, BuildError> {
    if !config.kind.serves(kind) {
        return Err(BuildError::Unsupported {
            name: config.name.clone(),
            kind: config.kind,
            signal: kind,
        });
    }

    let destination: Arc<dyn Destination> = match config.kind {
        DestinationType::OtlpHttp => Arc::new(OtlpHttpDestination::new(
            &config.name,
            kind,
            endpoint(config)?,
            &config.headers,
        )?),
        DestinationType::OtlpGrpc => Arc::new(OtlpGrpcDestination::new(
            &config.name,
            kind,
            endpoint(config)?,
            &config.headers,
        )?),
        DestinationType::JsonHttp => Arc::new(JsonHttpDestination::new(
            &config.name,
            kind,
            endpoint(config)?,
            &config.headers,
        )?),
        DestinationType::Prometheus => Arc::new(PrometheusDestination::new(&config.name)),
        DestinationType::Memory => Arc::new(MemoryDestination::new(&config.name, kind)),
    };
    Ok(destination)
}

pub(crate) fn http_headers(
    name: &str,
    headers: &std::collections::BTreeMap<String, String>,
) -> Result<reqwest::header::HeaderMap, BuildError> {
    use reqwest::header::{HeaderName, HeaderValue};

    let mut map = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        let invalid = || BuildError::InvalidHeader {
            name: name.to_string(),
            header: key.clone(),
        };
        let header = HeaderName::from_bytes(key.as_bytes()).map_err(|_| invalid())?;
        let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        map.insert(header, value);
    }
    Ok(map)
}

pub(crate) fn http_client(name: &str) -> Result<reqwest::Client, BuildError> {
    reqwest::Client::builder()
        .user_agent(concat!("tributary/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| BuildError::InvalidEndpoint {
            name: name.to_string(),
            reason: e.to_string(),
        })
}
