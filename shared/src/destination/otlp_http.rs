//! OTLP/HTTP protobuf push destination.
//!
//! Batches are encoded as OTLP export requests and POSTed to
//! `<endpoint>/v1/<kind>`, the path used by Tempo, Loki and Mimir OTLP
//! receivers.

use super::{http_client, http_headers, BuildError, Destination, ExportError};
use crate::models::{Batch, SignalKind};
use crate::otlp::encode;
use async_trait::async_trait;
use prost::Message;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use std::collections::BTreeMap;

/// Pushes batches to an OTLP/HTTP receiver.
pub struct OtlpHttpDestination {
    name: String,
    kind: SignalKind,
    url: String,
    headers: HeaderMap,
    client: reqwest::Client,
}

/// Returns the signal path appended to the base endpoint.
#[must_use]
pub fn signal_path(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Traces => "/v1/traces",
        SignalKind::Logs => "/v1/logs",
        SignalKind::Metrics => "/v1/metrics",
    }
}

impl OtlpHttpDestination {
    /// Creates a destination posting to `endpoint`.
    ///
    /// An endpoint already ending in the signal path is used as is.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] if a header is invalid or the client cannot
    /// be built.
    pub fn new(
        name: &str,
        kind: SignalKind,
        endpoint: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, BuildError> {
        let base = endpoint.trim_end_matches('/');
        let path = signal_path(kind);
        let url = if base.ends_with(path) {
            base.to_string()
        } else {
            format!("{base}{path}")
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(BuildError::InvalidEndpoint {
                name: name.to_string(),
                reason: format!("{url} is not an http(s) URL"),
            });
        }

        let mut headers = http_headers(name, headers)?;
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-protobuf"),
        );

        Ok(Self {
            name: name.to_string(),
            kind,
            url,
            headers,
            client: http_client(name)?,
        })
    }

    /// Returns the full export URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn encode(&self, batch: &Batch) -> Vec<u8> {
        match self.kind {
            SignalKind::Traces => encode::trace_request(batch).encode_to_vec(),
            SignalKind::Logs => encode::logs_request(batch).encode_to_vec(),
            SignalKind::Metrics => encode::metrics_request(batch).encode_to_vec(),
        }
    }
}

#[async_trait]
impl Destination for OtlpHttpDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SignalKind {
        self.kind
    }

    async fn export(&self, batch: &Batch) -> Result<(), ExportError> {
        let body = self.encode(batch);
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| ExportError::from_reqwest(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(ExportError::from_http_status(status.as_u16(), &text))
    }
}
