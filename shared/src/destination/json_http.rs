//! Generic JSON push destination.

use super::{http_client, http_headers, BuildError, Destination, ExportError};
use crate::models::{Batch, SignalKind};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::collections::BTreeMap;

/// POSTs each batch, serialized as JSON, to a fixed URL.
///
/// The body carries the batch kind, sequence number, arrival time, resource
/// attributes and records.
pub struct JsonHttpDestination {
    name: String,
    kind: SignalKind,
    url: String,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl JsonHttpDestination {
    /// Creates a destination posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] if the endpoint is not an http(s) URL or a
    /// header is invalid.
    pub fn new(
        name: &str,
        kind: SignalKind,
        endpoint: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, BuildError> {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(BuildError::InvalidEndpoint {
                name: name.to_string(),
                reason: format!("{endpoint} is not an http(s) URL"),
            });
        }
        Ok(Self {
            name: name.to_string(),
            kind,
            url: endpoint.to_string(),
            headers: http_headers(name, headers)?,
            client: http_client(name)?,
        })
    }
}

#[async_trait]
impl Destination for JsonHttpDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SignalKind {
        self.kind
    }

    async fn export(&self, batch: &Batch) -> Result<(), ExportError> {
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(batch)
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
