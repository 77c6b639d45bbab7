//! Static configuration for Tributary.
//!
//! Configuration is read once at startup from a TOML file. A configuration
//! that leaves any signal kind without a destination, or routes a kind to a
//! destination that cannot serve it, is rejected before anything starts.
//!
//! ```toml
//! drain_timeout_ms = 10000
//!
//! [server]
//! host = "0.0.0.0"
//! grpc_port = 4317
//! http_port = 4318
//!
//! [pipelines.traces]
//! batch = { max_batch_size = 512, max_batch_age_ms = 2000 }
//!
//! [[pipelines.traces.destinations]]
//! name = "tempo"
//! type = "otlp_grpc"
//! endpoint = "http://tempo:4317"
//!
//! [[scrape]]
//! name = "node"
//! url = "http://node-exporter:9100/metrics"
//! ```

pub mod pipeline;
pub mod scrape;

pub use pipeline::{
    BatchConfig, DestinationConfig, DestinationType, PipelineConfig, Pipelines, RetryPolicy,
};
pub use scrape::ScrapeTarget;

use crate::models::SignalKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::Validate;

/// Errors raised while loading or checking configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    /// A signal kind has no destination.
    #[error("pipeline {0} has no destinations")]
    MissingDestination(SignalKind),

    /// A destination cannot serve the kind it is routed from.
    #[error("destination {destination} ({kind}) cannot serve {signal}")]
    WrongKind {
        /// Destination name.
        destination: String,
        /// Destination type.
        kind: DestinationType,
        /// Signal kind of the pipeline.
        signal: SignalKind,
    },

    /// A push destination has no endpoint.
    #[error("destination {0} requires an endpoint")]
    MissingEndpoint(String),

    /// Two destinations share a name.
    #[error("destination name {0} is used more than once")]
    DuplicateDestination(String),
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_grpc_port() -> u16 {
    4317
}

const fn default_http_port() -> u16 {
    4318
}

const fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

const fn default_drain_timeout_ms() -> u64 {
    10_000
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// Address to bind both listeners to.
    #[serde(default = "default_host")]
    #[validate(length(min = 1))]
    pub host: String,

    /// OTLP gRPC port.
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    /// OTLP HTTP port, also serving health and stats.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Maximum accepted HTTP request body.
    #[serde(default = "default_max_body_bytes")]
    #[validate(range(min = 1024))]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            grpc_port: default_grpc_port(),
            http_port: default_http_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Complete process configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TributaryConfig {
    /// Listener settings.
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    /// Bound on the shutdown window for in-flight work.
    #[serde(default = "default_drain_timeout_ms")]
    #[validate(range(min = 1))]
    pub drain_timeout_ms: u64,

    /// Per-kind pipelines.
    #[serde(default)]
    #[validate(nested)]
    pub pipelines: Pipelines,

    /// Prometheus endpoints to pull metrics from.
    #[serde(default)]
    #[validate(nested)]
    pub scrape: Vec<ScrapeTarget>,
}

impl Default for TributaryConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            drain_timeout_ms: default_drain_timeout_ms(),
            pipelines: Pipelines::default(),
            scrape: Vec::new(),
        }
    }
}

impl TributaryConfig {
    /// Parses and checks a TOML document.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document does not parse or fails
    /// [`TributaryConfig::validate_config`].
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(document)?;
        config.validate_config()?;
        Ok(config)
    }

    /// Reads, parses and checks a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, does not parse,
    /// or fails validation.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&document)
    }

    /// Checks field ranges and pipeline wiring.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: an out-of-range field, a kind
    /// without destinations, a destination routed from a kind it cannot
    /// serve, a push destination without endpoint, or a duplicate name.
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        self.validate()?;

        let mut names = HashSet::new();
        for kind in SignalKind::ALL {
            let pipeline = self.pipelines.get(kind);
            if pipeline.destinations.is_empty() {
                return Err(ConfigError::MissingDestination(kind));
            }
            for destination in &pipeline.destinations {
                if !destination.kind.serves(kind) {
                    return Err(ConfigError::WrongKind {
                        destination: destination.name.clone(),
                        kind: destination.kind,
                        signal: kind,
                    });
                }
                if destination.kind.requires_endpoint()
                    && destination.endpoint.as_deref().is_none_or(str::is_empty)
                {
                    return Err(ConfigError::MissingEndpoint(destination.name.clone()));
                }
                if !names.insert(destination.name.as_str()) {
                    return Err(ConfigError::DuplicateDestination(destination.name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Returns the drain window.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
