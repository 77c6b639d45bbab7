//! Per-signal pipeline configuration.
//!
//! Each signal kind has one pipeline made of batching thresholds, a retry
//! policy shared by its destinations, and an ordered list of destinations.

use crate::models::SignalKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use validator::Validate;

/// Batching thresholds and the record capacity of a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BatchConfig {
    /// Flush a batch once it holds this many records.
    #[validate(range(min = 1, max = 1_000_000))]
    pub max_batch_size: usize,

    /// Flush a batch once its first record is this old.
    #[validate(range(min = 1))]
    pub max_batch_age_ms: u64,

    /// Upper bound on records held by the queue and its exporters.
    #[validate(range(min = 1))]
    pub max_buffered_records: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 512,
            max_batch_age_ms: 2_000,
            max_buffered_records: 8_192,
        }
    }
}

impl BatchConfig {
    /// Returns the age trigger as a `Duration`.
    #[must_use]
    pub fn max_batch_age(&self) -> Duration {
        Duration::from_millis(self.max_batch_age_ms)
    }
}

fn check_delays(policy: &RetryPolicy) -> Result<(), validator::ValidationError> {
    if policy.max_delay_ms < policy.base_delay_ms {
        let mut err = validator::ValidationError::new("max_delay_below_base");
        err.message = Some("max_delay_ms must not be below base_delay_ms".into());
        return Err(err);
    }
    Ok(())
}

/// Retry policy applied to every destination of a pipeline.
///
/// # Examples
///
/// ```
/// use shared::config::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.delay_before_retry(1), Duration::from_millis(100));
/// assert_eq!(policy.delay_before_retry(3), Duration::from_millis(400));
/// assert_eq!(policy.delay_before_retry(20), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "check_delays"))]
pub struct RetryPolicy {
    /// Total attempts per batch and destination, including the first.
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[validate(range(min = 1))]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay.
    #[validate(range(min = 1))]
    pub max_delay_ms: u64,

    /// Upper bound on a single export attempt.
    #[validate(range(min = 1))]
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            attempt_timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before retry `n` (1-based): `base · 2^(n-1)`, capped.
    #[must_use]
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63);
        let delay = self
            .base_delay_ms
            .checked_mul(1_u64 << exponent)
            .unwrap_or(u64::MAX)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Returns the per-attempt timeout.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Kind of destination backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    /// OTLP/HTTP protobuf push.
    OtlpHttp,
    /// OTLP gRPC push.
    OtlpGrpc,
    /// Batch rendered as JSON and POSTed.
    JsonHttp,
    /// Latest metric values exposed for scraping.
    Prometheus,
    /// In-process store.
    Memory,
}

impl DestinationType {
    /// Returns true if this destination type can receive `kind`.
    #[must_use]
    pub fn serves(self, kind: SignalKind) -> bool {
        match self {
            Self::Prometheus => kind == SignalKind::Metrics,
            Self::OtlpHttp | Self::OtlpGrpc | Self::JsonHttp | Self::Memory => true,
        }
    }

    /// Returns true if this destination type pushes to a remote endpoint.
    #[must_use]
    pub fn requires_endpoint(self) -> bool {
        matches!(self, Self::OtlpHttp | Self::OtlpGrpc | Self::JsonHttp)
    }
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OtlpHttp => "otlp_http",
            Self::OtlpGrpc => "otlp_grpc",
            Self::JsonHttp => "json_http",
            Self::Prometheus => "prometheus",
            Self::Memory => "memory",
        };
        f.write_str(name)
    }
}

fn default_max_in_flight() -> usize {
    4
}

/// One destination of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DestinationConfig {
    /// Unique name, used in logs, health and stats.
    #[validate(length(min = 1, max = 128))]
    pub name: String,

    /// Backend type.
    #[serde(rename = "type")]
    pub kind: DestinationType,

    /// Base URL of a push destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Extra headers (HTTP) or metadata (gRPC) sent with every export.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Upper bound on concurrent export attempts.
    #[serde(default = "default_max_in_flight")]
    #[validate(range(min = 1, max = 256))]
    pub max_in_flight: usize,
}

impl DestinationConfig {
    /// Creates a destination without endpoint or headers.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: DestinationType) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint: None,
            headers: BTreeMap::new(),
            max_in_flight: default_max_in_flight(),
        }
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the in-flight bound.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }
}

/// Configuration of one signal pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    /// Batching thresholds and capacity.
    #[serde(default)]
    #[validate(nested)]
    pub batch: BatchConfig,

    /// Retry policy for this pipeline's destinations.
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryPolicy,

    /// Destinations, in fan-out order.
    #[serde(default)]
    #[validate(nested)]
    pub destinations: Vec<DestinationConfig>,
}

impl PipelineConfig {
    /// Creates a pipeline with default thresholds and the given destinations.
    #[must_use]
    pub fn with_destinations(destinations: Vec<DestinationConfig>) -> Self {
        Self {
            destinations,
            ..Self::default()
        }
    }
}

/// The three pipelines, one per signal kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Pipelines {
    /// Trace pipeline.
    #[serde(default)]
    #[validate(nested)]
    pub traces: PipelineConfig,

    /// Log pipeline.
    #[serde(default)]
    #[validate(nested)]
    pub logs: PipelineConfig,

    /// Metric pipeline.
    #[serde(default)]
    #[validate(nested)]
    pub metrics: PipelineConfig,
}

impl Pipelines {
    /// Returns the pipeline for `kind`.
    #[must_use]
    pub fn get(&self, kind: SignalKind) -> &PipelineConfig {
        match kind {
            SignalKind::Traces => &self.traces,
            SignalKind::Logs => &self.logs,
            SignalKind::Metrics => &self.metrics,
        }
    }

    /// Returns the pipeline for `kind` mutably.
    pub fn get_mut(&mut self, kind: SignalKind) -> &mut PipelineConfig {
        match kind {
            SignalKind::Traces => &mut self.traces,
            SignalKind::Logs => &mut self.logs,
            SignalKind::Metrics => &mut self.metrics,
        }
    }
}
