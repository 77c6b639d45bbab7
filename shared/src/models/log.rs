//! Log record data model.

use super::{AttributeValue, KeyValue, SpanId, TraceId, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Log severity level.
///
/// Levels are ordered: `Trace < Debug < Info < Warn < Error < Fatal`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Fine-grained diagnostic detail.
    Trace,
    /// Debug information.
    Debug,
    /// Informational messages.
    #[default]
    Info,
    /// Warning conditions.
    Warn,
    /// Error conditions.
    Error,
    /// Critical/fatal conditions.
    Fatal,
}

impl Severity {
    /// Maps an OTLP severity number onto a level.
    ///
    /// See <https://opentelemetry.io/docs/specs/otel/logs/data-model/#field-severitynumber>.
    /// Unspecified and out-of-range numbers map to `Info`.
    #[must_use]
    pub fn from_otlp_number(number: i32) -> Self {
        match number {
            1..=4 => Self::Trace,
            5..=8 => Self::Debug,
            13..=16 => Self::Warn,
            17..=20 => Self::Error,
            21..=24 => Self::Fatal,
            _ => Self::Info,
        }
    }

    /// Returns the base OTLP severity number of this level.
    #[must_use]
    pub fn otlp_number(self) -> i32 {
        match self {
            Self::Trace => 1,
            Self::Debug => 5,
            Self::Info => 9,
            Self::Warn => 13,
            Self::Error => 17,
            Self::Fatal => 21,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace => write!(f, "TRACE"),
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Fatal => write!(f, "FATAL"),
        }
    }
}

/// A single log event.
///
/// # Example
///
/// ```
/// use shared::models::{LogRecord, Severity};
///
/// let log = LogRecord::new(Severity::Warn, "disk almost full")
///     .with_attribute("mount", "/var");
///
/// assert!(log.validate().is_ok());
/// assert!(log.severity > Severity::Info);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp when the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Timestamp when the event was observed by the producer's pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_timestamp: Option<DateTime<Utc>>,

    /// Severity level.
    #[serde(default)]
    pub severity: Severity,

    /// The log body.
    pub body: String,

    /// Optional trace ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,

    /// Optional span ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<SpanId>,

    /// Ordered log attributes.
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

impl LogRecord {
    /// Creates a new log record stamped with the current time.
    #[must_use]
    pub fn new(severity: Severity, body: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            observed_timestamp: None,
            severity,
            body: body.into(),
            trace_id: None,
            span_id: None,
            attributes: Vec::new(),
        }
    }

    /// Sets the event timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Appends an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.push(KeyValue::new(key, value));
        self
    }

    /// Sets trace correlation.
    #[must_use]
    pub fn with_trace_context(mut self, trace_id: TraceId, span_id: Option<SpanId>) -> Self {
        self.trace_id = Some(trace_id);
        self.span_id = span_id;
        self
    }

    /// Validates the log record.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::OrphanSpanId`] when a span ID is present
    /// without a trace ID.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.span_id.is_some() && self.trace_id.is_none() {
            return Err(ValidationError::OrphanSpanId);
        }
        Ok(())
    }
}
