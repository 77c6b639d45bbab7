//! Signal kinds, the record sum type, and batches.

use super::{LogRecord, MetricKind, MetricPoint, Resource, Span};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The three telemetry categories routed by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// Trace spans.
    Traces,
    /// Log records.
    Logs,
    /// Metric points.
    Metrics,
}

impl SignalKind {
    /// All kinds, in pipeline order.
    pub const ALL: [Self; 3] = [Self::Traces, Self::Logs, Self::Metrics];

    /// Returns the lowercase name used in config, logs and URLs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Logs => "logs",
            Self::Metrics => "metrics",
        }
    }

    /// Dense index for per-kind arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Traces => 0,
            Self::Logs => 1,
            Self::Metrics => 2,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a record fails validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A mandatory field is absent or empty.
    #[error("{field}: missing")]
    Missing {
        /// Wire field name.
        field: &'static str,
    },

    /// An identifier has the wrong byte length.
    #[error("{field}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Wire field name.
        field: &'static str,
        /// Required length.
        expected: usize,
        /// Received length.
        actual: usize,
    },

    /// The end time is before the start time.
    #[error("end_time_unix_nano: before start_time_unix_nano")]
    InvalidTimeRange,

    /// A span ID was given without a trace ID.
    #[error("span_id: present without trace_id")]
    OrphanSpanId,

    /// Histogram buckets are not in ascending order.
    #[error("explicit_bounds: histogram buckets must be sorted in ascending order")]
    InvalidHistogramBuckets,

    /// The metric value does not match its kind.
    #[error("value: does not match metric kind {0}")]
    ValueKindMismatch(MetricKind),

    /// The metric data type cannot be represented.
    #[error("data: unsupported metric type {0}")]
    UnsupportedMetricType(&'static str),

    /// A record of one kind was offered to a batch of another.
    #[error("record kind {actual} does not match batch kind {expected}")]
    KindMismatch {
        /// Kind of the batch.
        expected: SignalKind,
        /// Kind of the offending record.
        actual: SignalKind,
    },

    /// Field constraint validation failed.
    #[error("Validation failed: {0}")]
    Constraint(#[from] validator::ValidationErrors),
}

/// Per-kind capability shared by every signal payload.
pub trait Signal: Sized {
    /// The kind this payload belongs to.
    const KIND: SignalKind;

    /// The timestamp that orders this record.
    fn timestamp(&self) -> DateTime<Utc>;

    /// Checks kind-specific invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    fn check(&self) -> Result<(), ValidationError>;

    /// Wraps the payload in the record sum type.
    fn into_record(self) -> SignalRecord;
}

impl Signal for Span {
    const KIND: SignalKind = SignalKind::Traces;

    fn timestamp(&self) -> DateTime<Utc> {
        self.start_time
    }

    fn check(&self) -> Result<(), ValidationError> {
        self.validate()
    }

    fn into_record(self) -> SignalRecord {
        SignalRecord::Span(self)
    }
}

impl Signal for LogRecord {
    const KIND: SignalKind = SignalKind::Logs;

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn check(&self) -> Result<(), ValidationError> {
        self.validate()
    }

    fn into_record(self) -> SignalRecord {
        SignalRecord::Log(self)
    }
}

impl Signal for MetricPoint {
    const KIND: SignalKind = SignalKind::Metrics;

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn check(&self) -> Result<(), ValidationError> {
        self.validate_point()
    }

    fn into_record(self) -> SignalRecord {
        SignalRecord::Metric(self)
    }
}

/// A single telemetry record of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalRecord {
    /// A trace span.
    Span(Span),
    /// A log record.
    Log(LogRecord),
    /// A metric point.
    Metric(MetricPoint),
}

impl SignalRecord {
    /// Returns the kind of this record.
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Span(_) => SignalKind::Traces,
            Self::Log(_) => SignalKind::Logs,
            Self::Metric(_) => SignalKind::Metrics,
        }
    }

    /// Returns the record's ordering timestamp.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Span(s) => s.timestamp(),
            Self::Log(l) => l.timestamp(),
            Self::Metric(m) => m.timestamp(),
        }
    }

    /// Validates the wrapped payload.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant of the payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Span(s) => s.check(),
            Self::Log(l) => l.check(),
            Self::Metric(m) => m.check(),
        }
    }
}

impl From<Span> for SignalRecord {
    fn from(span: Span) -> Self {
        span.into_record()
    }
}

impl From<LogRecord> for SignalRecord {
    fn from(log: LogRecord) -> Self {
        log.into_record()
    }
}

impl From<MetricPoint> for SignalRecord {
    fn from(point: MetricPoint) -> Self {
        point.into_record()
    }
}

/// An immutable group of same-kind records from one resource.
///
/// Batches are the unit of export. Once formed they are never modified;
/// exporters share them behind an `Arc`.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    kind: SignalKind,
    sequence: u64,
    arrived_at: DateTime<Utc>,
    resource: Arc<Resource>,
    records: Vec<SignalRecord>,
}

impl Batch {
    /// Forms a batch.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::KindMismatch`] if any record is not of `kind`.
    pub fn new(
        kind: SignalKind,
        resource: Arc<Resource>,
        records: Vec<SignalRecord>,
        arrived_at: DateTime<Utc>,
        sequence: u64,
    ) -> Result<Self, ValidationError> {
        if let Some(other) = records.iter().find(|r| r.kind() != kind) {
            return Err(ValidationError::KindMismatch {
                expected: kind,
                actual: other.kind(),
            });
        }
        Ok(Self {
            kind,
            sequence,
            arrived_at,
            resource,
            records,
        })
    }

    /// Returns the signal kind of every record in the batch.
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Returns the flush sequence number assigned by the queue.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns when the first record of the batch arrived.
    #[must_use]
    pub fn arrived_at(&self) -> DateTime<Utc> {
        self.arrived_at
    }

    /// Returns the producing resource.
    #[must_use]
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// Returns the records in arrival order.
    #[must_use]
    pub fn records(&self) -> &[SignalRecord] {
        &self.records
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the batch holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over the spans of a trace batch.
    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.records.iter().filter_map(|r| match r {
            SignalRecord::Span(s) => Some(s),
            _ => None,
        })
    }

    /// Iterates over the log records of a log batch.
    pub fn logs(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter().filter_map(|r| match r {
            SignalRecord::Log(l) => Some(l),
            _ => None,
        })
    }

    /// Iterates over the points of a metric batch.
    pub fn metrics(&self) -> impl Iterator<Item = &MetricPoint> {
        self.records.iter().filter_map(|r| match r {
            SignalRecord::Metric(m) => Some(m),
            _ => None,
        })
    }
}
