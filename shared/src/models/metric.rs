//! Metric point data model.

use super::{AttributeValue, KeyValue, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// A monotonically increasing cumulative value.
    Counter,
    /// A value that can go up or down.
    Gauge,
    /// A distribution of observations.
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counter => write!(f, "counter"),
            Self::Gauge => write!(f, "gauge"),
            Self::Histogram => write!(f, "histogram"),
        }
    }
}

/// A histogram bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Inclusive upper bound; the last bucket is `+Inf`.
    pub upper_bound: f64,
    /// Observations that fell into this bucket only (not cumulative).
    pub count: u64,
}

/// Histogram data for distribution metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramData {
    /// Buckets in ascending bound order.
    pub buckets: Vec<HistogramBucket>,
    /// The sum of all observed values.
    pub sum: f64,
    /// The total count of observations.
    pub count: u64,
}

impl HistogramData {
    /// Returns true if bucket bounds are strictly ascending.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.buckets
            .windows(2)
            .all(|pair| pair[0].upper_bound < pair[1].upper_bound)
    }
}

/// The value of a metric point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// A scalar value (counters and gauges).
    Scalar(f64),
    /// Histogram buckets.
    Histogram(HistogramData),
}

impl MetricValue {
    /// Returns the scalar value if this is a scalar.
    #[must_use]
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Histogram(_) => None,
        }
    }

    /// Returns the histogram data if this is a histogram.
    #[must_use]
    pub fn as_histogram(&self) -> Option<&HistogramData> {
        match self {
            Self::Scalar(_) => None,
            Self::Histogram(h) => Some(h),
        }
    }
}

/// A single metric measurement.
///
/// # Example
///
/// ```
/// use shared::models::MetricPoint;
///
/// let point = MetricPoint::counter("http_requests_total", 1234.0)
///     .with_attribute("method", "GET");
///
/// assert!(point.validate_point().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MetricPoint {
    /// The metric name.
    #[validate(length(min = 1, message = "Metric name cannot be empty"))]
    pub name: String,

    /// The metric kind.
    pub kind: MetricKind,

    /// Timestamp of the measurement.
    pub timestamp: DateTime<Utc>,

    /// The measured value.
    pub value: MetricValue,

    /// Ordered point attributes.
    #[serde(default)]
    pub attributes: Vec<KeyValue>,

    /// Optional unit (e.g. "By", "s").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MetricPoint {
    /// Creates a new point stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: MetricKind, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            kind,
            timestamp: Utc::now(),
            value,
            attributes: Vec::new(),
            unit: None,
            description: None,
        }
    }

    /// Creates a counter point.
    #[must_use]
    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Counter, MetricValue::Scalar(value))
    }

    /// Creates a gauge point.
    #[must_use]
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Gauge, MetricValue::Scalar(value))
    }

    /// Creates a histogram point.
    #[must_use]
    pub fn histogram(name: impl Into<String>, data: HistogramData) -> Self {
        Self::new(name, MetricKind::Histogram, MetricValue::Histogram(data))
    }

    /// Sets the timestamp.
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

    /// Sets the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validates the point.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The name is empty
    /// - The value shape does not match the kind
    /// - Histogram bucket bounds are not ascending
    pub fn validate_point(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::Missing { field: "name" });
        }
        match (&self.kind, &self.value) {
            (MetricKind::Histogram, MetricValue::Histogram(data)) => {
                if !data.is_sorted() {
                    return Err(ValidationError::InvalidHistogramBuckets);
                }
            }
            (MetricKind::Counter | MetricKind::Gauge, MetricValue::Scalar(_)) => {}
            _ => return Err(ValidationError::ValueKindMismatch(self.kind)),
        }
        self.validate()?;
        Ok(())
    }
}
