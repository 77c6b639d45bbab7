//! Signal model shared by receivers, queues and exporters.
//!
//! This module contains the data structures for spans, log records and metric
//! points, the [`SignalRecord`] sum type that carries them through the
//! pipeline, and the immutable [`Batch`] that is the unit of export.

pub mod attribute;
pub mod log;
pub mod metric;
pub mod resource;
pub mod signal;
pub mod trace;

pub use attribute::{AttributeValue, KeyValue};
pub use log::{LogRecord, Severity};
pub use metric::{HistogramBucket, HistogramData, MetricKind, MetricPoint, MetricValue};
pub use resource::{Resource, SERVICE_NAME};
pub use signal::{Batch, Signal, SignalKind, SignalRecord, ValidationError};
pub use trace::{Span, SpanEvent, SpanId, SpanKind, SpanStatus, StatusCode, TraceId};
