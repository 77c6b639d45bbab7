//! Conversions from OTLP protobuf types into the signal model.
//!
//! Every record is converted independently and either accepted or turned
//! into a [`Rejection`], so one bad record never takes its siblings down.

use super::{proto, DecodedRequest, Rejection, ResourceGroup};
use crate::models::{
    AttributeValue, HistogramBucket, HistogramData, KeyValue, LogRecord, MetricKind, MetricPoint,
    MetricValue, Resource, Severity, Signal, SignalKind, SignalRecord, Span, SpanEvent, SpanId,
    SpanKind, SpanStatus, StatusCode, TraceId, ValidationError,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use proto::common::v1::any_value::Value as AnyValueKind;
use proto::metrics::v1::metric::Data;

/// Converts an OTLP timestamp (nanoseconds since epoch) to a `DateTime<Utc>`.
///
/// A zero timestamp means the field was not set.
fn timestamp_from_nanos(field: &'static str, nanos: u64) -> Result<DateTime<Utc>, ValidationError> {
    if nanos == 0 {
        return Err(ValidationError::Missing { field });
    }
    let nanos = i64::try_from(nanos).unwrap_or(i64::MAX);
    Ok(DateTime::from_timestamp_nanos(nanos))
}

/// Converts an OTLP `AnyValue` into an attribute value.
#[must_use]
pub fn attribute_value_from_otlp(value: &proto::common::v1::AnyValue) -> Option<AttributeValue> {
    Some(match value.value.as_ref()? {
        AnyValueKind::StringValue(s) => AttributeValue::String(s.clone()),
        AnyValueKind::BoolValue(b) => AttributeValue::Bool(*b),
        AnyValueKind::IntValue(i) => AttributeValue::Int(*i),
        AnyValueKind::DoubleValue(d) => AttributeValue::Double(*d),
        AnyValueKind::BytesValue(b) => AttributeValue::Bytes(b.clone()),
        AnyValueKind::ArrayValue(array) => AttributeValue::Array(
            array
                .values
                .iter()
                .filter_map(attribute_value_from_otlp)
                .collect(),
        ),
        AnyValueKind::KvlistValue(list) => AttributeValue::Map(attributes_from_otlp(&list.values)),
    })
}

/// Converts OTLP key-value pairs, keeping their order and skipping empty values.
#[must_use]
pub fn attributes_from_otlp(attributes: &[proto::common::v1::KeyValue]) -> Vec<KeyValue> {
    attributes
        .iter()
        .filter_map(|kv| {
            kv.value
                .as_ref()
                .and_then(attribute_value_from_otlp)
                .map(|value| KeyValue {
                    key: kv.key.clone(),
                    value,
                })
        })
        .collect()
}

/// Builds a resource, rendering every attribute value to a string.
#[must_use]
pub fn resource_from_otlp(resource: Option<&proto::resource::v1::Resource>) -> Resource {
    resource
        .map(|r| {
            attributes_from_otlp(&r.attributes)
                .into_iter()
                .map(|kv| (kv.key, kv.value.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn optional_span_id(field: &'static str, bytes: &[u8]) -> Result<Option<SpanId>, ValidationError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    SpanId::from_slice(bytes)
        .map(Some)
        .map_err(|_| ValidationError::InvalidLength {
            field,
            expected: SpanId::LEN,
            actual: bytes.len(),
        })
}

fn span_kind_from_otlp(kind: i32) -> SpanKind {
    use proto::trace::v1::span::SpanKind as OtlpSpanKind;

    match OtlpSpanKind::try_from(kind) {
        Ok(OtlpSpanKind::Server) => SpanKind::Server,
        Ok(OtlpSpanKind::Client) => SpanKind::Client,
        Ok(OtlpSpanKind::Producer) => SpanKind::Producer,
        Ok(OtlpSpanKind::Consumer) => SpanKind::Consumer,
        Ok(OtlpSpanKind::Internal | OtlpSpanKind::Unspecified) | Err(_) => SpanKind::Internal,
    }
}

fn span_status_from_otlp(status: Option<&proto::trace::v1::Status>) -> SpanStatus {
    use proto::trace::v1::status::StatusCode as OtlpStatusCode;

    let Some(status) = status else {
        return SpanStatus::default();
    };
    let code = match OtlpStatusCode::try_from(status.code) {
        Ok(OtlpStatusCode::Ok) => StatusCode::Ok,
        Ok(OtlpStatusCode::Error) => StatusCode::Error,
        Ok(OtlpStatusCode::Unset) | Err(_) => StatusCode::Unset,
    };
    SpanStatus {
        code,
        message: status.message.clone(),
    }
}

/// Converts an OTLP span.
///
/// # Errors
///
/// Returns a [`ValidationError`] naming the offending field when the trace or
/// span ID has the wrong length, the start timestamp is missing, or the span
/// ends before it starts.
pub fn span_from_otlp(span: &proto::trace::v1::Span) -> Result<Span, ValidationError> {
    let trace_id = TraceId::from_slice(&span.trace_id)?;
    let span_id = SpanId::from_slice(&span.span_id)?;
    let parent_span_id = optional_span_id("parent_span_id", &span.parent_span_id)?;
    let start_time = timestamp_from_nanos("start_time_unix_nano", span.start_time_unix_nano)?;
    if span.end_time_unix_nano < span.start_time_unix_nano {
        return Err(ValidationError::InvalidTimeRange);
    }
    let end_time = timestamp_from_nanos("end_time_unix_nano", span.end_time_unix_nano)?;

    let events = span
        .events
        .iter()
        .map(|event| SpanEvent {
            name: event.name.clone(),
            timestamp: timestamp_from_nanos("events.time_unix_nano", event.time_unix_nano)
                .unwrap_or(start_time),
            attributes: attributes_from_otlp(&event.attributes),
        })
        .collect();

    let converted = Span {
        trace_id,
        span_id,
        parent_span_id,
        name: span.name.clone(),
        kind: span_kind_from_otlp(span.kind),
        status: span_status_from_otlp(span.status.as_ref()),
        start_time,
        end_time,
        attributes: attributes_from_otlp(&span.attributes),
        events,
    };
    converted.check()?;
    Ok(converted)
}

fn body_to_string(body: Option<&proto::common::v1::AnyValue>) -> String {
    match body.and_then(attribute_value_from_otlp) {
        Some(AttributeValue::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Converts an OTLP log record.
///
/// The event timestamp falls back to the observed timestamp when unset.
///
/// # Errors
///
/// Returns a [`ValidationError`] when neither timestamp is set, a trace
/// context ID has the wrong length, or a span ID has no trace ID.
pub fn log_from_otlp(record: &proto::logs::v1::LogRecord) -> Result<LogRecord, ValidationError> {
    let observed_timestamp =
        timestamp_from_nanos("observed_time_unix_nano", record.observed_time_unix_nano).ok();
    let timestamp = match timestamp_from_nanos("time_unix_nano", record.time_unix_nano) {
        Ok(ts) => ts,
        Err(err) => observed_timestamp.ok_or(err)?,
    };

    let trace_id = if record.trace_id.is_empty() {
        None
    } else {
        Some(TraceId::from_slice(&record.trace_id)?)
    };
    let span_id = optional_span_id("span_id", &record.span_id)?;

    let converted = LogRecord {
        timestamp,
        observed_timestamp,
        severity: Severity::from_otlp_number(record.severity_number),
        body: body_to_string(record.body.as_ref()),
        trace_id,
        span_id,
        attributes: attributes_from_otlp(&record.attributes),
    };
    converted.check()?;
    Ok(converted)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn number_point(
    metric: &proto::metrics::v1::Metric,
    kind: MetricKind,
    point: &proto::metrics::v1::NumberDataPoint,
) -> Result<MetricPoint, ValidationError> {
    use proto::metrics::v1::number_data_point::Value;

    let timestamp = timestamp_from_nanos("time_unix_nano", point.time_unix_nano)?;
    #[allow(clippy::cast_precision_loss)]
    let value = match point.value {
        Some(Value::AsDouble(d)) => d,
        Some(Value::AsInt(i)) => i as f64,
        None => return Err(ValidationError::Missing { field: "value" }),
    };

    Ok(MetricPoint {
        name: metric.name.clone(),
        kind,
        timestamp,
        value: MetricValue::Scalar(value),
        attributes: attributes_from_otlp(&point.attributes),
        unit: non_empty(&metric.unit),
        description: non_empty(&metric.description),
    })
}

fn histogram_point(
    metric: &proto::metrics::v1::Metric,
    point: &proto::metrics::v1::HistogramDataPoint,
) -> Result<MetricPoint, ValidationError> {
    let timestamp = timestamp_from_nanos("time_unix_nano", point.time_unix_nano)?;

    // OTLP carries one more bucket count than explicit bounds; the last
    // bucket is unbounded.
    let buckets = if point.bucket_counts.is_empty() {
        Vec::new()
    } else {
        if point.bucket_counts.len() != point.explicit_bounds.len() + 1 {
            return Err(ValidationError::InvalidHistogramBuckets);
        }
        point
            .explicit_bounds
            .iter()
            .copied()
            .chain(std::iter::once(f64::INFINITY))
            .zip(point.bucket_counts.iter().copied())
            .map(|(upper_bound, count)| HistogramBucket { upper_bound, count })
            .collect()
    };

    Ok(MetricPoint {
        name: metric.name.clone(),
        kind: MetricKind::Histogram,
        timestamp,
        value: MetricValue::Histogram(HistogramData {
            buckets,
            sum: point.sum.unwrap_or(0.0),
            count: point.count,
        }),
        attributes: attributes_from_otlp(&point.attributes),
        unit: non_empty(&metric.unit),
        description: non_empty(&metric.description),
    })
}

fn validated(point: Result<MetricPoint, ValidationError>) -> Result<MetricPoint, ValidationError> {
    let point = point?;
    point.check()?;
    Ok(point)
}

/// Converts every data point of an OTLP metric.
///
/// Monotonic sums become counters; non-monotonic sums become gauges.
/// Exponential histograms and summaries are rejected per data point.
#[must_use]
pub fn metric_points_from_otlp(
    metric: &proto::metrics::v1::Metric,
) -> Vec<Result<MetricPoint, ValidationError>> {
    match &metric.data {
        Some(Data::Gauge(gauge)) => gauge
            .data_points
            .iter()
            .map(|p| validated(number_point(metric, MetricKind::Gauge, p)))
            .collect(),
        Some(Data::Sum(sum)) => {
            let kind = if sum.is_monotonic {
                MetricKind::Counter
            } else {
                MetricKind::Gauge
            };
            sum.data_points
                .iter()
                .map(|p| validated(number_point(metric, kind, p)))
                .collect()
        }
        Some(Data::Histogram(histogram)) => histogram
            .data_points
            .iter()
            .map(|p| validated(histogram_point(metric, p)))
            .collect(),
        Some(Data::ExponentialHistogram(histogram)) => histogram
            .data_points
            .iter()
            .map(|_| Err(ValidationError::UnsupportedMetricType("exponential_histogram")))
            .collect(),
        Some(Data::Summary(summary)) => summary
            .data_points
            .iter()
            .map(|_| Err(ValidationError::UnsupportedMetricType("summary")))
            .collect(),
        None => vec![Err(ValidationError::Missing { field: "data" })],
    }
}

/// Accumulates per-resource groups while tracking a request-wide record index.
struct Decoder {
    decoded: DecodedRequest,
    index: usize,
}

impl Decoder {
    fn new(kind: SignalKind) -> Self {
        Self {
            decoded: DecodedRequest::new(kind),
            index: 0,
        }
    }

    fn resource<I>(&mut self, resource: Option<&proto::resource::v1::Resource>, results: I)
    where
        I: IntoIterator<Item = Result<SignalRecord, ValidationError>>,
    {
        let mut records = Vec::new();
        for result in results {
            match result {
                Ok(record) => records.push(record),
                Err(error) => self.decoded.rejected.push(Rejection {
                    index: self.index,
                    error,
                }),
            }
            self.index += 1;
        }
        if !records.is_empty() {
            self.decoded.groups.push(ResourceGroup {
                resource: Arc::new(resource_from_otlp(resource)),
                records,
            });
        }
    }

    fn finish(self) -> DecodedRequest {
        self.decoded
    }
}

/// Decodes an OTLP trace export request.
#[must_use]
pub fn decode_trace_request(
    request: &proto::collector::trace::v1::ExportTraceServiceRequest,
) -> DecodedRequest {
    let mut decoder = Decoder::new(SignalKind::Traces);
    for resource_spans in &request.resource_spans {
        let results = resource_spans
            .scope_spans
            .iter()
            .flat_map(|scope| scope.spans.iter())
            .map(|span| span_from_otlp(span).map(SignalRecord::from));
        decoder.resource(resource_spans.resource.as_ref(), results);
    }
    decoder.finish()
}

/// Decodes an OTLP logs export request.
#[must_use]
pub fn decode_logs_request(
    request: &proto::collector::logs::v1::ExportLogsServiceRequest,
) -> DecodedRequest {
    let mut decoder = Decoder::new(SignalKind::Logs);
    for resource_logs in &request.resource_logs {
        let results = resource_logs
            .scope_logs
            .iter()
            .flat_map(|scope| scope.log_records.iter())
            .map(|record| log_from_otlp(record).map(SignalRecord::from));
        decoder.resource(resource_logs.resource.as_ref(), results);
    }
    decoder.finish()
}

/// Decodes an OTLP metrics export request.
#[must_use]
pub fn decode_metrics_request(
    request: &proto::collector::metrics::v1::ExportMetricsServiceRequest,
) -> DecodedRequest {
    let mut decoder = Decoder::new(SignalKind::Metrics);
    for resource_metrics in &request.resource_metrics {
        let results = resource_metrics
            .scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter())
            .flat_map(metric_points_from_otlp)
            .map(|point| point.map(SignalRecord::from));
        decoder.resource(resource_metrics.resource.as_ref(), results);
    }
    decoder.finish()
}


#[cfg(test)]
#[path = "conversions_test.rs"]
mod conversions_test;
