//! Conversions from batches back into OTLP export requests.

use super::proto;
use crate::models::{
    AttributeValue, Batch, HistogramData, KeyValue, LogRecord, MetricKind, MetricPoint,
    MetricValue, Resource, Span, SpanKind, StatusCode,
};
use chrono::{DateTime, Utc};

use proto::common::v1::any_value::Value as AnyValueKind;

fn nanos(timestamp: DateTime<Utc>) -> u64 {
    timestamp
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0)
}

fn any_value(value: &AttributeValue) -> proto::common::v1::AnyValue {
    let value = match value {
        AttributeValue::String(s) => AnyValueKind::StringValue(s.clone()),
        AttributeValue::Bool(b) => AnyValueKind::BoolValue(*b),
        AttributeValue::Int(i) => AnyValueKind::IntValue(*i),
        AttributeValue::Double(d) => AnyValueKind::DoubleValue(*d),
        AttributeValue::Bytes(b) => AnyValueKind::BytesValue(b.clone()),
        AttributeValue::Array(values) => AnyValueKind::ArrayValue(proto::common::v1::ArrayValue {
            values: values.iter().map(any_value).collect(),
        }),
        AttributeValue::Map(pairs) => AnyValueKind::KvlistValue(proto::common::v1::KeyValueList {
            values: key_values(pairs),
        }),
    };
    proto::common::v1::AnyValue { value: Some(value) }
}

fn string_value(s: &str) -> proto::common::v1::AnyValue {
    proto::common::v1::AnyValue {
        value: Some(AnyValueKind::StringValue(s.to_string())),
    }
}

fn key_values(attributes: &[KeyValue]) -> Vec<proto::common::v1::KeyValue> {
    attributes
        .iter()
        .map(|kv| proto::common::v1::KeyValue {
            key: kv.key.clone(),
            value: Some(any_value(&kv.value)),
        })
        .collect()
}

/// Encodes a resource; attribute values are sent as strings.
#[must_use]
pub fn resource_to_otlp(resource: &Resource) -> proto::resource::v1::Resource {
    proto::resource::v1::Resource {
        attributes: resource
            .attributes()
            .iter()
            .map(|(key, value)| proto::common::v1::KeyValue {
                key: key.clone(),
                value: Some(string_value(value)),
            })
            .collect(),
        ..Default::default()
    }
}

fn span_to_otlp(span: &Span) -> proto::trace::v1::Span {
    use proto::trace::v1::span::SpanKind as OtlpSpanKind;
    use proto::trace::v1::status::StatusCode as OtlpStatusCode;

    let kind = match span.kind {
        SpanKind::Internal => OtlpSpanKind::Internal,
        SpanKind::Server => OtlpSpanKind::Server,
        SpanKind::Client => OtlpSpanKind::Client,
        SpanKind::Producer => OtlpSpanKind::Producer,
        SpanKind::Consumer => OtlpSpanKind::Consumer,
    };
    let code = match span.status.code {
        StatusCode::Unset => OtlpStatusCode::Unset,
        StatusCode::Ok => OtlpStatusCode::Ok,
        StatusCode::Error => OtlpStatusCode::Error,
    };

    proto::trace::v1::Span {
        trace_id: span.trace_id.as_bytes().to_vec(),
        span_id: span.span_id.as_bytes().to_vec(),
        parent_span_id: span
            .parent_span_id
            .map(|id| id.as_bytes().to_vec())
            .unwrap_or_default(),
        name: span.name.clone(),
        kind: kind as i32,
        start_time_unix_nano: nanos(span.start_time),
        end_time_unix_nano: nanos(span.end_time),
        attributes: key_values(&span.attributes),
        events: span
            .events
            .iter()
            .map(|event| proto::trace::v1::span::Event {
                time_unix_nano: nanos(event.timestamp),
                name: event.name.clone(),
                attributes: key_values(&event.attributes),
                ..Default::default()
            })
            .collect(),
        status: Some(proto::trace::v1::Status {
            message: span.status.message.clone(),
            code: code as i32,
        }),
        ..Default::default()
    }
}

fn log_to_otlp(log: &LogRecord) -> proto::logs::v1::LogRecord {
    proto::logs::v1::LogRecord {
        time_unix_nano: nanos(log.timestamp),
        observed_time_unix_nano: log.observed_timestamp.map(nanos).unwrap_or_default(),
        severity_number: log.severity.otlp_number(),
        severity_text: log.severity.to_string(),
        body: Some(string_value(&log.body)),
        attributes: key_values(&log.attributes),
        trace_id: log
            .trace_id
            .map(|id| id.as_bytes().to_vec())
            .unwrap_or_default(),
        span_id: log
            .span_id
            .map(|id| id.as_bytes().to_vec())
            .unwrap_or_default(),
        ..Default::default()
    }
}

fn histogram_to_otlp(
    point: &MetricPoint,
    data: &HistogramData,
) -> proto::metrics::v1::HistogramDataPoint {
    let mut explicit_bounds: Vec<f64> = data
        .buckets
        .iter()
        .map(|b| b.upper_bound)
        .filter(|b| b.is_finite())
        .collect();
    let mut bucket_counts: Vec<u64> = data.buckets.iter().map(|b| b.count).collect();
    if data.buckets.last().is_some_and(|b| b.upper_bound.is_finite()) {
        bucket_counts.push(0);
    }
    if bucket_counts.is_empty() {
        explicit_bounds.clear();
    }

    proto::metrics::v1::HistogramDataPoint {
        attributes: key_values(&point.attributes),
        time_unix_nano: nanos(point.timestamp),
        count: data.count,
        sum: Some(data.sum),
        bucket_counts,
        explicit_bounds,
        ..Default::default()
    }
}

fn metric_to_otlp(point: &MetricPoint) -> proto::metrics::v1::Metric {
    use proto::metrics::v1::{
        metric::Data, number_data_point, AggregationTemporality, Gauge, Histogram,
        NumberDataPoint, Sum,
    };

    let number = |value: f64| NumberDataPoint {
        attributes: key_values(&point.attributes),
        time_unix_nano: nanos(point.timestamp),
        value: Some(number_data_point::Value::AsDouble(value)),
        ..Default::default()
    };

    let data = match (&point.kind, &point.value) {
        (MetricKind::Counter, MetricValue::Scalar(v)) => Data::Sum(Sum {
            data_points: vec![number(*v)],
            aggregation_temporality: AggregationTemporality::Cumulative as i32,
            is_monotonic: true,
        }),
        (_, MetricValue::Scalar(v)) => Data::Gauge(Gauge {
            data_points: vec![number(*v)],
        }),
        (_, MetricValue::Histogram(h)) => Data::Histogram(Histogram {
            data_points: vec![histogram_to_otlp(point, h)],
            aggregation_temporality: AggregationTemporality::Cumulative as i32,
        }),
    };

    proto::metrics::v1::Metric {
        name: point.name.clone(),
        description: point.description.clone().unwrap_or_default(),
        unit: point.unit.clone().unwrap_or_default(),
        data: Some(data),
        ..Default::default()
    }
}

/// Encodes a trace batch; records of other kinds are skipped.
#[must_use]
pub fn trace_request(batch: &Batch) -> proto::collector::trace::v1::ExportTraceServiceRequest {
    proto::collector::trace::v1::ExportTraceServiceRequest {
        resource_spans: vec![proto::trace::v1::ResourceSpans {
            resource: Some(resource_to_otlp(batch.resource())),
            scope_spans: vec![proto::trace::v1::ScopeSpans {
                spans: batch.spans().map(span_to_otlp).collect(),
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// Encodes a log batch; records of other kinds are skipped.
#[must_use]
pub fn logs_request(batch: &Batch) -> proto::collector::logs::v1::ExportLogsServiceRequest {
    proto::collector::logs::v1::ExportLogsServiceRequest {
        resource_logs: vec![proto::logs::v1::ResourceLogs {
            resource: Some(resource_to_otlp(batch.resource())),
            scope_logs: vec![proto::logs::v1::ScopeLogs {
                log_records: batch.logs().map(log_to_otlp).collect(),
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// Encodes a metric batch, one OTLP metric per point.
#[must_use]
pub fn metrics_request(batch: &Batch) -> proto::collector::metrics::v1::ExportMetricsServiceRequest {
    proto::collector::metrics::v1::ExportMetricsServiceRequest {
        resource_metrics: vec![proto::metrics::v1::ResourceMetrics {
            resource: Some(resource_to_otlp(batch.resource())),
            scope_metrics: vec![proto::metrics::v1::ScopeMetrics {
                metrics: batch.metrics().map(metric_to_otlp).collect(),
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}
