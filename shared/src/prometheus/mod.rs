//! Prometheus text exposition support.
//!
//! [`parse_exposition`] reads the text format served by Prometheus exporters,
//! [`to_metric_points`] turns the parsed samples into [`MetricPoint`]s, and
//! [`render`] writes the latest value of each series back out in the same
//! format.

pub mod parser;
pub mod render;

pub use parser::{parse_exposition, Exposition, ExpositionError, FamilyType, Sample};
pub use render::render;

use crate::models::{
    AttributeValue, HistogramBucket, HistogramData, KeyValue, MetricKind, MetricPoint, MetricValue,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Default)]
struct HistogramAccumulator {
    name: String,
    labels: Vec<(String, String)>,
    timestamp_ms: Option<i64>,
    cumulative: Vec<(f64, f64)>,
    sum: Option<f64>,
    count: Option<f64>,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_count(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

impl HistogramAccumulator {
    /// Converts cumulative `le` buckets into per-bucket counts.
    fn finish(mut self) -> HistogramData {
        self.cumulative
            .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut buckets = Vec::with_capacity(self.cumulative.len() + 1);
        let mut previous = 0;
        for (upper_bound, cumulative) in &self.cumulative {
            let cumulative = to_count(*cumulative);
            buckets.push(HistogramBucket {
                upper_bound: *upper_bound,
                count: cumulative.saturating_sub(previous),
            });
            previous = previous.max(cumulative);
        }

        let count = self.count.map_or(previous, to_count);
        if buckets
            .last()
            .is_none_or(|b: &HistogramBucket| b.upper_bound.is_finite())
        {
            buckets.push(HistogramBucket {
                upper_bound: f64::INFINITY,
                count: count.saturating_sub(previous),
            });
        }

        HistogramData {
            buckets,
            sum: self.sum.unwrap_or(0.0),
            count,
        }
    }
}

fn attributes(labels: &[(String, String)]) -> Vec<KeyValue> {
    labels
        .iter()
        .map(|(k, v)| KeyValue::new(k.clone(), AttributeValue::String(v.clone())))
        .collect()
}

fn timestamp(timestamp_ms: Option<i64>, default: DateTime<Utc>) -> DateTime<Utc> {
    timestamp_ms
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(default)
}

/// Converts parsed samples into metric points.
///
/// Counters keep their sample name. Gauges and untyped samples become
/// gauges. Histogram `_bucket`/`_sum`/`_count` samples sharing a label set
/// become one histogram point. Summaries and counter `_created` samples are
/// skipped. Samples without a timestamp are stamped with `scraped_at`.
#[must_use]
pub fn to_metric_points(exposition: &Exposition, scraped_at: DateTime<Utc>) -> Vec<MetricPoint> {
    let mut points = Vec::new();
    let mut histograms: Vec<HistogramAccumulator> = Vec::new();
    let mut histogram_index: HashMap<(String, Vec<(String, String)>), usize> = HashMap::new();

    for sample in &exposition.samples {
        let (family, family_type) = exposition.family_of(&sample.name);
        let description = exposition.help.get(family).cloned();

        match family_type {
            FamilyType::Counter | FamilyType::Gauge | FamilyType::Untyped => {
                if family_type == FamilyType::Counter && sample.name.ends_with("_created") {
                    continue;
                }
                let kind = if family_type == FamilyType::Counter {
                    MetricKind::Counter
                } else {
                    MetricKind::Gauge
                };
                points.push(MetricPoint {
                    name: sample.name.clone(),
                    kind,
                    timestamp: timestamp(sample.timestamp_ms, scraped_at),
                    value: MetricValue::Scalar(sample.value),
                    attributes: attributes(&sample.labels),
                    unit: None,
                    description,
                });
            }
            FamilyType::Histogram => {
                let labels: Vec<(String, String)> = sample
                    .labels
                    .iter()
                    .filter(|(k, _)| k != "le")
                    .cloned()
                    .collect();
                let key = (family.to_string(), labels.clone());
                let index = *histogram_index.entry(key).or_insert_with(|| {
                    histograms.push(HistogramAccumulator {
                        name: family.to_string(),
                        labels,
                        ..HistogramAccumulator::default()
                    });
                    histograms.len() - 1
                });
                let acc = &mut histograms[index];
                acc.timestamp_ms = acc.timestamp_ms.or(sample.timestamp_ms);

                let suffix = &sample.name[family.len()..];
                match suffix {
                    "_bucket" => {
                        if let Some(le) = sample.label("le").and_then(|v| parser::parse_float(v).ok())
                        {
                            acc.cumulative.push((le, sample.value));
                        }
                    }
                    "_sum" => acc.sum = Some(sample.value),
                    "_count" => acc.count = Some(sample.value),
                    _ => {}
                }
            }
            FamilyType::Summary => {
                tracing::debug!(metric = %sample.name, "Skipping summary sample");
            }
        }
    }

    for acc in histograms {
        let name = acc.name.clone();
        let labels = acc.labels.clone();
        let ts = timestamp(acc.timestamp_ms, scraped_at);
        let description = exposition.help.get(&name).cloned();
        points.push(MetricPoint {
            name,
            kind: MetricKind::Histogram,
            timestamp: ts,
            value: MetricValue::Histogram(acc.finish()),
            attributes: attributes(&labels),
            unit: None,
            description,
        });
    }

    points
}
