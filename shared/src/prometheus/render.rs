//! Renders metric points in the Prometheus text exposition format.

use crate::models::{MetricKind, MetricPoint, MetricValue, Resource};
use std::fmt::Write;

/// Replaces characters that are not valid in a metric or label name.
fn sanitize_name(name: &str, allow_colon: bool) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || (allow_colon && c == ':') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) || out.is_empty() {
        out.insert(0, '_');
    }
    out
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

fn label_pairs(resource: &Resource, point: &MetricPoint) -> Vec<(String, String)> {
    let mut labels: Vec<(String, String)> = resource
        .attributes()
        .iter()
        .map(|(k, v)| (sanitize_name(k, false), v.clone()))
        .collect();
    for kv in &point.attributes {
        let key = sanitize_name(&kv.key, false);
        let value = kv.value.to_string();
        match labels.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => labels.push((key, value)),
        }
    }
    labels
}

fn write_series(out: &mut String, name: &str, labels: &[(String, String)], value: f64) {
    out.push_str(name);
    if !labels.is_empty() {
        out.push('{');
        for (i, (k, v)) in labels.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{k}=\"{}\"", escape_label_value(v));
        }
        out.push('}');
    }
    let _ = writeln!(out, " {}", format_value(value));
}

/// Renders series as a Prometheus text exposition document.
///
/// Series of the same metric name should be adjacent; `# HELP` and `# TYPE`
/// are written when the name changes. Resource attributes become labels,
/// overridden by point attributes of the same name. Histogram buckets are
/// written cumulatively.
pub fn render<'a, I>(series: I) -> String
where
    I: IntoIterator<Item = (&'a Resource, &'a MetricPoint)>,
{
    let mut out = String::new();
    let mut current: Option<String> = None;

    for (resource, point) in series {
        let name = sanitize_name(&point.name, true);
        if current.as_deref() != Some(name.as_str()) {
            if let Some(description) = &point.description {
                let _ = writeln!(out, "# HELP {name} {}", description.replace('\n', " "));
            }
            let kind = match point.kind {
                MetricKind::Counter => "counter",
                MetricKind::Gauge => "gauge",
                MetricKind::Histogram => "histogram",
            };
            let _ = writeln!(out, "# TYPE {name} {kind}");
            current = Some(name.clone());
        }

        let labels = label_pairs(resource, point);
        match &point.value {
            MetricValue::Scalar(v) => write_series(&mut out, &name, &labels, *v),
            MetricValue::Histogram(data) => {
                let bucket_name = format!("{name}_bucket");
                let mut cumulative = 0_u64;
                for bucket in &data.buckets {
                    cumulative = cumulative.saturating_add(bucket.count);
                    let mut with_le = labels.clone();
                    with_le.push(("le".to_string(), format_value(bucket.upper_bound)));
                    #[allow(clippy::cast_precision_loss)]
                    write_series(&mut out, &bucket_name, &with_le, cumulative as f64);
                }
                write_series(&mut out, &format!("{name}_sum"), &labels, data.sum);
                #[allow(clippy::cast_precision_loss)]
                write_series(&mut out, &format!("{name}_count"), &labels, data.count as f64);
            }
        }
    }

    out
}
