//! Prometheus text exposition parser using nom.
//!
//! Parses documents like:
//! - `# TYPE http_requests_total counter`
//! - `http_requests_total{method="post",code="200"} 1027 1395066363000`
//! - `rpc_duration_seconds_bucket{le="+Inf"} 144320`

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while, take_while1},
    character::complete::{char, digit1, space0, space1},
    combinator::{all_consuming, map_res, opt, recognize, rest, value},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, separated_pair},
    IResult, Parser,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur while parsing an exposition document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpositionError {
    /// A line could not be parsed.
    #[error("line {line}: invalid syntax: '{content}'")]
    Syntax {
        /// 1-based line number.
        line: usize,
        /// The offending line.
        content: String,
    },

    /// A `# TYPE` line names an unknown type.
    #[error("line {line}: unknown metric type '{found}'")]
    UnknownType {
        /// 1-based line number.
        line: usize,
        /// The type that was found.
        found: String,
    },
}

/// Declared type of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FamilyType {
    /// Monotonic counter.
    Counter,
    /// Point-in-time value.
    Gauge,
    /// Cumulative bucketed distribution.
    Histogram,
    /// Quantile summary.
    Summary,
    /// No declared type.
    Untyped,
}

/// One sample line.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Sample name, including any `_bucket`/`_sum`/`_count`/`_total` suffix.
    pub name: String,
    /// Labels in document order.
    pub labels: Vec<(String, String)>,
    /// Sample value.
    pub value: f64,
    /// Optional timestamp in milliseconds since the epoch.
    pub timestamp_ms: Option<i64>,
}

impl Sample {
    /// Returns a label value by name.
    #[must_use]
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed exposition document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exposition {
    /// Declared family types.
    pub types: HashMap<String, FamilyType>,
    /// Help text per family.
    pub help: HashMap<String, String>,
    /// Samples in document order.
    pub samples: Vec<Sample>,
}

const SUFFIXES: [&str; 5] = ["_bucket", "_sum", "_count", "_total", "_created"];

impl Exposition {
    /// Resolves the family a sample belongs to.
    ///
    /// A sample belongs to the family of its own name if one is declared,
    /// otherwise to the family obtained by stripping a well-known suffix.
    #[must_use]
    pub fn family_of<'a>(&'a self, sample_name: &'a str) -> (&'a str, FamilyType) {
        if let Some(kind) = self.types.get(sample_name) {
            return (sample_name, *kind);
        }
        for suffix in SUFFIXES {
            if let Some(base) = sample_name.strip_suffix(suffix) {
                if let Some(kind) = self.types.get(base) {
                    return (base, *kind);
                }
            }
        }
        (sample_name, FamilyType::Untyped)
    }
}

/// Parses a Prometheus text exposition document.
///
/// # Errors
///
/// Returns an [`ExpositionError`] naming the first line that fails to parse.
///
/// # Examples
///
/// ```
/// use shared::prometheus::parse_exposition;
///
/// let doc = "# TYPE up gauge\nup{job=\"node\"} 1\n";
/// let exposition = parse_exposition(doc).unwrap();
/// assert_eq!(exposition.samples[0].value, 1.0);
/// ```
pub fn parse_exposition(input: &str) -> Result<Exposition, ExpositionError> {
    let mut exposition = Exposition::default();

    for (index, raw) in input.lines().enumerate() {
        let line_number = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('#') {
            match comment(line) {
                Ok((_, Comment::Type(name, kind))) => {
                    let kind = family_type(kind).ok_or_else(|| ExpositionError::UnknownType {
                        line: line_number,
                        found: kind.to_string(),
                    })?;
                    exposition.types.insert(name.to_string(), kind);
                }
                Ok((_, Comment::Help(name, text))) => {
                    exposition
                        .help
                        .insert(name.to_string(), text.trim().to_string());
                }
                Ok((_, Comment::Other)) | Err(_) => {}
            }
            continue;
        }

        let (_, parsed) = all_consuming(sample)
            .parse(line)
            .map_err(|_| ExpositionError::Syntax {
                line: line_number,
                content: line.to_string(),
            })?;
        exposition.samples.push(parsed);
    }

    Ok(exposition)
}

fn family_type(name: &str) -> Option<FamilyType> {
    match name {
        "counter" => Some(FamilyType::Counter),
        "gauge" => Some(FamilyType::Gauge),
        "histogram" => Some(FamilyType::Histogram),
        "summary" => Some(FamilyType::Summary),
        "untyped" | "unknown" => Some(FamilyType::Untyped),
        _ => None,
    }
}

// ============================================================================
// Comment lines
// ============================================================================

enum Comment<'a> {
    Type(&'a str, &'a str),
    Help(&'a str, &'a str),
    Other,
}

fn comment(input: &str) -> IResult<&str, Comment<'_>> {
    let (input, _) = (char('#'), space0).parse(input)?;
    alt((
        preceded(
            (tag("TYPE"), space1),
            separated_pair(metric_name, space1, take_while1(|c: char| c.is_ascii_alphabetic())),
        )
        .map(|(name, kind)| Comment::Type(name, kind)),
        preceded((tag("HELP"), space1), pair(metric_name, opt(preceded(space1, rest))))
            .map(|(name, text)| Comment::Help(name, text.unwrap_or_default())),
        rest.map(|_| Comment::Other),
    ))
    .parse(input)
}

// ============================================================================
// Sample lines
// ============================================================================

fn sample(input: &str) -> IResult<&str, Sample> {
    let (input, name) = metric_name(input)?;
    let (input, labels) = opt(preceded(space0, label_set)).parse(input)?;
    let (input, _) = space1(input)?;
    let (input, value) = sample_value(input)?;
    let (input, timestamp_ms) = opt(preceded(space1, timestamp)).parse(input)?;
    let (input, _) = space0(input)?;

    Ok((
        input,
        Sample {
            name: name.to_string(),
            labels: labels.unwrap_or_default(),
            value,
            timestamp_ms,
        },
    ))
}

fn metric_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_' || c == ':'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == ':'),
    ))
    .parse(input)
}

fn label_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

fn label_value(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        opt(escaped_transform(
            is_not("\\\""),
            '\\',
            alt((
                value("\\", char('\\')),
                value("\"", char('"')),
                value("\n", char('n')),
            )),
        )),
        char('"'),
    )
    .map(Option::unwrap_or_default)
    .parse(input)
}

fn label(input: &str) -> IResult<&str, (String, String)> {
    separated_pair(label_name, (space0, char('='), space0), label_value)
        .map(|(name, value)| (name.to_string(), value))
        .parse(input)
}

fn label_set(input: &str) -> IResult<&str, Vec<(String, String)>> {
    delimited(
        (char('{'), space0),
        separated_list0((space0, char(','), space0), label),
        (space0, opt(char(',')), space0, char('}')),
    )
    .parse(input)
}

/// Parses a float, accepting Prometheus spellings of infinities and NaN.
pub(crate) fn parse_float(s: &str) -> Result<f64, std::num::ParseFloatError> {
    match s {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        other => other.parse::<f64>(),
    }
}

fn sample_value(input: &str) -> IResult<&str, f64> {
    map_res(take_while1(|c: char| !c.is_whitespace()), parse_float).parse(input)
}

fn timestamp(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>).parse(input)
}
