//! OpenTelemetry Protocol (OTLP) support.
//!
//! Decoding turns an OTLP export request into validated [`SignalRecord`]s
//! grouped by producing [`Resource`], and collects a [`Rejection`] for every
//! record that fails validation. Encoding turns a [`Batch`] back into an OTLP
//! export request for push destinations.
//!
//! The generated protobuf types come from `opentelemetry-proto` and are
//! re-exported as [`proto`].
//!
//! # Example
//!
//! ```
//! use shared::otlp::{conversions::decode_trace_request, proto};
//!
//! let request = proto::collector::trace::v1::ExportTraceServiceRequest::default();
//! let decoded = decode_trace_request(&request);
//! assert_eq!(decoded.accepted(), 0);
//! ```

pub mod conversions;
pub mod encode;

pub use opentelemetry_proto::tonic as proto;

use crate::models::{Resource, SignalKind, SignalRecord, ValidationError};
use std::fmt;
use std::sync::Arc;

/// Number of rejection messages surfaced in a partial-success response.
pub const MAX_REPORTED_ERRORS: usize = 3;

/// Valid records of one producer from a single request.
#[derive(Debug, Clone)]
pub struct ResourceGroup {
    /// The producing resource.
    pub resource: Arc<Resource>,
    /// Accepted records in request order.
    pub records: Vec<SignalRecord>,
}

/// A record that failed validation.
#[derive(Debug)]
pub struct Rejection {
    /// Position of the record within the request, counted across resources.
    pub index: usize,
    /// What was wrong with it.
    pub error: ValidationError,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {}: {}", self.index, self.error)
    }
}

/// Outcome of decoding one export request.
#[derive(Debug)]
pub struct DecodedRequest {
    /// Signal kind of the request.
    pub kind: SignalKind,
    /// Accepted records grouped by resource, in request order.
    pub groups: Vec<ResourceGroup>,
    /// Rejected records.
    pub rejected: Vec<Rejection>,
}

impl DecodedRequest {
    /// Creates an empty result for `kind`.
    #[must_use]
    pub fn new(kind: SignalKind) -> Self {
        Self {
            kind,
            groups: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Returns the number of accepted records.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.groups.iter().map(|g| g.records.len()).sum()
    }

    /// Returns the number of rejected records.
    #[must_use]
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }

    /// Returns true if the request held records and every one was rejected.
    #[must_use]
    pub fn all_rejected(&self) -> bool {
        self.accepted() == 0 && !self.rejected.is_empty()
    }

    /// Joins the first few rejection reasons into one message.
    #[must_use]
    pub fn error_message(&self) -> String {
        let mut message = self
            .rejected
            .iter()
            .take(MAX_REPORTED_ERRORS)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        if self.rejected.len() > MAX_REPORTED_ERRORS {
            message.push_str(&format!(
                " (and {} more)",
                self.rejected.len() - MAX_REPORTED_ERRORS
            ));
        }
        message
    }
}
