//! Trace span data model.
//!
//! Trace and span identifiers are opaque byte strings. They are compared by
//! exact equality and rendered as hex for display; nothing inspects their
//! contents.

use super::{KeyValue, ValidationError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident, $len:expr, $field:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Length of the identifier in bytes.
            pub const LEN: usize = $len;

            /// Wraps raw identifier bytes.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Builds an identifier from a wire slice.
            ///
            /// # Errors
            ///
            /// Returns [`ValidationError::Missing`] for an empty slice and
            /// [`ValidationError::InvalidLength`] for any other wrong length.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
                if bytes.is_empty() {
                    return Err(ValidationError::Missing { field: $field });
                }
                let array: [u8; $len] =
                    bytes
                        .try_into()
                        .map_err(|_| ValidationError::InvalidLength {
                            field: $field,
                            expected: $len,
                            actual: bytes.len(),
                        })?;
                Ok(Self(array))
            }

            /// Returns the raw bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let encoded = String::deserialize(deserializer)?;
                let bytes = hex::decode(&encoded).map_err(serde::de::Error::custom)?;
                Self::from_slice(&bytes).map_err(serde::de::Error::custom)
            }
        }
    };
}

opaque_id!(
    /// 16-byte trace identifier.
    TraceId,
    16,
    "trace_id"
);

opaque_id!(
    /// 8-byte span identifier.
    SpanId,
    8,
    "span_id"
);

/// Status code for a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusCode {
    /// No status was recorded.
    #[default]
    Unset,
    /// The operation completed successfully.
    Ok,
    /// The operation failed.
    Error,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::Ok => write!(f, "ok"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Status of a span.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpanStatus {
    /// Status code.
    pub code: StatusCode,
    /// Optional developer-facing message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Kind of span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    /// Default span kind (internal operation).
    #[default]
    Internal,
    /// The span represents a server handling a request.
    Server,
    /// The span represents a client making a request.
    Client,
    /// The span represents a producer sending a message.
    Producer,
    /// The span represents a consumer receiving a message.
    Consumer,
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "internal"),
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
            Self::Producer => write!(f, "producer"),
            Self::Consumer => write!(f, "consumer"),
        }
    }
}

/// An event within a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    /// The name of the event.
    pub name: String,
    /// Timestamp when the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Ordered event attributes.
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

/// A span representing a unit of work in a distributed trace.
///
/// # Example
///
/// ```
/// use shared::models::{Span, SpanId, SpanKind, TraceId};
///
/// let span = Span::new(TraceId::from_bytes([1; 16]), SpanId::from_bytes([2; 8]), "GET /users")
///     .with_kind(SpanKind::Server)
///     .with_attribute("http.method", "GET");
///
/// assert!(span.validate().is_ok());
/// assert!(span.is_root());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Identifier of the trace this span belongs to.
    pub trace_id: TraceId,

    /// Identifier of this span.
    pub span_id: SpanId,

    /// The parent span ID (None for root spans).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,

    /// The operation name.
    pub name: String,

    /// The kind of span.
    #[serde(default)]
    pub kind: SpanKind,

    /// The status of the span.
    #[serde(default)]
    pub status: SpanStatus,

    /// Timestamp when the span started.
    pub start_time: DateTime<Utc>,

    /// Timestamp when the span ended.
    pub end_time: DateTime<Utc>,

    /// Ordered span attributes.
    #[serde(default)]
    pub attributes: Vec<KeyValue>,

    /// Events that occurred during the span, in recorded order.
    #[serde(default)]
    pub events: Vec<SpanEvent>,
}

impl Span {
    /// Creates a new span with the current time as both start and end.
    #[must_use]
    pub fn new(trace_id: TraceId, span_id: SpanId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            trace_id,
            span_id,
            parent_span_id: None,
            name: name.into(),
            kind: SpanKind::default(),
            status: SpanStatus::default(),
            start_time: now,
            end_time: now,
            attributes: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Sets the parent span ID.
    #[must_use]
    pub fn with_parent(mut self, parent_span_id: SpanId) -> Self {
        self.parent_span_id = Some(parent_span_id);
        self
    }

    /// Sets the span kind.
    #[must_use]
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the span status code.
    #[must_use]
    pub fn with_status(mut self, code: StatusCode) -> Self {
        self.status.code = code;
        self
    }

    /// Sets the start and end times.
    #[must_use]
    pub fn with_times(mut self, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    /// Appends an attribute.
    #[must_use]
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<super::AttributeValue>,
    ) -> Self {
        self.attributes.push(KeyValue::new(key, value));
        self
    }

    /// Appends an event stamped with the span's end time.
    #[must_use]
    pub fn with_event(mut self, name: impl Into<String>) -> Self {
        self.events.push(SpanEvent {
            name: name.into(),
            timestamp: self.end_time,
            attributes: Vec::new(),
        });
        self
    }

    /// Returns the duration of the span.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    /// Returns true if this is a root span (no parent).
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Validates the span.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidTimeRange`] if the end time is
    /// before the start time.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.end_time < self.start_time {
            return Err(ValidationError::InvalidTimeRange);
        }
        Ok(())
    }
}
