//! Tributary Shared Library
//!
//! This crate contains the types and building blocks shared by the Tributary
//! collector and CLI.
//!
//! # Modules
//!
//! - [`models`] - Signal model: spans, log records, metric points and batches
//! - [`otlp`] - OTLP decoding with per-record validation, and encoding
//! - [`config`] - Static TOML configuration schema and checks
//! - [`destination`] - Destination trait and backend implementations
//! - [`prometheus`] - Prometheus text exposition parsing and rendering
//!
//! # Example
//!
//! ```
//! use shared::models::{LogRecord, Severity, SignalRecord, SignalKind};
//!
//! let record: SignalRecord = LogRecord::new(Severity::Info, "User logged in")
//!     .with_attribute("user_id", "12345")
//!     .into();
//!
//! assert_eq!(record.kind(), SignalKind::Logs);
//! assert!(record.validate().is_ok());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod destination;
pub mod models;
pub mod otlp;
pub mod prometheus;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
pub use validator;
