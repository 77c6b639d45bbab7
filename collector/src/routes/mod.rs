//! HTTP route definitions.
//!
//! This module organizes all HTTP routes served on the OTLP HTTP port.

mod health;
mod otlp;
mod scrape;
mod stats;

pub use health::health_routes;
pub use otlp::{otlp_routes, OtlpError};
pub use scrape::scrape_routes;
pub use stats::stats_routes;
