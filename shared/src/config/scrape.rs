//! Scrape target configuration.

use crate::models::{Resource, SERVICE_NAME};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::Validate;

const fn default_interval_ms() -> u64 {
    15_000
}

const fn default_timeout_ms() -> u64 {
    5_000
}

/// A Prometheus text-exposition endpoint polled by the scrape receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ScrapeTarget {
    /// Target name; also the default `service.name` of scraped points.
    #[validate(length(min = 1))]
    pub name: String,

    /// Exposition URL.
    #[validate(url)]
    pub url: String,

    /// Poll interval.
    #[serde(default = "default_interval_ms")]
    #[validate(range(min = 100))]
    pub interval_ms: u64,

    /// Bound on a single scrape request.
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1))]
    pub timeout_ms: u64,

    /// Resource attributes attached to every scraped point.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl ScrapeTarget {
    /// Creates a target with default timings.
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            attributes: BTreeMap::new(),
        }
    }

    /// Returns the poll interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Builds the resource for scraped points.
    ///
    /// `service.name` defaults to the target name unless set explicitly.
    #[must_use]
    pub fn resource(&self) -> Resource {
        let mut resource: Resource = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if resource.service_name().is_none() {
            resource = resource.with_attribute(SERVICE_NAME, self.name.clone());
        }
        resource
    }
}
