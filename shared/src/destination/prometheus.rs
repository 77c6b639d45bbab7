//! Pull-based metrics destination.
//!
//! Holds the most recent value of every series and renders them in the
//! Prometheus text format when scraped.

use super::{Destination, ExportError};
use crate::models::{Batch, MetricPoint, Resource, SignalKind};
use crate::prometheus::render;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Series identity: metric name, resource, then point attributes.
type SeriesKey = (String, Arc<Resource>, Vec<(String, String)>);

/// Keeps the latest point per series for scraping.
pub struct PrometheusDestination {
    name: String,
    series: RwLock<BTreeMap<SeriesKey, MetricPoint>>,
}

impl PrometheusDestination {
    /// Creates an empty series store.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            series: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns the number of distinct series held.
    #[must_use]
    pub fn series_count(&self) -> usize {
        self.series.read().map(|s| s.len()).unwrap_or_default()
    }

    /// Renders all series in the text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let Ok(series) = self.series.read() else {
            return String::new();
        };
        render(series.iter().map(|((_, resource, _), point)| (resource.as_ref(), point)))
    }
}

fn series_key(resource: &Arc<Resource>, point: &MetricPoint) -> SeriesKey {
    let labels = point
        .attributes
        .iter()
        .map(|kv| (kv.key.clone(), kv.value.to_string()))
        .collect();
    (point.name.clone(), Arc::clone(resource), labels)
}

#[async_trait]
impl Destination for PrometheusDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SignalKind {
        SignalKind::Metrics
    }

    async fn export(&self, batch: &Batch) -> Result<(), ExportError> {
        let mut series = self
            .series
            .write()
            .map_err(|_| ExportError::Transient("series store poisoned".to_string()))?;
        for point in batch.metrics() {
            let key = series_key(batch.resource(), point);
            match series.get(&key) {
                Some(existing) if existing.timestamp > point.timestamp => {}
                _ => {
                    series.insert(key, point.clone());
                }
            }
        }
        Ok(())
    }

    fn exposition(&self) -> Option<String> {
        Some(self.render())
    }
}
