//! Application state module.
//!
//! Defines the shared state passed to the HTTP route handlers.

use crate::ingest::Ingest;
use crate::pipeline::{HealthRegistry, Supervisor};
use shared::destination::Destination;
use std::sync::Arc;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Entry point into the batching queues.
    ingest: Ingest,
    /// Component health.
    health: Arc<HealthRegistry>,
    /// Every running destination; scraped ones render on `/metrics/scrape`.
    destinations: Arc<[Arc<dyn Destination>]>,
    /// Largest accepted request body.
    max_body_bytes: usize,
}

impl AppState {
    /// Creates the state from its parts.
    #[must_use]
    pub fn new(
        ingest: Ingest,
        health: Arc<HealthRegistry>,
        destinations: Vec<Arc<dyn Destination>>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            ingest,
            health,
            destinations: destinations.into(),
            max_body_bytes,
        }
    }

    /// Creates the state over a running pipeline.
    #[must_use]
    pub fn from_supervisor(supervisor: &Supervisor, max_body_bytes: usize) -> Self {
        Self::new(
            supervisor.ingest(),
            Arc::clone(supervisor.health()),
            supervisor.destinations().to_vec(),
            max_body_bytes,
        )
    }

    /// Returns the ingest handle.
    #[must_use]
    pub fn ingest(&self) -> &Ingest {
        &self.ingest
    }

    /// Returns the health registry.
    #[must_use]
    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Returns every running destination.
    #[must_use]
    pub fn destinations(&self) -> &[Arc<dyn Destination>] {
        &self.destinations
    }

    /// Returns the request body limit.
    #[must_use]
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}
