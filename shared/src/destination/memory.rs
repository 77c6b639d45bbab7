//! In-process destination for development and tests.

use super::{Destination, ExportError};
use crate::models::{Batch, SignalKind};
use async_trait::async_trait;
use std::sync::Mutex;

/// Keeps every exported batch in memory.
pub struct MemoryDestination {
    name: String,
    kind: SignalKind,
    batches: Mutex<Vec<Batch>>,
}

impl MemoryDestination {
    /// Creates an empty store.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: SignalKind) -> Self {
        Self {
            name: name.into(),
            kind,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of every batch received so far, in arrival order.
    #[must_use]
    pub fn batches(&self) -> Vec<Batch> {
        self.batches
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Returns the total number of records received.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.batches
            .lock()
            .map(|guard| guard.iter().map(Batch::len).sum())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SignalKind {
        self.kind
    }

    async fn export(&self, batch: &Batch) -> Result<(), ExportError> {
        let mut guard = self
            .batches
            .lock()
            .map_err(|_| ExportError::Transient("memory store poisoned".to_string()))?;
        guard.push(batch.clone());
        Ok(())
    }
}
