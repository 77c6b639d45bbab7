//! Fan-out of flushed batches to the destinations of one signal kind.

use super::exporter::DestinationWorker;
use super::health::{ComponentStatus, HealthHandle};
use super::queue::{BatchReceiver, QueuedBatch};
use super::retry::DropReason;
use super::stats::SignalCounters;
use shared::models::SignalKind;
use std::sync::Arc;

/// Routes every batch of one kind to each of its destinations.
pub struct SignalRouter {
    kind: SignalKind,
    destinations: Vec<DestinationWorker>,
    counters: Arc<SignalCounters>,
    health: HealthHandle,
}

impl SignalRouter {
    /// Creates a router over `destinations`, in fan-out order.
    #[must_use]
    pub fn new(
        kind: SignalKind,
        destinations: Vec<DestinationWorker>,
        counters: Arc<SignalCounters>,
        health: HealthHandle,
    ) -> Self {
        Self {
            kind,
            destinations,
            counters,
            health,
        }
    }

    /// Returns the names of the destinations, in fan-out order.
    pub fn destination_names(&self) -> impl Iterator<Item = &str> {
        self.destinations.iter().map(DestinationWorker::name)
    }

    /// Hands `queued` to every destination independently.
    ///
    /// With no destination the batch is dropped with
    /// [`DropReason::DestinationConfigMissing`].
    pub fn send(&self, queued: &Arc<QueuedBatch>) {
        let batch = queued.batch();
        if batch.kind() != self.kind {
            tracing::error!(
                signal = %self.kind,
                batch_kind = %batch.kind(),
                sequence = batch.sequence(),
                "Batch routed to the wrong pipeline, dropped"
            );
            self.counters.record_unrouted(batch.len());
            return;
        }

        if self.destinations.is_empty() {
            self.counters.record_unrouted(batch.len());
            tracing::error!(
                signal = %self.kind,
                sequence = batch.sequence(),
                records = batch.len(),
                reason = %DropReason::DestinationConfigMissing,
                "Batch dropped"
            );
            return;
        }

        for destination in &self.destinations {
            destination.dispatch(Arc::clone(queued));
        }
    }

    /// Forwards batches until the queue closes its channel.
    pub async fn run(self, mut batches: BatchReceiver) {
        tracing::debug!(signal = %self.kind, destinations = self.destinations.len(), "Router started");
        while let Some(queued) = batches.recv().await {
            self.send(&queued);
        }
        self.health.set(ComponentStatus::Down);
        tracing::debug!(signal = %self.kind, "Router stopped");
    }
}
