//! Per-destination exporter.
//!
//! A [`DestinationWorker`] owns `max_in_flight` lanes. Batches are sharded
//! onto lanes by resource, and each lane sends one batch at a time, so a
//! destination never sees batch B+1 of a resource before batch B is done
//! while different resources proceed concurrently.

use super::credits::Credits;
use super::health::{ComponentStatus, HealthHandle};
use super::queue::QueuedBatch;
use super::retry::{DropReason, ExportAttempt, Outcome};
use super::stats::DestinationCounters;
use shared::config::RetryPolicy;
use shared::destination::Destination;
use shared::models::Resource;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Everything a lane needs besides its inbox.
struct Lane {
    index: usize,
    destination: Arc<dyn Destination>,
    credits: Arc<Credits>,
    policy: Arc<RetryPolicy>,
    cancel: CancellationToken,
    counters: Arc<DestinationCounters>,
    health: HealthHandle,
}

impl Lane {
    async fn run(self, mut inbox: mpsc::UnboundedReceiver<Arc<QueuedBatch>>) {
        while let Some(queued) = inbox.recv().await {
            let batch = queued.batch();
            let outcome = ExportAttempt::new(batch, self.destination.as_ref(), &self.policy)
                .run(&self.credits, &self.cancel)
                .await;
            self.report(&queued, &outcome);
        }
        tracing::trace!(
            destination = %self.destination.name(),
            lane = self.index,
            "Lane finished"
        );
    }

    fn report(&self, queued: &QueuedBatch, outcome: &Outcome) {
        let batch = queued.batch();
        self.counters.record(outcome, batch.len());

        match outcome {
            Outcome::Sent { attempts } => {
                self.health.set(ComponentStatus::Up);
                tracing::debug!(
                    signal = %batch.kind(),
                    destination = %self.destination.name(),
                    sequence = batch.sequence(),
                    records = batch.len(),
                    attempts,
                    "Batch sent"
                );
            }
            Outcome::Dropped {
                attempts,
                reason,
                last_error,
            } => {
                if *reason != DropReason::DrainTimeout {
                    self.health.set(ComponentStatus::Degraded);
                }
                tracing::error!(
                    signal = %batch.kind(),
                    destination = %self.destination.name(),
                    sequence = batch.sequence(),
                    records = batch.len(),
                    attempt = attempts,
                    reason = %reason,
                    error = %last_error.as_ref().map(ToString::to_string).unwrap_or_default(),
                    "Batch dropped"
                );
            }
        }
    }
}

/// Sending side of one destination's lanes.
pub struct DestinationWorker {
    name: String,
    lanes: Vec<mpsc::UnboundedSender<Arc<QueuedBatch>>>,
    counters: Arc<DestinationCounters>,
}

impl DestinationWorker {
    /// Spawns the lanes of `destination` onto `tasks`.
    pub fn spawn(
        destination: Arc<dyn Destination>,
        max_in_flight: usize,
        policy: Arc<RetryPolicy>,
        cancel: &CancellationToken,
        counters: Arc<DestinationCounters>,
        health: HealthHandle,
        tasks: &mut JoinSet<()>,
    ) -> Self {
        let lanes_count = max_in_flight.max(1);
        let credits = Credits::new(lanes_count);
        let name = destination.name().to_string();

        let lanes = (0..lanes_count)
            .map(|index| {
                let (sender, inbox) = mpsc::unbounded_channel();
                let lane = Lane {
                    index,
                    destination: Arc::clone(&destination),
                    credits: Arc::clone(&credits),
                    policy: Arc::clone(&policy),
                    cancel: cancel.clone(),
                    counters: Arc::clone(&counters),
                    health: health.clone(),
                };
                tasks.spawn(lane.run(inbox));
                sender
            })
            .collect();

        tracing::debug!(destination = %name, lanes = lanes_count, "Destination worker started");
        Self {
            name,
            lanes,
            counters,
        }
    }

    /// Returns the destination name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of lanes.
    #[must_use]
    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Returns the lane that owns `resource`.
    #[must_use]
    pub fn lane_for(&self, resource: &Resource) -> usize {
        let mut hasher = DefaultHasher::new();
        resource.hash(&mut hasher);
        usize::try_from(hasher.finish() % self.lanes.len() as u64).unwrap_or(0)
    }

    /// Hands a batch to the lane owning its resource.
    pub fn dispatch(&self, queued: Arc<QueuedBatch>) {
        let lane = self.lane_for(queued.batch().resource());
        if let Err(mpsc::error::SendError(queued)) = self.lanes[lane].send(queued) {
            let batch = queued.batch();
            self.counters.record_drop(DropReason::DrainTimeout, batch.len());
            tracing::error!(
                signal = %batch.kind(),
                destination = %self.name,
                sequence = batch.sequence(),
                reason = %DropReason::DrainTimeout,
                "Lane stopped, batch dropped"
            );
        }
    }
}
