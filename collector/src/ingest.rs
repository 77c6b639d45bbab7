//! Handoff from receivers to the batching queues.
//!
//! Both OTLP front ends and the scrape receiver go through [`Ingest`]. The
//! accepted records of one request are enqueued all or none: capacity for
//! every accepted record is reserved up front, so a full queue refuses the
//! request instead of keeping part of it.

use crate::pipeline::queue::{BatchQueue, QueueError};
use crate::pipeline::stats::{PipelineStats, StatsSnapshot};
use shared::models::{Resource, SignalKind, SignalRecord};
use shared::otlp::DecodedRequest;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned to a receiver.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Every record of the request failed validation.
    #[error("all {rejected} records were rejected: {message}")]
    AllRejected {
        /// Number of rejected records.
        rejected: usize,
        /// The first rejection reasons.
        message: String,
    },

    /// The queue could not take the records.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl IngestError {
    /// Returns true if the client should retry the request later.
    ///
    /// A request larger than the queue capacity is never retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Queue(QueueError::Full { .. } | QueueError::Closed(_))
        )
    }
}

/// Result of a request that was at least partly accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Records enqueued.
    pub accepted: usize,
    /// Records dropped for failing validation.
    pub rejected: usize,
    /// The first rejection reasons, when any record was rejected.
    pub error_message: Option<String>,
}

impl IngestOutcome {
    /// Returns the rejected count and message for an OTLP `partial_success`,
    /// or `None` when every record was accepted.
    #[must_use]
    pub fn partial_success(&self) -> Option<(i64, String)> {
        (self.rejected > 0).then(|| {
            (
                i64::try_from(self.rejected).unwrap_or(i64::MAX),
                self.error_message.clone().unwrap_or_default(),
            )
        })
    }
}

/// Shared entry point into the three queues.
#[derive(Clone)]
pub struct Ingest {
    queues: Arc<[Arc<BatchQueue>; 3]>,
    stats: Arc<PipelineStats>,
}

impl Ingest {
    pub(crate) fn new(queues: [Arc<BatchQueue>; 3], stats: Arc<PipelineStats>) -> Self {
        Self {
            queues: Arc::new(queues),
            stats,
        }
    }

    /// Returns the queue of `kind`.
    #[must_use]
    pub fn queue(&self, kind: SignalKind) -> &Arc<BatchQueue> {
        &self.queues[kind.index()]
    }

    /// Returns the pipeline counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Returns every counter together with the records each queue holds.
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        for (kind, signal) in &mut snapshot.signals {
            signal.buffered = self.queue(*kind).buffered();
        }
        snapshot
    }

    /// Enqueues the valid records of a decoded export request.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::AllRejected`] if the request held records and
    /// none was valid, or [`IngestError::Queue`] if the queue is full, closed
    /// or smaller than the request. In every case nothing is enqueued.
    pub fn submit(&self, request: DecodedRequest) -> Result<IngestOutcome, IngestError> {
        let kind = request.kind;
        let counters = self.stats.signal(kind);
        let rejected = request.rejected_count();
        counters.record_rejected(rejected);

        if request.all_rejected() {
            let message = request.error_message();
            tracing::debug!(signal = %kind, rejected, error = %message, "Request rejected");
            return Err(IngestError::AllRejected { rejected, message });
        }

        let accepted = request.accepted();
        let error_message = (rejected > 0).then(|| request.error_message());
        if let Some(message) = &error_message {
            tracing::debug!(signal = %kind, accepted, rejected, error = %message, "Partially accepted request");
        }

        if accepted > 0 {
            let queue = self.queue(kind);
            let groups = request
                .groups
                .into_iter()
                .map(|group| (group.resource, group.records))
                .collect();
            queue
                .reserve(accepted)
                .and_then(|permit| queue.append_groups(groups, permit))
                .inspect_err(|e| {
                    counters.record_refused(accepted);
                    tracing::warn!(signal = %kind, records = accepted, error = %e, "Request refused");
                })?;
            counters.record_accepted(accepted);
        }

        Ok(IngestOutcome {
            accepted,
            rejected,
            error_message,
        })
    }

    /// Enqueues records of one resource, all or none.
    ///
    /// # Errors
    ///
    /// Returns a [`QueueError`] if the records do not belong to `kind` or do
    /// not fit.
    pub fn enqueue(
        &self,
        kind: SignalKind,
        resource: Arc<Resource>,
        records: Vec<SignalRecord>,
    ) -> Result<(), QueueError> {
        let count = records.len();
        let counters = self.stats.signal(kind);
        match self.queue(kind).enqueue_all(records, resource) {
            Ok(()) => {
                counters.record_accepted(count);
                Ok(())
            }
            Err(e) => {
                counters.record_refused(count);
                Err(e)
            }
        }
    }
}
