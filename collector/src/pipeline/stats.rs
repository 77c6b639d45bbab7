//! Pipeline counters.
//!
//! All counters are atomics created when the pipeline starts; hot paths
//! never take a lock to count. Snapshots are served as JSON on
//! `GET /api/v1/stats`.

use super::retry::{DropReason, Outcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::models::SignalKind;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(u64::try_from(n).unwrap_or(u64::MAX), Ordering::Relaxed);
}

fn get(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Counters of one signal kind.
#[derive(Debug, Default)]
pub struct SignalCounters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    refused: AtomicU64,
    batches_flushed: AtomicU64,
    unrouted_batches: AtomicU64,
    unrouted_records: AtomicU64,
}

impl SignalCounters {
    /// Counts records that passed validation and were enqueued.
    pub fn record_accepted(&self, records: usize) {
        add(&self.accepted, records);
    }

    /// Counts records that failed validation.
    pub fn record_rejected(&self, records: usize) {
        add(&self.rejected, records);
    }

    /// Counts valid records turned away because the queue was full or closed.
    pub fn record_refused(&self, records: usize) {
        add(&self.refused, records);
    }

    /// Counts a batch handed to the router.
    pub fn record_flush(&self) {
        add(&self.batches_flushed, 1);
    }

    /// Counts a batch dropped because no destination serves its kind.
    pub fn record_unrouted(&self, records: usize) {
        add(&self.unrouted_batches, 1);
        add(&self.unrouted_records, records);
    }

    /// Returns the current values.
    #[must_use]
    pub fn snapshot(&self) -> SignalSnapshot {
        SignalSnapshot {
            accepted: get(&self.accepted),
            rejected: get(&self.rejected),
            refused: get(&self.refused),
            batches_flushed: get(&self.batches_flushed),
            unrouted_batches: get(&self.unrouted_batches),
            unrouted_records: get(&self.unrouted_records),
            buffered: 0,
        }
    }
}

/// Counters of one destination.
#[derive(Debug)]
pub struct DestinationCounters {
    kind: SignalKind,
    batches_sent: AtomicU64,
    records_sent: AtomicU64,
    retries: AtomicU64,
    dropped_batches: [AtomicU64; 4],
    dropped_records: [AtomicU64; 4],
}

impl DestinationCounters {
    fn new(kind: SignalKind) -> Self {
        Self {
            kind,
            batches_sent: AtomicU64::default(),
            records_sent: AtomicU64::default(),
            retries: AtomicU64::default(),
            dropped_batches: Default::default(),
            dropped_records: Default::default(),
        }
    }

    /// Counts the terminal outcome of one batch of `records` records.
    pub fn record(&self, outcome: &Outcome, records: usize) {
        self.retries
            .fetch_add(u64::from(outcome.retries()), Ordering::Relaxed);
        match outcome {
            Outcome::Sent { .. } => {
                add(&self.batches_sent, 1);
                add(&self.records_sent, records);
            }
            Outcome::Dropped { reason, .. } => self.record_drop(*reason, records),
        }
    }

    /// Counts a batch dropped without an attempt outcome.
    pub fn record_drop(&self, reason: DropReason, records: usize) {
        add(&self.dropped_batches[reason.index()], 1);
        add(&self.dropped_records[reason.index()], records);
    }

    /// Returns the total number of dropped batches.
    #[must_use]
    pub fn dropped_total(&self) -> u64 {
        self.dropped_batches.iter().map(get).sum()
    }

    /// Returns the current values.
    #[must_use]
    pub fn snapshot(&self) -> DestinationSnapshot {
        let per_reason = |counters: &[AtomicU64; 4]| {
            DropReason::ALL
                .iter()
                .map(|reason| (*reason, get(&counters[reason.index()])))
                .collect()
        };
        DestinationSnapshot {
            kind: self.kind,
            batches_sent: get(&self.batches_sent),
            records_sent: get(&self.records_sent),
            retries: get(&self.retries),
            dropped_batches: per_reason(&self.dropped_batches),
            dropped_records: per_reason(&self.dropped_records),
        }
    }
}

/// Counters of the scrape receiver.
#[derive(Debug, Default)]
pub struct ScrapeCounters {
    successes: AtomicU64,
    failures: AtomicU64,
    points: AtomicU64,
}

impl ScrapeCounters {
    /// Counts a scrape that was parsed and enqueued.
    pub fn record_success(&self, points: usize) {
        add(&self.successes, 1);
        add(&self.points, points);
    }

    /// Counts a scrape that failed at any stage.
    pub fn record_failure(&self) {
        add(&self.failures, 1);
    }

    /// Returns the current values.
    #[must_use]
    pub fn snapshot(&self) -> ScrapeSnapshot {
        ScrapeSnapshot {
            successes: get(&self.successes),
            failures: get(&self.failures),
            points: get(&self.points),
        }
    }
}

/// Process-wide pipeline counters.
#[derive(Debug)]
pub struct PipelineStats {
    started_at: DateTime<Utc>,
    signals: [Arc<SignalCounters>; 3],
    destinations: RwLock<BTreeMap<String, Arc<DestinationCounters>>>,
    scrape: ScrapeCounters,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            signals: Default::default(),
            destinations: RwLock::new(BTreeMap::new()),
            scrape: ScrapeCounters::default(),
        }
    }
}

impl PipelineStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counters of `kind`.
    #[must_use]
    pub fn signal(&self, kind: SignalKind) -> &Arc<SignalCounters> {
        &self.signals[kind.index()]
    }

    /// Creates (or returns) the counters of destination `name`.
    pub fn register_destination(&self, name: &str, kind: SignalKind) -> Arc<DestinationCounters> {
        let mut destinations = self
            .destinations
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            destinations
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(DestinationCounters::new(kind))),
        )
    }

    /// Returns the counters of destination `name`.
    #[must_use]
    pub fn destination(&self, name: &str) -> Option<Arc<DestinationCounters>> {
        self.destinations
            .read()
            .ok()
            .and_then(|destinations| destinations.get(name).cloned())
    }

    /// Returns the scrape counters.
    #[must_use]
    pub fn scrape(&self) -> &ScrapeCounters {
        &self.scrape
    }

    /// Returns the current values of every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let destinations = self
            .destinations
            .read()
            .map(|destinations| {
                destinations
                    .iter()
                    .map(|(name, counters)| (name.clone(), counters.snapshot()))
                    .collect()
            })
            .unwrap_or_default();

        StatsSnapshot {
            started_at: self.started_at,
            signals: SignalKind::ALL
                .iter()
                .map(|kind| (*kind, self.signal(*kind).snapshot()))
                .collect(),
            destinations,
            scrape: self.scrape.snapshot(),
        }
    }
}

/// Counter values of one signal kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    /// Records accepted into the queue.
    pub accepted: u64,
    /// Records that failed validation.
    pub rejected: u64,
    /// Valid records refused for lack of capacity.
    pub refused: u64,
    /// Batches flushed to the router.
    pub batches_flushed: u64,
    /// Batches dropped with no destination to send to.
    pub unrouted_batches: u64,
    /// Records in those batches.
    pub unrouted_records: u64,
    /// Records currently held by the queue and its exporters.
    pub buffered: usize,
}

/// Counter values of one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationSnapshot {
    /// Signal kind served.
    pub kind: SignalKind,
    /// Batches delivered.
    pub batches_sent: u64,
    /// Records delivered.
    pub records_sent: u64,
    /// Attempts beyond the first, over all batches.
    pub retries: u64,
    /// Dropped batches by reason.
    pub dropped_batches: BTreeMap<DropReason, u64>,
    /// Dropped records by reason.
    pub dropped_records: BTreeMap<DropReason, u64>,
}

/// Counter values of the scrape receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeSnapshot {
    /// Successful scrapes.
    pub successes: u64,
    /// Failed scrapes.
    pub failures: u64,
    /// Metric points enqueued from scrapes.
    pub points: u64,
}

/// Every counter of the pipeline at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// When the counters were created.
    pub started_at: DateTime<Utc>,
    /// Per signal kind.
    pub signals: BTreeMap<SignalKind, SignalSnapshot>,
    /// Per destination name.
    pub destinations: BTreeMap<String, DestinationSnapshot>,
    /// Scrape receiver.
    pub scrape: ScrapeSnapshot,
}
