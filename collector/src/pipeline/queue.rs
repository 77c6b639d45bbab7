//! Per-signal batching queue.
//!
//! Records are appended to an open batch per [`Resource`]. A batch is
//! flushed to the router once it reaches `max_batch_size` records or once its
//! first record is `max_batch_age` old; the next record of that resource
//! opens a fresh batch.
//!
//! The queue holds at most `max_buffered_records` records. A record stays
//! counted from enqueue until every destination of its batch is done with it:
//! the [`CapacityPermit`] travels inside the [`QueuedBatch`] and is released
//! when the last reference to the batch is dropped. A request larger than
//! the whole capacity can never fit and is refused as
//! [`QueueError::TooLarge`] rather than [`QueueError::Full`].
//!
//! The age trigger sleeps until the oldest open batch reaches
//! `max_batch_age`, so no batch waits longer than that for a flush.

use super::stats::SignalCounters;
use shared::config::BatchConfig;
use shared::models::{Batch, Resource, SignalKind, SignalRecord, ValidationError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Errors returned when records cannot be enqueued.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Accepting the records would exceed the queue's capacity.
    #[error("{kind} queue is at capacity ({capacity} records)")]
    Full {
        /// Queue kind.
        kind: SignalKind,
        /// Configured capacity.
        capacity: usize,
    },

    /// More records than the queue can ever hold at once.
    #[error("{records} records exceed the {kind} queue capacity ({capacity} records)")]
    TooLarge {
        /// Queue kind.
        kind: SignalKind,
        /// Records in the refused request.
        records: usize,
        /// Configured capacity.
        capacity: usize,
    },

    /// The queue no longer accepts records.
    #[error("{0} queue is closed")]
    Closed(SignalKind),

    /// A record does not belong in this queue.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Debug)]
struct Capacity {
    limit: usize,
    held: AtomicUsize,
}

/// Capacity reserved for a number of records.
///
/// Dropping the permit returns its records to the queue's capacity.
#[derive(Debug)]
pub struct CapacityPermit {
    capacity: Arc<Capacity>,
    records: usize,
}

impl CapacityPermit {
    /// Returns the number of records the permit covers.
    #[must_use]
    pub fn records(&self) -> usize {
        self.records
    }

    /// Moves `records` records (at most all held) into a new permit.
    pub(crate) fn split(&mut self, records: usize) -> Self {
        let records = records.min(self.records);
        self.records -= records;
        Self {
            capacity: Arc::clone(&self.capacity),
            records,
        }
    }

    fn absorb(&mut self, mut other: Self) {
        self.records += other.records;
        other.records = 0;
    }
}

impl Drop for CapacityPermit {
    fn drop(&mut self) {
        if self.records > 0 {
            self.capacity.held.fetch_sub(self.records, Ordering::AcqRel);
        }
    }
}

/// A flushed batch together with the capacity it occupies.
#[derive(Debug)]
pub struct QueuedBatch {
    batch: Batch,
    _permit: CapacityPermit,
}

impl QueuedBatch {
    /// Returns the batch.
    #[must_use]
    pub fn batch(&self) -> &Batch {
        &self.batch
    }
}

/// Receiving end of a queue, consumed by the router.
pub type BatchReceiver = mpsc::UnboundedReceiver<Arc<QueuedBatch>>;

#[derive(Debug)]
struct OpenBatch {
    records: Vec<SignalRecord>,
    opened_at: Instant,
    arrived_at: chrono::DateTime<chrono::Utc>,
    permit: CapacityPermit,
}

#[derive(Debug, Default)]
struct Slot {
    open: Option<OpenBatch>,
    retired: bool,
}

/// Buffers records of one signal kind and flushes them as batches.
#[derive(Debug)]
pub struct BatchQueue {
    kind: SignalKind,
    max_batch_size: usize,
    max_batch_age: Duration,
    capacity: Arc<Capacity>,
    slots: RwLock<HashMap<Arc<Resource>, Arc<Mutex<Slot>>>>,
    sequence: AtomicU64,
    sender: RwLock<Option<mpsc::UnboundedSender<Arc<QueuedBatch>>>>,
    admission: RwLock<()>,
    closed: CancellationToken,
    counters: Arc<SignalCounters>,
}

impl BatchQueue {
    /// Creates a queue and the receiver its batches are flushed to.
    #[must_use]
    pub fn new(
        kind: SignalKind,
        config: &BatchConfig,
        counters: Arc<SignalCounters>,
    ) -> (Arc<Self>, BatchReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            kind,
            max_batch_size: config.max_batch_size.max(1),
            max_batch_age: config.max_batch_age(),
            capacity: Arc::new(Capacity {
                limit: config.max_buffered_records,
                held: AtomicUsize::new(0),
            }),
            slots: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            sender: RwLock::new(Some(sender)),
            admission: RwLock::new(()),
            closed: CancellationToken::new(),
            counters,
        });
        (queue, receiver)
    }

    /// Returns the signal kind of this queue.
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Returns the number of records currently held, including records of
    /// flushed batches that some destination has not finished with.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.capacity.held.load(Ordering::Acquire)
    }

    /// Returns the configured record capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.limit
    }

    /// Returns true once [`BatchQueue::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Reserves capacity for `records` records, failing fast when full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::TooLarge`] if `records` exceeds the capacity
    /// itself, [`QueueError::Full`] if the reservation would exceed what is
    /// left, or [`QueueError::Closed`] after the queue was closed.
    pub fn reserve(&self, records: usize) -> Result<CapacityPermit, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed(self.kind));
        }
        if records > self.capacity.limit {
            return Err(QueueError::TooLarge {
                kind: self.kind,
                records,
                capacity: self.capacity.limit,
            });
        }
        let mut held = self.capacity.held.load(Ordering::Acquire);
        loop {
            let next = held.saturating_add(records);
            if next > self.capacity.limit {
                return Err(QueueError::Full {
                    kind: self.kind,
                    capacity: self.capacity.limit,
                });
            }
            match self.capacity.held.compare_exchange_weak(
                held,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(CapacityPermit {
                        capacity: Arc::clone(&self.capacity),
                        records,
                    })
                }
                Err(actual) => held = actual,
            }
        }
    }

    /// Appends one record for `resource`.
    ///
    /// # Errors
    ///
    /// See [`BatchQueue::enqueue_all`].
    pub fn enqueue(&self, record: SignalRecord, resource: Arc<Resource>) -> Result<(), QueueError> {
        self.enqueue_all(vec![record], resource)
    }

    /// Appends `records` for `resource`, all or none.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Invalid`] if a record is of another kind,
    /// [`QueueError::TooLarge`] or [`QueueError::Full`] if the records do not
    /// fit, or [`QueueError::Closed`] after the queue was closed.
    pub fn enqueue_all(
        &self,
        records: Vec<SignalRecord>,
        resource: Arc<Resource>,
    ) -> Result<(), QueueError> {
        self.check_kind(&records)?;
        let permit = self.reserve(records.len())?;
        self.append(resource, records, permit)
    }

    /// Appends records whose capacity was already reserved.
    ///
    /// # Errors
    ///
    /// See [`BatchQueue::append_groups`].
    pub fn append(
        &self,
        resource: Arc<Resource>,
        records: Vec<SignalRecord>,
        permit: CapacityPermit,
    ) -> Result<(), QueueError> {
        self.append_groups(vec![(resource, records)], permit)
    }

    /// Appends the records of several resources under one reservation, all
    /// or none.
    ///
    /// Either every group is appended before [`BatchQueue::close`] flushes,
    /// or none is.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Invalid`] if a record is of another kind, or
    /// [`QueueError::Closed`] after the queue was closed. The permit is
    /// released on error.
    pub fn append_groups(
        &self,
        groups: Vec<(Arc<Resource>, Vec<SignalRecord>)>,
        mut permit: CapacityPermit,
    ) -> Result<(), QueueError> {
        for (_, records) in &groups {
            self.check_kind(records)?;
        }

        let _admitted = self
            .admission
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.is_closed() {
            return Err(QueueError::Closed(self.kind));
        }
        for (resource, records) in groups {
            let part = permit.split(records.len());
            self.push(&resource, records, part);
        }
        Ok(())
    }

    fn push(&self, resource: &Arc<Resource>, records: Vec<SignalRecord>, mut permit: CapacityPermit) {
        if records.is_empty() {
            return;
        }
        loop {
            let slot = self.slot(resource);
            let mut guard = slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if guard.retired {
                continue;
            }

            let now = Instant::now();
            for record in records {
                let open = guard.open.get_or_insert_with(|| OpenBatch {
                    records: Vec::with_capacity(self.max_batch_size.min(1024)),
                    opened_at: now,
                    arrived_at: chrono::Utc::now(),
                    permit: permit.split(0),
                });
                open.records.push(record);
                open.permit.absorb(permit.split(1));
                if open.records.len() >= self.max_batch_size {
                    self.emit(resource, &mut guard);
                }
            }
            return;
        }
    }

    /// Flushes every open batch whose age has reached the age trigger, and
    /// forgets resources with no open batch.
    ///
    /// Returns when the oldest batch still open will expire, if any.
    pub fn flush_expired(&self, now: Instant) -> Option<Instant> {
        let mut next: Option<Instant> = None;
        for (resource, slot) in self.snapshot() {
            if let Ok(mut guard) = slot.lock() {
                let Some(deadline) = guard.open.as_ref().map(|open| open.opened_at + self.max_batch_age)
                else {
                    continue;
                };
                if deadline <= now {
                    self.emit(&resource, &mut guard);
                } else {
                    next = Some(next.map_or(deadline, |n| n.min(deadline)));
                }
            }
        }
        self.prune();
        next
    }

    /// Flushes every open batch regardless of size or age.
    pub fn flush_all(&self) {
        for (resource, slot) in self.snapshot() {
            if let Ok(mut guard) = slot.lock() {
                self.emit(&resource, &mut guard);
            }
        }
    }

    /// Stops accepting records, flushes what is buffered and closes the
    /// channel to the router.
    pub fn close(&self) {
        {
            let _gate = self
                .admission
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            self.closed.cancel();
        }
        self.flush_all();
        if let Ok(mut sender) = self.sender.write() {
            sender.take();
        }
        tracing::debug!(signal = %self.kind, "Queue closed");
    }

    /// Runs the age trigger until the queue is closed.
    ///
    /// With no batch open the loop wakes once per `max_batch_age`; a batch
    /// opened in between expires no earlier than the following wake-up.
    pub async fn run_flush_loop(self: Arc<Self>) {
        let mut wake = Instant::now() + self.max_batch_age;
        loop {
            tokio::select! {
                () = self.closed.cancelled() => break,
                () = tokio::time::sleep_until(wake) => {
                    let now = Instant::now();
                    wake = self
                        .flush_expired(now)
                        .unwrap_or(now + self.max_batch_age);
                }
            }
        }
    }

    fn check_kind(&self, records: &[SignalRecord]) -> Result<(), QueueError> {
        match records.iter().find(|r| r.kind() != self.kind) {
            Some(other) => Err(ValidationError::KindMismatch {
                expected: self.kind,
                actual: other.kind(),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn slot(&self, resource: &Arc<Resource>) -> Arc<Mutex<Slot>> {
        if let Ok(slots) = self.slots.read() {
            if let Some(slot) = slots.get(resource) {
                return Arc::clone(slot);
            }
        }
        let mut slots = self
            .slots
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(slots.entry(Arc::clone(resource)).or_default())
    }

    fn snapshot(&self) -> Vec<(Arc<Resource>, Arc<Mutex<Slot>>)> {
        self.slots
            .read()
            .map(|slots| {
                slots
                    .iter()
                    .map(|(resource, slot)| (Arc::clone(resource), Arc::clone(slot)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn prune(&self) {
        let Ok(mut slots) = self.slots.write() else {
            return;
        };
        slots.retain(|_, slot| match slot.lock() {
            Ok(mut guard) if guard.open.is_none() => {
                guard.retired = true;
                false
            }
            _ => true,
        });
    }

    fn emit(&self, resource: &Arc<Resource>, slot: &mut Slot) {
        let Some(open) = slot.open.take() else {
            return;
        };
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel);
        let records = open.records.len();
        let batch = match Batch::new(
            self.kind,
            Arc::clone(resource),
            open.records,
            open.arrived_at,
            sequence,
        ) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(signal = %self.kind, error = %e, "Discarding malformed batch");
                return;
            }
        };

        let queued = Arc::new(QueuedBatch {
            batch,
            _permit: open.permit,
        });
        let sent = self
            .sender
            .read()
            .ok()
            .and_then(|sender| sender.as_ref().map(|s| s.send(queued).is_ok()))
            .unwrap_or(false);

        if sent {
            self.counters.record_flush();
            tracing::trace!(signal = %self.kind, sequence, records, "Flushed batch");
        } else {
            tracing::warn!(signal = %self.kind, sequence, records, "Router gone, batch discarded");
        }
    }
}
