//! Adaptive in-flight credits for one destination.
//!
//! A lane takes a credit before every export attempt. The credit limit
//! starts at the destination's `max_in_flight`, halves on a busy signal or a
//! timeout (never below one) and grows by one on each success.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Credit pool shared by the lanes of one destination.
#[derive(Debug)]
pub struct Credits {
    max: usize,
    limit: AtomicUsize,
    in_use: AtomicUsize,
    released: Notify,
}

/// A held credit, returned to the pool on drop.
#[derive(Debug)]
pub struct Credit {
    pool: Arc<Credits>,
}

impl Drop for Credit {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::AcqRel);
        self.pool.released.notify_waiters();
    }
}

impl Credits {
    /// Creates a pool whose limit starts (and is capped) at `max`.
    #[must_use]
    pub fn new(max: usize) -> Arc<Self> {
        let max = max.max(1);
        Arc::new(Self {
            max,
            limit: AtomicUsize::new(max),
            in_use: AtomicUsize::new(0),
            released: Notify::new(),
        })
    }

    /// Returns the current credit limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    /// Returns the number of credits currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Takes a credit if one is free.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Credit> {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            if current >= self.limit() {
                return None;
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(Credit {
                        pool: Arc::clone(self),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Waits until a credit is free and takes it.
    pub async fn acquire(self: &Arc<Self>) -> Credit {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(credit) = self.try_acquire() {
                return credit;
            }
            released.await;
        }
    }

    /// Raises the limit by one after a successful attempt.
    pub fn on_success(&self) {
        let raised = self
            .limit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |limit| {
                (limit < self.max).then_some(limit + 1)
            })
            .is_ok();
        if raised {
            self.released.notify_waiters();
        }
    }

    /// Halves the limit after a busy signal or a timeout.
    pub fn on_backpressure(&self) {
        let _ = self
            .limit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |limit| {
                Some((limit / 2).max(1))
            });
    }
}
