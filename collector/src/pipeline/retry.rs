//! Export attempt state machine.
//!
//! Every batch handed to a destination is driven through
//!
//! ```text
//! Idle -> Attempting -> Waiting(delay) -> Attempting -> ... -> Sent | Dropped(reason)
//! ```
//!
//! by [`ExportAttempt::run`]. Each attempt holds an in-flight credit and is
//! bounded by the policy's attempt timeout; cancellation interrupts both
//! Attempting and Waiting.

use super::credits::Credits;
use serde::{Deserialize, Serialize};
use shared::config::RetryPolicy;
use shared::destination::{Destination, ExportError};
use shared::models::Batch;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a batch was dropped for a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropReason {
    /// Every allowed attempt failed.
    RetryExhausted,
    /// The drain window elapsed before the batch was sent.
    DrainTimeout,
    /// No destination serves the batch's kind.
    #[serde(rename = "destination-configuration-missing")]
    DestinationConfigMissing,
    /// The destination refused the batch permanently.
    Rejected,
}

impl DropReason {
    /// All reasons, in reporting order.
    pub const ALL: [Self; 4] = [
        Self::RetryExhausted,
        Self::DrainTimeout,
        Self::DestinationConfigMissing,
        Self::Rejected,
    ];

    /// Returns the reason as it appears in logs and stats.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RetryExhausted => "retry-exhausted",
            Self::DrainTimeout => "drain-timeout",
            Self::DestinationConfigMissing => "destination-configuration-missing",
            Self::Rejected => "rejected",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::RetryExhausted => 0,
            Self::DrainTimeout => 1,
            Self::DestinationConfigMissing => 2,
            Self::Rejected => 3,
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an export attempt currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    /// Created, nothing sent yet.
    Idle,
    /// Attempt number `attempt` is in flight.
    Attempting {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Backing off after `attempts` failed attempts.
    Waiting {
        /// Attempts made so far.
        attempts: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// The destination accepted the batch.
    Sent {
        /// Attempts it took.
        attempts: u32,
    },
    /// The batch was given up on.
    Dropped {
        /// Attempts made.
        attempts: u32,
        /// Why.
        reason: DropReason,
    },
}

impl AttemptState {
    /// Returns true for Sent and Dropped.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent { .. } | Self::Dropped { .. })
    }
}

/// Terminal result of an export attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Delivered.
    Sent {
        /// Attempts it took.
        attempts: u32,
    },
    /// Dropped.
    Dropped {
        /// Attempts made.
        attempts: u32,
        /// Why.
        reason: DropReason,
        /// The failure of the last attempt, if one was made.
        last_error: Option<ExportError>,
    },
}

impl Outcome {
    /// Returns the number of attempts made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Sent { attempts } | Self::Dropped { attempts, .. } => *attempts,
        }
    }

    /// Returns the number of retries, that is attempts after the first.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.attempts().saturating_sub(1)
    }
}

/// One batch on its way to one destination.
pub struct ExportAttempt<'a> {
    batch: &'a Batch,
    destination: &'a dyn Destination,
    policy: &'a RetryPolicy,
    state: AttemptState,
    attempts: u32,
    last_error: Option<ExportError>,
}

impl<'a> ExportAttempt<'a> {
    /// Creates an idle attempt.
    #[must_use]
    pub fn new(batch: &'a Batch, destination: &'a dyn Destination, policy: &'a RetryPolicy) -> Self {
        Self {
            batch,
            destination,
            policy,
            state: AttemptState::Idle,
            attempts: 0,
            last_error: None,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    /// Returns the error of the most recent failed attempt.
    #[must_use]
    pub fn last_error(&self) -> Option<&ExportError> {
        self.last_error.as_ref()
    }

    fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.state = AttemptState::Attempting {
            attempt: self.attempts,
        };
    }

    /// Records the result of the attempt in flight and moves to the next state.
    fn settle(&mut self, result: Result<(), ExportError>) {
        self.state = match result {
            Ok(()) => AttemptState::Sent {
                attempts: self.attempts,
            },
            Err(err) => {
                let retryable = err.is_retryable();
                self.last_error = Some(err);
                if !retryable {
                    AttemptState::Dropped {
                        attempts: self.attempts,
                        reason: DropReason::Rejected,
                    }
                } else if self.attempts >= self.policy.max_attempts {
                    AttemptState::Dropped {
                        attempts: self.attempts,
                        reason: DropReason::RetryExhausted,
                    }
                } else {
                    AttemptState::Waiting {
                        attempts: self.attempts,
                        delay: self.policy.delay_before_retry(self.attempts),
                    }
                }
            }
        };
    }

    fn cancel(&mut self) {
        self.state = AttemptState::Dropped {
            attempts: self.attempts,
            reason: DropReason::DrainTimeout,
        };
    }

    fn into_outcome(self) -> Outcome {
        match self.state {
            AttemptState::Sent { attempts } => Outcome::Sent { attempts },
            AttemptState::Dropped { attempts, reason } => Outcome::Dropped {
                attempts,
                reason,
                last_error: self.last_error,
            },
            _ => Outcome::Dropped {
                attempts: self.attempts,
                reason: DropReason::DrainTimeout,
                last_error: self.last_error,
            },
        }
    }

    /// Drives the attempt to a terminal state.
    pub async fn run(mut self, credits: &Arc<Credits>, cancel: &CancellationToken) -> Outcome {
        let kind = self.batch.kind();
        let destination = self.destination.name().to_string();

        while !self.state.is_terminal() {
            match self.state {
                AttemptState::Idle => {
                    if cancel.is_cancelled() {
                        self.cancel();
                        continue;
                    }
                    self.begin_attempt();
                }
                AttemptState::Attempting { attempt } => {
                    let timeout = self.policy.attempt_timeout();
                    let result = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        result = async {
                            let _credit = credits.acquire().await;
                            tokio::time::timeout(timeout, self.destination.export(self.batch)).await
                        } => Some(result),
                    };

                    let Some(result) = result else {
                        self.cancel();
                        continue;
                    };
                    let result = result.unwrap_or(Err(ExportError::Timeout(timeout)));
                    match &result {
                        Ok(()) => credits.on_success(),
                        Err(err) if err.is_backpressure() => credits.on_backpressure(),
                        Err(_) => {}
                    }
                    if let Err(err) = &result {
                        tracing::debug!(
                            signal = %kind,
                            destination = %destination,
                            attempt,
                            error = %err,
                            "Export attempt failed"
                        );
                    }
                    self.settle(result);
                }
                AttemptState::Waiting { attempts, delay } => {
                    tracing::warn!(
                        signal = %kind,
                        destination = %destination,
                        attempt = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        reason = %self.last_error.as_ref().map(ToString::to_string).unwrap_or_default(),
                        "Retrying batch"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => self.cancel(),
                        () = tokio::time::sleep(delay) => self.begin_attempt(),
                    }
                }
                AttemptState::Sent { .. } | AttemptState::Dropped { .. } => {}
            }
        }

        self.into_outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use shared::models::{LogRecord, Resource, Severity, SignalKind};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Plays back a fixed script of results, then succeeds.
    struct Scripted {
        script: Mutex<VecDeque<Result<(), ExportError>>>,
        hang: bool,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(script: Vec<Result<(), ExportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                hang: false,
                calls: Mutex::new(0),
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::new(Vec::new())
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Destination for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn kind(&self) -> SignalKind {
            SignalKind::Logs
        }

        async fn export(&self, _batch: &Batch) -> Result<(), ExportError> {
            *self.calls.lock().unwrap() += 1;
            if self.hang {
                std::future::pending::<()>().await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(Ok(()))
        }
    }

    fn batch() -> Batch {
        Batch::new(
            SignalKind::Logs,
            Arc::new(Resource::new().with_attribute("service.name", "svc")),
            vec![LogRecord::new(Severity::Info, "hello").into()],
            Utc::now(),
            0,
        )
        .unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            attempt_timeout_ms: 1_000,
        }
    }

    #[test]
    fn test_drop_reason_names() {
        assert_eq!(DropReason::RetryExhausted.to_string(), "retry-exhausted");
        assert_eq!(
            serde_json::to_value(DropReason::DestinationConfigMissing).unwrap(),
            "destination-configuration-missing"
        );
        for (i, reason) in DropReason::ALL.iter().enumerate() {
            assert_eq!(reason.index(), i);
        }
    }

    #[test]
    fn test_settle_transitions() {
        let batch = batch();
        let destination = Scripted::new(Vec::new());
        let policy = policy();
        let mut attempt = ExportAttempt::new(&batch, &destination, &policy);
        assert_eq!(attempt.state(), &AttemptState::Idle);

        attempt.begin_attempt();
        assert_eq!(attempt.state(), &AttemptState::Attempting { attempt: 1 });
        attempt.settle(Err(ExportError::Transient("down".into())));
        assert_eq!(
            attempt.state(),
            &AttemptState::Waiting {
                attempts: 1,
                delay: Duration::from_millis(100)
            }
        );

        attempt.begin_attempt();
        attempt.settle(Err(ExportError::Busy("slow down".into())));
        assert_eq!(
            attempt.state(),
            &AttemptState::Waiting {
                attempts: 2,
                delay: Duration::from_millis(200)
            }
        );

        attempt.begin_attempt();
        attempt.settle(Err(ExportError::Rejected("bad".into())));
        assert_eq!(
            attempt.state(),
            &AttemptState::Dropped {
                attempts: 3,
                reason: DropReason::Rejected
            }
        );
        assert!(attempt.state().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let batch = batch();
        let destination = Scripted::new(Vec::new());
        let policy = policy();
        let credits = Credits::new(2);

        let outcome = ExportAttempt::new(&batch, &destination, &policy)
            .run(&credits, &CancellationToken::new())
            .await;

        assert_eq!(outcome, Outcome::Sent { attempts: 1 });
        assert_eq!(outcome.retries(), 0);
        assert_eq!(credits.in_use(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_then_success_backs_off() {
        let batch = batch();
        let destination = Scripted::new(vec![
            Err(ExportError::Timeout(Duration::from_secs(1))),
            Err(ExportError::Timeout(Duration::from_secs(1))),
        ]);
        let policy = policy();
        let credits = Credits::new(4);

        let start = Instant::now();
        let outcome = ExportAttempt::new(&batch, &destination, &policy)
            .run(&credits, &CancellationToken::new())
            .await;

        assert_eq!(outcome, Outcome::Sent { attempts: 3 });
        assert_eq!(outcome.retries(), 2);
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(destination.calls(), 3);
        // Two halvings, then one success.
        assert_eq!(credits.limit(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let batch = batch();
        let destination = Scripted::hanging();
        let policy = RetryPolicy {
            max_attempts: 2,
            ..policy()
        };
        let credits = Credits::new(1);

        let outcome = ExportAttempt::new(&batch, &destination, &policy)
            .run(&credits, &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            Outcome::Dropped {
                attempts: 2,
                reason: DropReason::RetryExhausted,
                last_error: Some(ExportError::Timeout(Duration::from_secs(1))),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_max_attempts() {
        let batch = batch();
        let failures = (0..4)
            .map(|_| Err(ExportError::Transient("503".into())))
            .collect();
        let destination = Scripted::new(failures);
        let policy = policy();

        let outcome = ExportAttempt::new(&batch, &destination, &policy)
            .run(&Credits::new(1), &CancellationToken::new())
            .await;

        assert!(matches!(
            outcome,
            Outcome::Dropped {
                attempts: 4,
                reason: DropReason::RetryExhausted,
                ..
            }
        ));
        assert_eq!(destination.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let batch = batch();
        let destination = Scripted::new(vec![Err(ExportError::Rejected("400".into()))]);
        let policy = policy();

        let outcome = ExportAttempt::new(&batch, &destination, &policy)
            .run(&Credits::new(1), &CancellationToken::new())
            .await;

        assert!(matches!(
            outcome,
            Outcome::Dropped {
                attempts: 1,
                reason: DropReason::Rejected,
                ..
            }
        ));
        assert_eq!(destination.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_waiting() {
        let batch = batch();
        let failures = (0..10)
            .map(|_| Err(ExportError::Transient("down".into())))
            .collect();
        let destination = Scripted::new(failures);
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            attempt_timeout_ms: 1_000,
        };
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1_500)).await;
                cancel.cancel();
            })
        };

        let outcome = ExportAttempt::new(&batch, &destination, &policy)
            .run(&Credits::new(1), &cancel)
            .await;
        canceller.await.unwrap();

        assert!(matches!(
            outcome,
            Outcome::Dropped {
                reason: DropReason::DrainTimeout,
                ..
            }
        ));
        assert_eq!(destination.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_attempting() {
        let batch = batch();
        let destination = Scripted::hanging();
        let policy = RetryPolicy {
            attempt_timeout_ms: 60_000,
            ..policy()
        };
        let cancel = CancellationToken::new();
        let credits = Credits::new(1);

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            })
        };

        let outcome = ExportAttempt::new(&batch, &destination, &policy)
            .run(&credits, &cancel)
            .await;
        canceller.await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Dropped {
                attempts: 1,
                reason: DropReason::DrainTimeout,
                last_error: None,
            }
        );
        assert_eq!(credits.in_use(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_attempt() {
        let batch = batch();
        let destination = Scripted::new(Vec::new());
        let policy = policy();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = ExportAttempt::new(&batch, &destination, &policy)
            .run(&Credits::new(1), &cancel)
            .await;

        assert_eq!(outcome.attempts(), 0);
        assert_eq!(destination.calls(), 0);
    }
}
