//! Pull-mode metrics receiver.
//!
//! Each configured [`ScrapeTarget`] is polled on its own interval. The
//! Prometheus text exposition it serves is parsed into metric points under
//! the target's resource and enqueued like any pushed request. Failures are
//! logged and counted; the next tick tries again.

use crate::ingest::Ingest;
use crate::pipeline::QueueError;
use chrono::Utc;
use shared::config::ScrapeTarget;
use shared::models::{Resource, SignalKind, SignalRecord};
use shared::prometheus::{parse_exposition, to_metric_points, ExpositionError};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const ACCEPT_EXPOSITION: &str = "text/plain;version=0.0.4;q=1,*/*;q=0.1";

/// Errors from one scrape.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The request could not be sent or its body read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The target answered with a non-success status.
    #[error("target answered HTTP {0}")]
    Status(u16),

    /// The body is not a valid exposition.
    #[error(transparent)]
    Parse(#[from] ExpositionError),

    /// The metrics queue refused the points.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Polls one target and feeds the metrics queue.
pub struct Scraper {
    client: reqwest::Client,
    target: ScrapeTarget,
    resource: Arc<Resource>,
    ingest: Ingest,
}

impl Scraper {
    /// Creates a scraper for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Request`] if the HTTP client cannot be built.
    pub fn new(target: ScrapeTarget, ingest: Ingest) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .timeout(target.timeout())
            .build()?;
        Ok(Self {
            client,
            resource: Arc::new(target.resource()),
            target,
            ingest,
        })
    }

    /// Returns the target being polled.
    #[must_use]
    pub fn target(&self) -> &ScrapeTarget {
        &self.target
    }

    /// Fetches, parses and enqueues one exposition, returning the number of
    /// points enqueued.
    ///
    /// # Errors
    ///
    /// Returns a [`ScrapeError`] if any stage fails. Nothing is enqueued then.
    pub async fn scrape_once(&self) -> Result<usize, ScrapeError> {
        let response = self
            .client
            .get(&self.target.url)
            .header(reqwest::header::ACCEPT, ACCEPT_EXPOSITION)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let exposition = parse_exposition(&body)?;
        let points: Vec<SignalRecord> = to_metric_points(&exposition, Utc::now())
            .into_iter()
            .map(SignalRecord::from)
            .collect();

        let count = points.len();
        if count > 0 {
            self.ingest
                .enqueue(SignalKind::Metrics, Arc::clone(&self.resource), points)?;
        }
        Ok(count)
    }

    /// Scrapes on every interval tick until `stop` is cancelled.
    pub async fn run(self, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.target.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let counters = self.ingest.stats().scrape();

        tracing::info!(
            job = %self.target.name,
            url = %self.target.url,
            interval_ms = self.target.interval_ms,
            "Scrape target started"
        );

        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.scrape_once().await {
                Ok(points) => {
                    counters.record_success(points);
                    tracing::debug!(job = %self.target.name, points, "Scrape complete");
                }
                Err(e) => {
                    counters.record_failure();
                    tracing::warn!(job = %self.target.name, error = %e, "Scrape failed");
                }
            }
        }

        tracing::info!(job = %self.target.name, "Scrape target stopped");
    }
}

/// Starts one scraper task per target.
///
/// Targets whose client cannot be built are logged, counted and skipped.
pub fn spawn_scrapers(
    targets: &[ScrapeTarget],
    ingest: &Ingest,
    stop: &CancellationToken,
) -> JoinSet<()> {
    let mut tasks = JoinSet::new();
    for target in targets {
        match Scraper::new(target.clone(), ingest.clone()) {
            Ok(scraper) => {
                tasks.spawn(scraper.run(stop.child_token()));
            }
            Err(e) => {
                ingest.stats().scrape().record_failure();
                tracing::error!(job = %target.name, error = %e, "Scrape target disabled");
            }
        }
    }
    tasks
}
