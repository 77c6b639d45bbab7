//! Pipeline wiring and lifecycle.
//!
//! [`PipelineBuilder::start`] builds the destinations of every signal kind,
//! starts their exporters and routers, then opens the queues. Receivers are
//! attached afterwards through [`Supervisor::ingest`].
//!
//! [`Supervisor::drain`] closes the queues (flushing every open batch) and
//! waits up to the drain timeout for in-flight work to finish. Whatever is
//! still pending when the window closes is cancelled and dropped with reason
//! `drain-timeout`.

use super::exporter::DestinationWorker;
use super::health::{ComponentStatus, HealthHandle, HealthRegistry};
use super::queue::BatchQueue;
use super::retry::DropReason;
use super::router::SignalRouter;
use super::stats::PipelineStats;
use crate::ingest::Ingest;
use shared::config::{ConfigError, TributaryConfig};
use shared::destination::{build_destination, BuildError, Destination};
use shared::models::SignalKind;
use shared::validator::Validate;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Errors that prevent the pipeline from starting.
#[derive(Debug, Error)]
pub enum StartError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A destination could not be built.
    #[error(transparent)]
    Destination(#[from] BuildError),
}

/// A destination together with its concurrency bound.
struct Registered {
    kind: SignalKind,
    destination: Arc<dyn Destination>,
    max_in_flight: usize,
}

/// Collects configuration and extra destinations, then starts the pipeline.
pub struct PipelineBuilder {
    config: TributaryConfig,
    extra: Vec<Registered>,
}

impl PipelineBuilder {
    /// Starts from a configuration.
    #[must_use]
    pub fn new(config: TributaryConfig) -> Self {
        Self {
            config,
            extra: Vec::new(),
        }
    }

    /// Adds an already-built destination for the kind it reports.
    #[must_use]
    pub fn with_destination(mut self, destination: Arc<dyn Destination>, max_in_flight: usize) -> Self {
        self.extra.push(Registered {
            kind: destination.kind(),
            destination,
            max_in_flight,
        });
        self
    }

    fn destinations(&self) -> Result<Vec<Registered>, StartError> {
        let mut registered = Vec::new();
        for kind in SignalKind::ALL {
            for config in &self.config.pipelines.get(kind).destinations {
                registered.push(Registered {
                    kind,
                    destination: build_destination(config, kind)?,
                    max_in_flight: config.max_in_flight,
                });
            }
        }
        registered.extend(self.extra.iter().map(|r| Registered {
            kind: r.kind,
            destination: Arc::clone(&r.destination),
            max_in_flight: r.max_in_flight,
        }));

        let mut names = HashSet::new();
        for r in &registered {
            if !names.insert(r.destination.name().to_string()) {
                return Err(ConfigError::DuplicateDestination(r.destination.name().to_string()).into());
            }
        }
        for kind in SignalKind::ALL {
            if !registered.iter().any(|r| r.kind == kind) {
                return Err(ConfigError::MissingDestination(kind).into());
            }
        }
        Ok(registered)
    }

    /// Builds and starts every pipeline.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`StartError`] if a field is out of range, a signal kind has
    /// no destination, a destination name repeats, or a destination cannot
    /// be built for its kind.
    pub fn start(self) -> Result<Supervisor, StartError> {
        self.config.validate().map_err(ConfigError::from)?;
        let registered = self.destinations()?;

        let stats = Arc::new(PipelineStats::new());
        let health = Arc::new(HealthRegistry::new());
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let mut queue_health = Vec::with_capacity(3);
        let queues = SignalKind::ALL.map(|kind| {
            let pipeline = self.config.pipelines.get(kind);
            let policy = Arc::new(pipeline.retry.clone());

            let workers = registered
                .iter()
                .filter(|r| r.kind == kind)
                .map(|r| {
                    let name = r.destination.name();
                    DestinationWorker::spawn(
                        Arc::clone(&r.destination),
                        r.max_in_flight,
                        Arc::clone(&policy),
                        &cancel,
                        stats.register_destination(name, kind),
                        health.register(format!("destination:{name}")),
                        &mut tasks,
                    )
                })
                .collect();

            let counters = Arc::clone(stats.signal(kind));
            let (queue, batches) = BatchQueue::new(kind, &pipeline.batch, Arc::clone(&counters));
            let router = SignalRouter::new(kind, workers, counters, health.register(format!("router:{kind}")));
            tasks.spawn(router.run(batches));
            tasks.spawn(Arc::clone(&queue).run_flush_loop());
            queue_health.push(health.register(format!("queue:{kind}")));

            tracing::info!(
                signal = %kind,
                max_batch_size = pipeline.batch.max_batch_size,
                max_batch_age_ms = pipeline.batch.max_batch_age_ms,
                capacity = pipeline.batch.max_buffered_records,
                "Pipeline started"
            );
            queue
        });

        let destinations = registered.into_iter().map(|r| r.destination).collect();
        Ok(Supervisor {
            ingest: Ingest::new(queues, Arc::clone(&stats)),
            destinations,
            stats,
            health,
            queue_health,
            cancel,
            tasks,
            drain_timeout: self.config.drain_timeout(),
        })
    }
}

/// Summary of a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// True if the drain window elapsed and remaining work was cancelled.
    pub timed_out: bool,
    /// Batches dropped with reason `drain-timeout`, over all destinations.
    pub dropped_batches: u64,
}

/// Owns the running pipelines.
pub struct Supervisor {
    ingest: Ingest,
    destinations: Vec<Arc<dyn Destination>>,
    stats: Arc<PipelineStats>,
    health: Arc<HealthRegistry>,
    queue_health: Vec<HealthHandle>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    drain_timeout: Duration,
}

impl Supervisor {
    /// Returns a builder for `config`.
    #[must_use]
    pub fn builder(config: TributaryConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Returns the receiver entry point.
    #[must_use]
    pub fn ingest(&self) -> Ingest {
        self.ingest.clone()
    }

    /// Returns every destination, in pipeline order.
    #[must_use]
    pub fn destinations(&self) -> &[Arc<dyn Destination>] {
        &self.destinations
    }

    /// Returns the pipeline counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Returns the component health registry.
    #[must_use]
    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    /// Returns the drain window.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Flushes everything buffered and waits for in-flight work, cancelling
    /// it once the drain window elapses.
    ///
    /// Receivers must be stopped before calling this.
    pub async fn drain(mut self) -> DrainReport {
        self.health.set_draining();
        for kind in SignalKind::ALL {
            self.ingest.queue(kind).close();
        }
        for handle in &self.queue_health {
            handle.set(ComponentStatus::Down);
        }
        tracing::info!(
            timeout_ms = u64::try_from(self.drain_timeout.as_millis()).unwrap_or(u64::MAX),
            "Draining pipelines"
        );

        let timed_out = tokio::time::timeout(self.drain_timeout, join_all(&mut self.tasks))
            .await
            .is_err();
        if timed_out {
            tracing::warn!("Drain timeout elapsed, cancelling in-flight exports");
            self.cancel.cancel();
            join_all(&mut self.tasks).await;
        }

        let dropped_batches = self
            .stats
            .snapshot()
            .destinations
            .values()
            .map(|d| d.dropped_batches.get(&DropReason::DrainTimeout).copied().unwrap_or(0))
            .sum();
        tracing::info!(timed_out, dropped_batches, "Drain complete");

        DrainReport {
            timed_out,
            dropped_batches,
        }
    }
}

async fn join_all(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Pipeline task failed");
        }
    }
}
