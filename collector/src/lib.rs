//! Tributary Collector
//!
//! This crate provides the telemetry ingestion and routing server. It accepts
//! traces, logs and metrics over OTLP, batches them per signal kind and
//! resource, and fans every batch out to the destinations configured for its
//! kind, retrying transient failures and dropping (and counting) what cannot
//! be delivered.
//!
//! # Architecture
//!
//! The collector is built on Tokio, Axum and Tonic, providing:
//! - OTLP gRPC receivers (`TraceService`, `LogsService`, `MetricsService`)
//! - OTLP HTTP receivers (`/v1/traces`, `/v1/logs`, `/v1/metrics`)
//! - A Prometheus scrape receiver for pull-mode metrics sources
//! - The routing core in [`pipeline`]: queues, routers and exporters
//! - `/health`, `/api/v1/stats` and `/metrics/scrape` on the HTTP port
//!
//! # Example
//!
//! ```no_run
//! use collector::run_server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_server().await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod config;
pub mod grpc;
pub mod ingest;
pub mod pipeline;
mod routes;
pub mod scrape;
mod state;

pub use config::{Config, DEFAULT_CONFIG_PATH};
pub use ingest::{Ingest, IngestError, IngestOutcome};
pub use routes::OtlpError;
pub use state::AppState;

use anyhow::{Context, Result};
use axum::Router;
use pipeline::Supervisor;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Runs the Tributary collector.
///
/// This function loads configuration from the file named by the environment
/// and serves until SIGTERM/SIGINT, then drains the pipelines.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration cannot be loaded or is invalid
/// - A listener fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server() -> Result<()> {
    let config = Config::from_env()?;
    run_server_with_config(config).await
}

/// Runs the Tributary collector with the provided configuration.
///
/// Pipelines start first, then the scrape receiver and both OTLP listeners.
/// On shutdown the listeners and scrapers stop before the pipelines drain.
///
/// # Errors
///
/// Returns an error if:
/// - The pipelines cannot be built from the configuration
/// - A listener fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server_with_config(config: Config) -> Result<()> {
    let grpc_addr = config.grpc_addr()?;
    let http_addr = config.http_addr()?;
    let server = config.tributary.server.clone();

    tracing::info!(
        config = %config.path.display(),
        %grpc_addr,
        %http_addr,
        "Tributary collector starting"
    );

    let supervisor = Supervisor::builder(config.tributary.clone())
        .start()
        .context("starting pipelines")?;
    let ingest = supervisor.ingest();

    let shutdown = CancellationToken::new();
    let mut scrapers = scrape::spawn_scrapers(&config.tributary.scrape, &ingest, &shutdown);

    let app = create_router(AppState::from_supervisor(&supervisor, server.max_body_bytes));
    let listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("binding OTLP HTTP listener on {http_addr}"))?;
    tracing::info!(%http_addr, "Listening for OTLP HTTP");

    let http = {
        let shutdown = shutdown.clone();
        async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown({
                    let shutdown = shutdown.clone();
                    async move { shutdown.cancelled().await }
                })
                .await;
            shutdown.cancel();
            result
        }
    };

    let grpc = {
        let shutdown = shutdown.clone();
        let routes = grpc::grpc_routes(&ingest, server.max_body_bytes);
        tracing::info!(%grpc_addr, "Listening for OTLP gRPC");
        async move {
            let result = tonic::transport::Server::builder()
                .add_routes(routes)
                .serve_with_shutdown(grpc_addr, {
                    let shutdown = shutdown.clone();
                    async move { shutdown.cancelled().await }
                })
                .await;
            shutdown.cancel();
            result
        }
    };

    let signal = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                () = shutdown_signal() => shutdown.cancel(),
                () = shutdown.cancelled() => {}
            }
        }
    });

    let (http_result, grpc_result) = tokio::join!(http, grpc);
    signal.abort();
    tracing::info!("Receivers stopped");

    while let Some(result) = scrapers.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Scrape task failed");
        }
    }

    let report = supervisor.drain().await;
    if report.timed_out {
        tracing::warn!(
            dropped_batches = report.dropped_batches,
            "Shutdown dropped in-flight batches"
        );
    }

    http_result.context("OTLP HTTP server failed")?;
    grpc_result.context("OTLP gRPC server failed")?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Creates the HTTP application router with all routes and middleware.
///
/// This function is public to allow testing the router without starting a full server.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::otlp_routes(state.clone()))
        .merge(routes::health_routes(state.clone()))
        .merge(routes::stats_routes(state.clone()))
        .merge(routes::scrape_routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
