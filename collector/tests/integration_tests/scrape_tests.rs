//! Integration tests for the scrape receiver and the scrape endpoint.
//!
//! A local exporter serves Prometheus text; scraped points flow through the
//! metrics pipeline into a `prometheus` destination, which renders them on
//! `/metrics/scrape`.

use super::common::get_raw;
use axum::http::StatusCode;
use axum::{routing::get, Router};
use collector::pipeline::Supervisor;
use collector::scrape::{spawn_scrapers, Scraper};
use collector::{create_router, AppState};
use shared::config::{ScrapeTarget, TributaryConfig};
use shared::destination::{MemoryDestination, PrometheusDestination};
use shared::models::SignalKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const EXPOSITION: &str = "\
# HELP http_request_duration_seconds Request latency.
# TYPE http_request_duration_seconds histogram
http_request_duration_seconds_bucket{le=\"0.1\"} 3
http_request_duration_seconds_bucket{le=\"0.5\"} 5
http_request_duration_seconds_bucket{le=\"+Inf\"} 6
http_request_duration_seconds_sum 1.7
http_request_duration_seconds_count 6
# TYPE process_open_fds gauge
process_open_fds 42
";

async fn serve_exporter() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/metrics", get(|| async { EXPOSITION }));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn start_collector(prometheus: &Arc<PrometheusDestination>) -> Supervisor {
    let mut config = TributaryConfig::default();
    config.pipelines.metrics.batch.max_batch_age_ms = 20;
    Supervisor::builder(config)
        .with_destination(Arc::new(MemoryDestination::new("traces-memory", SignalKind::Traces)), 1)
        .with_destination(Arc::new(MemoryDestination::new("logs-memory", SignalKind::Logs)), 1)
        .with_destination(prometheus.clone(), 1)
        .start()
        .unwrap()
}

#[tokio::test]
async fn test_scraped_points_render_on_scrape_endpoint() {
    let addr = serve_exporter().await;
    let prometheus = Arc::new(PrometheusDestination::new("prometheus"));
    let supervisor = start_collector(&prometheus);
    let app = create_router(AppState::from_supervisor(&supervisor, 1024 * 1024));

    let scraper = Scraper::new(
        ScrapeTarget::new("api", format!("http://{addr}/metrics")),
        supervisor.ingest(),
    )
    .unwrap();
    assert_eq!(scraper.scrape_once().await.unwrap(), 2);

    supervisor.drain().await;
    assert_eq!(prometheus.series_count(), 2);

    let (status, body) = get_raw(app, "/metrics/scrape").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("process_open_fds"));
    assert!(text.contains("http_request_duration_seconds_bucket"));
    assert!(text.contains("service_name=\"api\""));
}

#[tokio::test]
async fn test_scrape_loop_feeds_pipeline_and_counts() {
    let addr = serve_exporter().await;
    let prometheus = Arc::new(PrometheusDestination::new("prometheus"));
    let supervisor = start_collector(&prometheus);
    let stop = CancellationToken::new();

    let mut good = ScrapeTarget::new("api", format!("http://{addr}/metrics"));
    good.interval_ms = 100;
    let mut bad = ScrapeTarget::new("missing", format!("http://{addr}/nothing-here"));
    bad.interval_ms = 100;
    let mut tasks = spawn_scrapers(&[good, bad], &supervisor.ingest(), &stop);

    tokio::time::sleep(Duration::from_millis(350)).await;
    stop.cancel();
    while tasks.join_next().await.is_some() {}

    let scrape = supervisor.stats().snapshot().scrape;
    assert!(scrape.successes >= 2);
    assert!(scrape.failures >= 2);

    supervisor.drain().await;
    assert_eq!(prometheus.series_count(), 2);
}
