//! Prometheus scrape endpoint for pull-based metrics destinations.
//!
//! Every destination that holds scrape state (the `prometheus` type)
//! contributes its exposition to `GET /metrics/scrape`.

use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

/// Content type of the Prometheus text format.
const CONTENT_TYPE_EXPOSITION: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Creates the scrape routes.
pub fn scrape_routes(state: AppState) -> Router {
    Router::new()
        .route("/metrics/scrape", get(scrape))
        .with_state(state)
}

async fn scrape(State(state): State<AppState>) -> Response {
    let expositions: Vec<String> = state
        .destinations()
        .iter()
        .filter_map(|d| d.exposition())
        .collect();

    if expositions.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            "no prometheus destination is configured\n",
        )
            .into_response();
    }
    (
        [(header::CONTENT_TYPE, CONTENT_TYPE_EXPOSITION)],
        expositions.concat(),
    )
        .into_response()
}
