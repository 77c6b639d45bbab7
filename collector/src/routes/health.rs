//! Health check endpoint.
//!
//! Reports per-component liveness for load balancers and monitoring systems.
//! Answers 503 once the collector is unhealthy or draining, so traffic moves
//! elsewhere; a failing destination only degrades the status.

use crate::pipeline::HealthReport;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};

/// Creates the health check routes.
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health().report();
    let status = if report.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
