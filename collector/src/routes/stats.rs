//! Pipeline counters endpoint.

use crate::pipeline::StatsSnapshot;
use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};

/// Creates the stats routes.
pub fn stats_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/stats", get(get_stats))
        .with_state(state)
}

/// Returns every counter, plus the records each queue currently holds.
async fn get_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.ingest().stats_snapshot())
}
