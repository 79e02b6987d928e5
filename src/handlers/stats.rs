use crate::core::state::AppState;
use crate::library::node::NetworkStats;
use axum::{extract::State, response::Json};
use std::sync::Arc;

/// Component statistics for the whole node
///
/// GET /api/stats
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<NetworkStats> {
    state.metrics.increment_requests();
    Json(state.node.stats())
}
