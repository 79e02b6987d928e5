// HTTP routes configuration

use crate::core::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub fn build_router(state: Arc<AppState>) -> Router {
    // Uploads arrive as the raw request body
    let body_limit = usize::try_from(state.config.library.max_file_size).unwrap_or(usize::MAX);

    Router::new()
        // Node
        .route("/api/health", get(crate::handlers::health::health_handler))
        .route("/api/status", get(crate::handlers::health::status_handler))
        .route("/api/stats", get(crate::handlers::stats::stats_handler))

        // Peers
        .route("/api/peers/register", post(crate::handlers::peers::register_handler))
        .route("/api/peers", get(crate::handlers::peers::list_handler))
        .route("/api/peers/online", get(crate::handlers::peers::online_handler))

        // Files
        .route("/api/files", get(crate::handlers::files::list_handler))
        .route("/api/files/search", get(crate::handlers::files::search_handler))
        .route(
            "/api/files/upload",
            post(crate::handlers::files::upload_handler).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/files/download", get(crate::handlers::files::download_handler))

        // Reputation and ratings
        .route("/api/reputation", get(crate::handlers::reputation::reputation_handler))
        .route("/api/reputation/history", get(crate::handlers::reputation::history_handler))
        .route("/api/reputation/top", get(crate::handlers::reputation::top_handler))
        .route(
            "/api/ratings",
            post(crate::handlers::ratings::submit_handler)
                .get(crate::handlers::ratings::list_handler),
        )

        // Admin endpoint (requires API key)
        .route("/metrics", get(crate::handlers::metrics::metrics_handler))

        // 404 fallback for all unmatched routes
        .fallback(crate::handlers::fallback::fallback_handler)

        .with_state(state)
}
