// Metrics endpoint

use crate::core::error::ApiError;
use crate::core::state::AppState;
use crate::models::api::ApiKeyQuery;
use crate::utils::auth::verify_api_key;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::warn;

/// Returns JSON with the node's counters and component statistics:
/// - Requests, uploads, granted and denied downloads, denial rate
/// - Ratings submitted
/// - Peers, files, reputation, throttling and transfer stats
/// - Uptime and requests per second
///
/// Requires valid API key for authentication.
pub async fn metrics_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ApiKeyQuery>,
) -> Result<Response, ApiError> {
    if !verify_api_key(&params.api_key, state.config.server.api_key.as_deref()) {
        warn!("Unauthorized metrics access attempt");
        return Err(ApiError::InvalidApiKey);
    }

    let snapshot = state.metrics.get_snapshot(state.node.stats());

    Ok((StatusCode::OK, Json(snapshot)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{create_test_state, read_json};
    use crate::metrics::collector::MetricsSnapshot;

    #[tokio::test]
    async fn test_metrics_handler_success() {
        let app = create_test_state();

        let params = ApiKeyQuery {
            api_key: "test-api-key".to_string(),
        };

        let response = metrics_handler(State(Arc::clone(&app.state)), Query(params)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let snapshot: MetricsSnapshot = read_json(response).await;

        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.network.peers.known_peers, 1);
        assert!(snapshot.uptime_seconds >= 0);
    }

    #[tokio::test]
    async fn test_metrics_handler_invalid_api_key() {
        let app = create_test_state();

        let params = ApiKeyQuery {
            api_key: "wrong-key".to_string(),
        };

        let result = metrics_handler(State(Arc::clone(&app.state)), Query(params)).await;
        assert!(result.is_err());
        let response = result.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_metrics_handler_with_data() {
        let app = create_test_state();

        // Add some metrics
        app.state.metrics.increment_requests();
        app.state.metrics.increment_denied();

        let params = ApiKeyQuery {
            api_key: "test-api-key".to_string(),
        };

        let response = metrics_handler(State(Arc::clone(&app.state)), Query(params)).await.unwrap();
        let snapshot: MetricsSnapshot = read_json(response).await;

        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.downloads_denied, 1);
        assert_eq!(snapshot.denial_rate, 100.0);
    }
}
