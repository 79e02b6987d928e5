use crate::core::state::AppState;
use crate::models::api::StatusResponse;
use crate::utils::time::current_timestamp;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize, serde::Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
}

/// Health check handler
///
/// GET /api/health
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            timestamp: current_timestamp(),
        }),
    )
}

/// Identity of this node and a few headline numbers
///
/// GET /api/status
pub async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.increment_requests();

    let node = &state.node;
    let local = node.local_peer();

    Json(StatusResponse {
        success: true,
        node_id: local.id.clone(),
        node_name: local.name.clone(),
        address: local.address.clone(),
        peer_port: local.port,
        online_peers: node.registry().online_count(),
        files: node.index().len(),
        active_transfers: node.transfers().active_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{create_test_state, read_json};

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_response_has_timestamp() {
        let response = health_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let health: HealthResponse = read_json(response).await;

        assert_eq!(health.status, "ok");
        assert!(health.timestamp > 0);
    }

    #[tokio::test]
    async fn test_status_reports_local_node() {
        let app = create_test_state();

        let response = status_handler(State(Arc::clone(&app.state))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let status: StatusResponse = read_json(response).await;
        assert_eq!(status.node_name, "test-node");
        assert_eq!(status.node_id, app.state.node.local_peer().id);
        assert_eq!(status.peer_port, 9000);
        assert_eq!(status.online_peers, 1);
        assert_eq!(status.files, 0);
    }
}
