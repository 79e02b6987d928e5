use crate::core::error::ApiError;
use crate::core::state::AppState;
use crate::models::api::{
    HistoryResponse, PeerQuery, ReputationResponse, TopContributorsResponse, TopQuery,
};
use axum::{
    extract::{Query, State},
    response::Json,
};
use std::sync::Arc;

const DEFAULT_TOP_LIMIT: usize = 10;
const MAX_TOP_LIMIT: usize = 100;

/// Current standing of a peer and whether it may download
///
/// GET /api/reputation?peer_id=<id>
pub async fn reputation_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PeerQuery>,
) -> Result<Json<ReputationResponse>, ApiError> {
    state.metrics.increment_requests();

    let engine = state.node.reputation();
    let standing = engine
        .standing(&params.peer_id)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown peer: {}", params.peer_id)))?;
    let decision = engine.can_download(&params.peer_id);

    Ok(Json(ReputationResponse {
        success: true,
        peer_id: standing.peer_id,
        reputation: standing.reputation,
        effective_reputation: standing.effective_reputation,
        can_download: decision.is_allowed(),
        reason: decision.reason().map(str::to_string),
        uploads: standing.uploads,
        downloads: standing.downloads,
        is_leecher: standing.is_leecher,
    }))
}

/// GET /api/reputation/history?peer_id=<id>
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PeerQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    state.metrics.increment_requests();

    if !state.node.registry().contains(&params.peer_id) {
        return Err(ApiError::NotFound(format!("Unknown peer: {}", params.peer_id)));
    }

    let events = state.node.reputation().history(&params.peer_id);

    Ok(Json(HistoryResponse {
        success: true,
        peer_id: params.peer_id,
        events,
    }))
}

/// GET /api/reputation/top?limit=<n>
pub async fn top_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TopQuery>,
) -> Json<TopContributorsResponse> {
    state.metrics.increment_requests();

    let limit = params.limit.unwrap_or(DEFAULT_TOP_LIMIT).min(MAX_TOP_LIMIT);

    Json(TopContributorsResponse {
        success: true,
        peers: state.node.reputation().top_contributors(limit),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::create_test_state;
    use crate::models::reputation::ReputationEventKind;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn test_reputation_reports_denial_reason() {
        let app = create_test_state();
        let peer = app.state.node.register_peer("p", "10.0.0.1", 9000).unwrap();

        let Json(fresh) = reputation_handler(
            State(Arc::clone(&app.state)),
            Query(PeerQuery { peer_id: peer.id.clone() }),
        )
        .await
        .unwrap();
        assert!(fresh.can_download);
        assert!(fresh.reason.is_none());

        let engine = app.state.node.reputation();
        engine.record_contribution(&peer.id, -3.0, "test setup").await.unwrap();
        engine.flush().await.unwrap();

        let Json(low) = reputation_handler(
            State(Arc::clone(&app.state)),
            Query(PeerQuery { peer_id: peer.id.clone() }),
        )
        .await
        .unwrap();
        assert!(!low.can_download);
        assert_eq!(low.reputation, 2.0);
        assert!(low.reason.unwrap().contains("3.0"));
    }

    #[tokio::test]
    async fn test_unknown_peer_is_not_found() {
        let app = create_test_state();

        let err = reputation_handler(
            State(Arc::clone(&app.state)),
            Query(PeerQuery { peer_id: "peer-ghost".to_string() }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err = history_handler(
            State(Arc::clone(&app.state)),
            Query(PeerQuery { peer_id: "peer-ghost".to_string() }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_and_top() {
        let app = create_test_state();
        let a = app.state.node.register_peer("a", "10.0.0.1", 9000).unwrap();
        let b = app.state.node.register_peer("b", "10.0.0.2", 9000).unwrap();

        let engine = app.state.node.reputation();
        engine.record_upload(&a.id).await.unwrap();
        engine.record_upload(&a.id).await.unwrap();
        engine.record_upload(&b.id).await.unwrap();
        engine.flush().await.unwrap();

        let Json(history) = history_handler(
            State(Arc::clone(&app.state)),
            Query(PeerQuery { peer_id: a.id.clone() }),
        )
        .await
        .unwrap();
        assert_eq!(history.events.len(), 2);
        assert!(history.events.iter().all(|e| e.kind == ReputationEventKind::Upload));

        let Json(top) =
            top_handler(State(Arc::clone(&app.state)), Query(TopQuery { limit: Some(1) })).await;
        assert_eq!(top.peers.len(), 1);
        assert_eq!(top.peers[0].peer_id, a.id);
    }
}
