use crate::core::error::ApiError;
use crate::core::state::AppState;
use crate::models::api::{PeerListResponse, PeerResponse, RegisterPeerRequest};
use crate::models::peer::Peer;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::info;

/// Register a peer by name and endpoint
///
/// POST /api/peers/register
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterPeerRequest>,
) -> Result<Response, ApiError> {
    state.metrics.increment_requests();

    let peer = state
        .node
        .register_peer(&request.name, &request.address, request.port)?;

    info!(peer_id = %peer.id, name = %peer.name, "Peer registered via API");

    Ok((
        StatusCode::OK,
        Json(PeerResponse {
            success: true,
            peer,
        }),
    )
        .into_response())
}

/// GET /api/peers
pub async fn list_handler(State(state): State<Arc<AppState>>) -> Json<PeerListResponse> {
    state.metrics.increment_requests();
    Json(peer_list(state.node.registry().all_peers()))
}

/// GET /api/peers/online
pub async fn online_handler(State(state): State<Arc<AppState>>) -> Json<PeerListResponse> {
    state.metrics.increment_requests();
    Json(peer_list(state.node.registry().online_peers()))
}

fn peer_list(mut peers: Vec<Peer>) -> PeerListResponse {
    peers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

    PeerListResponse {
        success: true,
        count: peers.len(),
        peers,
    }
}
