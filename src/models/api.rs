use crate::models::file::AcademicFile;
use crate::models::peer::Peer;
use crate::models::rating::{Rating, RatingStats};
use crate::models::reputation::ReputationEvent;
use crate::reputation::engine::PeerStanding;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct ApiKeyQuery {
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPeerRequest {
    pub name: String,
    pub address: String,
    pub port: u16,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub subject: Option<String>,
}

#[derive(Deserialize)]
pub struct UploadQuery {
    pub owner_id: String,
    pub file_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub subject: String,
}

#[derive(Deserialize)]
pub struct DownloadQuery {
    pub cid: String,
    pub peer_id: String,
}

#[derive(Deserialize)]
pub struct PeerQuery {
    pub peer_id: String,
}

#[derive(Deserialize)]
pub struct TopQuery {
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct TargetQuery {
    pub target_id: String,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    pub node_id: String,
    pub node_name: String,
    pub address: String,
    pub peer_port: u16,
    pub online_peers: usize,
    pub files: usize,
    pub active_transfers: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PeerResponse {
    pub success: bool,
    pub peer: Peer,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PeerListResponse {
    pub success: bool,
    pub count: usize,
    pub peers: Vec<Peer>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileResponse {
    pub success: bool,
    pub file: AcademicFile,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileListResponse {
    pub success: bool,
    pub count: usize,
    pub files: Vec<AcademicFile>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReputationResponse {
    pub success: bool,
    pub peer_id: String,
    pub reputation: f64,
    pub effective_reputation: f64,
    pub can_download: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub uploads: u64,
    pub downloads: u64,
    pub is_leecher: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub peer_id: String,
    pub events: Vec<ReputationEvent>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TopContributorsResponse {
    pub success: bool,
    pub peers: Vec<PeerStanding>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RatingResponse {
    pub success: bool,
    pub rating: Rating,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RatingListResponse {
    pub success: bool,
    pub target_id: String,
    pub stats: RatingStats,
    pub ratings: Vec<Rating>,
}
