use crate::core::error::ApiError;
use crate::core::state::AppState;
use crate::library::node::DownloadOutcome;
use crate::models::api::{DownloadQuery, FileListResponse, FileResponse, SearchQuery, UploadQuery};
use crate::models::file::AcademicFile;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{info, instrument};

pub const CHECKSUM_HEADER: &str = "x-checksum";

/// GET /api/files
pub async fn list_handler(State(state): State<Arc<AppState>>) -> Json<FileListResponse> {
    state.metrics.increment_requests();
    Json(file_list(state.node.index().all()))
}

/// Case-insensitive search over name, description and subject
///
/// GET /api/files/search?q=<text>&subject=<subject>
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchQuery>,
) -> Json<FileListResponse> {
    state.metrics.increment_requests();

    let index = state.node.index();
    let files: Vec<AcademicFile> = match params.subject.as_deref().filter(|s| !s.is_empty()) {
        Some(subject) => {
            let needle = params.q.trim().to_lowercase();
            index
                .by_subject(subject)
                .into_iter()
                .filter(|f| f.matches(&needle))
                .collect()
        }
        None => index.search(&params.q),
    };

    Json(file_list(files))
}

/// Publish a file; the request body is the raw file content
///
/// POST /api/files/upload?owner_id=<id>&file_name=<name>&description=<text>&subject=<subject>
#[instrument(skip(state, params, body), fields(owner_id = %params.owner_id, size = body.len()))]
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.metrics.increment_requests();

    let file = state
        .node
        .submit_file(
            &params.owner_id,
            &body,
            &params.file_name,
            &params.description,
            &params.subject,
        )
        .await?;

    Ok((
        StatusCode::OK,
        Json(FileResponse {
            success: true,
            file,
        }),
    )
        .into_response())
}

/// Download a file for a peer, subject to its reputation
///
/// GET /api/files/download?cid=<cid>&peer_id=<id>
///
/// Returns the raw bytes, or 403 with the reason when the peer's reputation
/// is too low.
#[instrument(skip(state, params), fields(cid = %params.cid, peer_id = %params.peer_id))]
pub async fn download_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    state.metrics.increment_requests();

    match state.node.request_download(&params.cid, &params.peer_id).await? {
        DownloadOutcome::Granted { file, bytes, .. } => {
            info!(cid = %file.cid, bytes = bytes.len(), "Serving download");
            Ok(file_response(&file, bytes))
        }
        DownloadOutcome::Denied { reason } => Err(ApiError::Forbidden(reason)),
        DownloadOutcome::NotFound => {
            Err(ApiError::NotFound(format!("File not found: {}", params.cid)))
        }
    }
}

fn file_response(file: &AcademicFile, bytes: Vec<u8>) -> Response {
    let mut response = (StatusCode::OK, bytes).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );

    // Names that cannot form a header value are left out
    let disposition = format!("attachment; filename=\"{}\"", file.file_name.replace('"', ""));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&file.checksum) {
        headers.insert(CHECKSUM_HEADER, value);
    }

    response
}

fn file_list(mut files: Vec<AcademicFile>) -> FileListResponse {
    files.sort_by(|a, b| {
        b.upload_time
            .cmp(&a.upload_time)
            .then_with(|| a.file_name.cmp(&b.file_name))
    });

    FileListResponse {
        success: true,
        count: files.len(),
        files,
    }
}
