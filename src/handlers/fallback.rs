use crate::core::error::ApiError;
use axum::{
    http::{HeaderMap, Uri},
    response::{Html, IntoResponse, Response},
};

pub async fn fallback_handler(uri: Uri, headers: HeaderMap) -> Response {
    // Check if this is a browser request
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let is_browser = ["Mozilla", "Chrome", "Safari", "Firefox", "Edge"]
        .iter()
        .any(|agent| user_agent.contains(agent));

    if is_browser {
        return Html("Nothing shared at this address.").into_response();
    }

    ApiError::NotFound(format!(
        "No route for {}. The API lives under /api",
        uri.path()
    ))
    .into_response()
}
