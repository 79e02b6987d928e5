use crate::core::error::ApiError;
use crate::core::state::AppState;
use crate::models::api::{RatingListResponse, RatingResponse, TargetQuery};
use crate::reputation::ratings::RatingSubmission;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

/// Rate a peer or a file, 1 to 5
///
/// POST /api/ratings
pub async fn submit_handler(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<RatingSubmission>,
) -> Result<Response, ApiError> {
    state.metrics.increment_requests();

    let rating = state.node.submit_rating(submission).await?;

    Ok((
        StatusCode::OK,
        Json(RatingResponse {
            success: true,
            rating,
        }),
    )
        .into_response())
}

/// GET /api/ratings?target_id=<peer or cid>
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TargetQuery>,
) -> Json<RatingListResponse> {
    state.metrics.increment_requests();

    let ratings = state.node.ratings();

    Json(RatingListResponse {
        success: true,
        stats: ratings.stats_for(&params.target_id),
        ratings: ratings.ratings_for(&params.target_id),
        target_id: params.target_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{create_test_state, read_json};
    use crate::models::api::ErrorResponse;
    use crate::models::rating::RatingTarget;

    fn submission(rater: &str, target: &str, score: u8) -> RatingSubmission {
        RatingSubmission {
            rater_id: rater.to_string(),
            target_id: target.to_string(),
            target_kind: RatingTarget::Peer,
            score,
            comment: "clear explanations".to_string(),
        }
    }

    #[tokio::test]
    async fn test_submit_and_list() {
        let app = create_test_state();
        let a = app.state.node.register_peer("a", "10.0.0.1", 9000).unwrap();
        let b = app.state.node.register_peer("b", "10.0.0.2", 9000).unwrap();

        let response =
            submit_handler(State(Arc::clone(&app.state)), Json(submission(&a.id, &b.id, 4)))
                .await
                .unwrap();
        let created: RatingResponse = read_json(response).await;
        assert_eq!(created.rating.score, 4);
        assert!(created.rating.id.starts_with("rt-"));

        let Json(listed) = list_handler(
            State(Arc::clone(&app.state)),
            Query(TargetQuery { target_id: b.id.clone() }),
        )
        .await;
        assert_eq!(listed.ratings.len(), 1);
        assert_eq!(listed.stats.count, 1);
        assert_eq!(listed.stats.average, 4.0);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid() {
        let app = create_test_state();
        let a = app.state.node.register_peer("a", "10.0.0.1", 9000).unwrap();
        let b = app.state.node.register_peer("b", "10.0.0.2", 9000).unwrap();

        let response =
            submit_handler(State(Arc::clone(&app.state)), Json(submission(&a.id, &b.id, 9)))
                .await
                .unwrap_err()
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        submit_handler(State(Arc::clone(&app.state)), Json(submission(&a.id, &b.id, 3)))
            .await
            .unwrap();
        let response =
            submit_handler(State(Arc::clone(&app.state)), Json(submission(&a.id, &b.id, 3)))
                .await
                .unwrap_err()
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = read_json(response).await;
        assert!(!error.success);
    }
}
