use crate::core::error::{RatingError, ValidationError};
use crate::models::rating::{Rating, RatingStats, RatingTarget, MAX_SCORE, MIN_SCORE};
use crate::reputation::engine::ReputationEngine;
use crate::stores::content_index::ContentIndex;
use crate::stores::peer_registry::PeerRegistry;
use crate::stores::rating_store::RatingStore;
use crate::utils::time::current_timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingSubmission {
    pub rater_id: String,
    pub target_id: String,
    pub target_kind: RatingTarget,
    pub score: u8,
    #[serde(default)]
    pub comment: String,
}

/// Validates ratings and forwards their effect
///
/// Peer ratings go to the reputation engine, file ratings update the
/// file's running average in the content index.
pub struct RatingService {
    store: RatingStore,
    registry: Arc<PeerRegistry>,
    index: Arc<ContentIndex>,
    engine: Arc<ReputationEngine>,
}

impl RatingService {
    pub fn new(
        registry: Arc<PeerRegistry>,
        index: Arc<ContentIndex>,
        engine: Arc<ReputationEngine>,
    ) -> Self {
        Self {
            store: RatingStore::new(),
            registry,
            index,
            engine,
        }
    }

    pub async fn submit(&self, submission: RatingSubmission) -> Result<Rating, RatingError> {
        if !(MIN_SCORE..=MAX_SCORE).contains(&submission.score) {
            return Err(ValidationError::InvalidScore(submission.score).into());
        }

        if submission.rater_id == submission.target_id {
            return Err(ValidationError::SelfRating.into());
        }

        if !self.registry.contains(&submission.rater_id) {
            return Err(RatingError::UnknownPeer(submission.rater_id));
        }

        match submission.target_kind {
            RatingTarget::Peer if !self.registry.contains(&submission.target_id) => {
                return Err(RatingError::UnknownPeer(submission.target_id));
            }
            RatingTarget::File if !self.index.contains(&submission.target_id) => {
                return Err(RatingError::UnknownFile(submission.target_id));
            }
            _ => {}
        }

        let rating = Rating {
            id: format!("rt-{:016x}", rand::random::<u64>()),
            rater_id: submission.rater_id,
            target_id: submission.target_id,
            target_kind: submission.target_kind,
            score: submission.score,
            comment: submission.comment,
            created_at: current_timestamp(),
        };

        if !self.store.insert(rating.clone()) {
            debug!(
                rater_id = %rating.rater_id,
                target_id = %rating.target_id,
                "Duplicate rating rejected"
            );
            return Err(ValidationError::DuplicateRating.into());
        }

        if let Err(e) = self.apply(&rating).await {
            self.store.remove(&rating);
            debug!(rating_id = %rating.id, error = %e, "Rating withdrawn");
            return Err(e);
        }

        info!(
            rating_id = %rating.id,
            rater_id = %rating.rater_id,
            target_id = %rating.target_id,
            target_kind = ?rating.target_kind,
            score = rating.score,
            "Rating submitted"
        );

        Ok(rating)
    }

    async fn apply(&self, rating: &Rating) -> Result<(), RatingError> {
        match rating.target_kind {
            RatingTarget::Peer => {
                self.engine
                    .record_rating(&rating.target_id, rating.score as f64)
                    .await?;
            }
            RatingTarget::File => {
                let average = self
                    .index
                    .add_rating(&rating.target_id, rating.score as f64)
                    .map_err(|_| RatingError::UnknownFile(rating.target_id.clone()))?;
                debug!(cid = %rating.target_id, average = average, "File rating applied");
            }
        }
        Ok(())
    }

    pub fn ratings_for(&self, target_id: &str) -> Vec<Rating> {
        self.store.ratings_for(target_id)
    }

    pub fn stats_for(&self, target_id: &str) -> RatingStats {
        self.store.stats_for(target_id)
    }

    pub fn total(&self) -> usize {
        self.store.len()
    }
}
