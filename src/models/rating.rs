use serde::{Deserialize, Serialize};

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RatingTarget {
    Peer,
    File,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    pub id: String,
    pub rater_id: String,
    pub target_id: String,
    pub target_kind: RatingTarget,
    pub score: u8,
    pub comment: String,
    pub created_at: i64,
}

/// Aggregate over every rating a target received
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RatingStats {
    pub count: u64,
    pub average: f64,
    /// Number of ratings per score, index 0 holds score 1
    pub distribution: [u64; 5],
    pub last_rated_at: Option<i64>,
}

impl RatingStats {
    pub fn from_ratings<'a>(ratings: impl IntoIterator<Item = &'a Rating>) -> Self {
        let mut stats = RatingStats::default();
        let mut sum = 0u64;

        for rating in ratings {
            stats.count += 1;
            sum += rating.score as u64;
            if (MIN_SCORE..=MAX_SCORE).contains(&rating.score) {
                stats.distribution[(rating.score - 1) as usize] += 1;
            }
            stats.last_rated_at = Some(
                stats
                    .last_rated_at
                    .map_or(rating.created_at, |t| t.max(rating.created_at)),
            );
        }

        if stats.count > 0 {
            stats.average = sum as f64 / stats.count as f64;
        }

        stats
    }
}
