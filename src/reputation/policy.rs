use crate::models::peer::{clamp_reputation, Peer};
use serde::{Deserialize, Serialize};

/// Minimum effective score required to download
pub const DOWNLOAD_THRESHOLD: f64 = 3.0;

pub const UPLOAD_BONUS: f64 = 0.5;
pub const DOWNLOAD_PENALTY: f64 = 0.1;
pub const GOOD_RATING_THRESHOLD: f64 = 4.0;
pub const BAD_RATING_THRESHOLD: f64 = 2.0;
pub const GOOD_RATING_BONUS: f64 = 0.3;
pub const BAD_RATING_PENALTY: f64 = 0.2;
pub const LEECHING_PENALTY: f64 = 0.5;
pub const INACTIVITY_DECAY: f64 = 0.1;

const LOW_RATIO: f64 = 0.5;
const LOW_RATIO_ADJUSTMENT: f64 = -1.0;
const HIGH_RATIO: f64 = 1.5;
const HIGH_RATIO_ADJUSTMENT: f64 = 0.5;

/// Effective score: stored score adjusted by the upload/download ratio
///
/// Peers that never downloaded get no adjustment. Read-only.
pub fn calculate_reputation(peer: &Peer) -> f64 {
    let mut score = peer.reputation;

    if peer.downloads > 0 {
        let ratio = peer.uploads as f64 / peer.downloads as f64;
        if ratio < LOW_RATIO {
            score += LOW_RATIO_ADJUSTMENT;
        } else if ratio > HIGH_RATIO {
            score += HIGH_RATIO_ADJUSTMENT;
        }
    }

    clamp_reputation(score)
}

/// Score delta for a received rating, None for neutral scores
pub fn rating_delta(score: f64) -> Option<f64> {
    if score >= GOOD_RATING_THRESHOLD {
        Some(GOOD_RATING_BONUS)
    } else if score <= BAD_RATING_THRESHOLD {
        Some(-BAD_RATING_PENALTY)
    } else {
        None
    }
}

/// Outcome of a download permission check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Allowed,
    Denied { reason: String },
    UnknownPeer,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            AccessDecision::Allowed => None,
            AccessDecision::Denied { reason } => Some(reason),
            AccessDecision::UnknownPeer => Some("Unknown peer"),
        }
    }
}

pub fn evaluate_access(peer: &Peer) -> AccessDecision {
    let effective = calculate_reputation(peer);

    if effective >= DOWNLOAD_THRESHOLD {
        AccessDecision::Allowed
    } else {
        AccessDecision::Denied {
            reason: format!(
                "Insufficient reputation ({:.1} < {:.1}, {:.1} short)",
                effective,
                DOWNLOAD_THRESHOLD,
                DOWNLOAD_THRESHOLD - effective
            ),
        }
    }
}
