use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReputationEventKind {
    Upload,
    Download,
    Rating,
    Leeching,
    Inactivity,
    Contribution,
}

impl fmt::Display for ReputationEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReputationEventKind::Upload => "upload",
            ReputationEventKind::Download => "download",
            ReputationEventKind::Rating => "rating",
            ReputationEventKind::Leeching => "leeching",
            ReputationEventKind::Inactivity => "inactivity",
            ReputationEventKind::Contribution => "contribution",
        };
        f.write_str(name)
    }
}

/// One immutable entry of the reputation history
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReputationEvent {
    pub kind: ReputationEventKind,
    pub peer_id: String,
    pub delta: f64,
    pub reason: String,
    pub timestamp: i64,
}

impl ReputationEvent {
    pub fn new(
        kind: ReputationEventKind,
        peer_id: &str,
        delta: f64,
        reason: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            kind,
            peer_id: peer_id.to_string(),
            delta,
            reason: reason.into(),
            timestamp,
        }
    }
}
