use crate::utils::hashing::derive_peer_id;
use serde::{Deserialize, Serialize};

pub const MIN_REPUTATION: f64 = 0.0;
pub const MAX_REPUTATION: f64 = 10.0;

/// Score every new peer starts with
pub const DEFAULT_REPUTATION: f64 = 5.0;

pub fn clamp_reputation(score: f64) -> f64 {
    score.clamp(MIN_REPUTATION, MAX_REPUTATION)
}

/// Downloads may exceed uploads by this factor before a peer counts as a leecher
pub const LEECHER_FACTOR: u64 = 3;

/// A node of the sharing network as seen by this process
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Peer {
    /// Deterministic identifier derived from name and endpoint
    pub id: String,
    pub name: String,
    /// Network address other peers dial
    pub address: String,
    pub port: u16,
    pub online: bool,
    /// Unix timestamp of the last contact (announce or successful probe)
    pub last_seen: i64,
    pub joined_at: i64,
    pub uploads: u64,
    pub downloads: u64,
    /// Stored base score, always within [0, 10]
    pub reputation: f64,
    pub is_leecher: bool,
}

impl Peer {
    pub fn new(name: &str, address: &str, port: u16, now: i64) -> Self {
        Self {
            id: derive_peer_id(name, address, port),
            name: name.to_string(),
            address: address.to_string(),
            port,
            online: true,
            last_seen: now,
            joined_at: now,
            uploads: 0,
            downloads: 0,
            reputation: DEFAULT_REPUTATION,
            is_leecher: false,
        }
    }

    /// `host:port` form used when dialing the peer
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Leecher rule: downloads strictly greater than three times uploads
    ///
    /// A peer that has never downloaded is never a leecher.
    pub fn compute_leecher(uploads: u64, downloads: u64) -> bool {
        downloads > uploads.saturating_mul(LEECHER_FACTOR)
    }

    pub fn refresh_leecher_flag(&mut self) {
        self.is_leecher = Self::compute_leecher(self.uploads, self.downloads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_peer_defaults() {
        let peer = Peer::new("alice", "10.0.0.1", 9000, 1_000);

        assert!(peer.id.starts_with("peer-"));
        assert!(peer.online);
        assert_eq!(peer.last_seen, 1_000);
        assert_eq!(peer.reputation, DEFAULT_REPUTATION);
        assert!(!peer.is_leecher);
        assert_eq!(peer.endpoint(), "10.0.0.1:9000");
    }

    #[test]
    fn test_zero_activity_is_not_leecher() {
        assert!(!Peer::compute_leecher(0, 0));
    }

    #[test]
    fn test_leecher_boundary() {
        assert!(!Peer::compute_leecher(1, 3));
        assert!(Peer::compute_leecher(1, 4));
        assert!(Peer::compute_leecher(0, 1));
        assert!(!Peer::compute_leecher(5, 0));
    }
}
