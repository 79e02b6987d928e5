use crate::models::peer::{clamp_reputation, Peer};
use crate::models::reputation::ReputationEventKind;
use crate::utils::time::is_expired;
use dashmap::DashMap;

/// Outcome of applying one reputation delta to a stored peer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreChange {
    pub previous: f64,
    pub score: f64,
    pub became_leecher: bool,
}

/// In-memory registry of every peer this node knows about
///
/// Callers only ever see snapshot clones. Liveness is changed through
/// [`touch`](Self::touch), [`set_online`](Self::set_online) and
/// [`mark_stale_offline`](Self::mark_stale_offline); score and counters only
/// through the crate-private [`apply_reputation`](Self::apply_reputation).
pub struct PeerRegistry {
    peers: DashMap<String, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    /// Insert a peer if its id is unknown
    ///
    /// Returns true when the peer was newly added. An existing record keeps its
    /// counters and score.
    pub fn register(&self, peer: Peer) -> bool {
        match self.peers.entry(peer.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(peer);
                true
            }
        }
    }

    pub fn get(&self, peer_id: &str) -> Option<Peer> {
        self.peers.get(peer_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Refresh `last_seen`; returns false for unknown peers
    pub fn touch(&self, peer_id: &str, now: i64) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(mut peer) => {
                peer.last_seen = peer.last_seen.max(now);
                true
            }
            None => false,
        }
    }

    /// Set the online flag and refresh `last_seen` when coming online
    ///
    /// Returns the previous flag, or None for unknown peers.
    pub fn set_online(&self, peer_id: &str, online: bool, now: i64) -> Option<bool> {
        let mut peer = self.peers.get_mut(peer_id)?;
        let previous = peer.online;
        peer.online = online;
        if online {
            peer.last_seen = peer.last_seen.max(now);
        }
        Some(previous)
    }

    /// Flip every online peer silent for longer than `timeout` to offline
    ///
    /// Offline peers are skipped, so a silent peer is reported once per
    /// silence period. Returns snapshots of the peers that changed.
    pub fn mark_stale_offline(&self, now: i64, timeout: i64) -> Vec<Peer> {
        let mut stale = Vec::new();

        for mut entry in self.peers.iter_mut() {
            let peer = entry.value_mut();
            if peer.online && is_expired(peer.last_seen, timeout, now) {
                peer.online = false;
                stale.push(peer.clone());
            }
        }

        stale
    }

    /// Ids of peers with no contact for longer than `threshold`
    pub fn inactive_peers(&self, now: i64, threshold: i64) -> Vec<String> {
        self.peers
            .iter()
            .filter(|entry| is_expired(entry.value().last_seen, threshold, now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Apply a clamped score delta and bump the counter matching `kind`
    ///
    /// Only the reputation engine calls this.
    pub(crate) fn apply_reputation(
        &self,
        peer_id: &str,
        kind: ReputationEventKind,
        delta: f64,
    ) -> Option<ScoreChange> {
        let mut peer = self.peers.get_mut(peer_id)?;
        let previous = peer.reputation;
        let was_leecher = peer.is_leecher;

        peer.reputation = clamp_reputation(previous + delta);
        match kind {
            ReputationEventKind::Upload => peer.uploads += 1,
            ReputationEventKind::Download => peer.downloads += 1,
            _ => {}
        }
        peer.refresh_leecher_flag();

        Some(ScoreChange {
            previous,
            score: peer.reputation,
            became_leecher: !was_leecher && peer.is_leecher,
        })
    }

    pub fn remove(&self, peer_id: &str) -> Option<Peer> {
        self.peers.remove(peer_id).map(|(_, peer)| peer)
    }

    pub fn all_peers(&self) -> Vec<Peer> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn online_peers(&self) -> Vec<Peer> {
        self.peers
            .iter()
            .filter(|entry| entry.value().online)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn leechers(&self) -> Vec<Peer> {
        self.peers
            .iter()
            .filter(|entry| entry.value().is_leecher)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn online_count(&self) -> usize {
        self.peers.iter().filter(|entry| entry.value().online).count()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
