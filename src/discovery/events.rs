use crate::models::peer::Peer;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Liveness changes published to discovery subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryEvent {
    PeerJoined(Peer),
    PeerLeft(Peer),
    PeerTimeout(Peer),
    PeerUpdated(Peer),
}

impl DiscoveryEvent {
    pub fn peer(&self) -> &Peer {
        match self {
            DiscoveryEvent::PeerJoined(p)
            | DiscoveryEvent::PeerLeft(p)
            | DiscoveryEvent::PeerTimeout(p)
            | DiscoveryEvent::PeerUpdated(p) => p,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DiscoveryEvent::PeerJoined(_) => "joined",
            DiscoveryEvent::PeerLeft(_) => "left",
            DiscoveryEvent::PeerTimeout(_) => "timeout",
            DiscoveryEvent::PeerUpdated(_) => "updated",
        }
    }
}

pub type EventSender = mpsc::Sender<DiscoveryEvent>;
pub type EventReceiver = mpsc::Receiver<DiscoveryEvent>;

pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_tagged() {
        let peer = Peer::new("alice", "10.0.0.1", 9000, 5);
        let json = serde_json::to_value(DiscoveryEvent::PeerTimeout(peer.clone())).unwrap();

        assert_eq!(json["type"], "PEER_TIMEOUT");
        assert_eq!(json["data"]["id"], peer.id);
    }
}
