use crate::core::error::ProtocolError;
use crate::models::peer::Peer;
use crate::protocol::client;
use crate::protocol::codec::WireLimits;
use async_trait::async_trait;
use std::time::Duration;

/// Checks whether a peer answers on its advertised endpoint
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, peer: &Peer) -> Result<(), ProtocolError>;
}

/// Probe that dials the peer protocol port and exchanges PING/PONG
pub struct TcpProbe {
    sender_id: String,
    limits: WireLimits,
}

impl TcpProbe {
    pub fn new(sender_id: impl Into<String>, dial_timeout: Duration, limits: WireLimits) -> Self {
        Self {
            sender_id: sender_id.into(),
            limits: WireLimits {
                connect_timeout: dial_timeout,
                read_timeout: dial_timeout,
                write_timeout: dial_timeout,
                ..limits
            },
        }
    }
}

#[async_trait]
impl LivenessProbe for TcpProbe {
    async fn probe(&self, peer: &Peer) -> Result<(), ProtocolError> {
        client::ping(&peer.endpoint(), &self.sender_id, &self.limits).await
    }
}
