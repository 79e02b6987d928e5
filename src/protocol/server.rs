use crate::core::error::{ProtocolError, TransferError};
use crate::discovery::service::Discovery;
use crate::models::transfer::TransferStatus;
use crate::protocol::codec::{read_envelope, write_envelope, Connection, WireLimits};
use crate::protocol::message::{Announcement, Envelope, Leave, MessageType, TransferRequest};
use crate::reputation::engine::ReputationEngine;
use crate::reputation::policy::AccessDecision;
use crate::transfer::manager::TransferManager;
use crate::utils::time::current_timestamp;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Listener for the peer protocol
///
/// Each connection carries one request envelope. File requests from peers
/// whose reputation is too low are refused with the policy's reason.
pub struct PeerServer {
    local_id: String,
    discovery: Arc<Discovery>,
    transfers: Arc<TransferManager>,
    reputation: Arc<ReputationEngine>,
    limits: WireLimits,
}

impl PeerServer {
    pub fn new(
        local_id: impl Into<String>,
        discovery: Arc<Discovery>,
        transfers: Arc<TransferManager>,
        reputation: Arc<ReputationEngine>,
    ) -> Self {
        let limits = *transfers.limits();
        Self {
            local_id: local_id.into(),
            discovery,
            transfers,
            reputation,
            limits,
        }
    }

    /// Run the accept loop on `listener` until shutdown
    pub fn start(
        self: &Arc<Self>,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(listener, shutdown))
    }

    async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "Peer protocol listener started");
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream, remote).await {
                                debug!(
                                    remote = %remote,
                                    error = %e,
                                    "Peer connection ended with error"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept peer connection");
                    }
                },
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Peer protocol listener stopped");
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        remote: SocketAddr,
    ) -> Result<(), TransferError> {
        stream.set_nodelay(true)?;
        let mut conn: Connection = BufReader::new(stream);
        let envelope = read_envelope(&mut conn, &self.limits).await?;

        debug!(
            remote = %remote,
            sender = %envelope.sender,
            kind = %envelope.kind,
            "Peer message received"
        );

        match envelope.kind {
            MessageType::Ping => self.pong(&mut conn).await?,
            MessageType::Announce => {
                let announcement: Announcement = envelope.payload()?;
                self.discovery
                    .handle_announce(&announcement, current_timestamp());
                self.pong(&mut conn).await?;
            }
            MessageType::Leave => {
                let leave: Leave = envelope.payload()?;
                self.discovery.handle_leave(&leave.peer_id, current_timestamp());
            }
            MessageType::Request => {
                let request: TransferRequest = envelope.payload()?;
                self.serve(&mut conn, &request).await?;
            }
            other => {
                warn!(remote = %remote, kind = %other, "Unexpected message on peer listener");
                return Err(ProtocolError::UnexpectedMessage {
                    expected: "PING, ANNOUNCE, LEAVE or REQUEST".to_string(),
                    got: other.to_string(),
                }
                .into());
            }
        }

        Ok(())
    }

    async fn pong(&self, conn: &mut Connection) -> Result<(), ProtocolError> {
        write_envelope(conn, &Envelope::bare(MessageType::Pong, &self.local_id), &self.limits).await
    }

    async fn serve(
        &self,
        conn: &mut Connection,
        request: &TransferRequest,
    ) -> Result<(), TransferError> {
        let decision = self.reputation.can_download(&request.requester_id);
        if let AccessDecision::Denied { reason } = decision {
            info!(
                requester_id = %request.requester_id,
                cid = %request.cid,
                reason = %reason,
                "Peer request denied"
            );
            return self
                .transfers
                .reject(conn, &self.local_id, &request.cid, &reason)
                .await;
        }

        let Some(transfer) = self
            .transfers
            .serve_request(conn, &self.local_id, request)
            .await?
        else {
            return Ok(());
        };

        if transfer.status == TransferStatus::Completed {
            for result in [
                self.reputation.record_upload(&self.local_id).await,
                self.reputation.record_download(&request.requester_id).await,
            ] {
                if let Err(e) = result {
                    debug!(error = %e, "Reputation not updated after serving");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::probe::LivenessProbe;
    use crate::discovery::service::DiscoverySettings;
    use crate::models::file::{AcademicFile, FileMetadata};
    use crate::models::peer::Peer;
    use crate::protocol::client;
    use crate::reputation::engine::ReputationSettings;
    use crate::stores::content_index::ContentIndex;
    use crate::stores::local_store::LocalStore;
    use crate::stores::peer_registry::PeerRegistry;
    use crate::throttling::manager::ThrottlingManager;
    use crate::throttling::throttler::BucketSettings;
    use crate::transfer::manager::TransferSettings;
    use crate::utils::hashing::{compute_cid, sha256_hex};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoProbe;

    #[async_trait]
    impl LivenessProbe for NoProbe {
        async fn probe(&self, _peer: &Peer) -> Result<(), ProtocolError> {
            Ok(())
        }
    }

    struct Node {
        addr: String,
        registry: Arc<PeerRegistry>,
        index: Arc<ContentIndex>,
        store: Arc<LocalStore>,
        reputation: Arc<ReputationEngine>,
        _shutdown: watch::Sender<bool>,
        _dir: tempfile::TempDir,
    }

    async fn start_node() -> Node {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(PeerRegistry::new());
        let index = Arc::new(ContentIndex::new());
        let store = Arc::new(LocalStore::new(dir.path().join("shared")));
        let throttling = Arc::new(ThrottlingManager::new(BucketSettings::default(), false));
        let reputation = Arc::new(ReputationEngine::new(
            Arc::clone(&registry),
            ReputationSettings::default(),
        ));
        let discovery = Arc::new(Discovery::new(
            Arc::clone(&registry),
            Arc::new(NoProbe),
            DiscoverySettings {
                heartbeat_interval: Duration::from_secs(60),
                cleanup_interval: Duration::from_secs(60),
                peer_timeout: 600,
                event_queue_size: 16,
                subscriber_queue_size: 16,
            },
        ));
        let mut settings = TransferSettings::default();
        settings.limits.read_timeout = Duration::from_secs(2);
        let transfers = Arc::new(TransferManager::new(
            settings,
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&registry),
            throttling,
        ));

        let local = Peer::new("server", "127.0.0.1", 0, current_timestamp());
        let local_id = local.id.clone();
        registry.register(local);

        let (shutdown, rx) = watch::channel(false);
        reputation.start(rx.clone());
        let server = Arc::new(PeerServer::new(
            local_id,
            discovery,
            transfers,
            Arc::clone(&reputation),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        server.start(listener, rx);

        Node {
            addr,
            registry,
            index,
            store,
            reputation,
            _shutdown: shutdown,
            _dir: dir,
        }
    }

    async fn host(node: &Node, data: &[u8]) -> String {
        let cid = compute_cid(data);
        node.store.put(&cid, data).await.unwrap();
        node.index.add(AcademicFile::new(
            cid.clone(),
            sha256_hex(data),
            "peer-owner",
            data.len() as u64,
            ".txt".to_string(),
            FileMetadata {
                file_name: "a.txt".to_string(),
                ..Default::default()
            },
            0,
        ));
        cid
    }

    fn limits() -> WireLimits {
        WireLimits {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            max_message_size: 64 * 1024,
        }
    }

    #[tokio::test]
    async fn test_ping_and_announce() {
        let node = start_node().await;

        client::ping(&node.addr, "peer-x", &limits()).await.unwrap();

        let announcement = Announcement {
            name: "remote".to_string(),
            address: "10.0.0.9".to_string(),
            port: 9100,
        };
        client::announce(&node.addr, "peer-x", &announcement, &limits())
            .await
            .unwrap();

        let id = crate::utils::hashing::derive_peer_id("remote", "10.0.0.9", 9100);
        assert!(node.registry.get(&id).unwrap().online);

        client::leave(&node.addr, &id, &limits()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!node.registry.get(&id).unwrap().online);
    }

    #[tokio::test]
    async fn test_request_streams_file() {
        let node = start_node().await;
        let data = b"operating systems lecture 7".to_vec();
        let cid = host(&node, &data).await;

        let request = TransferRequest {
            cid: cid.clone(),
            requester_id: "peer-stranger".to_string(),
            timestamp: current_timestamp(),
        };
        let (mut conn, response) = client::request_file(&node.addr, &request, &limits())
            .await
            .unwrap();

        assert!(response.accepted);
        assert_eq!(response.file_size, data.len() as u64);
        assert_eq!(response.checksum, sha256_hex(&data));

        let mut body = vec![0u8; data.len()];
        tokio::io::AsyncReadExt::read_exact(&mut conn, &mut body).await.unwrap();
        assert_eq!(body, data);
    }

    #[tokio::test]
    async fn test_request_from_low_reputation_peer_refused() {
        let node = start_node().await;
        let cid = host(&node, b"exam answers").await;

        let requester = Peer::new("leech", "10.0.0.3", 9000, current_timestamp());
        let requester_id = requester.id.clone();
        node.registry.register(requester);
        node.reputation
            .record_contribution(&requester_id, -4.0, "test setup")
            .await
            .unwrap();
        node.reputation.flush().await.unwrap();

        let request = TransferRequest {
            cid,
            requester_id,
            timestamp: current_timestamp(),
        };
        let (_conn, response) = client::request_file(&node.addr, &request, &limits())
            .await
            .unwrap();

        assert!(!response.accepted);
        assert!(response.reason.unwrap().contains("Insufficient reputation"));
    }
}
