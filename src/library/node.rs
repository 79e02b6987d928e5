use crate::core::config::{Config, LibraryConfig};
use crate::core::error::{LibraryError, ReputationError, TransferError, ValidationError};
use crate::discovery::events::DiscoveryEvent;
use crate::discovery::probe::{LivenessProbe, TcpProbe};
use crate::discovery::service::{Discovery, DiscoverySettings, DiscoveryStats};
use crate::metrics::collector::Metrics;
use crate::models::file::{validate_upload, AcademicFile, FileMetadata};
use crate::models::peer::Peer;
use crate::models::rating::Rating;
use crate::models::transfer::{Transfer, TransferStatus};
use crate::protocol::codec::WireLimits;
use crate::protocol::message::Announcement;
use crate::protocol::server::PeerServer;
use crate::reputation::engine::{
    ReputationEngine, ReputationSettings, ReputationStats, ScoreListener,
};
use crate::reputation::policy::AccessDecision;
use crate::reputation::ratings::{RatingService, RatingSubmission};
use crate::stores::content_index::ContentIndex;
use crate::stores::local_store::{LocalStore, PART_SUFFIX};
use crate::stores::peer_registry::PeerRegistry;
use crate::throttling::manager::{ThrottleStats, ThrottlingManager};
use crate::transfer::manager::{TransferJob, TransferManager, TransferSettings, TransferStats};
use crate::utils::hashing::{cid_from_digest, compute_cid, is_valid_cid, sha256_hex};
use crate::utils::time::current_timestamp;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of a download request
#[derive(Debug, Clone)]
pub enum DownloadOutcome {
    Granted {
        file: AcademicFile,
        bytes: Vec<u8>,
        transfer: Transfer,
    },
    Denied {
        reason: String,
    },
    NotFound,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkStats {
    pub node_id: String,
    pub peers: DiscoveryStats,
    pub files: usize,
    pub total_bytes: u64,
    pub hosted_files: usize,
    pub ratings: usize,
    pub reputation: ReputationStats,
    pub throttling: ThrottleStats,
    pub transfers: TransferStats,
}

/// One node of the sharing network
///
/// Owns every component and exposes the operations the HTTP API and the
/// peer protocol need. Components only talk to each other through the
/// handles wired up here.
pub struct Node {
    local: Peer,
    library: LibraryConfig,
    registry: Arc<PeerRegistry>,
    index: Arc<ContentIndex>,
    store: Arc<LocalStore>,
    discovery: Arc<Discovery>,
    reputation: Arc<ReputationEngine>,
    throttling: Arc<ThrottlingManager>,
    transfers: Arc<TransferManager>,
    ratings: RatingService,
    server: Arc<PeerServer>,
    metrics: Arc<Metrics>,
}

impl Node {
    pub fn new(config: &Config) -> Self {
        let local = local_peer(config);
        let probe = TcpProbe::new(
            local.id.clone(),
            Duration::from_secs(config.discovery.probe_timeout),
            WireLimits::from(&config.transfer),
        );
        Self::with_probe(config, Arc::new(probe))
    }

    pub fn with_probe(config: &Config, probe: Arc<dyn LivenessProbe>) -> Self {
        let local = local_peer(config);

        let registry = Arc::new(PeerRegistry::new());
        registry.register(local.clone());

        let index = Arc::new(ContentIndex::new());
        let store = Arc::new(LocalStore::new(config.library.shared_dir.clone()));

        let discovery = Arc::new(
            Discovery::new(
                Arc::clone(&registry),
                probe,
                DiscoverySettings::from(&config.discovery),
            )
            .with_local_peer(local.id.clone()),
        );

        let reputation = Arc::new(ReputationEngine::new(
            Arc::clone(&registry),
            ReputationSettings::from(&config.reputation),
        ));

        let throttling = Arc::new(ThrottlingManager::from_config(&config.throttling));
        reputation.add_listener(Arc::clone(&throttling) as Arc<dyn ScoreListener>);

        let transfers = Arc::new(TransferManager::new(
            TransferSettings::from(&config.transfer),
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&registry),
            Arc::clone(&throttling),
        ));

        let ratings = RatingService::new(
            Arc::clone(&registry),
            Arc::clone(&index),
            Arc::clone(&reputation),
        );

        let server = Arc::new(PeerServer::new(
            local.id.clone(),
            Arc::clone(&discovery),
            Arc::clone(&transfers),
            Arc::clone(&reputation),
        ));

        Self {
            local,
            library: config.library.clone(),
            registry,
            index,
            store,
            discovery,
            reputation,
            throttling,
            transfers,
            ratings,
            server,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Spawn the periodic tasks: discovery, reputation and throttle refill
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = self.discovery.start(shutdown.clone());
        handles.push(self.track_departures());
        handles.extend(self.reputation.start(shutdown.clone()));
        handles.push(self.throttling.start(shutdown));
        handles
    }

    /// Serve the peer protocol on `listener`
    pub fn start_listener(
        &self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        self.server.start(listener, shutdown)
    }

    /// Drop a departed peer from the locations of every file it hosted
    ///
    /// Only an explicit leave counts. A timed-out peer keeps its locations and
    /// is skipped by fetches while offline. The task ends with the discovery
    /// event stream.
    fn track_departures(&self) -> JoinHandle<()> {
        let mut events = self.discovery.subscribe();
        let index = Arc::clone(&self.index);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let DiscoveryEvent::PeerLeft(peer) = event {
                    let touched = index.remove_peer_everywhere(&peer.id);
                    if !touched.is_empty() {
                        info!(
                            peer_id = %peer.id,
                            files = touched.len(),
                            "Removed departed peer from file locations"
                        );
                    }
                }
            }
            debug!("Departure tracking stopped");
        })
    }

    pub fn local_peer(&self) -> &Peer {
        &self.local
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn index(&self) -> &Arc<ContentIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    pub fn reputation(&self) -> &Arc<ReputationEngine> {
        &self.reputation
    }

    pub fn throttling(&self) -> &Arc<ThrottlingManager> {
        &self.throttling
    }

    pub fn transfers(&self) -> &Arc<TransferManager> {
        &self.transfers
    }

    pub fn ratings(&self) -> &RatingService {
        &self.ratings
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Register a peer by endpoint; the same endpoint always yields the same peer
    pub fn register_peer(
        &self,
        name: &str,
        address: &str,
        port: u16,
    ) -> Result<Peer, LibraryError> {
        if name.trim().is_empty() {
            return Err(ValidationError::MissingField("name").into());
        }
        if address.trim().is_empty() {
            return Err(ValidationError::MissingField("address").into());
        }
        if port == 0 {
            return Err(ValidationError::MissingField("port").into());
        }

        let announcement = Announcement {
            name: name.trim().to_string(),
            address: address.trim().to_string(),
            port,
        };

        Ok(self
            .discovery
            .handle_announce(&announcement, current_timestamp()))
    }

    /// Publish a file owned by `owner_id`
    ///
    /// Identical bytes map to one record; a second owner is added to its
    /// locations. The owner earns an upload once per file it starts hosting.
    pub async fn submit_file(
        &self,
        owner_id: &str,
        bytes: &[u8],
        file_name: &str,
        description: &str,
        subject: &str,
    ) -> Result<AcademicFile, LibraryError> {
        let file_type = validate_upload(
            file_name,
            bytes.len() as u64,
            self.library.max_file_size,
            &self.library.allowed_types,
        )?;

        if !self.registry.contains(owner_id) {
            return Err(LibraryError::UnknownPeer(owner_id.to_string()));
        }

        let cid = compute_cid(bytes);
        let already_hosting = self
            .index
            .get(&cid)
            .is_some_and(|f| f.peer_locations.iter().any(|p| p == owner_id));

        self.store.put(&cid, bytes).await?;

        let file = self.index.add(AcademicFile::new(
            cid,
            sha256_hex(bytes),
            owner_id,
            bytes.len() as u64,
            file_type,
            FileMetadata {
                file_name: file_name.trim().to_string(),
                description: description.to_string(),
                subject: subject.to_string(),
            },
            current_timestamp(),
        ));

        if !already_hosting {
            self.reputation.record_upload(owner_id).await?;
        }
        self.metrics.increment_uploads();

        info!(
            cid = %file.cid,
            owner_id = %owner_id,
            file_name = %file.file_name,
            size = file.size,
            locations = file.peer_locations.len(),
            "File submitted"
        );

        Ok(file)
    }

    /// Gate a download on reputation, then stream the file through the
    /// transfer manager with the requester's throttler
    ///
    /// Files indexed here but hosted elsewhere are fetched from an online
    /// location first.
    pub async fn request_download(
        &self,
        cid: &str,
        requester_id: &str,
    ) -> Result<DownloadOutcome, LibraryError> {
        match self.reputation.can_download(requester_id) {
            AccessDecision::Allowed => {}
            AccessDecision::UnknownPeer => {
                return Err(LibraryError::UnknownPeer(requester_id.to_string()));
            }
            AccessDecision::Denied { reason } => {
                self.metrics.increment_denied();
                info!(
                    requester_id = %requester_id,
                    cid = %cid,
                    reason = %reason,
                    "Download denied"
                );
                return Ok(DownloadOutcome::Denied { reason });
            }
        }

        let Some(file) = self.index.get(cid) else {
            return Ok(DownloadOutcome::NotFound);
        };

        if !self.store.contains(cid) && !self.fetch_remote(&file).await {
            return Ok(DownloadOutcome::NotFound);
        }

        let Some((mut source, size)) = self.store.open(cid).await? else {
            return Ok(DownloadOutcome::NotFound);
        };

        let job = TransferJob {
            cid: file.cid.clone(),
            file_name: file.file_name.clone(),
            peer_id: requester_id.to_string(),
            total_bytes: size,
            checksum: file.checksum.clone(),
        };
        let throttler = self.transfers.throttler_for(requester_id);

        let (transfer, bytes) = self
            .transfers
            .receive_to_memory(&job, &mut source, throttler)
            .await?;

        let Some(bytes) = bytes else {
            return Err(TransferError::Incomplete {
                reason: transfer.error.clone().unwrap_or_else(|| transfer.status.to_string()),
                id: transfer.id,
            }
            .into());
        };

        let download_count = self.index.record_download(cid).unwrap_or_default();
        self.reputation.record_download(requester_id).await?;
        match self.reputation.record_upload(&file.owner_id).await {
            Ok(()) | Err(ReputationError::UnknownPeer(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.metrics.increment_downloads();

        info!(
            cid = %cid,
            requester_id = %requester_id,
            owner_id = %file.owner_id,
            bytes = bytes.len(),
            download_count = download_count,
            "Download granted"
        );

        Ok(DownloadOutcome::Granted {
            file,
            bytes,
            transfer,
        })
    }

    pub async fn submit_rating(
        &self,
        submission: RatingSubmission,
    ) -> Result<Rating, LibraryError> {
        let rating = self.ratings.submit(submission).await?;
        self.metrics.increment_ratings();
        Ok(rating)
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            node_id: self.local.id.clone(),
            peers: self.discovery.stats(),
            files: self.index.len(),
            total_bytes: self.index.total_bytes(),
            hosted_files: self.store.len(),
            ratings: self.ratings.total(),
            reputation: self.reputation.stats(),
            throttling: self.throttling.stats(),
            transfers: self.transfers.stats(),
        }
    }

    /// Re-register the files already on disk in the shared and download directories
    ///
    /// Blobs named by their CID must still hash to that name. Any other file
    /// of an allowed type is indexed under its own name. Every record is owned
    /// by the local node. Returns the records indexed.
    pub async fn rescan_library(&self) -> Result<Vec<AcademicFile>, LibraryError> {
        let mut indexed = Vec::new();
        let dirs = [self.store.root().to_path_buf(), self.library.download_dir.clone()];

        for dir in dirs {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
                else {
                    continue;
                };
                if name.ends_with(PART_SUFFIX) {
                    continue;
                }

                match self.index_local_file(&path, &name).await {
                    Ok(Some(file)) => indexed.push(file),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                    }
                }
            }
        }

        info!(files = indexed.len(), "Library rescanned");
        Ok(indexed)
    }

    async fn index_local_file(&self, path: &Path, name: &str) -> io::Result<Option<AcademicFile>> {
        let named_by_cid = is_valid_cid(name);
        let size = fs::metadata(path).await?.len();
        let max_size = self.library.max_file_size;

        if size == 0 || size > max_size {
            debug!(path = %path.display(), size = size, "Not indexing file outside size limits");
            return Ok(None);
        }

        // Blobs lost their extension when stored
        let file_type = if named_by_cid {
            String::new()
        } else {
            match validate_upload(name, size, max_size, &self.library.allowed_types) {
                Ok(file_type) => file_type,
                Err(e) => {
                    debug!(path = %path.display(), reason = %e, "Not indexing file");
                    return Ok(None);
                }
            }
        };

        let bytes = fs::read(path).await?;
        let checksum = sha256_hex(&bytes);
        let cid = cid_from_digest(&checksum);

        if named_by_cid && name != cid {
            warn!(path = %path.display(), actual = %cid, "Blob content does not match its name");
            return Ok(None);
        }

        if !self.store.contains(&cid) {
            self.store.adopt(&cid, path.to_path_buf());
        }

        let file = self.index.add(AcademicFile::new(
            cid,
            checksum,
            &self.local.id,
            bytes.len() as u64,
            file_type,
            FileMetadata {
                file_name: name.to_string(),
                ..Default::default()
            },
            current_timestamp(),
        ));

        debug!(cid = %file.cid, path = %path.display(), "Indexed local file");
        Ok(Some(file))
    }

    /// Copy a file from one of its online hosts into the local store
    ///
    /// Each attempt writes to its own temporary file. Only bytes that hash to
    /// the indexed checksum are moved into place and adopted.
    async fn fetch_remote(&self, file: &AcademicFile) -> bool {
        let dest = self.library.download_dir.join(&file.cid);

        for peer_id in file.peer_locations.iter().filter(|p| **p != self.local.id) {
            let Some(peer) = self.registry.get(peer_id).filter(|p| p.online) else {
                continue;
            };

            let part = partial_path(&self.library.download_dir, &file.cid);
            let result = self
                .transfers
                .download_from_peer(&peer.endpoint(), file, &self.local.id, &part)
                .await;

            match result {
                Ok(transfer) if transfer.status == TransferStatus::Completed => {
                    if let Err(e) = fs::rename(&part, &dest).await {
                        warn!(
                            cid = %file.cid,
                            error = %e,
                            "Failed to move fetched file into place"
                        );
                        let _ = fs::remove_file(&part).await;
                        continue;
                    }

                    self.store.adopt(&file.cid, dest);
                    if let Err(e) = self.index.add_peer_location(&file.cid, &self.local.id) {
                        warn!(cid = %file.cid, error = %e, "Fetched file vanished from index");
                    }
                    info!(cid = %file.cid, peer_id = %peer.id, "Fetched file from peer");
                    return true;
                }
                Ok(transfer) => {
                    debug!(
                        cid = %file.cid,
                        peer_id = %peer.id,
                        status = %transfer.status,
                        "Fetch did not complete"
                    );
                }
                Err(e) => {
                    debug!(
                        cid = %file.cid,
                        peer_id = %peer.id,
                        error = %e,
                        "Fetch from peer failed"
                    );
                }
            }
        }

        false
    }
}

/// Unique temporary name for one fetch attempt
fn partial_path(dir: &Path, cid: &str) -> PathBuf {
    dir.join(format!("{}.{:016x}{}", cid, rand::random::<u64>(), PART_SUFFIX))
}

fn local_peer(config: &Config) -> Peer {
    Peer::new(
        &config.server.node_name,
        config.server.public_address(),
        config.server.peer_port,
        current_timestamp(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{
        DiscoveryConfig, LoggingConfig, ReputationConfig, ServerConfig, ThrottlingConfig,
        TransferConfig,
    };
    use crate::core::error::ProtocolError;
    use crate::models::peer::DEFAULT_REPUTATION;
    use crate::models::rating::RatingTarget;
    use crate::reputation::policy::UPLOAD_BONUS;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NoProbe;

    #[async_trait]
    impl LivenessProbe for NoProbe {
        async fn probe(&self, _peer: &Peer) -> Result<(), ProtocolError> {
            Ok(())
        }
    }

    fn create_test_config(dir: &TempDir) -> Config {
        Config {
            server: ServerConfig {
                node_name: "test-node".to_string(),
                bind_address: "127.0.0.1".to_string(),
                advertise_address: None,
                http_port: 8080,
                peer_port: 9000,
                num_threads: 2,
                api_key: Some("test-api-key".to_string()),
            },
            discovery: DiscoveryConfig::default(),
            reputation: ReputationConfig::default(),
            throttling: ThrottlingConfig::default(),
            transfer: TransferConfig::default(),
            library: LibraryConfig {
                shared_dir: dir.path().join("shared"),
                download_dir: dir.path().join("downloads"),
                ..LibraryConfig::default()
            },
            logging: LoggingConfig::default(),
        }
    }

    struct Running {
        node: Node,
        _shutdown: watch::Sender<bool>,
        _dir: TempDir,
    }

    fn start_node() -> Running {
        let dir = TempDir::new().unwrap();
        let node = Node::with_probe(&create_test_config(&dir), Arc::new(NoProbe));
        let (shutdown, rx) = watch::channel(false);
        node.start(rx);
        Running {
            node,
            _shutdown: shutdown,
            _dir: dir,
        }
    }

    async fn set_score(node: &Node, peer_id: &str, target: f64) {
        let current = node.registry().get(peer_id).unwrap().reputation;
        node.reputation()
            .record_contribution(peer_id, target - current, "test setup")
            .await
            .unwrap();
        node.reputation().flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_register_peer_is_idempotent() {
        let r = start_node();

        let first = r.node.register_peer("alice", "10.0.0.1", 9000).unwrap();
        let second = r.node.register_peer("alice", "10.0.0.1", 9000).unwrap();

        assert_eq!(first.id, second.id);
        // The local node plus alice
        assert_eq!(r.node.registry().len(), 2);

        let err = r.node.register_peer("", "10.0.0.1", 9000).unwrap_err();
        assert!(matches!(err, LibraryError::Validation(ValidationError::MissingField("name"))));
    }

    #[tokio::test]
    async fn test_identical_uploads_collapse() {
        let r = start_node();
        let a = r.node.register_peer("a", "10.0.0.1", 9000).unwrap();
        let b = r.node.register_peer("b", "10.0.0.2", 9000).unwrap();
        let bytes = b"the same lecture slides";

        let first = r
            .node
            .submit_file(&a.id, bytes, "slides.pdf", "week 1", "Physics")
            .await
            .unwrap();
        let second = r.node.submit_file(&b.id, bytes, "copy.pdf", "", "").await.unwrap();

        assert_eq!(first.cid, second.cid);
        assert_eq!(r.node.index().len(), 1);
        assert_eq!(second.peer_locations, vec![a.id.clone(), b.id.clone()]);
        assert!(second.is_available);

        r.node.reputation().flush().await.unwrap();
        let owner = r.node.registry().get(&a.id).unwrap();
        assert_eq!(owner.uploads, 1);
        assert_eq!(owner.reputation, DEFAULT_REPUTATION + UPLOAD_BONUS);
    }

    #[tokio::test]
    async fn test_submit_validation() {
        let r = start_node();
        let a = r.node.register_peer("a", "10.0.0.1", 9000).unwrap();

        let err = r.node.submit_file(&a.id, b"", "x.pdf", "", "").await.unwrap_err();
        assert!(matches!(err, LibraryError::Validation(ValidationError::EmptyFile)));

        let err = r.node.submit_file(&a.id, b"data", "x.exe", "", "").await.unwrap_err();
        assert!(matches!(err, LibraryError::Validation(ValidationError::UnsupportedType(_))));

        let err = r.node.submit_file("peer-ghost", b"data", "x.pdf", "", "").await.unwrap_err();
        assert!(matches!(err, LibraryError::UnknownPeer(_)));

        assert!(r.node.index().is_empty());
    }

    #[tokio::test]
    async fn test_download_gated_by_reputation() {
        let r = start_node();
        let a = r.node.register_peer("a", "10.0.0.1", 9000).unwrap();
        let b = r.node.register_peer("b", "10.0.0.2", 9000).unwrap();
        let bytes: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

        let file = r.node.submit_file(&a.id, &bytes, "notes.pdf", "", "Math").await.unwrap();
        assert_eq!(file.peer_locations, vec![a.id.clone()]);

        set_score(&r.node, &b.id, 1.5).await;
        match r.node.request_download(&file.cid, &b.id).await.unwrap() {
            DownloadOutcome::Denied { reason } => assert!(reason.contains("3.0")),
            other => panic!("expected denial, got {other:?}"),
        }

        set_score(&r.node, &b.id, 5.0).await;
        match r.node.request_download(&file.cid, &b.id).await.unwrap() {
            DownloadOutcome::Granted { file: granted, bytes: received, transfer } => {
                assert_eq!(received, bytes);
                assert_eq!(sha256_hex(&received), granted.checksum);
                assert_eq!(transfer.status, TransferStatus::Completed);
            }
            other => panic!("expected grant, got {other:?}"),
        }

        r.node.reputation().flush().await.unwrap();
        assert_eq!(r.node.registry().get(&b.id).unwrap().downloads, 1);
        assert_eq!(r.node.registry().get(&a.id).unwrap().uploads, 2);
        assert_eq!(r.node.index().get(&file.cid).unwrap().download_count, 1);

        let stats = r.node.stats();
        assert_eq!(stats.transfers.total_downloads, 1);
        assert_eq!(r.node.metrics().get_snapshot(stats).downloads_denied, 1);
    }

    #[tokio::test]
    async fn test_download_unknown_file_and_peer() {
        let r = start_node();
        let b = r.node.register_peer("b", "10.0.0.2", 9000).unwrap();

        assert!(matches!(
            r.node.request_download("kx-missing", &b.id).await.unwrap(),
            DownloadOutcome::NotFound
        ));
        assert!(matches!(
            r.node.request_download("kx-missing", "peer-ghost").await,
            Err(LibraryError::UnknownPeer(_))
        ));
    }

    #[tokio::test]
    async fn test_rating_and_stats() {
        let r = start_node();
        let a = r.node.register_peer("a", "10.0.0.1", 9000).unwrap();
        let b = r.node.register_peer("b", "10.0.0.2", 9000).unwrap();

        r.node
            .submit_rating(RatingSubmission {
                rater_id: a.id.clone(),
                target_id: b.id.clone(),
                target_kind: RatingTarget::Peer,
                score: 5,
                comment: "helpful notes".to_string(),
            })
            .await
            .unwrap();
        r.node.reputation().flush().await.unwrap();

        let stats = r.node.stats();
        assert_eq!(stats.node_id, r.node.local_peer().id);
        assert_eq!(stats.peers.known_peers, 3);
        assert_eq!(stats.ratings, 1);
        assert_eq!(stats.reputation.total_events, 1);
    }

    #[tokio::test]
    async fn test_throttler_follows_reputation() {
        let r = start_node();
        let a = r.node.register_peer("a", "10.0.0.1", 9000).unwrap();

        r.node.throttling().get_or_create(&a.id, DEFAULT_REPUTATION);
        set_score(&r.node, &a.id, 9.0).await;

        let info = r.node.throttling().peer_info(&a.id).unwrap();
        assert_eq!(info.tier, crate::throttling::throttler::BandwidthTier::Premium);
    }

    fn hosted_record(cid: &str, content: &[u8], owner_id: &str) -> AcademicFile {
        AcademicFile::new(
            cid.to_string(),
            sha256_hex(content),
            owner_id,
            content.len() as u64,
            ".pdf".to_string(),
            FileMetadata {
                file_name: "exam.pdf".to_string(),
                ..Default::default()
            },
            0,
        )
    }

    /// A second node serving `content` under `cid` on the peer protocol
    async fn serve_host(cid: &str, content: &[u8]) -> (Running, u16) {
        let host = start_node();
        let owner = host.node.local_peer().id.clone();
        host.node.store().put(cid, content).await.unwrap();
        host.node.index().add(hosted_record(cid, content, &owner));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        host.node.start_listener(listener, host._shutdown.subscribe());
        (host, port)
    }

    fn files_in(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_fetch_from_peer_adopts_verified_copy() {
        let data = b"operating systems final exam answers".to_vec();
        let cid = compute_cid(&data);
        let (_host, port) = serve_host(&cid, &data).await;

        let r = start_node();
        let host = r.node.register_peer("host", "127.0.0.1", port).unwrap();
        let reader = r.node.register_peer("reader", "10.0.0.9", 9000).unwrap();
        r.node.index().add(hosted_record(&cid, &data, &host.id));

        match r.node.request_download(&cid, &reader.id).await.unwrap() {
            DownloadOutcome::Granted { bytes, .. } => assert_eq!(bytes, data),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let dest = r.node.library.download_dir.join(&cid);
        assert_eq!(r.node.store().path(&cid), Some(dest));
        assert_eq!(files_in(&r.node.library.download_dir), 1);
        let locations = r.node.index().get(&cid).unwrap().peer_locations;
        assert_eq!(locations, vec![host.id.clone(), r.node.local_peer().id.clone()]);
    }

    #[tokio::test]
    async fn test_fetch_of_tampered_copy_is_not_adopted() {
        let genuine = b"operating systems final exam answers".to_vec();
        let cid = compute_cid(&genuine);
        let (_host, port) = serve_host(&cid, b"tampered copy of the exam answers").await;

        let r = start_node();
        let host = r.node.register_peer("host", "127.0.0.1", port).unwrap();
        let reader = r.node.register_peer("reader", "10.0.0.9", 9000).unwrap();
        r.node.index().add(hosted_record(&cid, &genuine, &host.id));

        let outcome = r.node.request_download(&cid, &reader.id).await.unwrap();
        assert!(matches!(outcome, DownloadOutcome::NotFound));

        assert!(!r.node.store().contains(&cid));
        assert_eq!(r.node.index().get(&cid).unwrap().peer_locations, vec![host.id.clone()]);
        assert_eq!(files_in(&r.node.library.download_dir), 0);
    }

    #[tokio::test]
    async fn test_departed_peer_leaves_file_locations() {
        let r = start_node();
        let a = r.node.register_peer("a", "10.0.0.1", 9000).unwrap();
        let b = r.node.register_peer("b", "10.0.0.2", 9000).unwrap();

        let file = r.node.submit_file(&a.id, b"shared notes", "n.pdf", "", "").await.unwrap();
        r.node.index().add_peer_location(&file.cid, &b.id).unwrap();

        r.node.discovery().handle_leave(&a.id, current_timestamp());

        let mut locations = Vec::new();
        for _ in 0..200 {
            locations = r.node.index().get(&file.cid).unwrap().peer_locations;
            if locations.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(locations, vec![b.id.clone()]);
        assert!(r.node.index().get(&file.cid).unwrap().is_available);
    }

    #[tokio::test]
    async fn test_rescan_restores_files_on_disk() {
        let dir = TempDir::new().unwrap();
        let config = create_test_config(&dir);
        let shared = config.library.shared_dir.clone();
        std::fs::create_dir_all(&shared).unwrap();

        let blob = b"week 3 lab handout".to_vec();
        let blob_cid = compute_cid(&blob);
        std::fs::write(shared.join(&blob_cid), &blob).unwrap();
        std::fs::write(shared.join("syllabus.pdf"), b"course syllabus").unwrap();
        std::fs::write(shared.join("setup.exe"), b"not a document").unwrap();
        std::fs::write(shared.join(compute_cid(b"other")), b"renamed bytes").unwrap();
        std::fs::write(shared.join(format!("{}{}", blob_cid, PART_SUFFIX)), b"half").unwrap();

        let node = Node::with_probe(&config, Arc::new(NoProbe));
        let restored = node.rescan_library().await.unwrap();
        assert_eq!(restored.len(), 2);

        let local_id = node.local_peer().id.clone();
        let stored = node.index().get(&blob_cid).unwrap();
        assert_eq!(stored.owner_id, local_id);
        assert_eq!(stored.checksum, sha256_hex(&blob));
        assert!(stored.is_available);
        assert_eq!(node.store().path(&blob_cid), Some(shared.join(&blob_cid)));

        let syllabus_cid = compute_cid(b"course syllabus");
        let syllabus = node.index().get(&syllabus_cid).unwrap();
        assert_eq!(syllabus.file_name, "syllabus.pdf");
        assert_eq!(syllabus.file_type, ".pdf");
        assert_eq!(node.store().path(&syllabus_cid), Some(shared.join("syllabus.pdf")));

        // Running it again changes nothing
        node.rescan_library().await.unwrap();
        assert_eq!(node.index().len(), 2);
        assert_eq!(node.store().len(), 2);
    }

    #[tokio::test]
    async fn test_rescan_without_directories() {
        let dir = TempDir::new().unwrap();
        let node = Node::with_probe(&create_test_config(&dir), Arc::new(NoProbe));

        assert!(node.rescan_library().await.unwrap().is_empty());
        assert!(node.index().is_empty());
    }
}
