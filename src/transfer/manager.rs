use crate::core::config::TransferConfig;
use crate::core::error::TransferError;
use crate::models::file::AcademicFile;
use crate::models::peer::DEFAULT_REPUTATION;
use crate::models::transfer::{Direction, ProgressUpdate, Transfer, TransferStatus};
use crate::protocol::client::request_file;
use crate::protocol::codec::{write_envelope, WireLimits};
use crate::protocol::message::{Envelope, MessageType, TransferRequest, TransferResponse};
use crate::stores::content_index::ContentIndex;
use crate::stores::local_store::LocalStore;
use crate::stores::peer_registry::PeerRegistry;
use crate::throttling::manager::ThrottlingManager;
use crate::throttling::throttler::Throttler;
use crate::utils::hashing::cid_from_digest;
use crate::utils::time::current_timestamp;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const INTEGRITY_FAILURE: &str = "integrity check failed";

const PROGRESS_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub chunk_size: usize,
    pub max_concurrent: usize,
    pub limits: WireLimits,
}

impl From<&TransferConfig> for TransferSettings {
    fn from(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            max_concurrent: config.max_concurrent.max(1),
            limits: WireLimits::from(config),
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

/// What is being moved and what it must hash to
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub cid: String,
    pub file_name: String,
    /// Remote side of the transfer
    pub peer_id: String,
    pub total_bytes: u64,
    /// Full SHA-256 hex digest the bytes must match
    pub checksum: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransferStats {
    pub total_uploads: u64,
    pub total_downloads: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub active_transfers: usize,
    pub pending_transfers: usize,
    pub failed_transfers: u64,
}

enum PumpOutcome {
    Completed { checksum: String },
    Cancelled,
}

/// Moves file bytes between this node and its peers
///
/// Every transfer holds a permit of a semaphore sized by `max_concurrent`.
/// Bytes move in chunks; each chunk waits on the peer's throttler, updates the
/// transfer record and broadcasts a progress update. Cancellation is checked
/// between chunks.
pub struct TransferManager {
    settings: TransferSettings,
    store: Arc<LocalStore>,
    index: Arc<ContentIndex>,
    registry: Arc<PeerRegistry>,
    throttling: Arc<ThrottlingManager>,
    semaphore: Arc<Semaphore>,
    transfers: DashMap<String, Transfer>,
    cancel_flags: DashMap<String, Arc<AtomicBool>>,
    progress: broadcast::Sender<ProgressUpdate>,
    total_uploads: AtomicU64,
    total_downloads: AtomicU64,
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
    failed_transfers: AtomicU64,
}

impl TransferManager {
    pub fn new(
        settings: TransferSettings,
        store: Arc<LocalStore>,
        index: Arc<ContentIndex>,
        registry: Arc<PeerRegistry>,
        throttling: Arc<ThrottlingManager>,
    ) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_SIZE);

        Self {
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent)),
            settings,
            store,
            index,
            registry,
            throttling,
            transfers: DashMap::new(),
            cancel_flags: DashMap::new(),
            progress,
            total_uploads: AtomicU64::new(0),
            total_downloads: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            failed_transfers: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> &WireLimits {
        &self.settings.limits
    }

    /// Throttler for a peer at its current stored score; None when throttling is off
    pub fn throttler_for(&self, peer_id: &str) -> Option<Arc<Throttler>> {
        let reputation = self
            .registry
            .get(peer_id)
            .map(|peer| peer.reputation)
            .unwrap_or(DEFAULT_REPUTATION);
        self.throttling.limiter_for(peer_id, reputation)
    }

    /// Stream `job.total_bytes` from `reader` to `writer` (upload direction)
    pub async fn send<R, W>(
        &self,
        job: &TransferJob,
        reader: &mut R,
        writer: &mut W,
        throttler: Option<Arc<Throttler>>,
    ) -> Result<Transfer, TransferError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (_permit, id, cancel) = self.begin(job, Direction::Upload).await?;

        match self.pump(&id, reader, writer, job.total_bytes, throttler, &cancel).await {
            Ok(PumpOutcome::Completed { .. }) => self.finish(&id, TransferStatus::Completed, None),
            Ok(PumpOutcome::Cancelled) => self.finish(&id, TransferStatus::Cancelled, None),
            Err(e) => {
                self.finish(&id, TransferStatus::Failed, Some(e.to_string()))?;
                Err(e.into())
            }
        }
    }

    /// Receive into a file at `dest`, deleting it unless the bytes verify
    pub async fn receive_to_path<R>(
        &self,
        job: &TransferJob,
        reader: &mut R,
        dest: &Path,
        throttler: Option<Arc<Throttler>>,
    ) -> Result<Transfer, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let (_permit, id, cancel) = self.begin(job, Direction::Download).await?;

        let result = async {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).await?;
            }
            let mut file = fs::File::create(dest).await?;
            let outcome = self
                .pump(&id, reader, &mut file, job.total_bytes, throttler, &cancel)
                .await?;
            file.sync_all().await?;
            Ok::<_, io::Error>(outcome)
        }
        .await;

        let transfer = match result {
            Ok(PumpOutcome::Completed { checksum }) if checksum == job.checksum => {
                return self.finish(&id, TransferStatus::Completed, None);
            }
            Ok(PumpOutcome::Completed { checksum }) => {
                warn!(
                    transfer_id = %id,
                    cid = %job.cid,
                    expected = %job.checksum,
                    actual = %checksum,
                    "Checksum mismatch"
                );
                self.finish(&id, TransferStatus::Failed, Some(INTEGRITY_FAILURE.to_string()))
            }
            Ok(PumpOutcome::Cancelled) => self.finish(&id, TransferStatus::Cancelled, None),
            Err(e) => self
                .finish(&id, TransferStatus::Failed, Some(e.to_string()))
                .and(Err(TransferError::Io(e))),
        };

        if let Err(e) = fs::remove_file(dest).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %dest.display(), error = %e, "Failed to remove partial download");
            }
        }

        transfer
    }

    /// Receive into memory; bytes are only returned when they verify
    pub async fn receive_to_memory<R>(
        &self,
        job: &TransferJob,
        reader: &mut R,
        throttler: Option<Arc<Throttler>>,
    ) -> Result<(Transfer, Option<Vec<u8>>), TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let (_permit, id, cancel) = self.begin(job, Direction::Download).await?;
        let capacity = job
            .total_bytes
            .min(self.settings.limits.max_message_size as u64) as usize;
        let mut buffer = Vec::with_capacity(capacity);

        match self
            .pump(&id, reader, &mut buffer, job.total_bytes, throttler, &cancel)
            .await
        {
            Ok(PumpOutcome::Completed { checksum }) if checksum == job.checksum => {
                Ok((self.finish(&id, TransferStatus::Completed, None)?, Some(buffer)))
            }
            Ok(PumpOutcome::Completed { .. }) => {
                warn!(transfer_id = %id, cid = %job.cid, "Checksum mismatch");
                let failed = self.finish(
                    &id,
                    TransferStatus::Failed,
                    Some(INTEGRITY_FAILURE.to_string()),
                )?;
                Ok((failed, None))
            }
            Ok(PumpOutcome::Cancelled) => {
                Ok((self.finish(&id, TransferStatus::Cancelled, None)?, None))
            }
            Err(e) => {
                self.finish(&id, TransferStatus::Failed, Some(e.to_string()))?;
                Err(TransferError::Io(e))
            }
        }
    }

    /// REQUEST an indexed file from a remote peer and store it at `dest`
    ///
    /// The peer's RESPONSE must agree with `file` on CID, checksum and size
    /// before any bytes are read, and the received bytes must hash to the
    /// indexed checksum. `dest` is removed on every outcome but success.
    pub async fn download_from_peer(
        &self,
        addr: &str,
        file: &AcademicFile,
        requester_id: &str,
        dest: &Path,
    ) -> Result<Transfer, TransferError> {
        let request = TransferRequest {
            cid: file.cid.clone(),
            requester_id: requester_id.to_string(),
            timestamp: current_timestamp(),
        };

        let (mut conn, response) = request_file(addr, &request, &self.settings.limits).await?;
        if !response.accepted {
            let reason = response.reason.unwrap_or_else(|| "no reason given".to_string());
            info!(addr = %addr, cid = %file.cid, reason = %reason, "Download rejected by peer");
            return Err(TransferError::Rejected(reason));
        }

        if let Err(reason) = check_offer(file, &response) {
            warn!(addr = %addr, cid = %file.cid, reason = %reason, "Refusing peer offer");
            return Err(TransferError::Mismatch {
                cid: file.cid.clone(),
                reason,
            });
        }

        let job = TransferJob {
            cid: file.cid.clone(),
            file_name: file.file_name.clone(),
            peer_id: addr.to_string(),
            total_bytes: file.size,
            checksum: file.checksum.clone(),
        };

        self.receive_to_path(&job, &mut conn, dest, None).await
    }

    /// Answer a REQUEST from the local store: RESPONSE line, then raw bytes
    ///
    /// Files that are not indexed or not held locally are refused with a
    /// reason; that is not an error.
    pub async fn serve_request<W>(
        &self,
        writer: &mut W,
        local_id: &str,
        request: &TransferRequest,
    ) -> Result<Option<Transfer>, TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        let limits = self.settings.limits;

        let Some(file) = self.index.get(&request.cid) else {
            self.reject(writer, local_id, &request.cid, "File not found").await?;
            return Ok(None);
        };

        let Some((mut source, size)) = self.store.open(&request.cid).await? else {
            self.reject(writer, local_id, &request.cid, "File not available locally")
                .await?;
            return Ok(None);
        };

        let response = TransferResponse {
            cid: file.cid.clone(),
            accepted: true,
            reason: None,
            file_size: size,
            checksum: file.checksum.clone(),
        };
        write_envelope(
            writer,
            &Envelope::new(MessageType::Response, local_id, &response)?,
            &limits,
        )
        .await?;

        let job = TransferJob {
            cid: file.cid,
            file_name: file.file_name,
            peer_id: request.requester_id.clone(),
            total_bytes: size,
            checksum: file.checksum,
        };
        let throttler = self.throttler_for(&request.requester_id);

        self.send(&job, &mut source, writer, throttler).await.map(Some)
    }

    /// Stop a pending or active transfer at the next chunk boundary
    pub fn cancel(&self, id: &str) -> Result<(), TransferError> {
        let status = self
            .transfers
            .get(id)
            .map(|t| t.status)
            .ok_or_else(|| TransferError::NotFound(id.to_string()))?;

        if !matches!(status, TransferStatus::Pending | TransferStatus::Active) {
            return Err(TransferError::NotActive {
                id: id.to_string(),
                status,
            });
        }

        if let Some(flag) = self.cancel_flags.get(id) {
            flag.store(true, Ordering::SeqCst);
        }
        info!(transfer_id = %id, "Transfer cancellation requested");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Transfer> {
        self.transfers.get(id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<Transfer> {
        let mut transfers: Vec<Transfer> = self
            .transfers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        transfers.sort_by_key(|t| t.started_at);
        transfers
    }

    pub fn active_count(&self) -> usize {
        self.count_status(TransferStatus::Active)
    }

    /// Transfers waiting for a concurrency slot
    pub fn pending_count(&self) -> usize {
        self.count_status(TransferStatus::Pending)
    }

    fn count_status(&self, status: TransferStatus) -> usize {
        self.transfers
            .iter()
            .filter(|entry| entry.value().status == status)
            .count()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.progress.subscribe()
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            total_uploads: self.total_uploads.load(Ordering::Relaxed),
            total_downloads: self.total_downloads.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            active_transfers: self.active_count(),
            pending_transfers: self.pending_count(),
            failed_transfers: self.failed_transfers.load(Ordering::Relaxed),
        }
    }

    /// Refuse new transfers; running ones finish
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Answer a REQUEST with a refusal
    pub async fn reject<W>(
        &self,
        writer: &mut W,
        local_id: &str,
        cid: &str,
        reason: &str,
    ) -> Result<(), TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        debug!(cid = %cid, reason = %reason, "Refusing transfer request");
        let response = TransferResponse::reject(cid, reason);
        let env = Envelope::new(MessageType::Response, local_id, &response)?;
        write_envelope(writer, &env, &self.settings.limits).await?;
        Ok(())
    }

    /// Record the transfer as pending, then wait for a concurrency slot
    async fn begin(
        &self,
        job: &TransferJob,
        direction: Direction,
    ) -> Result<(OwnedSemaphorePermit, String, Arc<AtomicBool>), TransferError> {
        let id = format!("tx-{:016x}", rand::random::<u64>());
        let transfer = Transfer::new(
            id.clone(),
            &job.cid,
            &job.file_name,
            &job.peer_id,
            direction,
            job.total_bytes,
            current_timestamp(),
        );

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_flags.insert(id.clone(), Arc::clone(&cancel));
        self.transfers.insert(id.clone(), transfer);

        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.finish(&id, TransferStatus::Cancelled, Some("shutting down".to_string()))?;
                return Err(TransferError::Closed);
            }
        };

        if let Some(mut entry) = self.transfers.get_mut(&id) {
            entry.transition(TransferStatus::Active, current_timestamp());
        }

        info!(
            transfer_id = %id,
            cid = %job.cid,
            peer_id = %job.peer_id,
            direction = ?direction,
            total_bytes = job.total_bytes,
            "Transfer started"
        );

        Ok((permit, id, cancel))
    }

    async fn pump<R, W>(
        &self,
        id: &str,
        reader: &mut R,
        writer: &mut W,
        total: u64,
        throttler: Option<Arc<Throttler>>,
        cancel: &AtomicBool,
    ) -> io::Result<PumpOutcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let io_timeout = self.settings.limits.read_timeout;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.settings.chunk_size];
        let mut moved = 0u64;

        while moved < total {
            if cancel.load(Ordering::SeqCst) {
                return Ok(PumpOutcome::Cancelled);
            }

            let remaining = (total - moved).min(self.settings.chunk_size as u64) as usize;
            let grant = match &throttler {
                Some(t) => t.acquire(remaining).await.min(remaining),
                None => remaining,
            };

            let chunk = &mut buf[..grant];
            with_timeout(io_timeout, "read", reader.read_exact(chunk)).await?;
            with_timeout(io_timeout, "write", writer.write_all(chunk)).await?;
            hasher.update(&*chunk);
            moved += grant as u64;

            self.advance(id, grant as u64);
        }

        with_timeout(io_timeout, "flush", writer.flush()).await?;

        if cancel.load(Ordering::SeqCst) && moved < total {
            return Ok(PumpOutcome::Cancelled);
        }

        Ok(PumpOutcome::Completed {
            checksum: hex::encode(hasher.finalize()),
        })
    }

    fn advance(&self, id: &str, bytes: u64) {
        let update = self.transfers.get_mut(id).map(|mut t| {
            t.advance(bytes);
            ProgressUpdate::from(&*t)
        });

        if let Some(update) = update {
            // No receivers is fine
            let _ = self.progress.send(update);
        }
    }

    fn finish(
        &self,
        id: &str,
        status: TransferStatus,
        error: Option<String>,
    ) -> Result<Transfer, TransferError> {
        self.cancel_flags.remove(id);

        let mut entry = self
            .transfers
            .get_mut(id)
            .ok_or_else(|| TransferError::NotFound(id.to_string()))?;

        entry.transition(status, current_timestamp());
        entry.error = error;
        let transfer = entry.clone();
        drop(entry);

        match (status, transfer.direction) {
            (TransferStatus::Completed, Direction::Upload) => {
                self.total_uploads.fetch_add(1, Ordering::Relaxed);
                self.bytes_uploaded.fetch_add(transfer.sent_bytes, Ordering::Relaxed);
            }
            (TransferStatus::Completed, Direction::Download) => {
                self.total_downloads.fetch_add(1, Ordering::Relaxed);
                self.bytes_downloaded.fetch_add(transfer.sent_bytes, Ordering::Relaxed);
            }
            (TransferStatus::Failed, _) => {
                self.failed_transfers.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        let _ = self.progress.send(ProgressUpdate::from(&transfer));

        match status {
            TransferStatus::Completed => info!(
                transfer_id = %id,
                cid = %transfer.cid,
                bytes = transfer.sent_bytes,
                "Transfer completed"
            ),
            _ => warn!(
                transfer_id = %id,
                cid = %transfer.cid,
                status = %status,
                error = transfer.error.as_deref().unwrap_or(""),
                "Transfer did not complete"
            ),
        }

        Ok(transfer)
    }
}

/// Compare a peer's RESPONSE with the indexed record
fn check_offer(file: &AcademicFile, response: &TransferResponse) -> Result<(), String> {
    if response.cid != file.cid {
        return Err(format!("peer answered for {}", response.cid));
    }
    if cid_from_digest(&file.checksum) != file.cid {
        return Err("indexed checksum does not derive the CID".to_string());
    }
    if response.checksum != file.checksum {
        return Err(format!("peer advertised checksum {}", response.checksum));
    }
    if response.file_size != file.size {
        return Err(format!(
            "peer advertised {} bytes, index has {}",
            response.file_size, file.size
        ));
    }
    Ok(())
}

async fn with_timeout<F, T>(limit: Duration, op: &'static str, fut: F) -> io::Result<T>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    timeout(limit, fut).await.map_err(|_| {
        io::Error::new(io::ErrorKind::TimedOut, format!("transfer {} timed out", op))
    })?
}
