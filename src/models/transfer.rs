use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }

    /// Allowed moves of the transfer state machine
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        match (self, next) {
            (TransferStatus::Pending, TransferStatus::Active) => true,
            (TransferStatus::Pending, TransferStatus::Failed) => true,
            (TransferStatus::Pending, TransferStatus::Cancelled) => true,
            (TransferStatus::Active, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Active => "active",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

/// Record of one file move between this node and a peer
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transfer {
    pub id: String,
    pub cid: String,
    pub file_name: String,
    /// Remote side of the transfer
    pub peer_id: String,
    pub direction: Direction,
    pub status: TransferStatus,
    pub total_bytes: u64,
    pub sent_bytes: u64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub error: Option<String>,
    /// Completion percentage in [0, 100]
    pub progress: f64,
}

impl Transfer {
    pub fn new(
        id: String,
        cid: &str,
        file_name: &str,
        peer_id: &str,
        direction: Direction,
        total_bytes: u64,
        now: i64,
    ) -> Self {
        Self {
            id,
            cid: cid.to_string(),
            file_name: file_name.to_string(),
            peer_id: peer_id.to_string(),
            direction,
            status: TransferStatus::Pending,
            total_bytes,
            sent_bytes: 0,
            started_at: now,
            finished_at: None,
            error: None,
            progress: 0.0,
        }
    }

    /// Move to `next` if the state machine allows it
    ///
    /// Returns false and leaves the record untouched otherwise.
    pub fn transition(&mut self, next: TransferStatus, now: i64) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        true
    }

    /// Account for `bytes` more moved, capped at `total_bytes`
    pub fn advance(&mut self, bytes: u64) {
        self.sent_bytes = self.sent_bytes.saturating_add(bytes).min(self.total_bytes);
        self.progress = if self.total_bytes == 0 {
            100.0
        } else {
            self.sent_bytes as f64 / self.total_bytes as f64 * 100.0
        };
    }
}

/// Notification pushed after every chunk
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProgressUpdate {
    pub transfer_id: String,
    pub cid: String,
    pub status: TransferStatus,
    pub sent_bytes: u64,
    pub total_bytes: u64,
    pub progress: f64,
}

impl From<&Transfer> for ProgressUpdate {
    fn from(t: &Transfer) -> Self {
        Self {
            transfer_id: t.id.clone(),
            cid: t.cid.clone(),
            status: t.status,
            sent_bytes: t.sent_bytes,
            total_bytes: t.total_bytes,
            progress: t.progress,
        }
    }
}
