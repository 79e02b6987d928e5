use crate::library::node::NetworkStats;
use crate::utils::time::current_timestamp;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct Metrics {
    pub total_requests: AtomicU64,
    pub files_uploaded: AtomicU64,
    pub downloads_granted: AtomicU64,
    pub downloads_denied: AtomicU64,
    pub ratings_submitted: AtomicU64,
    pub start_time: i64,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub files_uploaded: u64,
    pub downloads_granted: u64,
    pub downloads_denied: u64,
    /// Share of download requests refused by the reputation gate, in percent
    pub denial_rate: f64,
    pub ratings_submitted: u64,
    pub uptime_seconds: i64,
    pub requests_per_second: f64,
    pub network: NetworkStats,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            files_uploaded: AtomicU64::new(0),
            downloads_granted: AtomicU64::new(0),
            downloads_denied: AtomicU64::new(0),
            ratings_submitted: AtomicU64::new(0),
            start_time: current_timestamp(),
        }
    }

    pub fn increment_requests(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_uploads(&self) {
        self.files_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_downloads(&self) {
        self.downloads_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_denied(&self) {
        self.downloads_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_ratings(&self) {
        self.ratings_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Counters plus derived rates, combined with the component stats
    pub fn get_snapshot(&self, network: NetworkStats) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let downloads_granted = self.downloads_granted.load(Ordering::Relaxed);
        let downloads_denied = self.downloads_denied.load(Ordering::Relaxed);

        let attempts = downloads_granted + downloads_denied;
        let denial_rate = if attempts > 0 {
            (downloads_denied as f64 / attempts as f64) * 100.0
        } else {
            0.0
        };

        let uptime_seconds = current_timestamp() - self.start_time;

        let requests_per_second = if uptime_seconds > 0 {
            total_requests as f64 / uptime_seconds as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            total_requests,
            files_uploaded: self.files_uploaded.load(Ordering::Relaxed),
            downloads_granted,
            downloads_denied,
            denial_rate,
            ratings_submitted: self.ratings_submitted.load(Ordering::Relaxed),
            uptime_seconds,
            requests_per_second,
            network,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
