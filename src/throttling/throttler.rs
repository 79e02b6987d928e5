use crate::core::config::ThrottlingConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scores below this land in the leecher tier
pub const LEECHER_THRESHOLD: f64 = 3.0;

/// Scores at or above this land in the premium tier
pub const PREMIUM_THRESHOLD: f64 = 8.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BandwidthTier {
    Leecher,
    Normal,
    Premium,
}

impl BandwidthTier {
    pub fn for_reputation(score: f64) -> Self {
        if score < LEECHER_THRESHOLD {
            BandwidthTier::Leecher
        } else if score >= PREMIUM_THRESHOLD {
            BandwidthTier::Premium
        } else {
            BandwidthTier::Normal
        }
    }
}

/// Bytes per second allowed for each tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierBandwidths {
    pub leecher: u64,
    pub normal: u64,
    pub premium: u64,
}

impl TierBandwidths {
    pub fn for_tier(&self, tier: BandwidthTier) -> u64 {
        match tier {
            BandwidthTier::Leecher => self.leecher,
            BandwidthTier::Normal => self.normal,
            BandwidthTier::Premium => self.premium,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BucketSettings {
    /// Maximum number of tokens a bucket holds
    pub capacity: u32,
    /// One token is added per interval
    pub refill_interval: Duration,
    pub bandwidths: TierBandwidths,
}

impl From<&ThrottlingConfig> for BucketSettings {
    fn from(config: &ThrottlingConfig) -> Self {
        Self {
            capacity: config.bucket_capacity,
            refill_interval: Duration::from_millis(config.refill_interval_ms),
            bandwidths: TierBandwidths {
                leecher: config.leecher_bandwidth,
                normal: config.normal_bandwidth,
                premium: config.premium_bandwidth,
            },
        }
    }
}

impl Default for BucketSettings {
    fn default() -> Self {
        Self::from(&ThrottlingConfig::default())
    }
}

/// Read-only view of a throttler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThrottleInfo {
    pub peer_id: String,
    pub tier: BandwidthTier,
    pub bandwidth: u64,
    pub tokens: u32,
    pub capacity: u32,
    pub token_size: u64,
}

#[derive(Debug)]
struct Bucket {
    tier: BandwidthTier,
    bandwidth: u64,
    tokens: u32,
    token_size: u64,
}

impl Bucket {
    fn for_tier(tier: BandwidthTier, settings: &BucketSettings) -> Self {
        let bandwidth = settings.bandwidths.for_tier(tier);
        Self {
            tier,
            bandwidth,
            tokens: settings.capacity,
            token_size: (bandwidth / settings.capacity as u64).max(1),
        }
    }
}

/// Token bucket pacing one peer's transfers
///
/// The bucket state lives under its own lock, separate from anything the
/// reputation engine holds.
#[derive(Debug)]
pub struct Throttler {
    peer_id: String,
    settings: BucketSettings,
    bucket: Mutex<Bucket>,
}

impl Throttler {
    pub fn new(peer_id: impl Into<String>, reputation: f64, settings: BucketSettings) -> Self {
        let tier = BandwidthTier::for_reputation(reputation);
        Self {
            peer_id: peer_id.into(),
            settings,
            bucket: Mutex::new(Bucket::for_tier(tier, &settings)),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn tier(&self) -> BandwidthTier {
        self.bucket.lock().tier
    }

    pub fn bandwidth(&self) -> u64 {
        self.bucket.lock().bandwidth
    }

    pub fn tokens(&self) -> u32 {
        self.bucket.lock().tokens
    }

    pub fn token_size(&self) -> u64 {
        self.bucket.lock().token_size
    }

    /// Take tokens for up to `bytes` without waiting
    ///
    /// Consumes `ceil(bytes / token_size)` tokens when the balance covers the
    /// request. Otherwise spends whatever is left and returns the bytes those
    /// tokens cover, which is less than requested. Returns 0 on an empty bucket.
    pub fn try_acquire(&self, bytes: usize) -> usize {
        if bytes == 0 {
            return 0;
        }

        let mut bucket = self.bucket.lock();
        let needed = (bytes as u64).div_ceil(bucket.token_size);

        if bucket.tokens as u64 >= needed {
            bucket.tokens -= needed as u32;
            return bytes;
        }

        if bucket.tokens == 0 {
            return 0;
        }

        let granted = bucket.tokens as u64 * bucket.token_size;
        bucket.tokens = 0;
        granted.min(bytes as u64) as usize
    }

    /// Wait for a non-zero grant of up to `bytes`
    ///
    /// Sleeps one refill interval each time the bucket is empty.
    pub async fn acquire(&self, bytes: usize) -> usize {
        if bytes == 0 {
            return 0;
        }

        loop {
            let granted = self.try_acquire(bytes);
            if granted > 0 {
                return granted;
            }
            tokio::time::sleep(self.settings.refill_interval).await;
        }
    }

    /// Add one token, up to capacity
    pub fn refill(&self) {
        let mut bucket = self.bucket.lock();
        if bucket.tokens < self.settings.capacity {
            bucket.tokens += 1;
        }
    }

    /// Re-derive tier, bandwidth and token size if `score` changes the tier
    ///
    /// Returns true when the tier changed. An unchanged tier leaves the bucket
    /// balance alone.
    pub fn update_reputation(&self, score: f64) -> bool {
        let tier = BandwidthTier::for_reputation(score);
        let mut bucket = self.bucket.lock();

        if bucket.tier == tier {
            return false;
        }

        *bucket = Bucket::for_tier(tier, &self.settings);
        true
    }

    pub fn info(&self) -> ThrottleInfo {
        let bucket = self.bucket.lock();
        ThrottleInfo {
            peer_id: self.peer_id.clone(),
            tier: bucket.tier,
            bandwidth: bucket.bandwidth,
            tokens: bucket.tokens,
            capacity: self.settings.capacity,
            token_size: bucket.token_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn settings() -> BucketSettings {
        BucketSettings {
            capacity: 10,
            refill_interval: Duration::from_millis(10),
            bandwidths: TierBandwidths {
                leecher: 50 * 1024,
                normal: 500 * 1024,
                premium: 5 * 1024 * 1024,
            },
        }
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(BandwidthTier::for_reputation(2.0), BandwidthTier::Leecher);
        assert_eq!(BandwidthTier::for_reputation(2.99), BandwidthTier::Leecher);
        assert_eq!(BandwidthTier::for_reputation(3.0), BandwidthTier::Normal);
        assert_eq!(BandwidthTier::for_reputation(5.0), BandwidthTier::Normal);
        assert_eq!(BandwidthTier::for_reputation(7.99), BandwidthTier::Normal);
        assert_eq!(BandwidthTier::for_reputation(8.0), BandwidthTier::Premium);
        assert_eq!(BandwidthTier::for_reputation(10.0), BandwidthTier::Premium);
    }

    #[test]
    fn test_new_throttler_starts_full() {
        let t = Throttler::new("peer-a", 2.0, settings());
        assert_eq!(t.tier(), BandwidthTier::Leecher);
        assert_eq!(t.bandwidth(), 50 * 1024);
        assert_eq!(t.tokens(), 10);
        assert_eq!(t.token_size(), 5 * 1024);
    }

    #[test]
    fn test_full_grant_consumes_ceil_tokens() {
        let t = Throttler::new("peer-a", 5.0, settings());
        let token = t.token_size() as usize;

        assert_eq!(t.try_acquire(token + 1), token + 1);
        assert_eq!(t.tokens(), 8);
    }

    #[test]
    fn test_partial_grant_never_exceeds_balance() {
        let t = Throttler::new("peer-a", 2.0, settings());
        let token = t.token_size() as usize;

        assert_eq!(t.try_acquire(7 * token), 7 * token);
        // Three tokens left; ask for far more
        let granted = t.try_acquire(100 * token);
        assert_eq!(granted, 3 * token);
        assert_eq!(t.tokens(), 0);
        assert_eq!(t.try_acquire(1), 0);
    }

    #[test]
    fn test_zero_byte_request() {
        let t = Throttler::new("peer-a", 5.0, settings());
        assert_eq!(t.try_acquire(0), 0);
        assert_eq!(t.tokens(), 10);
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let t = Throttler::new("peer-a", 5.0, settings());
        t.try_acquire(t.token_size() as usize);
        t.refill();
        t.refill();
        assert_eq!(t.tokens(), 10);
    }

    #[test]
    fn test_update_reputation_only_on_tier_change() {
        let t = Throttler::new("peer-a", 5.0, settings());
        t.try_acquire(3 * t.token_size() as usize);
        assert_eq!(t.tokens(), 7);

        // Same tier: balance untouched
        assert!(!t.update_reputation(6.5));
        assert_eq!(t.tokens(), 7);

        assert!(t.update_reputation(9.0));
        assert_eq!(t.tier(), BandwidthTier::Premium);
        assert_eq!(t.bandwidth(), 5 * 1024 * 1024);
        assert_eq!(t.tokens(), 10);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let t = Arc::new(Throttler::new("peer-a", 5.0, settings()));
        let token = t.token_size() as usize;
        t.try_acquire(10 * token);

        let refiller = {
            let t = Arc::clone(&t);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                t.refill();
            })
        };

        let granted = tokio::time::timeout(Duration::from_secs(2), t.acquire(4 * token))
            .await
            .unwrap();
        assert_eq!(granted, token);
        refiller.await.unwrap();
    }
}
