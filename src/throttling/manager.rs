use crate::core::config::ThrottlingConfig;
use crate::core::error::ThrottleError;
use crate::reputation::engine::ScoreListener;
use crate::throttling::throttler::{BandwidthTier, BucketSettings, ThrottleInfo, Throttler};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ThrottleStats {
    pub enabled: bool,
    pub total: usize,
    pub leecher: usize,
    pub normal: usize,
    pub premium: usize,
}

/// Owns at most one [`Throttler`] per peer and the shared refill cycle
pub struct ThrottlingManager {
    throttlers: DashMap<String, Arc<Throttler>>,
    settings: BucketSettings,
    enabled: bool,
}

impl ThrottlingManager {
    pub fn new(settings: BucketSettings, enabled: bool) -> Self {
        Self {
            throttlers: DashMap::new(),
            settings,
            enabled,
        }
    }

    pub fn from_config(config: &ThrottlingConfig) -> Self {
        Self::new(BucketSettings::from(config), config.enabled)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fetch the peer's throttler, creating it if needed, and sync its tier
    pub fn get_or_create(&self, peer_id: &str, reputation: f64) -> Arc<Throttler> {
        let throttler = self
            .throttlers
            .entry(peer_id.to_string())
            .or_insert_with(|| {
                debug!(peer_id = %peer_id, reputation = reputation, "Creating throttler");
                Arc::new(Throttler::new(peer_id, reputation, self.settings))
            })
            .value()
            .clone();

        throttler.update_reputation(reputation);
        throttler
    }

    /// Throttler to pace a transfer with, or None while throttling is disabled
    pub fn limiter_for(&self, peer_id: &str, reputation: f64) -> Option<Arc<Throttler>> {
        if self.is_enabled() {
            Some(self.get_or_create(peer_id, reputation))
        } else {
            None
        }
    }

    pub fn get(&self, peer_id: &str) -> Option<Arc<Throttler>> {
        self.throttlers.get(peer_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns whether the tier changed
    pub fn update_reputation(&self, peer_id: &str, score: f64) -> Result<bool, ThrottleError> {
        let throttler = self
            .get(peer_id)
            .ok_or_else(|| ThrottleError::NotFound(peer_id.to_string()))?;

        let changed = throttler.update_reputation(score);
        if changed {
            info!(
                peer_id = %peer_id,
                score = score,
                tier = ?throttler.tier(),
                bandwidth = throttler.bandwidth(),
                "Throttle tier changed"
            );
        }
        Ok(changed)
    }

    pub fn remove(&self, peer_id: &str) -> bool {
        self.throttlers.remove(peer_id).is_some()
    }

    pub fn peer_info(&self, peer_id: &str) -> Result<ThrottleInfo, ThrottleError> {
        self.get(peer_id)
            .map(|t| t.info())
            .ok_or_else(|| ThrottleError::NotFound(peer_id.to_string()))
    }

    /// Add one token to every bucket
    pub fn refill_all(&self) {
        for entry in self.throttlers.iter() {
            entry.value().refill();
        }
    }

    pub fn stats(&self) -> ThrottleStats {
        let mut stats = ThrottleStats {
            enabled: self.is_enabled(),
            ..Default::default()
        };

        for entry in self.throttlers.iter() {
            stats.total += 1;
            match entry.value().tier() {
                BandwidthTier::Leecher => stats.leecher += 1,
                BandwidthTier::Normal => stats.normal += 1,
                BandwidthTier::Premium => stats.premium += 1,
            }
        }

        stats
    }

    pub fn len(&self) -> usize {
        self.throttlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.throttlers.is_empty()
    }

    /// Spawn the refill cycle
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.settings.refill_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => manager.refill_all(),
                    result = shutdown.changed() => {
                        if result.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Throttle refill task stopped");
        })
    }
}

impl ScoreListener for ThrottlingManager {
    fn on_score_changed(&self, peer_id: &str, score: f64) {
        // Peers without a throttler get one on their next transfer
        let _ = self.update_reputation(peer_id, score);
    }
}
