use crate::core::config::ReputationConfig;
use crate::core::error::ReputationError;
use crate::models::peer::Peer;
use crate::models::reputation::{ReputationEvent, ReputationEventKind};
use crate::reputation::policy::{
    calculate_reputation, evaluate_access, rating_delta, AccessDecision, DOWNLOAD_PENALTY,
    INACTIVITY_DECAY, LEECHING_PENALTY, UPLOAD_BONUS,
};
use crate::stores::peer_registry::PeerRegistry;
use crate::utils::time::current_timestamp;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Notified after every applied event with the peer's new stored score
pub trait ScoreListener: Send + Sync {
    fn on_score_changed(&self, peer_id: &str, score: f64);
}

#[derive(Debug, Clone)]
pub struct ReputationSettings {
    pub decay_interval: Duration,
    /// Seconds without contact before decay applies
    pub inactivity_threshold: i64,
    pub queue_size: usize,
}

impl From<&ReputationConfig> for ReputationSettings {
    fn from(config: &ReputationConfig) -> Self {
        Self {
            decay_interval: Duration::from_secs(config.decay_interval),
            inactivity_threshold: config.inactivity_threshold,
            queue_size: config.event_queue_size,
        }
    }
}

impl Default for ReputationSettings {
    fn default() -> Self {
        Self::from(&ReputationConfig::default())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReputationStats {
    pub total_events: usize,
    pub tracked_peers: usize,
    pub leecher_count: usize,
    pub average_reputation: f64,
}

/// A peer's standing, stored and effective
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerStanding {
    pub peer_id: String,
    pub name: String,
    pub reputation: f64,
    pub effective_reputation: f64,
    pub uploads: u64,
    pub downloads: u64,
    pub is_leecher: bool,
}

impl From<&Peer> for PeerStanding {
    fn from(peer: &Peer) -> Self {
        Self {
            peer_id: peer.id.clone(),
            name: peer.name.clone(),
            reputation: peer.reputation,
            effective_reputation: calculate_reputation(peer),
            uploads: peer.uploads,
            downloads: peer.downloads,
            is_leecher: peer.is_leecher,
        }
    }
}

enum Command {
    Apply(ReputationEvent),
    Flush(oneshot::Sender<()>),
}

/// The only component allowed to change a peer's score
///
/// Record methods enqueue events on a bounded queue; a single consumer task
/// applies them in submission order and appends each to the history.
pub struct ReputationEngine {
    registry: Arc<PeerRegistry>,
    settings: ReputationSettings,
    sender: Mutex<Option<mpsc::Sender<Command>>>,
    receiver: Mutex<Option<mpsc::Receiver<Command>>>,
    history: RwLock<Vec<ReputationEvent>>,
    by_peer: DashMap<String, Vec<usize>>,
    listeners: RwLock<Vec<Arc<dyn ScoreListener>>>,
}

impl ReputationEngine {
    pub fn new(registry: Arc<PeerRegistry>, settings: ReputationSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_size);

        Self {
            registry,
            settings,
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            history: RwLock::new(Vec::new()),
            by_peer: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ScoreListener>) {
        self.listeners.write().push(listener);
    }

    pub fn effective_reputation(&self, peer_id: &str) -> Option<f64> {
        self.registry.get(peer_id).map(|peer| calculate_reputation(&peer))
    }

    pub fn standing(&self, peer_id: &str) -> Option<PeerStanding> {
        self.registry.get(peer_id).map(|peer| PeerStanding::from(&peer))
    }

    pub fn can_download(&self, peer_id: &str) -> AccessDecision {
        match self.registry.get(peer_id) {
            Some(peer) => evaluate_access(&peer),
            None => AccessDecision::UnknownPeer,
        }
    }

    pub async fn record_upload(&self, peer_id: &str) -> Result<(), ReputationError> {
        self.submit(ReputationEventKind::Upload, peer_id, UPLOAD_BONUS, "Shared a file")
            .await
    }

    pub async fn record_download(&self, peer_id: &str) -> Result<(), ReputationError> {
        self.submit(
            ReputationEventKind::Download,
            peer_id,
            -DOWNLOAD_PENALTY,
            "Downloaded a file",
        )
        .await
    }

    /// Enqueue the effect of a received rating
    ///
    /// Neutral scores enqueue nothing and return `Ok(false)`.
    pub async fn record_rating(&self, peer_id: &str, score: f64) -> Result<bool, ReputationError> {
        let Some(delta) = rating_delta(score) else {
            self.ensure_known(peer_id)?;
            debug!(peer_id = %peer_id, score = score, "Neutral rating, no reputation change");
            return Ok(false);
        };

        self.submit(
            ReputationEventKind::Rating,
            peer_id,
            delta,
            format!("Received rating {:.1}", score),
        )
        .await?;
        Ok(true)
    }

    pub async fn record_leeching(&self, peer_id: &str) -> Result<(), ReputationError> {
        self.submit(
            ReputationEventKind::Leeching,
            peer_id,
            -LEECHING_PENALTY,
            "Leeching detected",
        )
        .await
    }

    /// Manual adjustment, e.g. a moderator reward
    pub async fn record_contribution(
        &self,
        peer_id: &str,
        delta: f64,
        reason: &str,
    ) -> Result<(), ReputationError> {
        self.submit(ReputationEventKind::Contribution, peer_id, delta, reason)
            .await
    }

    /// Wait until every event enqueued before this call has been applied
    pub async fn flush(&self) -> Result<(), ReputationError> {
        let tx = self.sender()?;
        let (done_tx, done_rx) = oneshot::channel();

        tx.send(Command::Flush(done_tx))
            .await
            .map_err(|_| ReputationError::EngineStopped)?;
        done_rx.await.map_err(|_| ReputationError::EngineStopped)
    }

    /// Enqueue an inactivity event for every peer silent past the threshold
    pub async fn run_decay_cycle(&self, now: i64) -> usize {
        let inactive = self
            .registry
            .inactive_peers(now, self.settings.inactivity_threshold);
        let mut decayed = 0;

        for peer_id in inactive {
            let result = self
                .submit(
                    ReputationEventKind::Inactivity,
                    &peer_id,
                    -INACTIVITY_DECAY,
                    "Inactivity decay",
                )
                .await;

            match result {
                Ok(()) => decayed += 1,
                Err(e) => {
                    warn!(peer_id = %peer_id, error = %e, "Failed to enqueue decay event");
                    break;
                }
            }
        }

        decayed
    }

    pub fn history(&self, peer_id: &str) -> Vec<ReputationEvent> {
        let Some(indices) = self.by_peer.get(peer_id).map(|entry| entry.value().clone()) else {
            return Vec::new();
        };

        let history = self.history.read();
        indices
            .into_iter()
            .filter_map(|i| history.get(i).cloned())
            .collect()
    }

    /// Peers ordered by effective score, best first
    pub fn top_contributors(&self, limit: usize) -> Vec<PeerStanding> {
        let mut standings: Vec<PeerStanding> = self
            .registry
            .all_peers()
            .iter()
            .map(PeerStanding::from)
            .collect();

        standings.sort_by(|a, b| {
            b.effective_reputation
                .total_cmp(&a.effective_reputation)
                .then_with(|| b.uploads.cmp(&a.uploads))
        });
        standings.truncate(limit);
        standings
    }

    pub fn leechers(&self) -> Vec<PeerStanding> {
        self.registry
            .leechers()
            .iter()
            .map(PeerStanding::from)
            .collect()
    }

    /// Full history as pretty-printed JSON, in application order
    pub fn export_history(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&*self.history.read())
    }

    pub fn stats(&self) -> ReputationStats {
        let peers = self.registry.all_peers();
        let average_reputation = if peers.is_empty() {
            0.0
        } else {
            peers.iter().map(|p| p.reputation).sum::<f64>() / peers.len() as f64
        };

        ReputationStats {
            total_events: self.history.read().len(),
            tracked_peers: self.by_peer.len(),
            leecher_count: peers.iter().filter(|p| p.is_leecher).count(),
            average_reputation,
        }
    }

    /// Spawn the event consumer and the decay cycle
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(2);

        if let Some(receiver) = self.receiver.lock().take() {
            handles.push(tokio::spawn(
                Arc::clone(self).run_consumer(receiver, shutdown.clone()),
            ));
        }
        handles.push(tokio::spawn(Arc::clone(self).run_decay(shutdown)));

        info!(
            decay_interval_seconds = self.settings.decay_interval.as_secs(),
            inactivity_threshold_seconds = self.settings.inactivity_threshold,
            "Reputation engine started"
        );

        handles
    }

    fn sender(&self) -> Result<mpsc::Sender<Command>, ReputationError> {
        self.sender
            .lock()
            .clone()
            .ok_or(ReputationError::EngineStopped)
    }

    fn ensure_known(&self, peer_id: &str) -> Result<(), ReputationError> {
        if self.registry.contains(peer_id) {
            Ok(())
        } else {
            Err(ReputationError::UnknownPeer(peer_id.to_string()))
        }
    }

    async fn submit(
        &self,
        kind: ReputationEventKind,
        peer_id: &str,
        delta: f64,
        reason: impl Into<String>,
    ) -> Result<(), ReputationError> {
        self.ensure_known(peer_id)?;
        let tx = self.sender()?;
        let event = ReputationEvent::new(kind, peer_id, delta, reason, current_timestamp());

        tx.send(Command::Apply(event))
            .await
            .map_err(|_| ReputationError::EngineStopped)
    }

    fn handle(&self, command: Command) {
        match command {
            Command::Apply(event) => self.apply(event),
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    fn apply(&self, event: ReputationEvent) {
        let Some(change) = self
            .registry
            .apply_reputation(&event.peer_id, event.kind, event.delta)
        else {
            warn!(peer_id = %event.peer_id, kind = %event.kind, "Dropping event for unknown peer");
            return;
        };

        debug!(
            peer_id = %event.peer_id,
            kind = %event.kind,
            delta = event.delta,
            previous = change.previous,
            score = change.score,
            "Reputation event applied"
        );

        let peer_id = event.peer_id.clone();
        let kind = event.kind;
        self.append(event);

        for listener in self.listeners.read().iter() {
            listener.on_score_changed(&peer_id, change.score);
        }

        if change.became_leecher && kind != ReputationEventKind::Leeching {
            info!(peer_id = %peer_id, "Peer flagged as leecher");
            self.apply(ReputationEvent::new(
                ReputationEventKind::Leeching,
                &peer_id,
                -LEECHING_PENALTY,
                "Downloads exceed three times uploads",
                current_timestamp(),
            ));
        }
    }

    fn append(&self, event: ReputationEvent) {
        let peer_id = event.peer_id.clone();
        let index = {
            let mut history = self.history.write();
            history.push(event);
            history.len() - 1
        };
        self.by_peer.entry(peer_id).or_default().push(index);
    }

    async fn run_consumer(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        self.sender.lock().take();
                        receiver.close();
                        while let Some(command) = receiver.recv().await {
                            self.handle(command);
                        }
                        break;
                    }
                }
            }
        }

        info!(
            total_events = self.history.read().len(),
            "Reputation consumer stopped"
        );
    }

    async fn run_decay(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.decay_interval);
        // The first tick fires immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let decayed = self.run_decay_cycle(current_timestamp()).await;
                    if decayed > 0 {
                        info!(decayed_peers = decayed, "Inactivity decay applied");
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reputation decay stopped");
    }
}
