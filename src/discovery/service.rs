use crate::core::config::DiscoveryConfig;
use crate::discovery::events::{event_channel, DiscoveryEvent, EventReceiver, EventSender};
use crate::discovery::probe::LivenessProbe;
use crate::models::peer::Peer;
use crate::protocol::message::Announcement;
use crate::stores::peer_registry::PeerRegistry;
use crate::utils::time::current_timestamp;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub heartbeat_interval: Duration,
    pub cleanup_interval: Duration,
    /// Seconds without contact before an online peer is marked offline
    pub peer_timeout: i64,
    pub event_queue_size: usize,
    pub subscriber_queue_size: usize,
}

impl From<&DiscoveryConfig> for DiscoverySettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval),
            cleanup_interval: Duration::from_secs(config.cleanup_interval),
            peer_timeout: config.peer_timeout,
            event_queue_size: config.event_queue_size,
            subscriber_queue_size: config.subscriber_queue_size,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, serde::Deserialize, PartialEq)]
pub struct DiscoveryStats {
    pub known_peers: usize,
    pub online_peers: usize,
    pub subscribers: usize,
    pub dropped_events: u64,
}

/// Tracks peer liveness and publishes join/leave/timeout/update events
///
/// Events go through one bounded queue into a single broadcaster task, which
/// forwards them to every subscriber with a non-blocking send. A subscriber
/// whose queue is full misses the event.
pub struct Discovery {
    registry: Arc<PeerRegistry>,
    probe: Arc<dyn LivenessProbe>,
    settings: DiscoverySettings,
    local_peer_id: Option<String>,
    publisher: Mutex<Option<EventSender>>,
    queue: Mutex<Option<EventReceiver>>,
    subscribers: Mutex<Vec<EventSender>>,
    dropped_events: AtomicU64,
}

impl Discovery {
    pub fn new(
        registry: Arc<PeerRegistry>,
        probe: Arc<dyn LivenessProbe>,
        settings: DiscoverySettings,
    ) -> Self {
        let (tx, rx) = event_channel(settings.event_queue_size);

        Self {
            registry,
            probe,
            settings,
            local_peer_id: None,
            publisher: Mutex::new(Some(tx)),
            queue: Mutex::new(Some(rx)),
            subscribers: Mutex::new(Vec::new()),
            dropped_events: AtomicU64::new(0),
        }
    }

    /// Exclude this node's own peer record from probing and timeouts
    pub fn with_local_peer(mut self, peer_id: impl Into<String>) -> Self {
        self.local_peer_id = Some(peer_id.into());
        self
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Process an announcement from a peer
    ///
    /// Unknown peers are registered (`PeerJoined`), known offline peers come
    /// back online (`PeerUpdated`), known online peers just refresh `last_seen`.
    pub fn handle_announce(&self, announcement: &Announcement, now: i64) -> Peer {
        let candidate = Peer::new(
            &announcement.name,
            &announcement.address,
            announcement.port,
            now,
        );
        let peer_id = candidate.id.clone();

        if self.registry.register(candidate.clone()) {
            info!(
                peer_id = %peer_id,
                name = %candidate.name,
                endpoint = %candidate.endpoint(),
                "Peer joined"
            );
            self.emit(DiscoveryEvent::PeerJoined(candidate.clone()));
            return candidate;
        }

        match self.registry.set_online(&peer_id, true, now) {
            Some(false) => {
                if let Some(peer) = self.registry.get(&peer_id) {
                    info!(peer_id = %peer_id, "Peer back online");
                    self.emit(DiscoveryEvent::PeerUpdated(peer));
                }
            }
            Some(true) => {
                debug!(peer_id = %peer_id, "Peer announce refreshed last_seen");
            }
            None => {}
        }

        self.registry.get(&peer_id).unwrap_or(candidate)
    }

    /// Explicit departure; returns the peer if it was online
    pub fn handle_leave(&self, peer_id: &str, now: i64) -> Option<Peer> {
        if self.registry.set_online(peer_id, false, now)? {
            let peer = self.registry.get(peer_id)?;
            info!(peer_id = %peer_id, "Peer left");
            self.emit(DiscoveryEvent::PeerLeft(peer.clone()));
            Some(peer)
        } else {
            None
        }
    }

    /// Probe every online peer concurrently; returns how many answered
    ///
    /// Failed probes are only logged. Marking a peer offline is left to
    /// [`sweep`](Self::sweep).
    pub async fn heartbeat(&self) -> usize {
        if let Some(local) = &self.local_peer_id {
            self.registry.touch(local, current_timestamp());
        }

        let targets: Vec<Peer> = self
            .registry
            .online_peers()
            .into_iter()
            .filter(|p| Some(&p.id) != self.local_peer_id.as_ref())
            .collect();

        if targets.is_empty() {
            return 0;
        }

        let mut probes = JoinSet::new();
        for peer in targets {
            let probe = Arc::clone(&self.probe);
            probes.spawn(async move {
                let result = probe.probe(&peer).await;
                (peer, result)
            });
        }

        let mut responded = 0;
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((peer, Ok(()))) => {
                    self.registry.touch(&peer.id, current_timestamp());
                    responded += 1;
                }
                Ok((peer, Err(e))) => {
                    debug!(peer_id = %peer.id, error = %e, "Liveness probe failed");
                }
                Err(e) => {
                    warn!(error = %e, "Liveness probe task failed");
                }
            }
        }

        responded
    }

    /// Mark silent peers offline, emitting one `PeerTimeout` each
    pub fn sweep(&self, now: i64) -> usize {
        if let Some(local) = &self.local_peer_id {
            self.registry.touch(local, now);
        }

        let stale = self.registry.mark_stale_offline(now, self.settings.peer_timeout);
        let count = stale.len();

        for peer in stale {
            info!(
                peer_id = %peer.id,
                last_seen = peer.last_seen,
                "Peer timed out"
            );
            self.emit(DiscoveryEvent::PeerTimeout(peer));
        }

        count
    }

    /// Register a new subscriber
    ///
    /// After shutdown the returned receiver is already at end-of-stream.
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = event_channel(self.settings.subscriber_queue_size);

        let publisher = self.publisher.lock();
        if publisher.is_some() {
            self.subscribers.lock().push(tx);
        }

        rx
    }

    pub fn stats(&self) -> DiscoveryStats {
        DiscoveryStats {
            known_peers: self.registry.len(),
            online_peers: self.registry.online_count(),
            subscribers: self.subscribers.lock().len(),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
        }
    }

    fn emit(&self, event: DiscoveryEvent) {
        let guard = self.publisher.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event = event.kind(),
                    peer_id = %event.peer().id,
                    "Discovery event queue full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn fan_out(&self, event: DiscoveryEvent) {
        let mut subscribers = self.subscribers.lock();

        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Spawn the broadcaster, heartbeat and sweep tasks
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(3);

        if let Some(queue) = self.queue.lock().take() {
            handles.push(tokio::spawn(
                Arc::clone(self).run_broadcaster(queue, shutdown.clone()),
            ));
        }

        handles.push(tokio::spawn(Arc::clone(self).run_heartbeat(shutdown.clone())));
        handles.push(tokio::spawn(Arc::clone(self).run_sweeper(shutdown)));

        info!(
            heartbeat_interval_ms = self.settings.heartbeat_interval.as_millis() as u64,
            cleanup_interval_ms = self.settings.cleanup_interval.as_millis() as u64,
            peer_timeout_seconds = self.settings.peer_timeout,
            "Discovery started"
        );

        handles
    }

    async fn run_broadcaster(
        self: Arc<Self>,
        mut queue: EventReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = queue.recv() => match event {
                    Some(event) => self.fan_out(event),
                    None => break,
                },
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        // Stop accepting, deliver what is queued, then end every stream
                        self.publisher.lock().take();
                        queue.close();
                        while let Some(event) = queue.recv().await {
                            self.fan_out(event);
                        }
                        break;
                    }
                }
            }
        }

        self.subscribers.lock().clear();
        info!("Discovery event broadcaster stopped");
    }

    async fn run_heartbeat(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.heartbeat_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let responded = self.heartbeat().await;
                    debug!(responded = responded, "Heartbeat cycle completed");
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Discovery heartbeat stopped");
    }

    async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.cleanup_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let timed_out = self.sweep(current_timestamp());
                    if timed_out > 0 {
                        info!(
                            timed_out = timed_out,
                            online_peers = self.registry.online_count(),
                            "Stale peer sweep completed"
                        );
                    } else {
                        debug!("Stale peer sweep completed, no stale peers found");
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Discovery sweeper stopped");
    }
}
