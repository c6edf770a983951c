//! Fan-out of relay frames to every live connection.
//!
//! Each connection owns an unbounded outbox drained by its transport task,
//! so a broadcast never waits on a slow peer. Frames are encoded once and
//! shared as `Arc<str>` across all outboxes.
//!
//! There is no backpressure: a client that floods `score-update` makes the
//! relay fan out one full snapshot per frame to every peer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::protocol::{ConnectionId, ProtocolError, ServerMessage, TransportKind};

/// Sending half of a connection's outgoing frame queue.
pub type Outbox = mpsc::UnboundedSender<Arc<str>>;

/// Receiving half, owned by the connection's transport task.
pub type OutboxReceiver = mpsc::UnboundedReceiver<Arc<str>>;

pub fn outbox() -> (Outbox, OutboxReceiver) {
    mpsc::unbounded_channel()
}

/// Relay-side record of a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnection {
    pub connection_id: ConnectionId,
    pub transport: TransportKind,
    pub connected_at: Instant,
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub deliveries_failed: u64,
    pub active_peers: usize,
}

struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    deliveries_failed: AtomicU64,
}

struct Peer {
    info: ClientConnection,
    outbox: Outbox,
}

/// Outcome of a single fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Outboxes the frame was queued on.
    pub delivered: usize,
    /// Outboxes whose transport task had already gone away.
    pub failed: usize,
}

/// The set of live connections.
///
/// Adds, removes and fan-outs may run concurrently from different tasks;
/// the map sits behind an async `RwLock` so iteration never observes a
/// half-inserted peer.
pub struct BroadcastGroup {
    peers: RwLock<HashMap<ConnectionId, Peer>>,
    stats: AtomicBroadcastStats,
}

impl Default for BroadcastGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastGroup {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            stats: AtomicBroadcastStats {
                messages_sent: AtomicU64::new(0),
                deliveries_failed: AtomicU64::new(0),
            },
        }
    }

    /// Register a connection and assign it a fresh id.
    pub async fn add_peer(&self, transport: TransportKind, outbox: Outbox) -> ClientConnection {
        let info = ClientConnection {
            connection_id: Uuid::new_v4(),
            transport,
            connected_at: Instant::now(),
        };
        self.peers.write().await.insert(
            info.connection_id,
            Peer {
                info: info.clone(),
                outbox,
            },
        );
        info
    }

    pub async fn remove_peer(&self, id: &ConnectionId) -> Option<ClientConnection> {
        self.peers.write().await.remove(id).map(|p| p.info)
    }

    /// Encode `msg` once and queue it on every registered outbox,
    /// including the one belonging to whoever triggered it.
    pub async fn broadcast(&self, msg: &ServerMessage) -> Result<FanOut, ProtocolError> {
        let frame: Arc<str> = Arc::from(msg.encode()?);
        Ok(self.broadcast_raw(frame).await)
    }

    /// Queue a pre-encoded frame on every registered outbox.
    pub async fn broadcast_raw(&self, frame: Arc<str>) -> FanOut {
        let peers = self.peers.read().await;
        let mut fan_out = FanOut::default();
        for peer in peers.values() {
            if peer.outbox.send(frame.clone()).is_ok() {
                fan_out.delivered += 1;
            } else {
                fan_out.failed += 1;
            }
        }
        drop(peers);

        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        if fan_out.failed > 0 {
            self.stats
                .deliveries_failed
                .fetch_add(fan_out.failed as u64, Ordering::Relaxed);
        }
        fan_out
    }

    /// Queue a frame for a single connection. Returns false if the
    /// connection is unknown or its transport task has gone away.
    pub async fn send_to(&self, id: &ConnectionId, msg: &ServerMessage) -> Result<bool, ProtocolError> {
        let frame: Arc<str> = Arc::from(msg.encode()?);
        let peers = self.peers.read().await;
        Ok(peers
            .get(id)
            .map(|peer| peer.outbox.send(frame).is_ok())
            .unwrap_or(false))
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peers(&self) -> Vec<ClientConnection> {
        self.peers.read().await.values().map(|p| p.info.clone()).collect()
    }

    pub async fn has_peer(&self, id: &ConnectionId) -> bool {
        self.peers.read().await.contains_key(id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            deliveries_failed: self.stats.deliveries_failed.load(Ordering::Relaxed),
            active_peers: self.peer_count().await,
        }
    }
}
