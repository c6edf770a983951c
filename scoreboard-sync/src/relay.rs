//! The relay core: one task owns the [`ScoreStore`] and applies updates in
//! arrival order.
//!
//! ```text
//!  conn task ─┐                          ┌──► outbox (conn 1)
//!  conn task ─┼─► mpsc ─► Relay::run ────┼──► outbox (conn 2)
//!  conn task ─┘   (one     replace +     └──► outbox (conn N)
//!                 queue)   broadcast
//! ```
//!
//! Connection tasks never touch the store. They register and retire
//! themselves in the shared [`BroadcastGroup`] directly and push
//! `score-update` frames onto the queue, so two near-simultaneous updates
//! are applied one after the other and the later one fully wins.

use scoreboard_core::ScoreSnapshot;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::broadcast::{BroadcastGroup, BroadcastStats, ClientConnection, Outbox};
use crate::protocol::{ClientMessage, ConnectionId, DisconnectReason, ServerMessage, TransportKind};
use crate::store::ScoreStore;

enum RelayCommand {
    ScoreUpdate {
        origin: ConnectionId,
        snapshot: ScoreSnapshot,
    },
    Snapshot {
        reply: oneshot::Sender<Option<ScoreSnapshot>>,
    },
}

/// The sequencing task. Created together with its [`RelayHandle`] and
/// driven by [`Relay::run`]; it stops once every handle is dropped, taking
/// the in-memory scores with it.
pub struct Relay {
    store: ScoreStore,
    peers: Arc<BroadcastGroup>,
    commands: mpsc::UnboundedReceiver<RelayCommand>,
    strict_validation: bool,
}

/// Cloneable entry point used by every connection task.
#[derive(Clone)]
pub struct RelayHandle {
    peers: Arc<BroadcastGroup>,
    commands: mpsc::UnboundedSender<RelayCommand>,
}

impl Relay {
    /// Create a relay. With `strict_validation` off, any decodable snapshot
    /// is accepted and rebroadcast as-is.
    pub fn new(strict_validation: bool) -> (Self, RelayHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peers = Arc::new(BroadcastGroup::new());
        let relay = Self {
            store: ScoreStore::new(),
            peers: peers.clone(),
            commands: rx,
            strict_validation,
        };
        (relay, RelayHandle { peers, commands: tx })
    }

    /// Create a relay and spawn its task on the current runtime.
    pub fn spawn(strict_validation: bool) -> RelayHandle {
        let (relay, handle) = Self::new(strict_validation);
        tokio::spawn(relay.run());
        handle
    }

    pub async fn run(mut self) {
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                RelayCommand::ScoreUpdate { origin, snapshot } => {
                    self.apply_update(origin, snapshot).await;
                }
                RelayCommand::Snapshot { reply } => {
                    let _ = reply.send(self.store.current().cloned());
                }
            }
        }
        log::info!(
            "Relay stopped after {} score updates; scores discarded",
            self.store.version()
        );
    }

    async fn apply_update(&mut self, origin: ConnectionId, snapshot: ScoreSnapshot) {
        if self.strict_validation {
            if let Err(e) = snapshot.validate() {
                log::warn!("Rejected score update from {origin}: {e}");
                self.report(origin, format!("Rejected score update: {e}")).await;
                return;
            }
        }

        let version = self.store.replace(snapshot.clone());
        match self.peers.broadcast(&ServerMessage::ScoreUpdated(snapshot)).await {
            Ok(fan_out) => {
                log::info!(
                    "Score update v{version} from {origin} broadcast to {} peers",
                    fan_out.delivered
                );
                if fan_out.failed > 0 {
                    log::debug!("{} peers were already gone", fan_out.failed);
                }
            }
            Err(e) => {
                // The store keeps the new snapshot; only the sender hears about it.
                log::error!("Error broadcasting score from {origin}: {e}");
                self.report(origin, "Failed to broadcast score update").await;
            }
        }
    }

    async fn report(&self, origin: ConnectionId, message: impl Into<String>) {
        if let Err(e) = self.peers.send_to(&origin, &ServerMessage::error(message)).await {
            log::error!("Could not report error to {origin}: {e}");
        }
    }
}

impl RelayHandle {
    /// Register a new connection. The current scores are not pushed to it;
    /// it sees state only from the next accepted update onward.
    pub async fn on_connect(&self, transport: TransportKind, outbox: Outbox) -> ClientConnection {
        let conn = self.peers.add_peer(transport, outbox).await;
        log::info!("Client connected: {} ({transport})", conn.connection_id);
        conn
    }

    /// Queue a proposed snapshot for the sequencing task.
    pub fn on_score_update(&self, origin: ConnectionId, snapshot: ScoreSnapshot) {
        if self
            .commands
            .send(RelayCommand::ScoreUpdate { origin, snapshot })
            .is_err()
        {
            log::warn!("Relay stopped; dropping score update from {origin}");
        }
    }

    /// Decode one text frame from `origin` and dispatch it. Undecodable
    /// frames are answered with an `error` frame and otherwise ignored.
    pub async fn on_frame(&self, origin: ConnectionId, text: &str) {
        match ClientMessage::decode(text) {
            Ok(ClientMessage::ScoreUpdate(snapshot)) => self.on_score_update(origin, snapshot),
            Err(e) => {
                self.on_error(origin, &e);
                let reply = ServerMessage::error(format!("Invalid frame: {e}"));
                if let Err(e) = self.peers.send_to(&origin, &reply).await {
                    log::error!("Could not report error to {origin}: {e}");
                }
            }
        }
    }

    /// Retire a connection. The scores are left as they are.
    pub async fn on_disconnect(&self, id: ConnectionId, reason: &DisconnectReason) {
        if self.peers.remove_peer(&id).await.is_some() {
            log::info!("Client disconnected: {id} Reason: {reason}");
        }
    }

    /// Record a non-fatal error on a connection. The connection stays
    /// registered.
    pub fn on_error(&self, id: ConnectionId, err: &dyn std::fmt::Display) {
        log::warn!("Socket error on {id}: {err}");
    }

    /// The relay's current authoritative snapshot, `None` before the first
    /// update or once the relay has stopped.
    pub async fn snapshot(&self) -> Option<ScoreSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(RelayCommand::Snapshot { reply }).ok()?;
        rx.await.ok().flatten()
    }

    pub async fn connection_count(&self) -> usize {
        self.peers.peer_count().await
    }

    pub async fn stats(&self) -> BroadcastStats {
        self.peers.stats().await
    }
}
