//! Client synchronizer: one client's mirror of the scores.
//!
//! Local actions are applied optimistically, persisted, and sent to the
//! relay while connected. A relay broadcast replaces the mirror outright.
//! There is no merge and no version check, so the last snapshot to arrive
//! wins. The mirror has a single writer: whoever owns the synchronizer.

use scoreboard_core::{ScoreAction, ScoreSnapshot, TeamId};
use tokio::sync::{mpsc, watch};

use crate::cache::SnapshotCache;
use crate::connection::{ConnectionEvent, ConnectionHandle, ConnectionManager};
use crate::protocol::ClientMessage;

/// What happened to a local change on its way to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the live link.
    Sent,
    /// Applied and cached locally only. It will not be sent later.
    Offline,
}

/// Result of a local mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub snapshot: ScoreSnapshot,
    pub delivery: Delivery,
}

pub struct ScoreSynchronizer {
    mirror: ScoreSnapshot,
    cache: Box<dyn SnapshotCache>,
    connection: ConnectionHandle,
    events: Option<mpsc::Receiver<ConnectionEvent>>,
    notify: watch::Sender<ScoreSnapshot>,
}

impl ScoreSynchronizer {
    /// Seed the mirror from `cache`, or zero scores if it holds nothing
    /// usable.
    pub fn initialize(cache: impl SnapshotCache + 'static, connection: ConnectionHandle) -> Self {
        let mirror = match cache.load() {
            Ok(Some(snapshot)) => {
                log::debug!("Seeded scores from cache");
                snapshot
            }
            Ok(None) => ScoreSnapshot::default(),
            Err(e) => {
                log::warn!("Ignoring unreadable score cache: {e}");
                ScoreSnapshot::default()
            }
        };
        let (notify, _) = watch::channel(mirror.clone());

        Self {
            mirror,
            cache: Box::new(cache),
            connection,
            events: None,
            notify,
        }
    }

    /// Initialize against a running manager and take over its events.
    pub fn attach(cache: impl SnapshotCache + 'static, manager: &mut ConnectionManager) -> Self {
        let sync = Self::initialize(cache, manager.handle());
        match manager.take_event_rx() {
            Some(events) => sync.with_events(events),
            None => {
                log::warn!("Connection events already taken; remote updates must be fed by hand");
                sync
            }
        }
    }

    pub fn with_events(mut self, events: mpsc::Receiver<ConnectionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The current mirror.
    pub fn snapshot(&self) -> &ScoreSnapshot {
        &self.mirror
    }

    /// Watch the mirror change.
    pub fn subscribe(&self) -> watch::Receiver<ScoreSnapshot> {
        self.notify.subscribe()
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Apply `action` to team `id`, persist, and send if connected.
    pub async fn mutate(
        &mut self,
        id: TeamId,
        action: ScoreAction,
        value: Option<i64>,
    ) -> MutationOutcome {
        let next = self.mirror.apply(id, action, value);
        log::debug!("Local {action} on {id}");
        self.accept(next.clone());
        self.publish(next).await
    }

    /// Zero every team, persist, and send if connected.
    pub async fn reset_all(&mut self) -> MutationOutcome {
        let next = self.mirror.reset();
        self.accept(next.clone());
        self.publish(next).await
    }

    /// Replace the mirror with a snapshot broadcast by the relay.
    pub fn on_remote_update(&mut self, snapshot: ScoreSnapshot) {
        self.accept(snapshot);
    }

    /// React to one connection event.
    pub fn handle_event(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::ScoreUpdated(snapshot) => self.on_remote_update(snapshot.clone()),
            ConnectionEvent::Connected { transport } => log::info!("Live sync on ({transport})"),
            ConnectionEvent::Disconnected { reason } => {
                log::info!("Live sync off ({reason}); changes stay local")
            }
            ConnectionEvent::ConnectError { attempt, error } => {
                log::debug!("Relay unreachable (attempt {attempt}): {error}")
            }
            ConnectionEvent::Error { message } => log::warn!("Relay error: {message}"),
        }
    }

    /// Wait for the next connection event and apply it. `None` once the
    /// manager is gone or no event source is attached.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        let event = self.events.as_mut()?.recv().await?;
        self.handle_event(&event);
        Some(event)
    }

    fn accept(&mut self, snapshot: ScoreSnapshot) {
        if let Err(e) = self.cache.store(&snapshot) {
            log::warn!("Failed to persist scores: {e}");
        }
        self.mirror = snapshot;
        self.notify.send_replace(self.mirror.clone());
    }

    async fn publish(&self, snapshot: ScoreSnapshot) -> MutationOutcome {
        let delivery = if self.connection.emit(ClientMessage::ScoreUpdate(snapshot.clone())).await {
            Delivery::Sent
        } else {
            log::info!("Offline: change kept locally and not synchronized");
            Delivery::Offline
        };
        MutationOutcome { snapshot, delivery }
    }
}
