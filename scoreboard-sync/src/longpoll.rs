//! Long-poll fallback transport, relay side.
//!
//! A session is a registered connection whose outbox is drained by HTTP
//! requests instead of a socket task. A `GET` holds until at least one
//! frame is ready or the ping interval passes, then returns everything
//! queued as one JSON array. Sessions nobody polls for
//! `ping_interval + ping_timeout` are reaped.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, timeout};

use crate::broadcast::{outbox, OutboxReceiver};
use crate::protocol::{encode_batch, ConnectionId, DisconnectReason, PollHandshake, TransportKind};
use crate::server::AppState;

/// One long-poll client.
pub struct PollSession {
    frames: Mutex<OutboxReceiver>,
    last_seen: StdMutex<Instant>,
}

impl PollSession {
    fn new(frames: OutboxReceiver) -> Self {
        Self {
            frames: Mutex::new(frames),
            last_seen: StdMutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut seen) = self.last_seen.lock() {
            *seen = Instant::now();
        }
    }

    fn idle_for(&self) -> std::time::Duration {
        self.last_seen
            .lock()
            .map(|seen| seen.elapsed())
            .unwrap_or_default()
    }
}

/// Live long-poll sessions by connection id.
#[derive(Default)]
pub struct PollSessions {
    sessions: RwLock<HashMap<ConnectionId, Arc<PollSession>>>,
}

impl PollSessions {
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(&self, id: ConnectionId, session: PollSession) {
        self.sessions.write().await.insert(id, Arc::new(session));
    }

    async fn get(&self, id: &ConnectionId) -> Option<Arc<PollSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn remove(&self, id: &ConnectionId) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn idle_longer_than(&self, limit: std::time::Duration) -> Vec<ConnectionId> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.idle_for() > limit)
            .map(|(id, _)| *id)
            .collect()
    }

    async fn drain(&self) -> Vec<ConnectionId> {
        self.sessions.write().await.drain().map(|(id, _)| id).collect()
    }
}

/// `POST <path>/poll`
pub(crate) async fn open_handler(State(state): State<AppState>) -> Json<PollHandshake> {
    let (tx, rx) = outbox();
    let conn = state.relay.on_connect(TransportKind::Polling, tx).await;
    state.sessions.insert(conn.connection_id, PollSession::new(rx)).await;

    Json(PollHandshake {
        sid: conn.connection_id,
        ping_interval: state.config.ping_interval.as_millis() as u64,
        ping_timeout: state.config.ping_timeout.as_millis() as u64,
    })
}

/// `GET <path>/poll/{sid}`
pub(crate) async fn poll_handler(
    State(state): State<AppState>,
    Path(sid): Path<ConnectionId>,
) -> Response {
    let Some(session) = state.sessions.get(&sid).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    session.touch();

    let mut shutdown = state.shutdown.clone();
    let mut frames = session.frames.lock().await;
    let mut batch = Vec::new();

    tokio::select! {
        first = timeout(state.config.ping_interval, frames.recv()) => {
            match first {
                Ok(Some(frame)) => batch.push(frame),
                // Outbox closed: the session was retired while we waited.
                Ok(None) => return StatusCode::NOT_FOUND.into_response(),
                Err(_) => {}
            }
        }
        _ = shutdown.changed() => {}
    }
    while let Ok(frame) = frames.try_recv() {
        batch.push(frame);
    }
    drop(frames);
    session.touch();

    (
        [(header::CONTENT_TYPE, "application/json")],
        encode_batch(&batch),
    )
        .into_response()
}

/// `POST <path>/poll/{sid}`
pub(crate) async fn push_handler(
    State(state): State<AppState>,
    Path(sid): Path<ConnectionId>,
    body: String,
) -> StatusCode {
    let Some(session) = state.sessions.get(&sid).await else {
        return StatusCode::NOT_FOUND;
    };
    session.touch();
    state.relay.on_frame(sid, &body).await;
    StatusCode::OK
}

/// `POST <path>/poll/{sid}/close`
pub(crate) async fn close_handler(
    State(state): State<AppState>,
    Path(sid): Path<ConnectionId>,
) -> StatusCode {
    if state.sessions.remove(&sid).await {
        state.relay.on_disconnect(sid, &DisconnectReason::ClientClosed).await;
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Retire sessions that stopped polling. Runs until the server shuts down.
pub(crate) async fn reap_idle_sessions(state: AppState) {
    let limit = state.config.ping_interval + state.config.ping_timeout;
    let mut tick = interval(state.config.ping_interval);
    let mut shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.changed() => break,
        }
        let idle = state.sessions.idle_longer_than(limit).await;
        if idle.is_empty() {
            continue;
        }
        for sid in idle {
            if state.sessions.remove(&sid).await {
                log::info!("Reaping idle polling session {sid}");
                state.relay.on_disconnect(sid, &DisconnectReason::PingTimeout).await;
            }
        }
        log::debug!("{} polling sessions left", state.sessions.len().await);
    }
}

/// Retire every session, e.g. on shutdown.
pub(crate) async fn close_all(state: &AppState, reason: DisconnectReason) {
    for sid in state.sessions.drain().await {
        state.relay.on_disconnect(sid, &reason).await;
    }
}
