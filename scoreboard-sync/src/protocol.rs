//! JSON wire protocol shared by relay and clients.
//!
//! Every frame is an object with an event name and a payload:
//! ```text
//! client → relay   {"event":"score-update",  "data":[{"id":"fire","name":"Feu","points":1}, ...]}
//! relay  → client  {"event":"score-updated", "data":[...]}
//! relay  → client  {"event":"error",         "data":{"message":"..."}}
//! ```
//!
//! The same frames travel over both transports: one per WebSocket text
//! message, or batched into a JSON array by the long-poll endpoint.

use scoreboard_core::ScoreSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Relay-assigned identity of one live connection. Never persisted.
pub type ConnectionId = Uuid;

/// Frames a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Proposed new authoritative state.
    ScoreUpdate(ScoreSnapshot),
}

/// Frames the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Authoritative state changed.
    ScoreUpdated(ScoreSnapshot),
    /// Something went wrong handling a frame this connection sent.
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    /// Decode a long-poll response body: a JSON array of frames.
    pub fn decode_batch(text: &str) -> Result<Vec<Self>, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

/// Join pre-encoded frames into one long-poll response body.
pub fn encode_batch<S: AsRef<str>>(frames: &[S]) -> String {
    let mut body = String::with_capacity(2 + frames.iter().map(|f| f.as_ref().len() + 1).sum::<usize>());
    body.push('[');
    for (i, frame) in frames.iter().enumerate() {
        if i > 0 {
            body.push(',');
        }
        body.push_str(frame.as_ref());
    }
    body.push(']');
    body
}

/// How a client is attached to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Full-duplex streaming over a WebSocket.
    WebSocket,
    /// HTTP long-polling fallback.
    Polling,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WebSocket => f.write_str("websocket"),
            TransportKind::Polling => f.write_str("polling"),
        }
    }
}

/// Response to opening a long-poll session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollHandshake {
    pub sid: ConnectionId,
    /// Milliseconds the relay holds an empty poll open.
    pub ping_interval: u64,
    /// Extra milliseconds of silence tolerated before the session is reaped.
    pub ping_timeout: u64,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed the connection on purpose.
    ClientClosed,
    /// The relay is going away.
    ServerShutdown,
    /// No traffic within ping interval + ping timeout.
    PingTimeout,
    /// The underlying transport closed without a close handshake.
    TransportClosed,
    /// The underlying transport failed.
    TransportError(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientClosed => f.write_str("client namespace disconnect"),
            DisconnectReason::ServerShutdown => f.write_str("server shutting down"),
            DisconnectReason::PingTimeout => f.write_str("ping timeout"),
            DisconnectReason::TransportClosed => f.write_str("transport close"),
            DisconnectReason::TransportError(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// Protocol errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
}
