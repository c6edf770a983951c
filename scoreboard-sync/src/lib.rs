//! # scoreboard-sync: Real-time score relay and client sync
//!
//! One relay holds the authoritative five-team snapshot in memory and
//! rebroadcasts every accepted update to all connected clients, the sender
//! included. Clients keep a mirror, change it optimistically, and take
//! whatever the relay broadcasts next.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐   WebSocket / long-poll   ┌───────────────────┐
//! │ ScoreSynchronizer │ ◄───────────────────────► │ RelayServer       │
//! │ (mirror + cache)  │      JSON frames          │ (axum)            │
//! └────────┬──────────┘                           └────────┬──────────┘
//!          │                                               │
//!          ▼                                               ▼
//! ┌───────────────────┐                           ┌───────────────────┐
//! │ ConnectionManager │                           │ Relay             │
//! │ (reconnect loop)  │                           │ (ScoreStore owner)│
//! └───────────────────┘                           └────────┬──────────┘
//!                                                          │
//!                                                 ┌────────┴──────────┐
//!                                                 │ BroadcastGroup    │
//!                                                 │ (fan-out)         │
//!                                                 └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire frames and transport names
//! - [`store`]: the relay's in-memory snapshot
//! - [`broadcast`]: live connections and fan-out
//! - [`relay`]: the sequencing task that applies updates in order
//! - [`server`]: HTTP, WebSocket and long-poll endpoints
//! - [`cors`]: origin allow-list
//! - [`connection`]: client link with automatic reconnect
//! - [`cache`]: persisted client snapshot
//! - [`client`]: the client-side mirror

pub mod broadcast;
pub mod cache;
pub mod client;
pub mod connection;
pub mod cors;
mod longpoll;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod store;
mod transport;

pub use broadcast::{BroadcastGroup, BroadcastStats, ClientConnection};
pub use cache::{CacheError, FileCache, MemoryCache, SnapshotCache, DEFAULT_CACHE_KEY};
pub use client::{Delivery, MutationOutcome, ScoreSynchronizer};
pub use connection::{
    ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionStatus,
    ReconnectPolicy,
};
pub use cors::{CorsConfig, OriginPattern};
pub use protocol::{ClientMessage, ConnectionId, DisconnectReason, ProtocolError, ServerMessage, TransportKind};
pub use relay::{Relay, RelayHandle};
pub use server::{RelayServer, ServerConfig, ServerError};
pub use store::ScoreStore;
pub use transport::TransportError;

pub use scoreboard_core::{ScoreAction, ScoreSnapshot, SnapshotError, Team, TeamId};
