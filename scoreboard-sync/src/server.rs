//! HTTP front door of the relay.
//!
//! ```text
//! GET  /health                 → "OK"
//! GET  <path>                  → WebSocket upgrade (streaming transport)
//! POST <path>/poll             → open long-poll session
//! GET  <path>/poll/{sid}       → wait for frames
//! POST <path>/poll/{sid}       → send one frame
//! POST <path>/poll/{sid}/close → leave
//! ```
//!
//! The relay task is started when the listener binds and stops after the
//! server shuts down and the last connection task has let go of it.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::interval;

use crate::broadcast::outbox;
use crate::cors::CorsConfig;
use crate::longpoll::{self, PollSessions};
use crate::protocol::{DisconnectReason, TransportKind};
use crate::relay::{Relay, RelayHandle};

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Endpoint path for both transports; `/` serves them at the root.
    pub path: String,
    /// Transports the relay accepts
    pub transports: Vec<TransportKind>,
    /// How often the relay pings WebSocket peers, and how long an empty
    /// long-poll is held open.
    pub ping_interval: Duration,
    /// Silence tolerated on top of `ping_interval` before a connection is
    /// considered dead.
    pub ping_timeout: Duration,
    pub cors: CorsConfig,
    /// Reject snapshots with negative points or a wrong team set.
    pub strict_validation: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3001".to_string(),
            path: "/socket.io".to_string(),
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(60),
            cors: CorsConfig::default(),
            strict_validation: false,
        }
    }
}

impl ServerConfig {
    /// Defaults, overridden by `PORT` and `CORS_ORIGINS` when set.
    pub fn from_env() -> Result<Self, ServerError> {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| ServerError::Config(format!("PORT must be a number, got {port:?}")))?;
            config.bind_addr = format!("0.0.0.0:{port}");
        }
        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            let origins = CorsConfig::parse_origins(&origins);
            if !origins.is_empty() {
                config.cors.origins = origins;
            }
        }
        Ok(config)
    }

    /// `path` with a leading slash and no trailing slash, `""` for the root.
    pub fn endpoint(&self) -> String {
        let trimmed = self.path.trim().trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }

    fn accepts(&self, transport: TransportKind) -> bool {
        self.transports.contains(&transport)
    }
}

/// Fatal relay errors. Everything else is logged and survived.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// State shared by every request handler.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) relay: RelayHandle,
    pub(crate) sessions: Arc<PollSessions>,
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

/// A bound relay, ready to serve.
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayServer {
    /// Bind the listener and start the relay task.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let relay = Relay::spawn(config.strict_validation);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = AppState {
            relay,
            sessions: Arc::new(PollSessions::new()),
            config: Arc::new(config),
            shutdown: shutdown_rx,
        };

        Ok(Self {
            listener,
            local_addr,
            state,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle to the relay core, for inspection.
    pub fn relay(&self) -> RelayHandle {
        self.state.relay.clone()
    }

    /// Serve until the process ends.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `signal` resolves, then close every connection.
    pub async fn run_until<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            listener,
            local_addr,
            state,
            shutdown_tx,
        } = self;
        let config = state.config.clone();

        log::info!(
            "Relay listening on {local_addr} (path {:?}, transports {:?})",
            if config.endpoint().is_empty() { "/" } else { config.path.as_str() },
            config.transports
        );

        if config.accepts(TransportKind::Polling) {
            tokio::spawn(longpoll::reap_idle_sessions(state.clone()));
        }

        let app = router(state.clone());
        let shutdown_tx = Arc::new(shutdown_tx);
        let notify = shutdown_tx.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                signal.await;
                log::info!("Relay shutting down");
                let _ = notify.send(true);
            })
            .await;

        let _ = shutdown_tx.send(true);
        longpoll::close_all(&state, DisconnectReason::ServerShutdown).await;
        served.map_err(ServerError::Serve)
    }
}

fn router(state: AppState) -> Router {
    let config = state.config.clone();
    let endpoint = config.endpoint();

    let mut router = Router::new().route("/health", get(health_handler));

    if config.accepts(TransportKind::WebSocket) {
        let ws_path = if endpoint.is_empty() { "/".to_string() } else { endpoint.clone() };
        router = router.route(&ws_path, get(ws_handler));
    }

    if config.accepts(TransportKind::Polling) {
        router = router
            .route(&format!("{endpoint}/poll"), post(longpoll::open_handler))
            .route(
                &format!("{endpoint}/poll/{{sid}}"),
                get(longpoll::poll_handler).post(longpoll::push_handler),
            )
            .route(&format!("{endpoint}/poll/{{sid}}/close"), post(longpoll::close_handler));
    }

    router.with_state(state).layer(config.cors.layer())
}

/// Liveness check, independent of the relay protocol.
async fn health_handler() -> &'static str {
    "OK"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one WebSocket connection until it closes, goes silent or the
/// server shuts down.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut frames) = outbox();
    let conn = state.relay.on_connect(TransportKind::WebSocket, tx).await;
    let id = conn.connection_id;

    let silence_limit = state.config.ping_interval + state.config.ping_timeout;
    let mut ping_interval = interval(state.config.ping_interval);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping_interval.reset();
    let mut last_seen = Instant::now();
    let mut shutdown = state.shutdown.clone();

    let reason = loop {
        tokio::select! {
            msg = ws_rx.next() => {
                last_seen = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.relay.on_frame(id, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        state.relay.on_error(id, &"binary frames are not supported");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => break DisconnectReason::ClientClosed,
                    None => break DisconnectReason::TransportClosed,
                    Some(Err(e)) => {
                        state.relay.on_error(id, &e);
                        break DisconnectReason::TransportError(e.to_string());
                    }
                }
            }

            frame = frames.recv() => {
                let Some(frame) = frame else {
                    break DisconnectReason::TransportClosed;
                };
                if let Err(e) = ws_tx.send(Message::Text(frame.as_ref().into())).await {
                    break DisconnectReason::TransportError(e.to_string());
                }
            }

            _ = ping_interval.tick() => {
                if last_seen.elapsed() > silence_limit {
                    break DisconnectReason::PingTimeout;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break DisconnectReason::TransportClosed;
                }
            }

            // The flag only ever flips to true; a dropped sender means the same.
            _ = shutdown.changed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break DisconnectReason::ServerShutdown;
            }
        }
    };

    state.relay.on_disconnect(id, &reason).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:3001");
        assert_eq!(config.endpoint(), "/socket.io");
        assert_eq!(config.ping_interval, Duration::from_secs(25));
        assert_eq!(config.ping_timeout, Duration::from_secs(60));
        assert!(config.accepts(TransportKind::WebSocket));
        assert!(config.accepts(TransportKind::Polling));
        assert!(!config.strict_validation);
    }

    #[test]
    fn test_endpoint_normalisation() {
        let mut config = ServerConfig::default();
        config.path = "api/socket/".into();
        assert_eq!(config.endpoint(), "/api/socket");
        config.path = "/".into();
        assert_eq!(config.endpoint(), "");
        config.path = String::new();
        assert_eq!(config.endpoint(), "");
    }

    #[tokio::test]
    async fn test_bind_reports_address() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
            ..ServerConfig::default()
        };
        let server = RelayServer::bind(config).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.relay().connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal_error() {
        let first = RelayServer::bind(ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
            ..ServerConfig::default()
        })
        .await
        .unwrap();
        let taken = first.local_addr().to_string();

        let second = RelayServer::bind(ServerConfig {
            bind_addr: taken,
            ..ServerConfig::default()
        })
        .await;
        assert!(matches!(second, Err(ServerError::Bind { .. })));
    }
}
