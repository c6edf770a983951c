//! Connection manager: keeps one client link to the relay alive.
//!
//! ```text
//!            auto/manual            handshake ok
//! Disconnected ─────────► Connecting ────────────► Connected
//!      ▲                      │                       │
//!      │   attempt failed     │   link dropped        │
//!      └──────────────────────┴───────────────────────┘
//!                 (retry after ReconnectPolicy delay)
//! ```
//!
//! The manager runs as a background task. Callers hold a cheap
//! [`ConnectionHandle`] to read the status and emit frames, and consume
//! [`ConnectionEvent`]s from the receiver handed out by
//! [`ConnectionManager::take_event_rx`].

use scoreboard_core::ScoreSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::protocol::{ClientMessage, DisconnectReason, TransportKind};
use crate::transport::{Keepalive, Link, Outbound, TransportError};

/// Link status as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Things the manager reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected { transport: TransportKind },
    Disconnected { reason: DisconnectReason },
    /// An attempt failed; `attempt` counts consecutive failures.
    ConnectError { attempt: u32, error: String },
    /// The relay answered with an `error` frame.
    Error { message: String },
    /// The relay broadcast a new snapshot.
    ScoreUpdated(ScoreSnapshot),
}

/// Delay schedule between connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor per failed attempt; `1.0` keeps the delay fixed.
    pub multiplier: f64,
    /// Consecutive failures before automatic retries stop. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 1.0,
            max_attempts: Some(5),
        }
    }
}

impl ReconnectPolicy {
    /// The same delay before every attempt, forever.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            max_attempts: None,
        }
    }

    /// Doubling delays from `initial` up to `max`, forever.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            multiplier: 2.0,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Whether another automatic attempt is allowed after `failures`
    /// consecutive failures.
    pub fn allows(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures < max)
    }
}

/// Client-side connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// `http://host:port`; `ws://` and the TLS schemes work too.
    pub server_url: String,
    /// Endpoint path on the relay.
    pub path: String,
    /// Transports to try, in order, on every attempt.
    pub transports: Vec<TransportKind>,
    pub reconnect: ReconnectPolicy,
    /// Upper bound on one transport handshake.
    pub connect_timeout: Duration,
    /// WebSocket keepalive. Long-poll links use the relay's values instead.
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    /// Connect as soon as the manager starts. When off, nothing happens
    /// until [`ConnectionHandle::reconnect`].
    pub auto_connect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3001".to_string(),
            path: "/socket.io".to_string(),
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(20),
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(20),
            auto_connect: true,
        }
    }
}

impl ConnectionConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    fn endpoint(&self) -> String {
        let trimmed = self.path.trim().trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }
}

/// Queue an event without waiting. When the receiver is not being drained
/// the event is dropped, so reconnects and link drivers never stall.
pub(crate) fn publish(events: &mpsc::Sender<ConnectionEvent>, event: ConnectionEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            log::warn!("Event buffer full; dropping {event:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

enum Command {
    Reconnect,
    Shutdown,
}

type LinkSlot = Arc<RwLock<Option<mpsc::UnboundedSender<Outbound>>>>;

/// Cloneable view of a running [`ConnectionManager`].
#[derive(Clone)]
pub struct ConnectionHandle {
    status: watch::Receiver<ConnectionStatus>,
    link: LinkSlot,
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnectionHandle {
    /// A handle with no manager behind it. It stays `Disconnected` and
    /// drops everything emitted through it.
    pub fn detached() -> Self {
        let (_, status) = watch::channel(ConnectionStatus::Disconnected);
        let (commands, _) = mpsc::unbounded_channel();
        Self {
            status,
            link: Arc::new(RwLock::new(None)),
            commands,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Subscribe to status transitions.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Wait until the status equals `want`. Returns `false` if the manager
    /// stopped first.
    pub async fn wait_for(&self, want: ConnectionStatus) -> bool {
        let mut status = self.status.clone();
        let reached = status.wait_for(|s| *s == want).await.is_ok();
        reached
    }

    /// Hand a frame to the live link. Returns `false`, and drops the frame,
    /// when there is no live link. Nothing is kept for a later connection.
    pub async fn emit(&self, msg: ClientMessage) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.link.read().await.as_ref() {
            Some(tx) => tx.send(Outbound::Frame(msg)).is_ok(),
            None => false,
        }
    }

    /// Ask for an immediate attempt with a fresh attempt budget. Ignored
    /// while connected.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }

    /// Close the link and stop the manager.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Owns the background task that connects, reconnects and pumps frames.
pub struct ConnectionManager {
    handle: ConnectionHandle,
    event_rx: Option<mpsc::Receiver<ConnectionEvent>>,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Start the manager on the current runtime.
    pub fn start(config: ConnectionConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(256);
        let link: LinkSlot = Arc::new(RwLock::new(None));

        let worker = Worker {
            config,
            http: reqwest::Client::new(),
            status: status_tx,
            link: link.clone(),
            commands: command_rx,
            events: event_tx,
        };
        let task = tokio::spawn(worker.run());

        Self {
            handle: ConnectionHandle {
                status: status_rx,
                link,
                commands: command_tx,
            },
            event_rx: Some(event_rx),
            task,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Take the event receiver. Only the first call returns it.
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.event_rx.take()
    }

    /// Close the link and wait for the background task to finish.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        if let Err(e) = self.task.await {
            log::error!("Connection task failed: {e}");
        }
    }
}

struct Worker {
    config: ConnectionConfig,
    http: reqwest::Client,
    status: watch::Sender<ConnectionStatus>,
    link: LinkSlot,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::Sender<ConnectionEvent>,
}

impl Worker {
    async fn run(mut self) {
        let mut failures: u32 = 0;
        let mut idle = !self.config.auto_connect;

        loop {
            if idle {
                match self.commands.recv().await {
                    Some(Command::Reconnect) => {
                        failures = 0;
                        idle = false;
                    }
                    Some(Command::Shutdown) | None => break,
                }
            }

            self.set_status(ConnectionStatus::Connecting);
            match self.attempt().await {
                Ok(link) => {
                    failures = 0;
                    let (reason, stopping) = self.serve(link).await;
                    log::info!("Disconnected from relay: {reason}");
                    self.notify(ConnectionEvent::Disconnected { reason });
                    if stopping {
                        break;
                    }
                }
                Err(e) => {
                    failures += 1;
                    log::warn!("Connection attempt {failures} failed: {e}");
                    self.set_status(ConnectionStatus::Disconnected);
                    self.notify(ConnectionEvent::ConnectError {
                        attempt: failures,
                        error: e.to_string(),
                    });
                }
            }

            if !self.config.reconnect.allows(failures) {
                log::warn!("Giving up after {failures} failed attempts; waiting for a manual reconnect");
                idle = true;
                continue;
            }

            let delay = self.config.reconnect.delay_for(failures + 1);
            log::info!("Reconnecting in {delay:?}");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Reconnect) => failures = 0,
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        log::debug!("Connection manager stopped");
    }

    /// Try every configured transport once, in order.
    async fn attempt(&self) -> Result<Link, TransportError> {
        let endpoint = self.config.endpoint();
        let keepalive = Keepalive {
            interval: self.config.ping_interval,
            timeout: self.config.ping_timeout,
        };
        let mut last_error = TransportError::NoTransport;

        for &kind in &self.config.transports {
            match Link::open(
                kind,
                &self.config.server_url,
                &endpoint,
                &self.http,
                keepalive,
                self.config.connect_timeout,
            )
            .await
            {
                Ok(link) => return Ok(link),
                Err(e) => {
                    log::debug!("{kind} transport unavailable: {e}");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Drive a fresh link until it drops. The flag is true when the drop
    /// was a requested shutdown.
    async fn serve(&mut self, link: Link) -> (DisconnectReason, bool) {
        let transport = link.kind();
        let (tx, rx) = mpsc::unbounded_channel();
        *self.link.write().await = Some(tx.clone());
        self.set_status(ConnectionStatus::Connected);
        log::info!("Connected to relay via {transport}");
        self.notify(ConnectionEvent::Connected { transport });

        let drive = link.drive(rx, self.events.clone());
        tokio::pin!(drive);
        let mut closing = false;

        let reason = loop {
            tokio::select! {
                reason = &mut drive => break reason,
                cmd = self.commands.recv(), if !closing => match cmd {
                    Some(Command::Reconnect) => log::debug!("Already connected; reconnect ignored"),
                    Some(Command::Shutdown) | None => {
                        closing = true;
                        let _ = tx.send(Outbound::Close);
                    }
                },
            }
        };

        *self.link.write().await = None;
        self.set_status(ConnectionStatus::Disconnected);
        (reason, closing)
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            log::debug!("Connection status {previous:?} -> {status:?}");
        }
    }

    fn notify(&self, event: ConnectionEvent) {
        publish(&self.events, event);
    }
}
