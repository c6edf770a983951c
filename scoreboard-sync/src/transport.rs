//! Client-side transports: a WebSocket link, or a long-poll link when the
//! relay does not accept WebSockets.
//!
//! A [`Link`] is opened once and then driven until it dies; it is never
//! reused. Frames handed to a dead link are lost, which is exactly the
//! drop-while-offline behavior the synchronizer relies on.

use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::connection::{publish, ConnectionEvent};
use crate::protocol::{ClientMessage, DisconnectReason, PollHandshake, ServerMessage, TransportKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport failures. Never fatal: the connection manager turns them into
/// a `Disconnected` status and a retry.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("relay answered {0}")]
    Status(StatusCode),
    #[error("no transport configured")]
    NoTransport,
}

/// What the connection manager pushes into a live link.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(ClientMessage),
    Close,
}

/// Liveness settings for one link.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Keepalive {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Keepalive {
    fn silence_limit(&self) -> Duration {
        self.interval + self.timeout
    }
}

/// An open connection to the relay.
pub(crate) enum Link {
    WebSocket { stream: WsStream, keepalive: Keepalive },
    Polling(PollLink),
}

pub(crate) struct PollLink {
    http: reqwest::Client,
    session_url: String,
    keepalive: Keepalive,
}

/// Split `http://host:port` / `ws://host:port` into a scheme flag and the
/// authority, then rebuild it for the requested transport.
fn endpoint_url(base: &str, endpoint: &str, kind: TransportKind) -> Result<String, TransportError> {
    let (scheme, rest) = base
        .trim_end_matches('/')
        .split_once("://")
        .ok_or_else(|| TransportError::InvalidUrl(base.to_string()))?;
    let secure = match scheme {
        "http" | "ws" => false,
        "https" | "wss" => true,
        other => return Err(TransportError::InvalidUrl(format!("unsupported scheme {other}"))),
    };
    let scheme = match (kind, secure) {
        (TransportKind::WebSocket, false) => "ws",
        (TransportKind::WebSocket, true) => "wss",
        (TransportKind::Polling, false) => "http",
        (TransportKind::Polling, true) => "https",
    };
    let path = match kind {
        TransportKind::WebSocket if endpoint.is_empty() => "/".to_string(),
        TransportKind::WebSocket => endpoint.to_string(),
        TransportKind::Polling => format!("{endpoint}/poll"),
    };
    Ok(format!("{scheme}://{rest}{path}"))
}

impl Link {
    /// Open a link of the given kind. `timeout` bounds the whole handshake.
    pub(crate) async fn open(
        kind: TransportKind,
        base_url: &str,
        endpoint: &str,
        http: &reqwest::Client,
        keepalive: Keepalive,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let url = endpoint_url(base_url, endpoint, kind)?;
        log::debug!("Opening {kind} link to {url}");

        let handshake = async {
            match kind {
                TransportKind::WebSocket => {
                    let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
                    Ok::<_, TransportError>(Link::WebSocket { stream, keepalive })
                }
                TransportKind::Polling => {
                    let response = http.post(url.as_str()).send().await?;
                    if !response.status().is_success() {
                        return Err(TransportError::Status(response.status()));
                    }
                    let handshake: PollHandshake = response.json().await?;
                    Ok(Link::Polling(PollLink {
                        http: http.clone(),
                        session_url: format!("{url}/{}", handshake.sid),
                        keepalive: Keepalive {
                            interval: Duration::from_millis(handshake.ping_interval),
                            timeout: Duration::from_millis(handshake.ping_timeout),
                        },
                    }))
                }
            }
        };
        let opened: Result<Result<Link, TransportError>, _> =
            tokio::time::timeout(timeout, handshake).await;

        match opened {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    pub(crate) fn kind(&self) -> TransportKind {
        match self {
            Link::WebSocket { .. } => TransportKind::WebSocket,
            Link::Polling(_) => TransportKind::Polling,
        }
    }

    /// Pump frames both ways until the link dies or is told to close.
    pub(crate) async fn drive(
        self,
        outbound: mpsc::UnboundedReceiver<Outbound>,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> DisconnectReason {
        match self {
            Link::WebSocket { stream, keepalive } => {
                drive_websocket(stream, keepalive, outbound, events).await
            }
            Link::Polling(link) => link.drive(outbound, events).await,
        }
    }
}

fn forward(events: &mpsc::Sender<ConnectionEvent>, msg: ServerMessage) {
    let event = match msg {
        ServerMessage::ScoreUpdated(snapshot) => ConnectionEvent::ScoreUpdated(snapshot),
        ServerMessage::Error(payload) => {
            log::warn!("Relay reported an error: {}", payload.message);
            ConnectionEvent::Error {
                message: payload.message,
            }
        }
    };
    publish(events, event);
}

async fn drive_websocket(
    stream: WsStream,
    keepalive: Keepalive,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::Sender<ConnectionEvent>,
) -> DisconnectReason {
    let (mut write, mut read) = stream.split();
    let mut ping_interval = interval(keepalive.interval);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping_interval.reset();
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            msg = read.next() => {
                last_seen = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => match ServerMessage::decode(text.as_str()) {
                        Ok(msg) => forward(&events, msg),
                        Err(e) => log::warn!("Ignoring undecodable frame from relay: {e}"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("Relay closed the connection: {frame:?}");
                        return DisconnectReason::ServerShutdown;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return DisconnectReason::TransportError(e.to_string()),
                    None => return DisconnectReason::TransportClosed,
                }
            }

            out = outbound.recv() => match out {
                Some(Outbound::Frame(msg)) => {
                    let text = match msg.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            log::error!("Dropping unencodable frame: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        return DisconnectReason::TransportError(e.to_string());
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    return DisconnectReason::ClientClosed;
                }
            },

            _ = ping_interval.tick() => {
                if last_seen.elapsed() > keepalive.silence_limit() {
                    return DisconnectReason::PingTimeout;
                }
                if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                    return DisconnectReason::TransportError(e.to_string());
                }
            }
        }
    }
}

impl PollLink {
    async fn drive(
        self,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> DisconnectReason {
        // Receiving and sending run side by side so an outgoing frame never
        // cancels a poll that may already hold frames for us.
        let poller = self.poll_loop(&events);
        let sender = self.send_loop(&mut outbound);
        tokio::pin!(poller, sender);

        tokio::select! {
            reason = &mut poller => reason,
            reason = &mut sender => reason,
        }
    }

    async fn poll_loop(&self, events: &mpsc::Sender<ConnectionEvent>) -> DisconnectReason {
        loop {
            let response = self
                .http
                .get(self.session_url.as_str())
                .timeout(self.keepalive.silence_limit())
                .send()
                .await;

            let response = match response {
                Ok(r) if r.status() == StatusCode::NOT_FOUND => return DisconnectReason::TransportClosed,
                Ok(r) if !r.status().is_success() => {
                    return DisconnectReason::TransportError(format!("poll answered {}", r.status()))
                }
                Ok(r) => r,
                Err(e) if e.is_timeout() => return DisconnectReason::PingTimeout,
                Err(e) => return DisconnectReason::TransportError(e.to_string()),
            };

            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => return DisconnectReason::TransportError(e.to_string()),
            };
            match ServerMessage::decode_batch(&body) {
                Ok(batch) => {
                    for msg in batch {
                        forward(events, msg);
                    }
                }
                Err(e) => log::warn!("Ignoring undecodable poll response: {e}"),
            }
        }
    }

    async fn send_loop(&self, outbound: &mut mpsc::UnboundedReceiver<Outbound>) -> DisconnectReason {
        while let Some(out) = outbound.recv().await {
            match out {
                Outbound::Frame(msg) => {
                    let text = match msg.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            log::error!("Dropping unencodable frame: {e}");
                            continue;
                        }
                    };
                    let sent = self
                        .http
                        .post(self.session_url.as_str())
                        .header(reqwest::header::CONTENT_TYPE, "application/json")
                        .body(text)
                        .timeout(self.keepalive.silence_limit())
                        .send()
                        .await;
                    match sent {
                        Ok(r) if r.status() == StatusCode::NOT_FOUND => {
                            return DisconnectReason::TransportClosed
                        }
                        Ok(r) if !r.status().is_success() => {
                            return DisconnectReason::TransportError(format!("send answered {}", r.status()))
                        }
                        Ok(_) => {}
                        Err(e) => return DisconnectReason::TransportError(e.to_string()),
                    }
                }
                Outbound::Close => break,
            }
        }

        let close_url = format!("{}/close", self.session_url);
        if let Err(e) = self.http.post(close_url).send().await {
            log::debug!("Close request failed: {e}");
        }
        DisconnectReason::ClientClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_websocket() {
        assert_eq!(
            endpoint_url("http://127.0.0.1:3001", "/socket.io", TransportKind::WebSocket).unwrap(),
            "ws://127.0.0.1:3001/socket.io"
        );
        assert_eq!(
            endpoint_url("https://scores.example/", "/api/socket", TransportKind::WebSocket).unwrap(),
            "wss://scores.example/api/socket"
        );
        assert_eq!(
            endpoint_url("ws://host:3001", "", TransportKind::WebSocket).unwrap(),
            "ws://host:3001/"
        );
    }

    #[test]
    fn test_endpoint_url_polling() {
        assert_eq!(
            endpoint_url("ws://127.0.0.1:3001", "/socket.io", TransportKind::Polling).unwrap(),
            "http://127.0.0.1:3001/socket.io/poll"
        );
        assert_eq!(
            endpoint_url("wss://scores.example", "", TransportKind::Polling).unwrap(),
            "https://scores.example/poll"
        );
    }

    #[test]
    fn test_endpoint_url_rejects_garbage() {
        assert!(endpoint_url("localhost:3001", "/x", TransportKind::Polling).is_err());
        assert!(endpoint_url("ftp://host", "/x", TransportKind::Polling).is_err());
    }

    #[tokio::test]
    async fn test_open_unreachable_fails() {
        // Port 9 (discard) is essentially never listening on loopback.
        let http = reqwest::Client::new();
        let keepalive = Keepalive {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
        };
        for kind in [TransportKind::WebSocket, TransportKind::Polling] {
            let result = Link::open(
                kind,
                "http://127.0.0.1:9",
                "/socket.io",
                &http,
                keepalive,
                Duration::from_secs(2),
            )
            .await;
            assert!(result.is_err());
        }
    }
}
