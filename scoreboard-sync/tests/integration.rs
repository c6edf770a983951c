//! Integration tests for end-to-end score relaying.
//!
//! These tests start a real relay on an ephemeral port and connect real
//! clients over both transports.

use futures_util::{SinkExt, StreamExt};
use scoreboard_sync::{
    ConnectionConfig, ConnectionEvent, CorsConfig, ConnectionManager, ConnectionStatus, Delivery, FileCache,
    MemoryCache, ReconnectPolicy, RelayHandle, RelayServer, ScoreAction, ScoreSnapshot,
    ScoreSynchronizer, ServerConfig, SnapshotCache, TeamId, TransportKind,
};
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

// ─── Helpers ─────────────────────────────────────────────────────────────────

struct TestRelay {
    addr: SocketAddr,
    relay: RelayHandle,
    stop: Option<oneshot::Sender<()>>,
}

impl TestRelay {
    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Block until the relay has registered `n` connections.
    async fn wait_for_peers(&self, n: usize) {
        timeout(Duration::from_secs(2), async {
            while self.relay.connection_count().await != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("peer count reached");
    }
}

/// Start a relay on a free port.
async fn start_relay(config: ServerConfig) -> TestRelay {
    let server = RelayServer::bind(ServerConfig {
        bind_addr: "127.0.0.1:0".into(),
        ..config
    })
    .await
    .unwrap();
    let addr = server.local_addr();
    let relay = server.relay();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(async move {
        server
            .run_until(async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });
    TestRelay {
        addr,
        relay,
        stop: Some(stop),
    }
}

fn client_config(url: String) -> ConnectionConfig {
    ConnectionConfig {
        reconnect: ReconnectPolicy::fixed(Duration::from_millis(50)),
        connect_timeout: Duration::from_secs(2),
        ..ConnectionConfig::new(url)
    }
}

/// Connect a synchronizer, draining the initial Connected event.
async fn connect_client(url: String) -> (ConnectionManager, ScoreSynchronizer, TransportKind) {
    let mut manager = ConnectionManager::start(client_config(url));
    let mut sync = ScoreSynchronizer::attach(MemoryCache::new(), &mut manager);
    let transport = loop {
        match timeout(Duration::from_secs(3), sync.next_event()).await {
            Ok(Some(ConnectionEvent::Connected { transport })) => break transport,
            Ok(Some(_)) => continue,
            other => panic!("expected Connected event, got {other:?}"),
        }
    };
    (manager, sync, transport)
}

/// Wait for the next broadcast and return the synchronizer's mirror after it.
async fn next_score(sync: &mut ScoreSynchronizer) -> ScoreSnapshot {
    loop {
        match timeout(Duration::from_secs(2), sync.next_event()).await {
            Ok(Some(ConnectionEvent::ScoreUpdated(_))) => return sync.snapshot().clone(),
            Ok(Some(_)) => continue,
            other => panic!("expected score-updated, got {other:?}"),
        }
    }
}

/// Assert no broadcast reaches `sync` within `wait`.
async fn assert_quiet(sync: &mut ScoreSynchronizer, wait: Duration) {
    let result = timeout(wait, async {
        loop {
            match sync.next_event().await {
                Some(ConnectionEvent::ScoreUpdated(s)) => return s,
                Some(_) => continue,
                None => return std::future::pending().await,
            }
        }
    })
    .await;
    assert!(result.is_err(), "unexpected broadcast: {result:?}");
}

// ─── Relaying ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_increment_reaches_other_client() {
    let relay = start_relay(ServerConfig::default()).await;
    let (_ma, mut a, transport) = connect_client(relay.url()).await;
    let (_mb, mut b, _) = connect_client(relay.url()).await;
    relay.wait_for_peers(2).await;
    assert_eq!(transport, TransportKind::WebSocket);

    let outcome = a.mutate(TeamId::Fire, ScoreAction::Increment, None).await;
    assert_eq!(outcome.delivery, Delivery::Sent);

    let seen = next_score(&mut b).await;
    assert_eq!(seen.len(), 5);
    for team in seen.teams() {
        let expected = if team.id == TeamId::Fire { 1 } else { 0 };
        assert_eq!(team.points, expected, "team {}", team.id);
    }

    // The sender hears its own update back.
    assert_eq!(next_score(&mut a).await, seen);
    assert_eq!(relay.relay.snapshot().await, Some(seen));
}

#[tokio::test]
async fn test_decrement_at_zero_still_broadcasts() {
    let relay = start_relay(ServerConfig::default()).await;
    let (_ma, mut a, _) = connect_client(relay.url()).await;
    let (_mb, mut b, _) = connect_client(relay.url()).await;
    relay.wait_for_peers(2).await;

    a.mutate(TeamId::Air, ScoreAction::Decrement, None).await;
    let seen = next_score(&mut b).await;
    assert_eq!(seen.points(TeamId::Air), Some(0));
    assert_eq!(seen, ScoreSnapshot::default());
}

#[tokio::test]
async fn test_clients_converge_on_last_update() {
    let relay = start_relay(ServerConfig::default()).await;
    let (_ma, mut a, _) = connect_client(relay.url()).await;
    let (_mb, mut b, _) = connect_client(relay.url()).await;
    relay.wait_for_peers(2).await;

    // Near-simultaneous, conflicting edits from both sides.
    a.mutate(TeamId::Water, ScoreAction::Set, Some(5)).await;
    b.mutate(TeamId::Earth, ScoreAction::Set, Some(7)).await;

    for _ in 0..2 {
        next_score(&mut a).await;
        next_score(&mut b).await;
    }

    let authoritative = relay.relay.snapshot().await.unwrap();
    assert_eq!(a.snapshot(), &authoritative);
    assert_eq!(b.snapshot(), &authoritative);
    // Last writer wins: exactly one of the two edits survives.
    let water = authoritative.points(TeamId::Water) == Some(5);
    let earth = authoritative.points(TeamId::Earth) == Some(7);
    assert!(water ^ earth);
}

#[tokio::test]
async fn test_new_client_gets_no_state_until_next_update() {
    let relay = start_relay(ServerConfig::default()).await;
    let (_ma, mut a, _) = connect_client(relay.url()).await;
    relay.wait_for_peers(1).await;
    a.mutate(TeamId::Lightning, ScoreAction::IncrementBy, Some(4)).await;
    next_score(&mut a).await;

    let (_mc, mut c, _) = connect_client(relay.url()).await;
    relay.wait_for_peers(2).await;
    assert_quiet(&mut c, Duration::from_millis(300)).await;
    assert_eq!(c.snapshot(), &ScoreSnapshot::default());

    a.mutate(TeamId::Lightning, ScoreAction::Increment, None).await;
    assert_eq!(next_score(&mut c).await.points(TeamId::Lightning), Some(5));
}

// ─── Offline behaviour ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_offline_mutation_is_not_replayed() {
    let relay = start_relay(ServerConfig::default()).await;
    let (_mb, mut b, _) = connect_client(relay.url()).await;
    relay.wait_for_peers(1).await;

    let mut manager = ConnectionManager::start(ConnectionConfig {
        auto_connect: false,
        ..client_config(relay.url())
    });
    let mut a = ScoreSynchronizer::attach(MemoryCache::new(), &mut manager);
    assert_eq!(a.connection().status(), ConnectionStatus::Disconnected);

    let outcome = a.mutate(TeamId::Fire, ScoreAction::Increment, None).await;
    assert_eq!(outcome.delivery, Delivery::Offline);
    assert_eq!(a.snapshot().points(TeamId::Fire), Some(1));

    a.connection().reconnect();
    assert!(timeout(Duration::from_secs(3), a.connection().wait_for(ConnectionStatus::Connected))
        .await
        .unwrap());
    relay.wait_for_peers(2).await;

    assert_quiet(&mut b, Duration::from_millis(300)).await;
    assert_eq!(relay.relay.snapshot().await, None);
    assert_eq!(b.snapshot().points(TeamId::Fire), Some(0));
}

#[tokio::test]
async fn test_client_reconnects_after_relay_restart() {
    let mut first = start_relay(ServerConfig::default()).await;
    let addr = first.addr;
    let (_ma, mut a, _) = connect_client(first.url()).await;
    first.wait_for_peers(1).await;

    first.shutdown();
    loop {
        match timeout(Duration::from_secs(3), a.next_event()).await {
            Ok(Some(ConnectionEvent::Disconnected { .. })) => break,
            Ok(Some(_)) => continue,
            other => panic!("expected Disconnected event, got {other:?}"),
        }
    }
    assert_ne!(a.connection().status(), ConnectionStatus::Connected);

    // Same address, fresh relay: it starts empty and the client finds it.
    // The old listener may take a moment to close.
    let server = timeout(Duration::from_secs(3), async {
        loop {
            let bound = RelayServer::bind(ServerConfig {
                bind_addr: addr.to_string(),
                ..ServerConfig::default()
            })
            .await;
            match bound {
                Ok(server) => return server,
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    })
    .await
    .unwrap();
    let relay = server.relay();
    tokio::spawn(server.run());

    assert!(timeout(Duration::from_secs(5), a.connection().wait_for(ConnectionStatus::Connected))
        .await
        .unwrap());
    assert_eq!(relay.snapshot().await, None);
}

// ─── Transports ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_polling_fallback() {
    let relay = start_relay(ServerConfig {
        transports: vec![TransportKind::Polling],
        ..ServerConfig::default()
    })
    .await;
    let (_ma, mut a, ta) = connect_client(relay.url()).await;
    let (_mb, mut b, tb) = connect_client(relay.url()).await;
    assert_eq!(ta, TransportKind::Polling);
    assert_eq!(tb, TransportKind::Polling);
    relay.wait_for_peers(2).await;

    a.mutate(TeamId::Water, ScoreAction::Set, Some(5)).await;
    a.mutate(TeamId::Water, ScoreAction::IncrementBy, Some(3)).await;

    next_score(&mut b).await;
    let seen = next_score(&mut b).await;
    assert_eq!(seen.points(TeamId::Water), Some(8));
}

#[tokio::test]
async fn test_polling_and_websocket_share_updates() {
    let relay = start_relay(ServerConfig::default()).await;
    let (_ma, mut ws_client, _) = connect_client(relay.url()).await;

    let mut manager = ConnectionManager::start(ConnectionConfig {
        transports: vec![TransportKind::Polling],
        ..client_config(relay.url())
    });
    let mut poll_client = ScoreSynchronizer::attach(MemoryCache::new(), &mut manager);
    assert!(timeout(
        Duration::from_secs(3),
        poll_client.connection().wait_for(ConnectionStatus::Connected)
    )
    .await
    .unwrap());
    relay.wait_for_peers(2).await;

    poll_client.mutate(TeamId::Earth, ScoreAction::Increment, None).await;
    assert_eq!(next_score(&mut ws_client).await.points(TeamId::Earth), Some(1));

    ws_client.mutate(TeamId::Earth, ScoreAction::Increment, None).await;
    loop {
        if next_score(&mut poll_client).await.points(TeamId::Earth) == Some(2) {
            break;
        }
    }

    manager.shutdown().await;
    relay.wait_for_peers(1).await;
}

#[tokio::test]
async fn test_custom_endpoint_path() {
    let relay = start_relay(ServerConfig {
        path: "/api/socket".into(),
        ..ServerConfig::default()
    })
    .await;
    let mut manager = ConnectionManager::start(ConnectionConfig {
        path: "/api/socket".into(),
        ..client_config(relay.url())
    });
    let handle = manager.handle();
    let mut events = manager.take_event_rx().unwrap();

    match timeout(Duration::from_secs(3), events.recv()).await {
        Ok(Some(ConnectionEvent::Connected { transport })) => {
            assert_eq!(transport, TransportKind::WebSocket)
        }
        other => panic!("expected Connected event, got {other:?}"),
    }
    assert!(handle.is_connected());
    manager.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_gets_error_reply() {
    let relay = start_relay(ServerConfig::default()).await;
    let url = format!("ws://{}/socket.io", relay.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    ws.send(Message::Text(String::from(r#"{"event":"score-update","data":42}"#).into()))
        .await
        .unwrap();

    let reply = timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .unwrap();

    let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(value["event"], "error");
    assert!(value["data"]["message"].as_str().unwrap().starts_with("Invalid frame"));
    assert_eq!(relay.relay.snapshot().await, None);
    assert_eq!(relay.relay.connection_count().await, 1);
}

#[tokio::test]
async fn test_health_endpoint() {
    let relay = start_relay(ServerConfig::default()).await;
    let response = reqwest::get(format!("{}/health", relay.url())).await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_unknown_poll_session_is_404() {
    let relay = start_relay(ServerConfig::default()).await;
    let url = format!("{}/socket.io/poll/{}", relay.url(), uuid::Uuid::new_v4());
    let response = reqwest::get(url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

// ─── CORS ────────────────────────────────────────────────────────────────────

/// Send a browser-style preflight for a POST from `origin`.
async fn preflight(relay: &TestRelay, origin: &str) -> reqwest::Response {
    reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("{}/health", relay.url()))
        .header("Origin", origin)
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap()
}

fn header<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_preflight_honours_origin_allow_list() {
    let relay = start_relay(ServerConfig {
        cors: CorsConfig {
            origins: CorsConfig::parse_origins("https://*.app.github.dev,http://localhost:8080"),
            credentials: true,
        },
        ..ServerConfig::default()
    })
    .await;

    let allowed = preflight(&relay, "https://team-3001.app.github.dev").await;
    assert!(allowed.status().is_success());
    assert_eq!(
        header(&allowed, "access-control-allow-origin"),
        Some("https://team-3001.app.github.dev")
    );
    assert_eq!(header(&allowed, "access-control-allow-credentials"), Some("true"));
    let methods = header(&allowed, "access-control-allow-methods").unwrap_or_default();
    assert!(methods.contains("GET"));
    assert!(methods.contains("POST"));

    let exact = preflight(&relay, "http://localhost:8080").await;
    assert_eq!(header(&exact, "access-control-allow-origin"), Some("http://localhost:8080"));

    let denied = preflight(&relay, "https://evil.example.com").await;
    assert_eq!(header(&denied, "access-control-allow-origin"), None);
}

#[tokio::test]
async fn test_preflight_mirrors_any_origin_by_default() {
    let relay = start_relay(ServerConfig::default()).await;

    let response = preflight(&relay, "https://anywhere.example.org").await;
    assert!(response.status().is_success());
    assert_eq!(
        header(&response, "access-control-allow-origin"),
        Some("https://anywhere.example.org")
    );
    assert_eq!(header(&response, "access-control-allow-credentials"), Some("true"));
}

// ─── Cache ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cache_round_trip_without_relay() {
    let dir = tempfile::tempdir().unwrap();
    // Nothing listens on port 9; keep the manager idle anyway.
    let offline = || ConnectionConfig {
        auto_connect: false,
        ..ConnectionConfig::new("http://127.0.0.1:9")
    };

    let written = {
        let mut manager = ConnectionManager::start(offline());
        let mut sync = ScoreSynchronizer::attach(FileCache::in_dir(dir.path()), &mut manager);
        sync.mutate(TeamId::Water, ScoreAction::Set, Some(5)).await;
        let outcome = sync.mutate(TeamId::Water, ScoreAction::IncrementBy, Some(3)).await;
        assert_eq!(outcome.delivery, Delivery::Offline);
        manager.shutdown().await;
        outcome.snapshot
    };

    let mut manager = ConnectionManager::start(offline());
    let reloaded = ScoreSynchronizer::attach(FileCache::in_dir(dir.path()), &mut manager);
    assert_eq!(reloaded.snapshot(), &written);
    assert_eq!(reloaded.snapshot().points(TeamId::Water), Some(8));
    assert_eq!(FileCache::in_dir(dir.path()).load().unwrap(), Some(written));
    manager.shutdown().await;
}
