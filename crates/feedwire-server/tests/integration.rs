//! End-to-end tests against a real listener using a `WebSocket` client.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use feedwire_breaker::BreakerRegistry;
use feedwire_core::{BroadcastMessage, MessageKind, Priority};
use feedwire_hub::{Hub, HubConfig, MemoryCache};
use feedwire_server::{FeedwireServer, ServerConfig};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    server: FeedwireServer,
    base: String,
    dispatcher: CancellationToken,
}

impl TestServer {
    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.base)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.dispatcher.cancel();
        self.server.shutdown().shutdown();
    }
}

/// Boot a server on an ephemeral port with a running dispatcher.
async fn boot_server(config: ServerConfig) -> TestServer {
    let hub = Arc::new(Hub::new(HubConfig::default()).with_cache(Arc::new(MemoryCache::new())));
    let dispatcher = CancellationToken::new();
    let _dispatch = hub.spawn(dispatcher.clone());

    let server = FeedwireServer::new(
        config,
        hub,
        Arc::new(BreakerRegistry::new()),
        feedwire_server::metrics::detached_handle(),
    );
    let (addr, _handle) = server.listen().await.unwrap();
    TestServer {
        server,
        base: addr.to_string(),
        dispatcher,
    }
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
    ws
}

/// Read the next text frame as JSON, skipping control frames.
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("read error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn subscribe_then_receive_topic_messages() {
    let ts = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&ts.ws_url()).await;

    send_json(&mut ws, json!({"op": "subscribe", "topics": ["nifty", " BankNifty "]})).await;
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["op"], "subscribed");
    assert_eq!(ack["topics"], json!(["NIFTY", "BANKNIFTY"]));

    let hub = ts.server.hub();
    hub.enqueue(BroadcastMessage::new(
        MessageKind::MarketData,
        Some("NIFTY".into()),
        json!({"ltp": 22000.5}),
    ))
    .unwrap();
    hub.enqueue(BroadcastMessage::new(
        MessageKind::MarketData,
        Some("SENSEX".into()),
        json!({"ltp": 73000}),
    ))
    .unwrap();
    hub.enqueue(
        BroadcastMessage::new(MessageKind::System, None, json!({"msg": "halt"}))
            .with_priority(Priority::Critical),
    )
    .unwrap();

    // The alert may overtake the NIFTY tick; SENSEX must never arrive.
    let mut seen = Vec::new();
    for _ in 0..2 {
        let frame = next_json(&mut ws).await;
        seen.push(frame["type"].as_str().unwrap().to_owned());
        if frame["type"] == "market_data" {
            assert_eq!(frame["topic"], "NIFTY");
            assert_eq!(frame["payload"]["ltp"], 22000.5);
        }
    }
    seen.sort();
    assert_eq!(seen, vec!["market_data", "system"]);
}

#[tokio::test]
async fn malformed_request_gets_error_reply() {
    let ts = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&ts.ws_url()).await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["op"], "error");
    assert!(!reply["message"].as_str().unwrap().is_empty());

    // The session survives a bad frame.
    send_json(&mut ws, json!({"op": "subscribe", "topics": ["NIFTY"]})).await;
    assert_eq!(next_json(&mut ws).await["op"], "subscribed");
}

#[tokio::test]
async fn late_subscriber_gets_cached_snapshot() {
    let ts = boot_server(ServerConfig::default()).await;
    let hub = Arc::clone(ts.server.hub());
    hub.enqueue(BroadcastMessage::new(
        MessageKind::MarketData,
        Some("NIFTY".into()),
        json!({"ltp": 1}),
    ))
    .unwrap();
    wait_for(|| hub.stats().messages_dispatched == 1).await;
    // Cache writes are spawned off the dispatch path.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ws = connect(&ts.ws_url()).await;
    send_json(&mut ws, json!({"op": "subscribe", "topics": ["NIFTY"]})).await;
    assert_eq!(next_json(&mut ws).await["op"], "subscribed");
    let snapshot = next_json(&mut ws).await;
    assert_eq!(snapshot["type"], "market_data");
    assert_eq!(snapshot["priority"], "low");
    assert_eq!(snapshot["payload"]["ltp"], 1);
}

#[tokio::test]
async fn connections_beyond_limit_are_refused() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let ts = boot_server(config).await;
    let _first = connect(&ts.ws_url()).await;
    wait_for(|| ts.server.connection_count() == 1).await;

    let second = timeout(TIMEOUT, connect_async(ts.ws_url())).await.unwrap();
    assert_matches!(second, Err(tungstenite::Error::Http(resp)) if resp.status() == 503);
}

#[tokio::test]
async fn client_close_removes_session() {
    let ts = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&ts.ws_url()).await;
    send_json(&mut ws, json!({"op": "subscribe", "topics": ["NIFTY"]})).await;
    let _ = next_json(&mut ws).await;

    let hub = Arc::clone(ts.server.hub());
    assert_eq!(hub.registry().session_count(), 1);
    assert!(hub.registry().has_topic("NIFTY"));

    ws.close(None).await.unwrap();
    wait_for(|| hub.registry().session_count() == 0).await;
    assert!(!hub.registry().has_topic("NIFTY"));
    wait_for(|| ts.server.connection_count() == 0).await;
}

#[tokio::test]
async fn hub_shutdown_closes_sockets() {
    let ts = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&ts.ws_url()).await;
    send_json(&mut ws, json!({"op": "subscribe", "topics": ["NIFTY"]})).await;
    let _ = next_json(&mut ws).await;

    let report = ts.server.hub().shutdown().await;
    assert_eq!(report.disconnected, 1);

    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
}

#[tokio::test]
async fn health_over_http() {
    let ts = boot_server(ServerConfig::default()).await;
    let _ws = connect(&ts.ws_url()).await;
    wait_for(|| ts.server.hub().registry().session_count() == 1).await;

    let resp = reqwest::get(format!("http://{}/health", ts.base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["sessions"], 1);
}

#[tokio::test]
async fn shutdown_refuses_new_upgrades() {
    let ts = boot_server(ServerConfig::default()).await;
    ts.server.shutdown().shutdown();
    // The listener may already be gone; either way no session is created.
    let result = timeout(TIMEOUT, connect_async(ts.ws_url())).await.unwrap();
    assert!(result.is_err());
    assert_eq!(ts.server.hub().registry().session_count(), 0);
}
