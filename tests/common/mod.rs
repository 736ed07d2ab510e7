// Shared harness: an in-process server on an ephemeral port plus a few
// WebSocket helpers

#![allow(dead_code)]

use futures_util::StreamExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use rusty_relay::auth::{Claims, TokenManager};
use rusty_relay::config::ServerConfig;
use rusty_relay::core::{Gateway, SharedGateway};
use rusty_relay::handlers::routes;
use rusty_relay::storage::InMemoryStore;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub gateway: SharedGateway,
    pub store: Arc<InMemoryStore>,
    pub tokens: Arc<TokenManager>,
}

impl TestServer {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path)
    }

    pub fn token_for(&self, user_id: &str) -> String {
        self.tokens
            .generate_token(&Claims::new(user_id.to_string(), None))
            .expect("token generation")
    }

    /// Connect with a bearer token and wait for the `connected` event
    pub async fn connect(&self, user_id: &str) -> WsStream {
        let mut request = self.ws_url().into_client_request().unwrap();
        request.headers_mut().insert(
            "authorization",
            format!("Bearer {}", self.token_for(user_id)).parse().unwrap(),
        );
        let (mut ws, _) = connect_async(request).await.expect("websocket connect");
        let event = next_event_named(&mut ws, "connected").await;
        assert_eq!(event["data"]["userId"], user_id);
        ws
    }
}

pub async fn start_server(config: ServerConfig) -> TestServer {
    let tokens = Arc::new(TokenManager::new(&config.jwt_secret));
    let store = Arc::new(InMemoryStore::new());
    store
        .create_conversation("c1", &["alice".to_string(), "bob".to_string()])
        .await;

    let gateway = Arc::new(Gateway::new(
        &config,
        tokens.clone(),
        store.clone(),
        store.clone(),
    ));
    let (addr, server) = warp::serve(routes(gateway.clone())).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    TestServer {
        addr,
        gateway,
        store,
        tokens,
    }
}

pub async fn start_default_server() -> TestServer {
    start_server(ServerConfig::for_testing()).await
}

/// Next frame of any kind, within five seconds
pub async fn next_message(ws: &mut WsStream) -> Message {
    timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("websocket error")
}

pub async fn next_event(ws: &mut WsStream) -> Value {
    loop {
        if let Message::Text(text) = next_message(ws).await {
            return serde_json::from_str(&text).expect("frame is JSON");
        }
    }
}

/// Skip frames until an event with the given name arrives
pub async fn next_event_named(ws: &mut WsStream, name: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["event"] == name {
            return event;
        }
    }
}

/// Read for `window` and fail if an event with the given name shows up
pub async fn assert_no_event(ws: &mut WsStream, name: &str, window: Duration) {
    let deadline = Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        match timeout(remaining, ws.next()).await {
            Err(_) | Ok(None) => return,
            Ok(Some(Ok(Message::Text(text)))) => {
                let event: Value = serde_json::from_str(&text).unwrap();
                assert_ne!(event["event"], name, "unexpected event: {}", text);
            }
            Ok(Some(_)) => {}
        }
    }
}

/// Poll until `check` holds, for at most five seconds
pub async fn wait_until<F: Fn() -> bool>(check: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
