//! In-process mock price feed for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use price_stream_client::{
    ClientConfig, ConnectionStatus, HeartbeatConfig, MemorySnapshotStore, ReconnectConfig,
    SnapshotStore, StreamingClient,
};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Default wait for anything the test expects to happen.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Mock server accepting any number of WebSocket connections.
pub struct MockFeed {
    url: String,
    accepted: Arc<AtomicUsize>,
    connections: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockFeed {
    /// Bind on an ephemeral localhost port and start accepting.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (tx, connections) = mpsc::unbounded_channel();

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                if tx.send(MockConnection { ws }).is_err() {
                    break;
                }
            }
        });

        Self {
            url: format!("ws://{addr}"),
            accepted,
            connections,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of WebSocket handshakes completed so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> MockConnection {
        tokio::time::timeout(STEP_TIMEOUT, self.connections.recv())
            .await
            .expect("timed out waiting for a client connection")
            .expect("mock feed stopped")
    }

    /// Assert that no new connection arrives within `window`.
    pub async fn expect_no_connection(&mut self, window: Duration) {
        let next = tokio::time::timeout(window, self.connections.recv()).await;
        assert!(next.is_err(), "unexpected client connection");
    }
}

/// Server side of one client connection.
pub struct MockConnection {
    ws: WebSocketStream<TcpStream>,
}

impl MockConnection {
    pub async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .unwrap();
    }

    /// Next text frame parsed as JSON.
    pub async fn recv_json(&mut self) -> Value {
        tokio::time::timeout(STEP_TIMEOUT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                    Some(Ok(Message::Close(frame))) => panic!("client closed: {frame:?}"),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => panic!("transport error: {e}"),
                    None => panic!("client went away"),
                }
            }
        })
        .await
        .expect("timed out waiting for a client message")
    }

    /// Assert that no text frame arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        let _ = tokio::time::timeout(window, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => panic!("unexpected client message: {text}"),
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => std::future::pending::<()>().await,
                }
            }
        })
        .await;
    }

    /// Wait for the client to end the connection.
    ///
    /// Returns the close code when the client sent a close frame, `None`
    /// when it dropped the socket.
    pub async fn closed(&mut self) -> Option<CloseCode> {
        tokio::time::timeout(STEP_TIMEOUT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code),
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => return None,
                }
            }
        })
        .await
        .expect("timed out waiting for the client to close")
    }

    /// Run the server half of the challenge handshake.
    pub async fn authenticate(&mut self, challenge: &str, challenge_id: Value) -> Value {
        self.send_json(serde_json::json!({"type": "auth_required"})).await;
        let request = self.recv_json().await;
        assert_eq!(request["action"], "authenticate");
        assert_eq!(request["auth_data"]["type"], "request_challenge");

        self.send_json(serde_json::json!({
            "type": "challenge",
            "challenge": challenge,
            "challenge_id": challenge_id,
        }))
        .await;
        let response = self.recv_json().await;
        assert_eq!(response["auth_data"]["type"], "challenge_response");

        self.send_json(serde_json::json!({
            "type": "authenticated",
            "session_token": "session-1",
        }))
        .await;
        response
    }

    /// Close from the server side.
    pub async fn close(mut self, code: CloseCode) {
        let frame = CloseFrame {
            code,
            reason: "server going away".to_string().into(),
        };
        let _ = self.ws.send(Message::Close(Some(frame))).await;
    }
}

/// Client config tuned for fast tests.
pub fn test_config(url: &str) -> ClientConfig {
    let mut config = ClientConfig::new(url);
    config.reconnect = ReconnectConfig::fixed(Duration::from_millis(100));
    config.heartbeat = HeartbeatConfig::disabled();
    config.auth_timeout = Duration::from_secs(2);
    config
}

pub async fn client(config: ClientConfig) -> StreamingClient {
    client_with_store(config, Arc::new(MemorySnapshotStore::new())).await
}

pub async fn client_with_store(
    config: ClientConfig,
    store: Arc<dyn SnapshotStore>,
) -> StreamingClient {
    StreamingClient::new(config, store).await
}

/// Wait until the client status satisfies `predicate`.
pub async fn wait_for_status<F>(client: &StreamingClient, predicate: F) -> ConnectionStatus
where
    F: FnMut(&ConnectionStatus) -> bool,
{
    let mut watch = client.status_watch();
    let status = tokio::time::timeout(STEP_TIMEOUT, watch.wait_for(predicate))
        .await
        .expect("timed out waiting for connection status")
        .expect("status channel closed")
        .clone();
    status
}
