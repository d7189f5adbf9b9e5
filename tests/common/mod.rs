use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use web3d::network::server::{GameServer, GameServerError, ServerConfig, ServerStats};
use web3d::{MatchConfig, Message};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub server: Arc<GameServer>,
    _handle: tokio::task::JoinHandle<Result<(), GameServerError>>,
}

impl TestServer {
    /// Start a server with the given match rules and no recorder.
    pub async fn start(match_config: MatchConfig) -> Self {
        Self::with_config(ServerConfig {
            match_config,
            ..ServerConfig::default()
        })
        .await
    }

    pub async fn with_config(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = Arc::new(GameServer::new(config));
        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(listener).await });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            server,
            _handle: handle,
        }
    }

    pub fn ws_url(&self, id: u32, name: &str) -> String {
        format!("ws://{}/web3d?id={}&name={}", self.addr, id, name)
    }

    /// Connect as player `id`.
    pub async fn join(&self, id: u32, name: &str) -> WsClient {
        ws_connect(&self.ws_url(id, name)).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

/// Rules with a short countdown and no collect debounce.
pub fn fast_rules(collectible_count: u32) -> MatchConfig {
    MatchConfig {
        collectible_count,
        countdown: Duration::from_millis(200),
        collect_debounce: Duration::ZERO,
        ..MatchConfig::default()
    }
}

/// Poll the server snapshot until `pred` holds (2s timeout).
pub async fn wait_for_stats(server: &TestServer, pred: impl Fn(&ServerStats) -> bool) -> ServerStats {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let stats = server.server.stats();
        if pred(&stats) {
            return stats;
        }
        assert!(tokio::time::Instant::now() < deadline, "Stats never matched: {stats:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsClient {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub async fn ws_send(stream: &mut WsClient, message: &Message) {
    stream.send(WsMessage::Binary(message.encode())).await.unwrap();
}

/// Read the next game message (5s timeout).
pub async fn ws_recv(stream: &mut WsClient) -> Message {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Binary(data))) => return Message::decode(&data).unwrap(),
                Some(Ok(WsMessage::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for message")
}

/// Wait for the server to close the socket and return its close frame.
pub async fn ws_recv_close(stream: &mut WsClient) -> Option<CloseFrame<'static>> {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Close(frame))) => return frame,
                Some(Ok(WsMessage::Binary(data))) => {
                    panic!("Expected close, got {:?}", Message::decode(&data))
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("Timed out waiting for close")
}

/// Assert nothing arrives within `window`.
pub async fn assert_silent(stream: &mut WsClient, window: Duration) {
    if let Ok(Some(Ok(WsMessage::Binary(data)))) = tokio::time::timeout(window, stream.next()).await {
        panic!("Unexpected message: {:?}", Message::decode(&data));
    }
}

/// One-shot HTTP endpoint that captures a single request to the match
/// history API. Resolves with the raw header block and the JSON body.
pub async fn mock_history_endpoint() -> (String, oneshot::Receiver<(String, serde_json::Value)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let (head, body) = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before the request was complete");
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf).to_string();
            let Some(split) = text.find("\r\n\r\n") else {
                continue;
            };
            let head = text[..split].to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            let body = &buf[split + 4..];
            if body.len() >= content_length {
                break (head, body[..content_length].to_vec());
            }
        };

        let reply = r#"{"matchId":"m1"}"#;
        let response = format!(
            "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            reply.len(),
            reply
        );
        socket.write_all(response.as_bytes()).await.unwrap();

        let json = serde_json::from_slice(&body).unwrap();
        let _ = tx.send((head, json));
    });

    (url, rx)
}
