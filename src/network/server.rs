//! WebSocket Match Server
//!
//! Accepts WebSocket upgrades on a single path, hands every socket to the
//! match actor and pumps frames in both directions.
//!
//! ```text
//!  socket task ──ServerEvent──►  match actor (owns MatchEngine)
//!       ▲                            │
//!       └──── writer task ◄── mpsc ──┘  (one queue per connection)
//! ```
//!
//! The actor is the only place match state is touched, so every handler
//! runs to completion before the next event is looked at.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, instrument, warn};

use crate::core::clock::now_millis;
use crate::game::engine::{ConfigError, MatchConfig, MatchEngine};
use crate::game::state::{CountdownHandle, MatchPhase, PlayerId};
use crate::network::protocol::sanitize_name;
use crate::network::recorder::{MatchRecorder, RecorderConfig, RecorderError};
use crate::network::session::{Connection, SessionError};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Upgrade path; anything else is answered with 404.
    pub path: String,
    /// Frames queued per connection before new ones are dropped.
    pub outbound_buffer: usize,
    /// Events queued for the match actor.
    pub event_buffer: usize,
    /// Match rules.
    pub match_config: MatchConfig,
    /// Match history endpoint.
    pub recorder: RecorderConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3002)),
            path: "/web3d".to_string(),
            outbound_buffer: 64,
            event_buffer: 256,
            match_config: MatchConfig::default(),
            recorder: RecorderConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key/value source. Unset keys keep their
    /// defaults; set keys must parse and pass validation.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = setting(&lookup, "WEB3D_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(path) = lookup("WEB3D_PATH") {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid { key: "WEB3D_PATH", value: path });
            }
            config.path = path;
        }
        if let Some(buffer) = setting(&lookup, "WEB3D_OUTBOUND_BUFFER")? {
            config.outbound_buffer = buffer;
        }

        let rules = &mut config.match_config;
        if let Some(max) = setting(&lookup, "WEB3D_MAX_PLAYERS")? {
            rules.max_players = max;
        }
        if let Some(count) = setting(&lookup, "WEB3D_COLLECTIBLES")? {
            rules.collectible_count = count;
        }
        if let Some(secs) = setting(&lookup, "WEB3D_COUNTDOWN_SECS")? {
            rules.countdown = Duration::from_secs(secs);
        }
        if let Some(len) = setting(&lookup, "WEB3D_MAX_NAME_LEN")? {
            rules.max_name_len = len;
        }
        if let Some(ms) = setting(&lookup, "WEB3D_COLLECT_DEBOUNCE_MS")? {
            rules.collect_debounce = Duration::from_millis(ms);
        }
        rules.validate()?;

        if config.outbound_buffer == 0 {
            return Err(ConfigError::OutOfRange {
                key: "WEB3D_OUTBOUND_BUFFER",
                value: "0".to_string(),
                expected: ">= 1",
            });
        }

        config.recorder = RecorderConfig::from_lookup(&lookup);
        Ok(config)
    }
}

fn setting<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let parsed = raw.trim().parse::<T>();
    match parsed {
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(ConfigError::Invalid { key, value: raw }),
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Game server errors.
#[derive(Debug, Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Recorder could not be built.
    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),
}

/// Why an upgrade request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// Request path is not the game path.
    #[error("not found: {0}")]
    WrongPath(String),

    /// No `id` query parameter.
    #[error("missing player id")]
    MissingId,

    /// `id` is not a positive 32-bit integer.
    #[error("invalid player id {0:?}")]
    InvalidId(String),
}

impl HandshakeError {
    /// HTTP status sent back on the upgrade response.
    pub fn status(&self) -> StatusCode {
        match self {
            HandshakeError::WrongPath(_) => StatusCode::NOT_FOUND,
            HandshakeError::MissingId | HandshakeError::InvalidId(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn into_response(self) -> ErrorResponse {
        let status = self.status();
        let mut response = ErrorResponse::new(Some(self.to_string()));
        *response.status_mut() = status;
        response
    }
}

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Identity carried on the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Player id from `?id=`.
    pub id: PlayerId,
    /// Sanitised display name from `?name=`, or `Player <id>`.
    pub name: String,
}

/// Validate the upgrade URI: `<path>?id=<u32>&name=<text>`.
pub fn parse_join_request(uri: &Uri, path: &str, max_name_len: usize) -> Result<JoinRequest, HandshakeError> {
    if uri.path() != path {
        return Err(HandshakeError::WrongPath(uri.path().to_string()));
    }

    let mut id = None;
    let mut name = None;
    for (key, value) in url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes()) {
        match key.as_ref() {
            "id" => id = Some(value.into_owned()),
            "name" => name = Some(value.into_owned()),
            _ => {}
        }
    }

    let raw_id = id.ok_or(HandshakeError::MissingId)?;
    let id = match raw_id.parse::<u32>() {
        Ok(0) | Err(_) => return Err(HandshakeError::InvalidId(raw_id)),
        Ok(id) => PlayerId(id),
    };

    let name = name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("Player {}", id.0));

    Ok(JoinRequest {
        id,
        name: sanitize_name(&name, max_name_len),
    })
}

// =============================================================================
// MATCH ACTOR
// =============================================================================

/// Messages from socket tasks to the match actor.
enum ServerEvent {
    /// Upgrade succeeded; admit or refuse the connection.
    Joined {
        connection: Connection,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Binary frame from a player.
    Frame { player: PlayerId, data: Vec<u8> },
    /// Socket closed.
    Left { player: PlayerId },
}

/// Snapshot of the match published after every actor step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerStats {
    /// Current phase.
    pub phase: MatchPhase,
    /// Open sockets.
    pub connections: usize,
    /// Players counted in the match.
    pub participants: usize,
    /// Collectibles still on the field.
    pub collectibles_remaining: u32,
}

impl ServerStats {
    fn of(engine: &MatchEngine) -> Self {
        Self {
            phase: engine.phase(),
            connections: engine.sessions().connection_count(),
            participants: engine.sessions().participant_count(),
            collectibles_remaining: engine.state().collectibles.remaining(),
        }
    }
}

/// The armed countdown and the tokio instant it maps to.
type ArmedTimer = Option<(CountdownHandle, Instant)>;

/// Mirror the engine's countdown onto a tokio deadline.
fn sync_timer(engine: &MatchEngine, timer: &mut ArmedTimer) {
    match (engine.pending_countdown(), timer.as_ref()) {
        (Some(handle), Some((current, _))) if current.id == handle.id => {}
        (Some(handle), _) => {
            let delay_ms = (handle.fires_at - now_millis()).max(0.0);
            let deadline = Instant::now() + Duration::from_secs_f64(delay_ms / 1000.0);
            *timer = Some((handle, deadline));
        }
        (None, _) => *timer = None,
    }
}

async fn countdown_expiry(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn run_match_loop(
    mut engine: MatchEngine,
    mut events: mpsc::Receiver<ServerEvent>,
    recorder: MatchRecorder,
    stats: Arc<watch::Sender<ServerStats>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut timer: ArmedTimer = None;

    loop {
        sync_timer(&engine, &mut timer);
        let deadline = timer.as_ref().map(|(_, at)| *at);

        tokio::select! {
            event = events.recv() => match event {
                Some(event) => apply_event(&mut engine, event),
                None => break,
            },
            _ = countdown_expiry(deadline) => {
                if let Some((handle, _)) = timer.take() {
                    engine.countdown_elapsed(handle, now_millis());
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Match loop stopping");
                break;
            }
        }

        for record in engine.take_finished() {
            recorder.spawn_record(record);
        }
        stats.send_replace(ServerStats::of(&engine));
    }

    for record in engine.take_finished() {
        recorder.spawn_record(record);
    }
}

fn apply_event(engine: &mut MatchEngine, event: ServerEvent) {
    match event {
        ServerEvent::Joined { connection, reply } => {
            let id = connection.id;
            let result = engine.join(connection, now_millis());
            let accepted = result.is_ok();
            // Socket task already gone: undo the admission
            if reply.send(result).is_err() && accepted {
                engine.leave(id, now_millis());
            }
        }
        ServerEvent::Frame { player, data } => {
            engine.handle_frame(player, &data, now_millis());
        }
        ServerEvent::Left { player } => {
            engine.leave(player, now_millis());
        }
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Latest match snapshot.
    stats_tx: Arc<watch::Sender<ServerStats>>,
    stats_rx: watch::Receiver<ServerStats>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (stats_tx, stats_rx) = watch::channel(ServerStats::default());

        Self {
            config,
            stats_tx: Arc::new(stats_tx),
            stats_rx,
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Latest match snapshot.
    pub fn stats(&self) -> ServerStats {
        *self.stats_rx.borrow()
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        self.config.match_config.validate()?;
        let recorder = MatchRecorder::new(self.config.recorder.clone())?;
        if !recorder.config().is_configured() {
            warn!("INTERNAL_API_KEY not set, matches will not be recorded");
        }

        info!(
            "Web3D server v{} listening on ws://{}{}",
            self.config.version,
            listener.local_addr()?,
            self.config.path
        );

        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer);
        let engine = MatchEngine::new(self.config.match_config.clone());
        let match_loop = tokio::spawn(run_match_loop(
            engine,
            events_rx,
            recorder,
            self.stats_tx.clone(),
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr, events_tx.clone());
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        drop(events_tx);
        if let Err(e) = match_loop.await {
            error!("Match loop failed: {}", e);
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, events: mpsc::Sender<ServerEvent>) {
        let path = self.config.path.clone();
        let max_name_len = self.config.match_config.max_name_len;
        let outbound_buffer = self.config.outbound_buffer;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut join_request = None;
            let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                match parse_join_request(request.uri(), &path, max_name_len) {
                    Ok(join) => {
                        join_request = Some(join);
                        Ok(response)
                    }
                    Err(e) => {
                        debug!("Rejecting upgrade from {}: {}", addr, e);
                        Err(e.into_response())
                    }
                }
            };

            let ws_stream = match accept_hdr_async(stream, callback).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };
            let Some(JoinRequest { id, name }) = join_request else {
                return;
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(outbound_buffer);
            let (reply_tx, reply_rx) = oneshot::channel();

            let connection = Connection::new(id, name, frame_tx);
            if events.send(ServerEvent::Joined { connection, reply: reply_tx }).await.is_err() {
                return;
            }

            match reply_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Refusing {} from {}: {}", id, addr, e);
                    let close = CloseFrame {
                        code: CloseCode::Policy,
                        reason: e.to_string().into(),
                    };
                    let _ = ws_sender.send(WsMessage::Close(Some(close))).await;
                    return;
                }
                Err(_) => return,
            }

            // Spawn frame writer task
            let sender_task = tokio::spawn(async move {
                while let Some(frame) = frame_rx.recv().await {
                    if ws_sender.send(WsMessage::Binary(frame)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming frames
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(WsMessage::Binary(data))) => {
                                if events.send(ServerEvent::Frame { player: id, data }).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(WsMessage::Text(_))) => {
                                debug!("Ignoring text frame from {}", id);
                            }
                            Some(Ok(WsMessage::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }

            // Cleanup
            let _ = events.send(ServerEvent::Left { player: id }).await;
            sender_task.abort();
            debug!("Client {} cleaned up", addr);
        });
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_join_request() {
        let join = parse_join_request(&uri("/web3d?id=42&name=alice"), "/web3d", 32).unwrap();
        assert_eq!(join.id, PlayerId(42));
        assert_eq!(join.name, "alice");
    }

    #[test]
    fn test_parse_join_request_default_name() {
        let join = parse_join_request(&uri("/web3d?id=7"), "/web3d", 32).unwrap();
        assert_eq!(join.name, "Player 7");

        let blank = parse_join_request(&uri("/web3d?id=7&name=%20"), "/web3d", 32).unwrap();
        assert_eq!(blank.name, "Player 7");
    }

    #[test]
    fn test_parse_join_request_decodes_and_sanitises_name() {
        let join = parse_join_request(&uri("/web3d?name=Ann+Lee%C3%A9&id=3"), "/web3d", 32).unwrap();
        assert_eq!(join.name, "Ann Lee?");

        let long = parse_join_request(&uri("/web3d?id=3&name=abcdefghij"), "/web3d", 5).unwrap();
        assert_eq!(long.name, "abcd");
    }

    #[test]
    fn test_parse_join_request_rejections() {
        let wrong = parse_join_request(&uri("/other?id=1"), "/web3d", 32).unwrap_err();
        assert_eq!(wrong, HandshakeError::WrongPath("/other".to_string()));
        assert_eq!(wrong.status(), StatusCode::NOT_FOUND);

        let missing = parse_join_request(&uri("/web3d?name=bob"), "/web3d", 32).unwrap_err();
        assert_eq!(missing, HandshakeError::MissingId);
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        for bad in ["abc", "0", "-4", "4294967296"] {
            let err = parse_join_request(&uri(&format!("/web3d?id={}", bad)), "/web3d", 32).unwrap_err();
            assert_eq!(err, HandshakeError::InvalidId(bad.to_string()));
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 3002);
        assert_eq!(config.path, "/web3d");
        assert_eq!(config.match_config.collectible_count, 50);
        assert!(config.match_config.validate().is_ok());
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ServerConfig::from_lookup(|key| {
            let value = match key {
                "WEB3D_BIND_ADDR" => Some("127.0.0.1:4000"),
                "WEB3D_PATH" => Some("/arena"),
                "WEB3D_COLLECTIBLES" => Some("20"),
                "WEB3D_COUNTDOWN_SECS" => Some("3"),
                "WEB3D_COLLECT_DEBOUNCE_MS" => Some(" 250 "),
                "INTERNAL_API_KEY" => Some("key"),
                _ => None,
            };
            value.map(str::to_string)
        })
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:4000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.path, "/arena");
        assert_eq!(config.match_config.collectible_count, 20);
        assert_eq!(config.match_config.countdown, Duration::from_secs(3));
        assert_eq!(config.match_config.collect_debounce, Duration::from_millis(250));
        assert_eq!(config.match_config.max_players, 8);
        assert!(config.recorder.is_configured());
    }

    #[test]
    fn test_config_from_lookup_errors() {
        let invalid = ServerConfig::from_lookup(|key| {
            (key == "WEB3D_MAX_PLAYERS").then(|| "lots".to_string())
        });
        assert!(matches!(invalid, Err(ConfigError::Invalid { key: "WEB3D_MAX_PLAYERS", .. })));

        let too_many = ServerConfig::from_lookup(|key| {
            (key == "WEB3D_COLLECTIBLES").then(|| "65".to_string())
        });
        assert!(matches!(too_many, Err(ConfigError::OutOfRange { key: "collectible_count", .. })));

        let bad_path = ServerConfig::from_lookup(|key| {
            (key == "WEB3D_PATH").then(|| "web3d".to_string())
        });
        assert!(matches!(bad_path, Err(ConfigError::Invalid { key: "WEB3D_PATH", .. })));

        let no_buffer = ServerConfig::from_lookup(|key| {
            (key == "WEB3D_OUTBOUND_BUFFER").then(|| "0".to_string())
        });
        assert!(matches!(no_buffer, Err(ConfigError::OutOfRange { .. })));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(ServerConfig::default());
        assert_eq!(server.stats(), ServerStats::default());
        assert_eq!(server.stats().phase, MatchPhase::Waiting);
        assert_eq!(server.config().path, "/web3d");
    }

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let server = Arc::new(GameServer::new(ServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(listener).await });

        // Let the accept loop subscribe before signalling
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
