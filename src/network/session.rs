//! Session Registry
//!
//! Tracks every open socket (`connections`) and the subset counted in the
//! forming or running match (`participants`). Identity is the persistent
//! player id handed over on the upgrade request; a second socket for an
//! id that is already connected is refused.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::game::state::PlayerId;

/// Outbound queue of encoded frames for one socket.
pub type FrameSender = mpsc::Sender<Vec<u8>>;

/// One open socket.
#[derive(Debug)]
pub struct Connection {
    /// Player identity.
    pub id: PlayerId,
    /// Display name (already sanitised).
    pub name: String,
    /// Score in the current match.
    pub score: u32,
    /// When the socket was accepted.
    pub connected_at: Instant,
    /// Frame queue drained by the socket's writer task.
    sender: FrameSender,
}

impl Connection {
    /// Create a connection with a zero score.
    pub fn new(id: PlayerId, name: impl Into<String>, sender: FrameSender) -> Self {
        Self {
            id,
            name: name.into(),
            score: 0,
            connected_at: Instant::now(),
            sender,
        }
    }

    /// Queue a frame without waiting.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), SendError> {
        self.sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Writer task is behind.
    #[error("outbound queue full")]
    QueueFull,
    /// Socket already gone.
    #[error("connection closed")]
    Closed,
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Identity already has an open socket.
    #[error("player {0} is already connected")]
    DuplicateIdentity(PlayerId),

    /// Player cap reached.
    #[error("server full ({max} players)")]
    ServerFull {
        /// Configured cap.
        max: usize,
    },
}

/// Connections and match participants.
#[derive(Debug)]
pub struct SessionRegistry {
    connections: BTreeMap<PlayerId, Connection>,
    participants: BTreeSet<PlayerId>,
    max_connections: usize,
}

impl SessionRegistry {
    /// Create an empty registry capped at `max_connections`.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            participants: BTreeSet::new(),
            max_connections,
        }
    }

    /// Add an open socket. Does not enroll it as a participant.
    pub fn register(&mut self, connection: Connection) -> Result<(), SessionError> {
        if self.connections.contains_key(&connection.id) {
            return Err(SessionError::DuplicateIdentity(connection.id));
        }
        if self.connections.len() >= self.max_connections {
            return Err(SessionError::ServerFull { max: self.max_connections });
        }

        self.connections.insert(connection.id, connection);
        Ok(())
    }

    /// Drop a socket, withdrawing it from the participants as well.
    pub fn remove(&mut self, id: PlayerId) -> Option<Connection> {
        self.participants.remove(&id);
        self.connections.remove(&id)
    }

    /// Count a connection toward the match. Unknown ids are ignored.
    pub fn enroll(&mut self, id: PlayerId) -> bool {
        self.connections.contains_key(&id) && self.participants.insert(id)
    }

    /// Make every open connection a participant.
    pub fn enroll_all(&mut self) {
        self.participants = self.connections.keys().copied().collect();
    }

    /// Forget all participants.
    pub fn clear_participants(&mut self) {
        self.participants.clear();
    }

    /// Check participant membership.
    pub fn is_participant(&self, id: PlayerId) -> bool {
        self.participants.contains(&id)
    }

    /// Number of open sockets.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of participants.
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Look up a connection.
    pub fn get(&self, id: PlayerId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Look up a connection mutably.
    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// All connections in id order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Participants in id order.
    pub fn participants(&self) -> impl Iterator<Item = &Connection> {
        self.participants
            .iter()
            .filter_map(|id| self.connections.get(id))
    }

    /// Zero every participant's score.
    pub fn reset_scores(&mut self) {
        for id in &self.participants {
            if let Some(connection) = self.connections.get_mut(id) {
                connection.score = 0;
            }
        }
    }

    /// `(id, score)` for every participant, in id order.
    pub fn participant_scores(&self) -> Vec<(PlayerId, u32)> {
        self.participants().map(|c| (c.id, c.score)).collect()
    }
}
