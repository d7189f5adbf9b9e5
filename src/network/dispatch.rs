//! Broadcast Dispatcher
//!
//! Encodes a message once and queues it on every matching connection.
//! A failed write is logged against its recipient and never reaches the
//! other recipients or the caller.

use tracing::{trace, warn};

use crate::game::state::PlayerId;
use crate::network::protocol::Message;
use crate::network::session::{Connection, SessionRegistry};

/// Who receives a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A single connection.
    One(PlayerId),
    /// Every open connection except one.
    ConnectionsExcept(PlayerId),
    /// Every match participant.
    Participants,
    /// Every participant except one (usually the sender).
    ParticipantsExcept(PlayerId),
}

impl Target {
    fn matches(self, sessions: &SessionRegistry, connection: &Connection) -> bool {
        match self {
            Target::One(id) => connection.id == id,
            Target::ConnectionsExcept(id) => connection.id != id,
            Target::Participants => sessions.is_participant(connection.id),
            Target::ParticipantsExcept(id) => {
                connection.id != id && sessions.is_participant(connection.id)
            }
        }
    }
}

/// Queue `message` for every connection matching `target`.
///
/// Returns how many recipients accepted the frame.
pub fn dispatch(sessions: &SessionRegistry, target: Target, message: &Message) -> usize {
    let frame = message.encode();
    let mut delivered = 0;

    let recipients: Vec<&Connection> = match target {
        Target::One(id) => sessions.get(id).into_iter().collect(),
        _ => sessions
            .connections()
            .filter(|c| target.matches(sessions, c))
            .collect(),
    };

    for connection in recipients {
        match connection.send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => {
                warn!("Failed to send {} to {}: {}", message.kind(), connection.id, e);
            }
        }
    }

    trace!("Dispatched {} to {} recipient(s) ({:?})", message.kind(), delivered, target);
    delivered
}
