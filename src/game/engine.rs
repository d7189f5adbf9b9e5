//! Match Engine
//!
//! Owns the session registry and the match, and drives the lifecycle:
//!
//! ```text
//! Waiting ──(2nd connection)──► Countdown ──(timer)──► Active
//!    ▲                              │  ▲                  │
//!    └──(down to 1 connection)──────┘  └──── Ended ◄──────┘
//!                                (≥2 left)   (mask empty / 1 survivor)
//! ```
//!
//! Every handler is synchronous and runs to completion; outbound frames
//! are queued, never awaited. The caller owns the actual countdown timer
//! and reports its expiry through [`MatchEngine::countdown_elapsed`].

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::clock::{duration_millis, Millis};
use crate::core::mask::MAX_COLLECTIBLES;
use crate::game::state::{CountdownHandle, Match, MatchPhase, MatchRecord, PlayerId};
use crate::network::dispatch::{dispatch, Target};
use crate::network::protocol::{
    BeginMsg, CollectMsg, CountMsg, JoinMsg, Message, MoveMsg, NAME_FIELD_LEN, NO_COLLECTIBLE,
};
use crate::network::session::{Connection, SessionError, SessionRegistry};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Match rules.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Collectibles per match (mask width).
    pub collectible_count: u32,
    /// Delay between enough players and the active phase.
    pub countdown: Duration,
    /// Name length including the terminator.
    pub max_name_len: usize,
    /// Claims earlier than this after the start are refused.
    pub collect_debounce: Duration,
    /// Simultaneous connections allowed.
    pub max_players: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            collectible_count: 50,
            countdown: Duration::from_secs(5),
            max_name_len: NAME_FIELD_LEN,
            collect_debounce: Duration::from_millis(100),
            max_players: 8,
        }
    }
}

impl MatchConfig {
    /// Reject values the wire format cannot carry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collectible_count == 0 || self.collectible_count > MAX_COLLECTIBLES {
            return Err(ConfigError::OutOfRange {
                key: "collectible_count",
                value: self.collectible_count.to_string(),
                expected: "1..=64",
            });
        }
        if self.max_name_len == 0 || self.max_name_len > NAME_FIELD_LEN {
            return Err(ConfigError::OutOfRange {
                key: "max_name_len",
                value: self.max_name_len.to_string(),
                expected: "1..=32",
            });
        }
        if self.max_players < 2 {
            return Err(ConfigError::OutOfRange {
                key: "max_players",
                value: self.max_players.to_string(),
                expected: ">= 2",
            });
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Value could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    Invalid {
        /// Setting name.
        key: &'static str,
        /// Raw value.
        value: String,
    },

    /// Value parsed but is not allowed.
    #[error("{key} = {value} is out of range (expected {expected})")]
    OutOfRange {
        /// Setting name.
        key: &'static str,
        /// Offending value.
        value: String,
        /// Allowed range.
        expected: &'static str,
    },
}

/// Why a collect claim was refused. Refused claims change nothing and
/// produce no broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CollectError {
    /// No active match.
    #[error("no active match")]
    NotActive,
    /// Sender is not counted in the match.
    #[error("{0} is not a participant")]
    NotParticipant(PlayerId),
    /// Index outside the collectible pool.
    #[error("collectible index {0} out of range")]
    OutOfRange(i32),
    /// Claim arrived inside the debounce window.
    #[error("claim inside the debounce window")]
    TooEarly,
    /// Someone got there first.
    #[error("collectible {0} already claimed")]
    AlreadyClaimed(u32),
}

// =============================================================================
// ENGINE
// =============================================================================

/// Authoritative match state machine.
pub struct MatchEngine {
    config: MatchConfig,
    sessions: SessionRegistry,
    state: Match,
    /// Participants who disconnected during the active phase, with their
    /// final scores.
    departed: Vec<(PlayerId, u32)>,
    /// Completed matches not yet handed to the recorder.
    finished: Vec<MatchRecord>,
    next_timer_id: u64,
}

impl MatchEngine {
    /// Create an engine in Waiting.
    pub fn new(config: MatchConfig) -> Self {
        Self {
            sessions: SessionRegistry::new(config.max_players),
            state: Match::new(config.collectible_count),
            departed: Vec::new(),
            finished: Vec::new(),
            next_timer_id: 1,
            config,
        }
    }

    /// Match rules.
    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Current match.
    pub fn state(&self) -> &Match {
        &self.state
    }

    /// Current phase.
    pub fn phase(&self) -> MatchPhase {
        self.state.phase
    }

    /// Connections and participants.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// The armed countdown timer, if any.
    pub fn pending_countdown(&self) -> Option<CountdownHandle> {
        self.state.countdown
    }

    /// Drain completed matches for recording.
    pub fn take_finished(&mut self) -> Vec<MatchRecord> {
        std::mem::take(&mut self.finished)
    }

    // -------------------------------------------------------------------------
    // Connection lifecycle
    // -------------------------------------------------------------------------

    /// Admit a new connection.
    ///
    /// On error nothing is broadcast and the caller must close the socket.
    pub fn join(&mut self, connection: Connection, now: Millis) -> Result<(), SessionError> {
        let id = connection.id;
        let name = connection.name.clone();
        self.sessions.register(connection)?;
        self.sessions.enroll(id);

        // Rejoining the running match picks the old score back up
        let mut score = 0;
        if let Some(pos) = self.departed.iter().position(|&(d, _)| d == id) {
            score = self.departed.remove(pos).1;
            if let Some(connection) = self.sessions.get_mut(id) {
                connection.score = score;
            }
        }

        info!(
            "Player {} ({}) joined, {} connected",
            id,
            name,
            self.sessions.connection_count()
        );

        // Existing players first, then the current match state
        let roster: Vec<Message> = self
            .sessions
            .participants()
            .filter(|c| c.id != id)
            .map(|c| Message::Join(JoinMsg {
                subject: c.id,
                score: c.score,
                name: c.name.clone(),
            }))
            .collect();
        for message in &roster {
            dispatch(&self.sessions, Target::One(id), message);
        }

        dispatch(&self.sessions, Target::One(id), &Message::Begin(BeginMsg {
            subject: id,
            start_time: self.state.start_time,
            mask: self.state.collectibles.bits(),
        }));

        if let Some(next_match_time) = self.state.next_match_at {
            dispatch(&self.sessions, Target::One(id), &Message::Count(CountMsg {
                subject: PlayerId::NONE,
                next_match_time,
            }));
        }

        dispatch(&self.sessions, Target::ConnectionsExcept(id), &Message::Join(JoinMsg {
            subject: id,
            score,
            name,
        }));

        if self.sessions.connection_count() == 2 && self.state.phase == MatchPhase::Waiting {
            self.start_countdown(now);
        }

        Ok(())
    }

    /// Handle a closed socket.
    pub fn leave(&mut self, id: PlayerId, now: Millis) {
        let was_participant = self.sessions.is_participant(id);
        let Some(connection) = self.sessions.remove(id) else {
            debug!("Leave for unknown player {}", id);
            return;
        };

        if self.state.phase == MatchPhase::Active && was_participant {
            self.departed.push((id, connection.score));
        }

        let remaining = self.sessions.connection_count();
        info!(
            "Player {} left after {:?}, {} connected",
            id,
            connection.connected_at.elapsed(),
            remaining
        );

        dispatch(&self.sessions, Target::Participants, &Message::Quit { subject: id });

        match remaining {
            0 => {
                self.cancel_countdown();
                self.sessions.clear_participants();
                self.state.collectibles.take_all();
                self.departed.clear();
                self.state.phase = MatchPhase::Waiting;
            }
            1 if self.state.countdown.is_some() => {
                info!("Countdown cancelled, not enough players");
                self.cancel_countdown();
                self.state.phase = MatchPhase::Waiting;
            }
            1 if self.state.phase == MatchPhase::Active => {
                self.award_survivor(now);
            }
            _ => {}
        }
    }

    // -------------------------------------------------------------------------
    // Inbound frames
    // -------------------------------------------------------------------------

    /// Decode and apply one client frame. Malformed frames are dropped.
    pub fn handle_frame(&mut self, from: PlayerId, frame: &[u8], now: Millis) {
        let message = match Message::decode(frame) {
            Ok(m) => m,
            Err(e) => {
                debug!(
                    "Dropping frame from {}: {} ({})",
                    from,
                    e,
                    hex::encode(&frame[..frame.len().min(16)])
                );
                return;
            }
        };

        match message {
            Message::Move(mv) => {
                self.relay_move(from, mv);
            }
            Message::Collect(claim) => {
                if let Err(e) = self.collect(from, claim.index, now) {
                    debug!("Collect from {} refused: {}", from, e);
                }
            }
            other => {
                debug!("Ignoring {} frame from {}", other.kind(), from);
            }
        }
    }

    /// Relay a move to every other participant, stamped with the sender.
    ///
    /// Returns false if the sender is not a participant.
    pub fn relay_move(&mut self, from: PlayerId, mut mv: MoveMsg) -> bool {
        if !self.sessions.is_participant(from) {
            return false;
        }
        mv.subject = from;
        dispatch(&self.sessions, Target::ParticipantsExcept(from), &Message::Move(mv));
        true
    }

    /// Claim a collectible. Returns the collector's new score.
    pub fn collect(&mut self, from: PlayerId, index: i32, now: Millis) -> Result<u32, CollectError> {
        if self.state.phase != MatchPhase::Active {
            return Err(CollectError::NotActive);
        }
        if !self.sessions.is_participant(from) {
            return Err(CollectError::NotParticipant(from));
        }
        let bit = u32::try_from(index)
            .ok()
            .filter(|&i| i < self.state.collectibles.width())
            .ok_or(CollectError::OutOfRange(index))?;
        if now - self.state.start_time < duration_millis(self.config.collect_debounce) {
            return Err(CollectError::TooEarly);
        }
        if !self.state.collectibles.take(bit) {
            return Err(CollectError::AlreadyClaimed(bit));
        }

        let score = match self.sessions.get_mut(from) {
            Some(connection) => {
                connection.score += 1;
                connection.score
            }
            None => return Err(CollectError::NotParticipant(from)),
        };

        dispatch(&self.sessions, Target::Participants, &Message::Collect(CollectMsg {
            subject: from,
            score,
            index,
        }));

        if self.state.collectibles.is_empty() && self.sessions.connection_count() > 1 {
            self.end_match(now);
        }

        Ok(score)
    }

    // -------------------------------------------------------------------------
    // Timers and transitions
    // -------------------------------------------------------------------------

    /// The countdown timer fired. Stale handles are ignored.
    pub fn countdown_elapsed(&mut self, handle: CountdownHandle, now: Millis) {
        match self.state.countdown {
            Some(pending) if pending.id == handle.id => self.start_match(now),
            _ => debug!("Ignoring stale countdown timer {}", handle.id),
        }
    }

    /// Waiting/Ended → Countdown. No-op while a countdown is armed.
    fn start_countdown(&mut self, now: Millis) {
        if self.state.countdown.is_some() {
            return;
        }

        let fires_at = now + duration_millis(self.config.countdown);
        self.state.countdown = Some(CountdownHandle { id: self.next_timer_id, fires_at });
        self.next_timer_id += 1;
        self.state.next_match_at = Some(fires_at);
        self.state.phase = MatchPhase::Countdown;

        info!("Countdown started, match begins in {:?}", self.config.countdown);

        dispatch(&self.sessions, Target::Participants, &Message::Count(CountMsg {
            subject: PlayerId::NONE,
            next_match_time: fires_at,
        }));
    }

    fn cancel_countdown(&mut self) {
        self.state.countdown = None;
        self.state.next_match_at = None;
    }

    /// Countdown → Active.
    fn start_match(&mut self, now: Millis) {
        self.cancel_countdown();
        self.state.start_time = now;
        self.state.collectibles.refill();
        self.state.phase = MatchPhase::Active;
        self.departed.clear();
        self.sessions.reset_scores();

        info!(
            "Match started with {} players, {} collectibles",
            self.sessions.participant_count(),
            self.state.collectibles.remaining()
        );

        let ids: Vec<PlayerId> = self.sessions.participants().map(|c| c.id).collect();
        for id in ids {
            dispatch(&self.sessions, Target::One(id), &Message::Begin(BeginMsg {
                subject: id,
                start_time: self.state.start_time,
                mask: self.state.collectibles.bits(),
            }));
        }
    }

    /// The last player standing collects whatever is left, then the match ends.
    fn award_survivor(&mut self, now: Millis) {
        let Some(survivor) = self.sessions.participants().next().map(|c| c.id) else {
            self.end_match(now);
            return;
        };

        let awarded = self.state.collectibles.take_all();
        let score = match self.sessions.get_mut(survivor) {
            Some(connection) => {
                connection.score += awarded;
                connection.score
            }
            None => 0,
        };

        info!("Player {} is the last one standing, awarded {}", survivor, awarded);

        dispatch(&self.sessions, Target::Participants, &Message::Collect(CollectMsg {
            subject: survivor,
            score,
            index: NO_COLLECTIBLE,
        }));

        self.end_match(now);
    }

    /// Active → Ended, then straight on to Countdown or Waiting.
    fn end_match(&mut self, now: Millis) {
        let mut results = self.sessions.participant_scores();
        results.append(&mut self.departed);
        let record = MatchRecord::new(results, self.state.start_time);
        let winner = record.winner.unwrap_or(PlayerId::NONE);

        info!(
            "Match ended, winner {}, {} collected, scores {:?}",
            winner,
            record.total_score(),
            record.player_ids.iter().zip(&record.scores).collect::<Vec<_>>()
        );
        self.finished.push(record);

        self.state.phase = MatchPhase::Ended;
        self.sessions.enroll_all();
        dispatch(&self.sessions, Target::Participants, &Message::End { subject: winner });
        self.state.collectibles.take_all();

        if self.sessions.connection_count() >= 2 {
            self.start_countdown(now);
        } else {
            self.state.phase = MatchPhase::Waiting;
        }
    }
}
