//! Match State Definitions
//!
//! The singleton match: its phase, collectibles, start time and the
//! pending countdown. Mutated only by [`crate::game::engine::MatchEngine`].

use std::fmt;

use crate::core::clock::Millis;
use crate::core::mask::CollectibleMask;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Persistent player identity, supplied by the web application when the
/// socket connects.
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PlayerId(pub u32);

impl PlayerId {
    /// Subject used by messages that concern no particular player.
    pub const NONE: PlayerId = PlayerId(0);
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// MATCH PHASE
// =============================================================================

/// Match lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum MatchPhase {
    /// Fewer than two connections; no match possible.
    #[default]
    Waiting,
    /// Enough players; the countdown timer is armed.
    Countdown,
    /// Gameplay; collectibles may be claimed.
    Active,
    /// Match just finished. Immediately replaced by Countdown or Waiting.
    Ended,
}

/// Identity of the armed countdown timer.
///
/// A timer that fires with a handle the match no longer holds is stale
/// and must be ignored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CountdownHandle {
    /// Monotonic timer id.
    pub id: u64,
    /// Wall-clock instant the timer is due (ms since epoch).
    pub fires_at: Millis,
}

// =============================================================================
// MATCH
// =============================================================================

/// The one match in flight.
#[derive(Clone, Debug)]
pub struct Match {
    /// Current phase.
    pub phase: MatchPhase,
    /// Start of the active phase; also the shared placement seed.
    pub start_time: Millis,
    /// Collectibles still present.
    pub collectibles: CollectibleMask,
    /// When the next match starts. Only set during Countdown.
    pub next_match_at: Option<Millis>,
    /// Pending countdown timer. At most one.
    pub countdown: Option<CountdownHandle>,
}

impl Match {
    /// Fresh match in Waiting with an empty pool of `collectible_count`.
    pub fn new(collectible_count: u32) -> Self {
        Self {
            phase: MatchPhase::Waiting,
            start_time: 0.0,
            collectibles: CollectibleMask::empty(collectible_count),
            next_match_at: None,
            countdown: None,
        }
    }
}

// =============================================================================
// MATCH RECORD
// =============================================================================

/// Final result of a completed match, handed to the match recorder.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchRecord {
    /// Players, in the same order as `scores`.
    pub player_ids: Vec<PlayerId>,
    /// Final scores.
    pub scores: Vec<u32>,
    /// Highest scorer, if anyone scored.
    pub winner: Option<PlayerId>,
    /// Start of the active phase (ms since epoch).
    pub started_at: Millis,
}

impl MatchRecord {
    /// Build a record from `(player, score)` pairs.
    ///
    /// The winner is the first player holding the top score, and only if
    /// that score is non-zero.
    pub fn new(results: Vec<(PlayerId, u32)>, started_at: Millis) -> Self {
        let winner = results
            .iter()
            .fold(None::<(PlayerId, u32)>, |best, &(id, score)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((id, score)),
            })
            .filter(|&(_, score)| score > 0)
            .map(|(id, _)| id);

        let (player_ids, scores) = results.into_iter().unzip();
        Self { player_ids, scores, winner, started_at }
    }

    /// Sum of all scores.
    pub fn total_score(&self) -> u32 {
        self.scores.iter().sum()
    }
}
