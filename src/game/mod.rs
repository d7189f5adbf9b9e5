//! Game Logic Module
//!
//! The singleton match and the engine that drives it.
//!
//! ## Module Structure
//!
//! - `state`: Player ids, match phase, match record
//! - `engine`: Lifecycle state machine, collect arbitration, relay

pub mod engine;
pub mod state;

// Re-export key types
pub use engine::{CollectError, ConfigError, MatchConfig, MatchEngine};
pub use state::{CountdownHandle, Match, MatchPhase, MatchRecord, PlayerId};
