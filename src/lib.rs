//! # Web3D Match Server
//!
//! Authoritative real-time server for the Web3D collect-the-orbs game.
//! Many WebSocket clients share one match: the server runs the lobby
//! countdown, arbitrates who claimed each collectible, relays movement
//! and reports finished matches to the web application.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WEB3D MATCH SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Plain primitives                          │
//! │  ├── mask.rs     - 64-bit collectible presence mask          │
//! │  └── clock.rs    - Wall-clock milliseconds                   │
//! │                                                              │
//! │  game/           - Match rules (synchronous)                 │
//! │  ├── state.rs    - Player ids, phase, match record           │
//! │  └── engine.rs   - Lifecycle, collect arbitration, relay     │
//! │                                                              │
//! │  network/        - Transport (async)                         │
//! │  ├── protocol.rs - Fixed-layout binary messages              │
//! │  ├── session.rs  - Connections and participants              │
//! │  ├── dispatch.rs - Targeted broadcast                        │
//! │  ├── recorder.rs - Match history client                      │
//! │  └── server.rs   - WebSocket server and match actor          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantee
//!
//! A single actor task owns the [`game::MatchEngine`]. Socket tasks only
//! forward events to it, so state changes happen one at a time in
//! arrival order and every broadcast from one handler is queued before
//! the next event is handled.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::mask::CollectibleMask;
pub use game::engine::{MatchConfig, MatchEngine};
pub use game::state::{MatchPhase, PlayerId};
pub use network::protocol::Message;
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
