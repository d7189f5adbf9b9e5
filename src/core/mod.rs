//! Core primitives.
//!
//! Plain data types shared by the match engine and the network layer.
//! Nothing in this module performs I/O.

pub mod clock;
pub mod mask;

// Re-export core types
pub use clock::{now_millis, Millis};
pub use mask::{CollectibleMask, MAX_COLLECTIBLES};
