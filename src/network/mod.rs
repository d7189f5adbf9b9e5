//! Network Layer
//!
//! WebSocket transport, the binary wire protocol, connection bookkeeping
//! and the match history client. Match rules live in `game/`.

pub mod dispatch;
pub mod protocol;
pub mod recorder;
pub mod server;
pub mod session;

pub use dispatch::{dispatch, Target};
pub use protocol::{Message, MessageKind, ProtocolError};
pub use recorder::{MatchRecorder, RecorderConfig, RecorderError};
pub use server::{GameServer, GameServerError, ServerConfig, ServerStats};
pub use session::{Connection, SessionError, SessionRegistry};
