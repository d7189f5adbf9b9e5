//! Protocol Messages
//!
//! Fixed-layout binary wire format shared with the Web3D client.
//!
//! Every message is a little-endian record. Bytes 0..4 hold the message
//! kind tag and bytes 4..8 the subject identity (the player the message
//! is about). Each kind has one fixed encoded length; the only padded
//! field is the 32-byte NUL-terminated name in Join.

use std::fmt;
use thiserror::Error;

use crate::game::state::PlayerId;

/// Size of the Join name field, terminator included.
pub const NAME_FIELD_LEN: usize = 32;

/// Collectible index used when a Collect does not refer to one item
/// (the survivor award).
pub const NO_COLLECTIBLE: i32 = -1;

/// Bytes shared by every message: tag + subject.
const HEADER_LEN: usize = 8;

// =============================================================================
// MESSAGE KINDS
// =============================================================================

/// Message kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    /// A player is present (server → client).
    Join = 0,
    /// A player left (server → client).
    Quit = 1,
    /// Match state snapshot / match start (server → client).
    Begin = 2,
    /// Countdown to the next match (server → client).
    Count = 3,
    /// Match over (server → client).
    End = 4,
    /// Position and velocity (both directions).
    Move = 5,
    /// Collectible claim (client → server) or confirmation (server → client).
    Collect = 6,
}

impl MessageKind {
    /// Look up a kind from its wire tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Join),
            1 => Some(Self::Quit),
            2 => Some(Self::Begin),
            3 => Some(Self::Count),
            4 => Some(Self::End),
            5 => Some(Self::Move),
            6 => Some(Self::Collect),
            _ => None,
        }
    }

    /// Wire tag.
    #[inline]
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Exact encoded length of this kind.
    pub const fn encoded_len(self) -> usize {
        match self {
            Self::Join => 12 + NAME_FIELD_LEN,
            Self::Quit | Self::End => HEADER_LEN,
            Self::Begin => 24,
            Self::Count => 16,
            Self::Move => 24,
            Self::Collect => 16,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Join => "join",
            Self::Quit => "quit",
            Self::Begin => "begin",
            Self::Count => "count",
            Self::End => "end",
            Self::Move => "move",
            Self::Collect => "collect",
        };
        f.write_str(name)
    }
}

// =============================================================================
// MESSAGE PAYLOADS
// =============================================================================

/// A player present in the session.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinMsg {
    /// Joining player.
    pub subject: PlayerId,
    /// Current score.
    pub score: u32,
    /// Display name (ASCII, at most 31 bytes on the wire).
    pub name: String,
}

/// Match state: start time and remaining collectibles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeginMsg {
    /// Recipient's own identity.
    pub subject: PlayerId,
    /// Wall-clock start of the active phase (ms since epoch).
    pub start_time: f64,
    /// Remaining collectibles.
    pub mask: u64,
}

/// Countdown announcement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountMsg {
    /// Unused by the countdown; always 0 from the server.
    pub subject: PlayerId,
    /// Wall-clock start of the next match (ms since epoch).
    pub next_match_time: f64,
}

/// Position/velocity update, relayed verbatim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveMsg {
    /// Moving player.
    pub subject: PlayerId,
    /// Position X.
    pub x: f32,
    /// Position Y.
    pub y: f32,
    /// Velocity X.
    pub dx: f32,
    /// Velocity Y.
    pub dy: f32,
}

/// Collectible claim or confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectMsg {
    /// Collecting player.
    pub subject: PlayerId,
    /// Collector's score after the claim.
    pub score: u32,
    /// Claimed collectible, or [`NO_COLLECTIBLE`].
    pub index: i32,
}

/// Every message of the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A player is present.
    Join(JoinMsg),
    /// A player left.
    Quit {
        /// Leaving player.
        subject: PlayerId,
    },
    /// Match state snapshot.
    Begin(BeginMsg),
    /// Countdown to the next match.
    Count(CountMsg),
    /// Match over.
    End {
        /// Winner, or 0 when nobody scored.
        subject: PlayerId,
    },
    /// Position/velocity update.
    Move(MoveMsg),
    /// Collectible claim or confirmation.
    Collect(CollectMsg),
}

/// Decode errors. The frame is dropped; the connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame too short to hold the tag and subject.
    #[error("frame of {0} bytes has no header")]
    MissingHeader(usize),

    /// Tag does not name a message kind.
    #[error("unknown message tag {0}")]
    UnknownTag(u32),

    /// Frame shorter than the fixed length of its kind.
    #[error("{kind} frame truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Kind named by the tag.
        kind: MessageKind,
        /// Fixed length of that kind.
        expected: usize,
        /// Bytes received.
        actual: usize,
    },
}

impl Message {
    /// Kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Join(_) => MessageKind::Join,
            Self::Quit { .. } => MessageKind::Quit,
            Self::Begin(_) => MessageKind::Begin,
            Self::Count(_) => MessageKind::Count,
            Self::End { .. } => MessageKind::End,
            Self::Move(_) => MessageKind::Move,
            Self::Collect(_) => MessageKind::Collect,
        }
    }

    /// Subject identity.
    pub fn subject(&self) -> PlayerId {
        match self {
            Self::Join(m) => m.subject,
            Self::Quit { subject } | Self::End { subject } => *subject,
            Self::Begin(m) => m.subject,
            Self::Count(m) => m.subject,
            Self::Move(m) => m.subject,
            Self::Collect(m) => m.subject,
        }
    }

    /// Encode to the exact fixed length of the kind.
    pub fn encode(&self) -> Vec<u8> {
        let kind = self.kind();
        let mut w = Writer::with_capacity(kind.encoded_len());
        w.u32(kind.tag());
        w.u32(self.subject().0);

        match self {
            Self::Join(m) => {
                w.u32(m.score);
                w.bytes(&encode_name(&m.name));
            }
            Self::Quit { .. } | Self::End { .. } => {}
            Self::Begin(m) => {
                w.f64(m.start_time);
                w.u64(m.mask);
            }
            Self::Count(m) => {
                w.f64(m.next_match_time);
            }
            Self::Move(m) => {
                w.f32(m.x);
                w.f32(m.y);
                w.f32(m.dx);
                w.f32(m.dy);
            }
            Self::Collect(m) => {
                w.u32(m.score);
                w.i32(m.index);
            }
        }

        debug_assert_eq!(w.buf.len(), kind.encoded_len());
        w.buf
    }

    /// Decode one frame.
    ///
    /// Bytes past the fixed length of the kind are ignored.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < HEADER_LEN {
            return Err(ProtocolError::MissingHeader(frame.len()));
        }

        let mut r = Reader::new(frame);
        let tag = r.u32();
        let kind = MessageKind::from_tag(tag).ok_or(ProtocolError::UnknownTag(tag))?;
        if frame.len() < kind.encoded_len() {
            return Err(ProtocolError::Truncated {
                kind,
                expected: kind.encoded_len(),
                actual: frame.len(),
            });
        }
        let subject = PlayerId(r.u32());

        let message = match kind {
            MessageKind::Join => {
                let score = r.u32();
                let name = decode_name(r.bytes(NAME_FIELD_LEN));
                Self::Join(JoinMsg { subject, score, name })
            }
            MessageKind::Quit => Self::Quit { subject },
            MessageKind::Begin => Self::Begin(BeginMsg {
                subject,
                start_time: r.f64(),
                mask: r.u64(),
            }),
            MessageKind::Count => Self::Count(CountMsg {
                subject,
                next_match_time: r.f64(),
            }),
            MessageKind::End => Self::End { subject },
            MessageKind::Move => Self::Move(MoveMsg {
                subject,
                x: r.f32(),
                y: r.f32(),
                dx: r.f32(),
                dy: r.f32(),
            }),
            MessageKind::Collect => Self::Collect(CollectMsg {
                subject,
                score: r.u32(),
                index: r.i32(),
            }),
        };

        Ok(message)
    }
}

// =============================================================================
// NAMES
// =============================================================================

/// Make a display name safe for the Join name field.
///
/// Non-ASCII and control characters become `?` and the result is cut to
/// `max_len - 1` bytes so the terminator always fits.
pub fn sanitize_name(name: &str, max_len: usize) -> String {
    let limit = max_len.clamp(1, NAME_FIELD_LEN) - 1;
    name.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .take(limit)
        .collect()
}

/// Zero-padded, NUL-terminated name field.
fn encode_name(name: &str) -> [u8; NAME_FIELD_LEN] {
    let mut field = [0u8; NAME_FIELD_LEN];
    let clean = sanitize_name(name, NAME_FIELD_LEN);
    field[..clean.len()].copy_from_slice(clean.as_bytes());
    field
}

fn decode_name(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    field[..end]
        .iter()
        .map(|&b| if b.is_ascii() && !b.is_ascii_control() { b as char } else { '?' })
        .collect()
}

// =============================================================================
// BYTE CURSORS
// =============================================================================

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn u32(&mut self, value: u32) {
        self.bytes(&value.to_le_bytes());
    }

    fn i32(&mut self, value: i32) {
        self.bytes(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.bytes(&value.to_le_bytes());
    }

    fn f32(&mut self, value: f32) {
        self.bytes(&value.to_le_bytes());
    }

    fn f64(&mut self, value: f64) {
        self.bytes(&value.to_le_bytes());
    }
}

/// Reads fixed-size fields in order. Callers check the frame length
/// against the kind's encoded length before reading.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> &'a [u8] {
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        out
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N));
        out
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.array())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.array())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.array())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.array())
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.array())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encoded_lengths() {
        let cases = vec![
            (Message::Join(JoinMsg { subject: PlayerId(1), score: 0, name: "a".into() }), 44),
            (Message::Quit { subject: PlayerId(1) }, 8),
            (Message::Begin(BeginMsg { subject: PlayerId(1), start_time: 0.0, mask: 0 }), 24),
            (Message::Count(CountMsg { subject: PlayerId(0), next_match_time: 0.0 }), 16),
            (Message::End { subject: PlayerId(0) }, 8),
            (Message::Move(MoveMsg { subject: PlayerId(1), x: 0.0, y: 0.0, dx: 0.0, dy: 0.0 }), 24),
            (Message::Collect(CollectMsg { subject: PlayerId(1), score: 0, index: 0 }), 16),
        ];

        for (message, len) in cases {
            assert_eq!(message.encode().len(), len, "{}", message.kind());
            assert_eq!(message.kind().encoded_len(), len);
        }
    }

    #[test]
    fn test_collect_layout() {
        let bytes = Message::Collect(CollectMsg {
            subject: PlayerId(7),
            score: 3,
            index: 12,
        })
        .encode();

        assert_eq!(&bytes[0..4], &6u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &7u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &12i32.to_le_bytes());
    }

    #[test]
    fn test_begin_layout() {
        let bytes = Message::Begin(BeginMsg {
            subject: PlayerId(2),
            start_time: 1_700_000_000_123.0,
            mask: (1u64 << 50) - 1,
        })
        .encode();

        assert_eq!(&bytes[0..4], &2u32.to_le_bytes());
        assert_eq!(&bytes[8..16], &1_700_000_000_123.0f64.to_le_bytes());
        assert_eq!(&bytes[16..24], &((1u64 << 50) - 1).to_le_bytes());
    }

    #[test]
    fn test_decode_client_move() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&5u32.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes());
        for v in [1.5f32, -2.0, 0.25, 0.0] {
            frame.extend_from_slice(&v.to_le_bytes());
        }

        let msg = Message::decode(&frame).unwrap();
        assert_eq!(msg, Message::Move(MoveMsg {
            subject: PlayerId(0),
            x: 1.5,
            y: -2.0,
            dx: 0.25,
            dy: 0.0,
        }));
    }

    #[test]
    fn test_join_name_padding() {
        let bytes = Message::Join(JoinMsg {
            subject: PlayerId(9),
            score: 4,
            name: "alice".into(),
        })
        .encode();

        assert_eq!(&bytes[12..17], b"alice");
        assert!(bytes[17..44].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_join_name_truncated() {
        let long = "x".repeat(100);
        let bytes = Message::Join(JoinMsg { subject: PlayerId(1), score: 0, name: long }).encode();
        assert_eq!(bytes.len(), 44);
        // Always NUL-terminated
        assert_eq!(bytes[43], 0);

        match Message::decode(&bytes).unwrap() {
            Message::Join(m) => assert_eq!(m.name.len(), NAME_FIELD_LEN - 1),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("bob", 32), "bob");
        assert_eq!(sanitize_name("zoë", 32), "zo?");
        assert_eq!(sanitize_name("abcdef", 4), "abc");
        assert_eq!(sanitize_name("tab\there", 32), "tab?here");
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(Message::decode(&[]), Err(ProtocolError::MissingHeader(0)));
        assert_eq!(Message::decode(&[6, 0, 0]), Err(ProtocolError::MissingHeader(3)));

        let mut unknown = 99u32.to_le_bytes().to_vec();
        unknown.extend_from_slice(&[0; 20]);
        assert_eq!(Message::decode(&unknown), Err(ProtocolError::UnknownTag(99)));

        let mut short = 6u32.to_le_bytes().to_vec();
        short.extend_from_slice(&[0; 8]);
        assert_eq!(
            Message::decode(&short),
            Err(ProtocolError::Truncated {
                kind: MessageKind::Collect,
                expected: 16,
                actual: 12,
            })
        );
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut frame = Message::Quit { subject: PlayerId(3) }.encode();
        frame.extend_from_slice(&[0xAA; 5]);
        assert_eq!(Message::decode(&frame), Ok(Message::Quit { subject: PlayerId(3) }));
    }

    proptest! {
        #[test]
        fn decode_never_panics(frame in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = Message::decode(&frame);
        }

        #[test]
        fn decoded_frames_reencode_to_fixed_length(
            tag in 0u32..7,
            body in proptest::collection::vec(any::<u8>(), 40..48),
        ) {
            let mut frame = tag.to_le_bytes().to_vec();
            frame.extend_from_slice(&body);
            let message = Message::decode(&frame).unwrap();
            prop_assert_eq!(message.encode().len(), message.kind().encoded_len());
        }
    }
}
