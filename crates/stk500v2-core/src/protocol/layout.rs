//! Reply offsets and lengths.
//!
//! A framed reply keeps the 5-byte envelope header in front of the body,
//! so every position shifts right by that amount compared to a bare
//! (frameless) reply:
//!
//! ```text
//! framed:    1B SEQ LH LL 0E | CMD STATUS DATA.. | CKSUM
//! frameless:                   CMD STATUS DATA..
//! ```

use super::constants::FRAME_HEADER_LEN;

/// Positions of interesting bytes inside a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyLayout {
    /// Offset of the status byte.
    pub status: usize,
    /// Offset of a single-byte result (signature byte, fuse, lock, parameter).
    pub value: usize,
    /// Offset of the sign-on identity string.
    pub identity: usize,
    /// Trailing bytes after the identity string (checksum).
    pub footer: usize,
    /// Bytes requested for a plain status reply.
    pub status_reply_len: usize,
    /// Bytes requested for a sign-on reply.
    pub sign_on_reply_len: usize,
    /// Bytes requested for a single-byte read reply.
    pub value_reply_len: usize,
    /// Bytes requested for a parameter read reply.
    pub parameter_reply_len: usize,
    /// Bytes requested for a program fuse/lock reply.
    pub program_reply_len: usize,
    /// Bytes in front of the data of a memory read reply.
    pub read_header_len: usize,
}

impl ReplyLayout {
    /// Layout for bare payload replies.
    pub const FRAMELESS: ReplyLayout = ReplyLayout {
        status: 1,
        value: 2,
        identity: 3,
        footer: 0,
        status_reply_len: 2,
        sign_on_reply_len: 23,
        value_reply_len: 4,
        parameter_reply_len: 8,
        program_reply_len: 3,
        read_header_len: 3,
    };

    /// Layout for replies wrapped in the message envelope.
    pub const FRAMED: ReplyLayout = ReplyLayout {
        status: 1 + FRAME_HEADER_LEN,
        value: 2 + FRAME_HEADER_LEN,
        identity: 3 + FRAME_HEADER_LEN,
        footer: 1,
        status_reply_len: 8,
        sign_on_reply_len: 29,
        value_reply_len: 10,
        parameter_reply_len: 8,
        program_reply_len: 9,
        read_header_len: 6,
    };

    pub const fn for_mode(frameless: bool) -> Self {
        if frameless {
            Self::FRAMELESS
        } else {
            Self::FRAMED
        }
    }
}
