//! Protocol error types.

use thiserror::Error;

/// Errors raised while framing or (de)serializing protocol packets.
///
/// Any of these is fatal to the connection that produced the bytes, but
/// never to the server as a whole.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("frame length {0} below the 3-byte minimum")]
    FrameTooShort(usize),

    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("packet type {0} not valid in this direction")]
    UnexpectedPacketType(u8),

    #[error("payload truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    #[error("invalid content type: {0}")]
    InvalidContentType(u8),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("unterminated string field")]
    UnterminatedString,

    #[error("too many {what}: {count} (max {max})")]
    CountOverflow {
        what: &'static str,
        count: usize,
        max: usize,
    },
}
