//! # depot-protocol
//!
//! Wire protocol implementation for the depot content service.
//!
//! This crate provides:
//! - Length-prefixed binary framing (little-endian, 3-byte header)
//! - Typed client request and server response messages
//! - Payload read/write primitives (integers, md5 digests, NUL-terminated strings)
//! - Protocol constants and error types

pub mod codec;
pub mod error;
pub mod message;
pub mod packet;
pub mod wire;

pub use codec::Decoder;
pub use error::ProtocolError;
pub use message::{
    content_chunk, content_terminator, content_unavailable, info_sentinel, ClientRequest,
    ClientVersion, ContentType, ExtidMd5Ref, ExtidRef, Md5sum, ServerContentHeader, ServerInfo,
    UniqueId,
};
pub use packet::{Packet, PacketType, PACKET_HEADER_SIZE, SEND_MTU};

/// Default port for the content service.
pub const DEFAULT_PORT: u16 = 3978;

/// Default maximum accepted inbound frame size in bytes.
///
/// The length header is 16 bits, so this is an abuse guard rather than a
/// wire-format limit; outbound frames are bounded by [`SEND_MTU`].
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024;

/// Largest payload that fits a single outbound content chunk.
pub const MAX_CHUNK_SIZE: usize = SEND_MTU - PACKET_HEADER_SIZE;
