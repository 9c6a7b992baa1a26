//! Binary frame format for the content protocol.
//!
//! Frame layout (3-byte header + payload):
//!
//! ```text
//! +----------+--------+---------------------+
//! | length   | type   | payload             |
//! | 2 bytes  | 1 byte | length - 3 bytes    |
//! +----------+--------+---------------------+
//! ```
//!
//! `length` is little-endian and covers the whole frame, header included.
//! A frame with an empty payload (`length == 3`) is valid and is used as
//! a stream terminator by both `SERVER_INFO` and `SERVER_CONTENT`.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame header in bytes (2 length + 1 type).
pub const PACKET_HEADER_SIZE: usize = 3;

/// Maximum size of an outbound frame, header included.
///
/// Fixed by client compatibility; larger frames are never transmitted.
pub const SEND_MTU: usize = 1460;

/// Wire packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Client requests a listing of one content type.
    ClientInfoList = 0,
    /// Client requests metadata for a list of content ids.
    ClientInfoId = 1,
    /// Client requests metadata by external (type, unique-id) references.
    ClientInfoExtid = 2,
    /// Client requests metadata by external references plus md5sums.
    ClientInfoExtidMd5 = 3,
    /// Server metadata response; empty payload terminates a listing.
    ServerInfo = 4,
    /// Client requests download of a list of content ids.
    ClientContent = 5,
    /// Server download response; empty payload terminates a transfer.
    ServerContent = 6,
}

impl PacketType {
    /// Parses a wire type byte.
    pub fn from_wire(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(PacketType::ClientInfoList),
            1 => Ok(PacketType::ClientInfoId),
            2 => Ok(PacketType::ClientInfoExtid),
            3 => Ok(PacketType::ClientInfoExtidMd5),
            4 => Ok(PacketType::ServerInfo),
            5 => Ok(PacketType::ClientContent),
            6 => Ok(PacketType::ServerContent),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }

    /// Returns the wire type byte.
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Returns whether this type is sent by clients.
    pub fn is_client(self) -> bool {
        !matches!(self, PacketType::ServerInfo | PacketType::ServerContent)
    }
}

/// A framed protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub ptype: PacketType,
    pub payload: Bytes,
}

impl Packet {
    /// Creates a packet with the given payload.
    pub fn new(ptype: PacketType, payload: Bytes) -> Self {
        Self { ptype, payload }
    }

    /// Creates a packet with an empty payload (a stream terminator).
    pub fn empty(ptype: PacketType) -> Self {
        Self {
            ptype,
            payload: Bytes::new(),
        }
    }

    /// Returns whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encodes the packet into a frame.
    ///
    /// Fails if the frame would exceed [`SEND_MTU`].
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let total = PACKET_HEADER_SIZE + self.payload.len();
        if total > SEND_MTU {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: SEND_MTU,
            });
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u16_le(total as u16);
        buf.put_u8(self.ptype.to_wire());
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(packet))` if a complete frame was consumed,
    /// `Ok(None)` if more data is needed, or `Err` on a malformed header.
    /// Decoding is a pure function of the buffer contents, so a partial
    /// read can simply be retried once more bytes arrive.
    pub fn decode(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let length = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        if length < PACKET_HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort(length));
        }
        if length > max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: max_frame_size,
            });
        }
        if buf.len() < length {
            return Ok(None);
        }

        let ptype = PacketType::from_wire(buf[2])?;
        buf.advance(PACKET_HEADER_SIZE);
        let payload = buf.split_to(length - PACKET_HEADER_SIZE).freeze();

        Ok(Some(Self { ptype, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_MAX_FRAME_SIZE;

    #[test]
    fn test_packet_roundtrip() {
        let packet = Packet::new(PacketType::ServerContent, Bytes::from_static(b"chunk"));
        let mut buf = packet.encode().unwrap();
        let decoded = Packet::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();

        assert_eq!(decoded.ptype, PacketType::ServerContent);
        assert_eq!(decoded.payload.as_ref(), b"chunk");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_packet_roundtrip() {
        let packet = Packet::empty(PacketType::ServerInfo);
        let mut buf = packet.encode().unwrap();
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);

        let decoded = Packet::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.ptype, PacketType::ServerInfo);
    }

    #[test]
    fn test_incomplete_frame() {
        let packet = Packet::new(PacketType::ClientContent, Bytes::from_static(b"abcdef"));
        let encoded = packet.encode().unwrap();

        let mut buf = BytesMut::from(&encoded[..4]);
        assert!(Packet::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .is_none());
        // The buffer must be untouched so the read can be retried.
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_length_below_minimum() {
        let mut buf = BytesMut::from(&[0x02, 0x00, 0x00][..]);
        let result = Packet::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(result, Err(ProtocolError::FrameTooShort(2)));
    }

    #[test]
    fn test_oversized_length_header() {
        // Declared length 0x8000 with a 1 KiB cap: hard failure, even
        // though only the header has arrived.
        let mut buf = BytesMut::from(&[0x00, 0x80, 0x06][..]);
        let result = Packet::decode(&mut buf, 1024);
        assert_eq!(
            result,
            Err(ProtocolError::FrameTooLarge {
                size: 0x8000,
                max: 1024
            })
        );
    }

    #[test]
    fn test_unknown_packet_type() {
        let mut buf = BytesMut::from(&[0x03, 0x00, 0x2a][..]);
        let result = Packet::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(result, Err(ProtocolError::UnknownPacketType(42)));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let packet = Packet::new(PacketType::ServerContent, Bytes::from(vec![0u8; SEND_MTU]));
        let result = packet.encode();
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(
            &Packet::new(PacketType::ServerContent, Bytes::from_static(b"one"))
                .encode()
                .unwrap(),
        );
        buf.extend_from_slice(&Packet::empty(PacketType::ServerContent).encode().unwrap());

        let first = Packet::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(first.payload.as_ref(), b"one");

        let second = Packet::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert!(second.is_empty());
        assert!(buf.is_empty());
    }
}
