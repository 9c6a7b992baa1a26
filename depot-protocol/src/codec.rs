//! Incremental decoder for the content protocol byte stream.

use crate::error::ProtocolError;
use crate::message::ClientRequest;
use crate::packet::Packet;
use crate::DEFAULT_MAX_FRAME_SIZE;
use bytes::BytesMut;

/// Decodes frames from a growable receive buffer.
///
/// Feed raw socket reads in with [`extend`](Decoder::extend) and pull
/// complete packets out; partially received frames stay buffered until
/// the rest arrives.
pub struct Decoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a decoder with a custom inbound frame size cap.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_frame_size,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_packet(&mut self) -> Result<Option<Packet>, ProtocolError> {
        Packet::decode(&mut self.buffer, self.max_frame_size)
    }

    /// Attempts to decode the next client request from the buffer.
    pub fn decode_request(&mut self) -> Result<Option<ClientRequest>, ProtocolError> {
        match self.decode_packet()? {
            Some(packet) => ClientRequest::decode(&packet).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
