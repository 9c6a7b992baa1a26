//! Payload read/write primitives.
//!
//! All integers are little-endian. Strings are UTF-8 and NUL-terminated.

use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};

/// Sequential reader over a packet payload.
///
/// Every read validates the remaining length first, so a malformed
/// payload fails with [`ProtocolError::Truncated`] instead of panicking.
pub struct PayloadReader<'a> {
    data: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if self.data.len() < len {
            return Err(ProtocolError::Truncated {
                needed: len - self.data.len(),
            });
        }
        let (head, rest) = self.data.split_at(len);
        self.data = rest;
        Ok(head)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_md5(&mut self) -> Result<[u8; 16], ProtocolError> {
        let b = self.take(16)?;
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(b);
        Ok(md5)
    }

    /// Reads a NUL-terminated UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let nul = self
            .data
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::UnterminatedString)?;
        let raw = self.take(nul)?;
        self.take(1)?; // terminator
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Asserts the payload was fully consumed.
    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes(self.data.len()))
        }
    }
}

/// Sequential writer building a packet payload.
#[derive(Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16_le(value);
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    pub fn put_md5(&mut self, value: &[u8; 16]) -> &mut Self {
        self.buf.put_slice(value);
        self
    }

    /// Writes a NUL-terminated string.
    pub fn put_string(&mut self, value: &str) -> &mut Self {
        self.buf.put_slice(value.as_bytes());
        self.buf.put_u8(0);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}
