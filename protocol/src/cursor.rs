//! Sequential byte reader over a received frame.
//!
//! Record readers built on the cursor are all-or-nothing: they assemble a
//! value completely before returning it, so a truncated frame never leaves
//! half-written caller state behind.

use thiserror::Error;

/// Errors raised while decoding a binary frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame ended before a record was fully read.
    #[error("unexpected end of frame at byte {offset}")]
    UnexpectedEnd { offset: usize },

    /// A chunk payload decompressed to the wrong number of bytes.
    #[error("chunk decompressed to {actual} bytes, expected {expected}")]
    ChunkLength { expected: usize, actual: usize },

    /// A repeat segment pointed behind the bytes already consumed.
    #[error("chunk repeat location {location} precedes cursor at {offset}")]
    ChunkOffset { location: usize, offset: usize },
}

/// A forward-only reader over a byte slice.
///
/// `consumed()` reports the absolute offset from the start of the message,
/// including bytes (such as the opcode) read before the cursor was handed
/// off; chunk decompression depends on that bookkeeping.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0, base: 0 }
    }

    /// Creates a cursor whose `consumed()` starts at `base` bytes, for
    /// slices taken mid-message.
    pub fn with_base(data: &'a [u8], base: usize) -> Self {
        Cursor { data, pos: 0, base }
    }

    /// Absolute bytes consumed from the start of the message.
    pub fn consumed(&self) -> usize {
        self.base + self.pos
    }

    /// Bytes left unread in the frame.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn eof(&self) -> ProtocolError {
        ProtocolError::UnexpectedEnd {
            offset: self.consumed(),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        let byte = *self.data.get(self.pos).ok_or_else(|| self.eof())?;
        self.pos += 1;
        Ok(byte)
    }

    /// Reads a 16-bit little-endian value as the protocol stores it:
    /// low byte first, `high << 8 | low`.
    pub fn read_u16_le(&mut self) -> Result<u16, ProtocolError> {
        let bytes = self.read_bytes(2)?;
        Ok((bytes[1] as u16) << 8 | bytes[0] as u16)
    }

    pub fn read_i32_le(&mut self) -> Result<i32, ProtocolError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads `len` raw bytes, or fails without consuming anything.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < len {
            return Err(self.eof());
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_advance_in_order() {
        let data = [7u8, 0x34, 0x12, 1, 0, 0, 0];
        let mut cursor = Cursor::new(&data);
        assert_eq!(cursor.read_u8().unwrap(), 7);
        assert_eq!(cursor.read_u16_le().unwrap(), 0x1234);
        assert_eq!(cursor.read_i32_le().unwrap(), 1);
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(cursor.consumed(), 7);
    }

    #[test]
    fn test_negative_i32() {
        let data = (-42i32).to_le_bytes();
        let mut cursor = Cursor::new(&data);
        assert_eq!(cursor.read_i32_le().unwrap(), -42);
    }

    #[test]
    fn test_truncated_read_fails_without_consuming() {
        let data = [1u8, 2];
        let mut cursor = Cursor::new(&data);
        assert!(cursor.read_i32_le().is_err());
        // The failed read must not have eaten the remaining bytes.
        assert_eq!(cursor.remaining(), 2);
        assert_eq!(cursor.read_u16_le().unwrap(), 0x0201);
    }

    #[test]
    fn test_base_offset_counts_into_consumed() {
        let data = [0u8; 4];
        let mut cursor = Cursor::with_base(&data, 1);
        assert_eq!(cursor.consumed(), 1);
        cursor.read_u16_le().unwrap();
        assert_eq!(cursor.consumed(), 3);
    }

    #[test]
    fn test_eof_reports_absolute_offset() {
        let data = [0u8; 2];
        let mut cursor = Cursor::with_base(&data, 5);
        cursor.read_u16_le().unwrap();
        assert_eq!(
            cursor.read_u8(),
            Err(ProtocolError::UnexpectedEnd { offset: 7 })
        );
    }
}
