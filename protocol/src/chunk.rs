//! Chunk state and the run-length chunk decompression routine.
//!
//! The compressed payload is the most offset-sensitive part of the
//! protocol: repeat locations are stored relative to the end of the
//! location table and must be restored to absolute message offsets
//! before use. Getting the constant wrong corrupts the canvas silently,
//! so the arithmetic here follows the wire format exactly rather than an
//! "equivalent" scheme.

use crate::codec::read_position;
use crate::cursor::{Cursor, ProtocolError};
use crate::{Color, Position, CHUNK_AREA, CHUNK_DATA_SIZE, CHUNK_WIDTH};
use std::time::Instant;

/// One square canvas tile and its pixel grid.
///
/// `loaded` distinguishes "referenced" chunks (created on first read or
/// write) from chunks whose data has actually arrived from the server.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub tile: Position,
    pixels: [Color; CHUNK_AREA],
    pub protected: bool,
    pub loaded: bool,
    pub last_loaded: Option<Instant>,
}

impl Chunk {
    pub fn new(tile: Position) -> Self {
        Chunk {
            tile,
            pixels: [Color::WHITE; CHUNK_AREA],
            protected: false,
            loaded: false,
            last_loaded: None,
        }
    }

    /// The canvas position of this chunk's top-left pixel.
    pub fn canvas_origin(&self) -> Position {
        self.tile * CHUNK_WIDTH
    }

    fn index(x: i32, y: i32) -> usize {
        debug_assert!((0..CHUNK_WIDTH).contains(&x) && (0..CHUNK_WIDTH).contains(&y));
        (x * CHUNK_WIDTH + y) as usize
    }

    /// Pixel at in-chunk coordinates, first axis x.
    pub fn get(&self, x: i32, y: i32) -> Color {
        self.pixels[Self::index(x, y)]
    }

    pub fn set(&mut self, x: i32, y: i32, color: Color) -> Color {
        std::mem::replace(&mut self.pixels[Self::index(x, y)], color)
    }

    /// Pixel at an absolute canvas position inside this chunk.
    pub fn get_canvas(&self, canvas: Position) -> Color {
        let rel = canvas - self.canvas_origin();
        self.get(rel.x, rel.y)
    }

    /// Swaps the pixel at a canvas position, returning the previous color.
    pub fn set_canvas(&mut self, canvas: Position, color: Color) -> Color {
        let rel = canvas - self.canvas_origin();
        self.set(rel.x, rel.y, color)
    }

    /// Replaces the whole grid from decompressed bytes and marks the
    /// chunk loaded. Byte index `i` maps to grid index `i / 3`.
    pub fn apply_data(&mut self, data: &[u8; CHUNK_DATA_SIZE], protected: bool) {
        for (i, pixel) in self.pixels.iter_mut().enumerate() {
            let at = i * 3;
            *pixel = Color::new(data[at], data[at + 1], data[at + 2]);
        }
        self.protected = protected;
        self.loaded = true;
        self.last_loaded = Some(Instant::now());
    }
}

/// A fully decompressed chunk payload, not yet applied to any store.
#[derive(Debug, Clone)]
pub struct DecodedChunk {
    pub tile: Position,
    pub protected: bool,
    pub data: Box<[u8; CHUNK_DATA_SIZE]>,
}

/// Bytes of header preceding the repeat-location table, opcode included:
/// opcode (1) + tile position (8) + protection (1) + length (2) + count (2).
const CHUNK_HEADER_LEN: usize = 14;

/// Decompresses one chunk payload. The cursor must sit just past the
/// opcode byte, with `consumed() == 1`.
///
/// Layout: tile position, protection byte, decompressed byte length,
/// segment count N, then N stored repeat locations. Each stored location
/// plus `2 * N + 14` is the absolute message offset at which a repeat
/// marker (count + color) interrupts the literal byte stream. Literal
/// bytes copy through verbatim; markers expand to `count` copies of the
/// color; any input left after the final marker is a trailing literal
/// run.
///
/// The output must decompress to exactly one chunk's worth of bytes;
/// anything else is a protocol error and no chunk state is produced.
pub fn decode_chunk(cursor: &mut Cursor) -> Result<DecodedChunk, ProtocolError> {
    let tile = read_position(cursor)?;
    let protected = cursor.read_u8()? != 0;
    let total_len = cursor.read_u16_le()? as usize;
    let segments = cursor.read_u16_le()? as usize;

    let mut locations = Vec::with_capacity(segments);
    let offset_base = 2 * segments + CHUNK_HEADER_LEN;
    for _ in 0..segments {
        locations.push(cursor.read_u16_le()? as usize + offset_base);
    }

    let mut out: Vec<u8> = Vec::with_capacity(CHUNK_DATA_SIZE);
    for location in locations {
        let consumed = cursor.consumed();
        if location < consumed {
            return Err(ProtocolError::ChunkOffset {
                location,
                offset: consumed,
            });
        }
        let literal = location - consumed;
        if literal > 0 {
            out.extend_from_slice(cursor.read_bytes(literal)?);
        }
        let count = cursor.read_u16_le()? as usize;
        let color = cursor.read_bytes(3)?;
        for _ in 0..count {
            out.extend_from_slice(color);
        }
        if out.len() > total_len {
            return Err(ProtocolError::ChunkLength {
                expected: total_len,
                actual: out.len(),
            });
        }
    }
    // Trailing literal run.
    out.extend_from_slice(cursor.read_bytes(cursor.remaining())?);

    if out.len() != total_len || total_len != CHUNK_DATA_SIZE {
        return Err(ProtocolError::ChunkLength {
            expected: CHUNK_DATA_SIZE,
            actual: out.len(),
        });
    }

    let mut data = Box::new([0u8; CHUNK_DATA_SIZE]);
    data.copy_from_slice(&out);
    Ok(DecodedChunk {
        tile,
        protected,
        data,
    })
}
