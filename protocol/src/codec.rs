//! Stateless encode/decode of wire records.
//!
//! Readers take a [`Cursor`] and assemble complete values before
//! returning; a truncated frame yields an error and nothing else.
//! Writers build byte-exact outbound payloads: the server protocol is
//! positional, so every byte and its order matters.

use crate::cursor::{Cursor, ProtocolError};
use crate::{Color, Position, CHUNK_DATA_SIZE, MAX_WORLD_NAME_LEN};

/// A raw player record as it appears inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerRecord {
    pub id: i32,
    pub pos: Position,
    pub color: Color,
    /// Present only when the record carries a tool byte.
    pub tool: Option<u8>,
}

pub fn read_position(cursor: &mut Cursor) -> Result<Position, ProtocolError> {
    let x = cursor.read_i32_le()?;
    let y = cursor.read_i32_le()?;
    Ok(Position::new(x, y))
}

pub fn read_color(cursor: &mut Cursor) -> Result<Color, ProtocolError> {
    let bytes = cursor.read_bytes(3)?;
    Ok(Color::new(bytes[0], bytes[1], bytes[2]))
}

/// Reads one player record; `has_tool` controls the trailing tool byte.
pub fn read_player(cursor: &mut Cursor, has_tool: bool) -> Result<PlayerRecord, ProtocolError> {
    let id = cursor.read_i32_le()?;
    let pos = read_position(cursor)?;
    let color = read_color(cursor)?;
    let tool = if has_tool {
        Some(cursor.read_u8()?)
    } else {
        None
    };
    Ok(PlayerRecord {
        id,
        pos,
        color,
        tool,
    })
}

/// Reads `(capacity, fill_time_seconds)` bucket parameters.
pub fn read_bucket_params(cursor: &mut Cursor) -> Result<(u16, u16), ProtocolError> {
    let capacity = cursor.read_u16_le()?;
    let fill_time = cursor.read_u16_le()?;
    Ok((capacity, fill_time))
}

fn write_position(out: &mut Vec<u8>, pos: Position) {
    out.extend_from_slice(&pos.x.to_le_bytes());
    out.extend_from_slice(&pos.y.to_le_bytes());
}

/// Client player state update: position + color + tool.
pub fn encode_player(pos: Position, color: Color, tool: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(12);
    write_position(&mut out, pos);
    out.extend_from_slice(&color.to_bytes());
    out.push(tool);
    out
}

/// Pixel placement: canvas position + color.
pub fn encode_pixel(pos: Position, color: Color) -> Vec<u8> {
    let mut out = Vec::with_capacity(11);
    write_position(&mut out, pos);
    out.extend_from_slice(&color.to_bytes());
    out
}

/// Chunk load request: the bare tile position.
pub fn encode_chunk_request(tile: Position) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    write_position(&mut out, tile);
    out
}

/// Moderator chunk fill: pixel format plus two trailing zero bytes.
pub fn encode_chunk_fill(tile: Position, color: Color) -> Vec<u8> {
    let mut out = encode_pixel(tile, color);
    out.extend_from_slice(&[0, 0]);
    out
}

/// Chunk protection toggle: tile position, protect byte, one zero byte.
pub fn encode_chunk_protect(tile: Position, protect: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    write_position(&mut out, tile);
    out.push(protect as u8);
    out.push(0);
    out
}

/// Moderator chunk upload: tile position plus pixel data truncated or
/// zero-padded to exactly one chunk's worth of bytes.
pub fn encode_chunk_data(tile: Position, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + CHUNK_DATA_SIZE);
    write_position(&mut out, tile);
    let len = data.len().min(CHUNK_DATA_SIZE);
    out.extend_from_slice(&data[..len]);
    out.resize(8 + CHUNK_DATA_SIZE, 0);
    out
}

/// Connect handshake: ASCII world identifier truncated to
/// [`MAX_WORLD_NAME_LEN`] bytes, then the little-endian verification
/// constant. Re-sent verbatim on every reconnection.
pub fn encode_handshake(world: &str, verification: u16) -> Vec<u8> {
    let name: String = world
        .chars()
        .filter(|c| c.is_ascii())
        .take(MAX_WORLD_NAME_LEN)
        .collect();
    let mut out = Vec::with_capacity(name.len() + 2);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&verification.to_le_bytes());
    out
}
