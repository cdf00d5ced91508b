//! Wire-level types and codecs for the pixel-canvas socket protocol.
//!
//! Everything in this crate is synchronous and allocation-light: byte
//! cursors over received frames, byte-exact encoders for outbound
//! payloads, and the run-length chunk decompression routine. The async
//! engine lives in the `client` crate.

pub mod chunk;
pub mod codec;
pub mod color;
pub mod cursor;
pub mod opcode;
pub mod position;

pub use chunk::{decode_chunk, Chunk, DecodedChunk};
pub use color::Color;
pub use cursor::{Cursor, ProtocolError};
pub use opcode::{CaptchaState, Opcode};
pub use position::Position;

/// Edge length of a square canvas tile, in pixels.
pub const CHUNK_WIDTH: i32 = 16;

/// Number of pixels in one chunk.
pub const CHUNK_AREA: usize = (CHUNK_WIDTH * CHUNK_WIDTH) as usize;

/// Byte length of one fully decompressed chunk (3 bytes per pixel).
pub const CHUNK_DATA_SIZE: usize = CHUNK_AREA * 3;

/// Protocol version marker appended to the connect handshake.
pub const WORLD_VERIFICATION: u16 = 25565;

/// World identifiers are ASCII-truncated to this many bytes on the wire.
pub const MAX_WORLD_NAME_LEN: usize = 24;

/// Maximum absolute tile coordinate the service will serve.
///
/// The clamp range is asymmetric: the protocol clamps tile coordinates to
/// `[-WORLD_BORDER - 1, WORLD_BORDER]`.
pub const WORLD_BORDER: i32 = 0xFFFFF;

/// Suffix the server requires on every outbound chat line.
pub const CHAT_VERIFICATION: &str = "\u{A}";
