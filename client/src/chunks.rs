//! Local mirror of the chunked canvas.
//!
//! Chunks are created lazily as pixels land. Loading a chunk from the
//! server goes through [`ChunkStore::query`]; concurrent queries for the
//! same tile share one pending entry and one wire request.

use crate::error::ClientError;
use crate::transport::Transport;
use log::debug;
use protocol::chunk::{Chunk, DecodedChunk};
use protocol::codec::encode_chunk_request;
use protocol::{Color, Position};
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};

struct StoreInner {
    chunks: HashMap<Position, Chunk>,
    pending: HashMap<Position, Vec<oneshot::Sender<Chunk>>>,
}

impl StoreInner {
    fn get_or_create(&mut self, tile: Position) -> &mut Chunk {
        self.chunks.entry(tile).or_insert_with(|| Chunk::new(tile))
    }
}

/// Chunk map plus the pending-query table, keyed by tile position.
pub struct ChunkStore {
    inner: Mutex<StoreInner>,
    transport: Transport,
}

impl ChunkStore {
    pub fn new(transport: Transport) -> Self {
        ChunkStore {
            inner: Mutex::new(StoreInner {
                chunks: HashMap::new(),
                pending: HashMap::new(),
            }),
            transport,
        }
    }

    /// Writes a pixel at a canvas position, creating the chunk if needed.
    /// Returns the color it replaced.
    pub async fn set_pixel(&self, canvas: Position, color: Color) -> Color {
        let tile = canvas.to_tile();
        let mut inner = self.inner.lock().await;
        inner.get_or_create(tile).set_canvas(canvas, color)
    }

    /// Reads a pixel; `None` until the owning chunk has been loaded.
    pub async fn get_pixel(&self, canvas: Position) -> Option<Color> {
        let tile = canvas.to_tile();
        let inner = self.inner.lock().await;
        inner
            .chunks
            .get(&tile)
            .filter(|c| c.loaded)
            .map(|c| c.get_canvas(canvas))
    }

    pub async fn is_loaded(&self, tile: Position) -> bool {
        let inner = self.inner.lock().await;
        inner.chunks.get(&tile).map(|c| c.loaded).unwrap_or(false)
    }

    pub async fn is_protected(&self, tile: Position) -> bool {
        let inner = self.inner.lock().await;
        inner
            .chunks
            .get(&tile)
            .map(|c| c.protected)
            .unwrap_or(false)
    }

    /// Current snapshot of a chunk, loaded or not.
    pub async fn get(&self, tile: Position) -> Option<Chunk> {
        let inner = self.inner.lock().await;
        inner.chunks.get(&tile).cloned()
    }

    /// Asks the server for a chunk without waiting for the reply. Loaded
    /// chunks are skipped unless `force` is set.
    pub async fn request(&self, tile: Position, force: bool) -> Result<(), ClientError> {
        let tile = tile.clamp_to_border();
        if !force && self.is_loaded(tile).await {
            return Ok(());
        }
        debug!("Requesting chunk at {}", tile);
        self.transport.send_binary(encode_chunk_request(tile))
    }

    /// Requests a chunk and waits for it to load. Returns immediately if
    /// it is already loaded and `force` is unset.
    pub async fn query(&self, tile: Position, force: bool) -> Result<Chunk, ClientError> {
        let tile = tile.clamp_to_border();
        let rx = {
            let mut inner = self.inner.lock().await;
            if !force {
                if let Some(chunk) = inner.chunks.get(&tile).filter(|c| c.loaded) {
                    return Ok(chunk.clone());
                }
            }
            let (tx, rx) = oneshot::channel();
            let waiters = inner.pending.entry(tile).or_default();
            let first = waiters.is_empty();
            waiters.push(tx);
            if first {
                // A failed request must not leave the waiter behind, or
                // later queries for this tile would never hit the wire.
                if let Err(err) = self.transport.send_binary(encode_chunk_request(tile)) {
                    inner.pending.remove(&tile);
                    return Err(err);
                }
            }
            rx
        };
        rx.await.map_err(|_| ClientError::QueryAborted)
    }

    /// Applies freshly decoded chunk data and resolves any waiters.
    pub async fn apply_loaded(&self, decoded: &DecodedChunk) {
        let mut inner = self.inner.lock().await;
        let chunk = inner.get_or_create(decoded.tile);
        chunk.apply_data(&decoded.data, decoded.protected);
        let snapshot = chunk.clone();
        if let Some(waiters) = inner.pending.remove(&decoded.tile) {
            debug!("Resolving {} chunk waiter(s) at {}", waiters.len(), decoded.tile);
            for tx in waiters {
                let _ = tx.send(snapshot.clone());
            }
        }
    }

    /// Returns whether the flag actually changed.
    pub async fn apply_protection(&self, tile: Position, protected: bool) -> bool {
        let mut inner = self.inner.lock().await;
        let chunk = inner.get_or_create(tile);
        let changed = chunk.protected != protected;
        chunk.protected = protected;
        changed
    }

    /// Drops every pending query so waiting callers fail instead of
    /// hanging on a dead connection.
    pub async fn fail_pending(&self) {
        let mut inner = self.inner.lock().await;
        let dropped: usize = inner.pending.values().map(Vec::len).sum();
        if dropped > 0 {
            debug!("Failing {} pending chunk quer(ies)", dropped);
        }
        inner.pending.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.chunks.len()
    }
}
