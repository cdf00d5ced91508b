//! Client-side synchronization engine for a collaborative pixel canvas.
//!
//! Decodes the server's binary protocol, mirrors the chunked canvas and
//! player roster locally, and rate-limits outgoing pixel and chat
//! traffic through refillable allowance buckets. The socket itself is
//! external: frames come in through [`World::handle_binary`] and
//! [`World::handle_text`], and go out on the channel returned by
//! [`World::new`].

pub mod bucket;
pub mod chunks;
pub mod error;
pub mod events;
pub mod messages;
pub mod player;
pub mod queue;
pub mod server_info;
pub mod transport;
pub mod world;

pub use bucket::{SharedBucket, TokenBucket};
pub use chunks::ChunkStore;
pub use error::ClientError;
pub use events::{EventSender, WorldEvent};
pub use messages::{ChatMessage, ChatPlayer, MessageClassifier, ServerMessage, WhoisRecord};
pub use player::{ClientState, Player, PlayerTool, Rank};
pub use queue::ActionQueue;
pub use server_info::{BanState, ServerInfo};
pub use transport::{OutboundFrame, Transport};
pub use world::{ConnectionState, World, WorldOptions};
