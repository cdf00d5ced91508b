//! World session state and message dispatch.
//!
//! A [`World`] mirrors one server world: the player roster, the client's
//! own player, the chunk store, and the rate-limit buckets. Inbound
//! frames are dispatched serially through `handle_binary`/`handle_text`;
//! outbound interactions go through the transport and the two action
//! queues.

use crate::bucket::{SharedBucket, TokenBucket};
use crate::chunks::ChunkStore;
use crate::error::ClientError;
use crate::events::{self, EventSender, WorldEvent};
use crate::messages::{MessageClassifier, ServerMessage, WhoisRecord};
use crate::player::{ClientState, Player, PlayerTool, Rank};
use crate::queue::ActionQueue;
use crate::transport::{OutboundFrame, Transport};
use futures::FutureExt;
use log::{debug, info, warn};
use protocol::chunk::{decode_chunk, Chunk};
use protocol::codec::{
    self, encode_chunk_data, encode_chunk_fill, encode_chunk_protect, encode_pixel, encode_player,
};
use protocol::{
    CaptchaState, Color, Cursor, Opcode, Position, CHAT_VERIFICATION, CHUNK_WIDTH,
    WORLD_VERIFICATION,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Cursor moves are skipped while the target stays within this many
/// tiles of the current position.
const LAZY_MOVE_TILES: f64 = 4.0;

/// Connection lifecycle of a world session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Handshake sent, waiting for the server to assign an id.
    Connecting,
    /// Id assigned, initial state incoming.
    Initializing,
    Ready,
}

/// Session tunables. Defaults match the public service.
#[derive(Debug, Clone)]
pub struct WorldOptions {
    pub verification: u16,
    /// Chat bucket capacity and fill time in seconds.
    pub chat_bucket: (u16, u16),
}

impl Default for WorldOptions {
    fn default() -> Self {
        WorldOptions {
            verification: WORLD_VERIFICATION,
            chat_bucket: (4, 6),
        }
    }
}

/// State shared with the queue processors.
struct Shared {
    transport: Transport,
    chunks: Arc<ChunkStore>,
    client: Mutex<ClientState>,
}

struct PixelCommand {
    pos: Position,
    color: Color,
}

impl std::fmt::Debug for PixelCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pixel {} {}", self.pos, self.color)
    }
}

/// One world session.
pub struct World {
    name: String,
    options: WorldOptions,
    shared: Arc<Shared>,
    events: EventSender,
    state: ConnectionState,
    /// Ready has fired; reconnects must not fire it again.
    ready_fired: bool,
    reconnect: bool,
    password_protected: bool,
    max_player_count: Option<u16>,
    players: HashMap<i32, Player>,
    pixel_bucket: SharedBucket,
    chat_bucket: SharedBucket,
    pixel_queue: ActionQueue<PixelCommand, Result<Color, ClientError>>,
    chat_queue: ActionQueue<String, Result<(), ClientError>>,
    classifier: MessageClassifier,
    pending_whois: HashMap<i32, Vec<oneshot::Sender<WhoisRecord>>>,
}

impl World {
    /// Creates a session plus the outbound frame receiver (for the
    /// socket glue) and the event receiver (for the consumer).
    pub fn new(
        name: impl Into<String>,
        options: WorldOptions,
    ) -> (
        World,
        mpsc::UnboundedReceiver<OutboundFrame>,
        mpsc::UnboundedReceiver<WorldEvent>,
    ) {
        let (transport, frame_rx) = Transport::new();
        let (events, event_rx) = events::channel();
        let shared = Arc::new(Shared {
            transport: transport.clone(),
            chunks: Arc::new(ChunkStore::new(transport)),
            client: Mutex::new(ClientState::default()),
        });

        // Placements wait for quota the server has not granted yet.
        let pixel_bucket = SharedBucket::new(TokenBucket::empty());
        let (chat_cap, chat_time) = options.chat_bucket;
        let chat_bucket = SharedBucket::new(TokenBucket::new(chat_cap, chat_time, true));

        let pixel_queue = ActionQueue::new("pixel", pixel_bucket.clone(), {
            let shared = Arc::clone(&shared);
            move |cmd: PixelCommand| {
                let shared = Arc::clone(&shared);
                async move { process_pixel(&shared, cmd).await }.boxed()
            }
        });
        let chat_queue = ActionQueue::new("chat", chat_bucket.clone(), {
            let shared = Arc::clone(&shared);
            move |message: String| {
                let shared = Arc::clone(&shared);
                async move { process_chat(&shared, message) }.boxed()
            }
        });

        let world = World {
            name: name.into(),
            options,
            shared,
            events,
            state: ConnectionState::default(),
            ready_fired: false,
            reconnect: false,
            password_protected: false,
            max_player_count: None,
            players: HashMap::new(),
            pixel_bucket,
            chat_bucket,
            pixel_queue,
            chat_queue,
            classifier: MessageClassifier::new(),
            pending_whois: HashMap::new(),
        };
        (world, frame_rx, event_rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_password_protected(&self) -> bool {
        self.password_protected
    }

    pub fn max_player_count(&self) -> Option<u16> {
        self.max_player_count
    }

    pub fn players(&self) -> &HashMap<i32, Player> {
        &self.players
    }

    pub fn client(&self) -> ClientState {
        self.shared.client.lock().unwrap().clone()
    }

    pub fn chunks(&self) -> Arc<ChunkStore> {
        Arc::clone(&self.shared.chunks)
    }

    pub fn transport(&self) -> Transport {
        self.shared.transport.clone()
    }

    /// Marks the link up and sends the handshake. Called by the socket
    /// glue once the socket is open.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        info!("Joining world '{}'", self.name);
        self.shared.transport.set_connected(true);
        self.shared
            .transport
            .handshake(&self.name, self.options.verification)?;
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    /// Re-sends the handshake after a transport-level reconnection.
    pub fn handle_reconnect(&mut self) -> Result<(), ClientError> {
        info!("Rejoining world '{}'", self.name);
        self.reconnect = true;
        self.shared.transport.set_connected(true);
        self.shared
            .transport
            .handshake(&self.name, self.options.verification)?;
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    /// Tears the session down: pending queries fail, queues refuse new
    /// items, and a final `Disconnected` event fires.
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        info!("Leaving world '{}'", self.name);
        self.state = ConnectionState::Disconnected;
        self.shared.transport.disconnect();
        self.shared.chunks.fail_pending().await;
        self.pending_whois.clear();
        self.pixel_queue.shutdown();
        self.chat_queue.shutdown();
        self.events.emit(WorldEvent::Disconnected);
    }

    /// Dispatches one binary frame. Unknown opcodes are ignored; a
    /// truncated frame aborts the rest of that frame only.
    pub async fn handle_binary(&mut self, data: &[u8]) -> Result<(), ClientError> {
        let Some((&opcode_byte, payload)) = data.split_first() else {
            return Ok(());
        };
        let Some(opcode) = Opcode::from_byte(opcode_byte) else {
            debug!("Ignoring unknown opcode {}", opcode_byte);
            return Ok(());
        };
        let mut cursor = Cursor::with_base(payload, 1);
        match opcode {
            Opcode::SetId => self.handle_set_id(&mut cursor)?,
            Opcode::WorldUpdate => self.handle_world_update(&mut cursor).await?,
            Opcode::ChunkLoad => {
                let decoded = decode_chunk(&mut cursor)?;
                self.shared.chunks.apply_loaded(&decoded).await;
                self.events.emit(WorldEvent::ChunkLoaded(decoded.tile));
            }
            Opcode::Teleport => {
                let tile = codec::read_position(&mut cursor)?;
                let to = tile.tile_center_canvas();
                let from = self.move_client(to);
                info!("Teleported from {} to {}", from, to);
                self.events.emit(WorldEvent::Teleported { from, to });
            }
            Opcode::SetRank => {
                let byte = cursor.read_u8()?;
                if let Some(rank) = Rank::from_byte(byte) {
                    self.apply_rank(rank).await;
                } else {
                    warn!("Ignoring unknown rank byte {}", byte);
                }
            }
            Opcode::Captcha => {
                let byte = cursor.read_u8()?;
                let Some(state) = CaptchaState::from_byte(byte) else {
                    warn!("Ignoring unknown captcha state {}", byte);
                    return Ok(());
                };
                self.events.emit(WorldEvent::CaptchaState(state));
                if state == CaptchaState::Invalid {
                    warn!("Captcha rejected, closing session");
                    self.disconnect().await;
                }
            }
            Opcode::SetPixelQuota => {
                let (capacity, fill_time) = codec::read_bucket_params(&mut cursor)?;
                debug!("Pixel quota set to {}/{}s", capacity, fill_time);
                self.pixel_bucket.set_params(capacity, fill_time, false).await;
                self.events.emit(WorldEvent::PixelQuota {
                    capacity,
                    fill_time,
                });
            }
            Opcode::ChunkProtect => {
                let tile = codec::read_position(&mut cursor)?;
                let protected = cursor.read_u8()? != 0;
                self.shared.chunks.apply_protection(tile, protected).await;
                self.events
                    .emit(WorldEvent::ChunkProtectionChanged { tile, protected });
            }
            Opcode::MaxPlayerCount => {
                let count = cursor.read_u16_le()?;
                self.max_player_count = Some(count);
                self.events.emit(WorldEvent::MaxPlayerCount(count));
            }
            Opcode::DonationTimer => {
                let seconds = cursor.read_u16_le()?;
                self.events.emit(WorldEvent::DonationTimer { seconds });
            }
        }
        Ok(())
    }

    fn handle_set_id(&mut self, cursor: &mut Cursor) -> Result<(), ClientError> {
        let id = cursor.read_i32_le()?;
        info!("Assigned id {} in world '{}'", id, self.name);
        {
            let mut client = self.shared.client.lock().unwrap();
            let player = client.player.get_or_insert_with(|| Player::new(id));
            player.id = id;
        }
        self.state = ConnectionState::Initializing;
        self.events.emit(WorldEvent::Connected {
            reconnect: self.reconnect,
        });
        if !self.ready_fired {
            self.ready_fired = true;
            self.events.emit(WorldEvent::Ready);
            self.schedule_chat_ready();
        }
        Ok(())
    }

    /// Fires `ChatReady` after the chat bucket's single-unit fill
    /// interval, matching the server's own grace period.
    fn schedule_chat_ready(&self) {
        let events = self.events.clone();
        let bucket = self.chat_bucket.clone();
        tokio::spawn(async move {
            if let Some(delay) = bucket.fill_interval().await {
                tokio::time::sleep(delay).await;
            }
            events.emit(WorldEvent::ChatReady);
        });
    }

    async fn handle_world_update(&mut self, cursor: &mut Cursor<'_>) -> Result<(), ClientError> {
        let client_id = self.client().id();

        let player_count = cursor.read_u8()?;
        for _ in 0..player_count {
            let record = codec::read_player(cursor, true)?;
            if Some(record.id) == client_id {
                let mut client = self.shared.client.lock().unwrap();
                if let Some(player) = client.player.as_mut() {
                    apply_record(player, &record);
                }
                continue;
            }
            let first_seen = !self.players.contains_key(&record.id);
            let player = self
                .players
                .entry(record.id)
                .or_insert_with(|| Player::new(record.id));
            apply_record(player, &record);
            let snapshot = *player;
            if first_seen && self.state == ConnectionState::Ready {
                self.events.emit(WorldEvent::PlayerConnected(snapshot));
            } else {
                self.events.emit(WorldEvent::PlayerUpdated(snapshot));
            }
        }

        let pixel_count = cursor.read_u16_le()?;
        for _ in 0..pixel_count {
            let record = codec::read_player(cursor, false)?;
            // Pixel records reuse the player layout with a canvas
            // position.
            let previous = self.shared.chunks.set_pixel(record.pos, record.color).await;
            if Some(record.id) != client_id {
                self.events.emit(WorldEvent::PixelPlaced {
                    player_id: record.id,
                    pos: record.pos,
                    color: record.color,
                    previous,
                });
            }
        }

        let disconnect_count = cursor.read_u8()?;
        for _ in 0..disconnect_count {
            let id = cursor.read_i32_le()?;
            if self.players.remove(&id).is_some() {
                self.events.emit(WorldEvent::PlayerDisconnected(id));
            }
        }
        // The first update delivers the initial roster; later first-seen
        // ids are genuine connections.
        if self.state == ConnectionState::Initializing {
            self.state = ConnectionState::Ready;
        }
        Ok(())
    }

    async fn apply_rank(&mut self, rank: Rank) {
        let previous = {
            let mut client = self.shared.client.lock().unwrap();
            std::mem::replace(&mut client.rank, rank)
        };
        info!("Rank changed from {:?} to {:?}", previous, rank);
        if rank == Rank::Admin {
            self.pixel_bucket.set_infinite(true).await;
            self.chat_bucket.set_infinite(true).await;
        } else if previous == Rank::Admin {
            self.pixel_bucket.set_infinite(false).await;
            self.chat_bucket.set_infinite(false).await;
        }
        self.events.emit(WorldEvent::RankChanged(rank));
    }

    /// Dispatches one text frame.
    pub fn handle_text(&mut self, text: &str) {
        let Some(message) = self.classifier.classify(text) else {
            return;
        };
        match message {
            ServerMessage::Info(content) => {
                if content.starts_with("This world has a password set") {
                    self.password_protected = true;
                }
                self.events.emit(WorldEvent::Info(content));
            }
            ServerMessage::Error(content) => self.events.emit(WorldEvent::Error(content)),
            ServerMessage::Nickname(content) => self.events.emit(WorldEvent::Nickname(content)),
            ServerMessage::Chat(chat) => self.events.emit(WorldEvent::Chat(chat)),
            ServerMessage::TellPlayer(content) => {
                self.events.emit(WorldEvent::Info(format!("You tell {}", content)))
            }
            ServerMessage::TellClient { sender_id, content } => {
                self.events.emit(WorldEvent::Tell {
                    sender_id,
                    message: content,
                })
            }
            ServerMessage::Ids(ids) => self.events.emit(WorldEvent::Ids(ids)),
            ServerMessage::Whois(record) => {
                if let Some(waiters) = self.pending_whois.remove(&record.player_id) {
                    for tx in waiters {
                        let _ = tx.send(record.clone());
                    }
                }
                self.events.emit(WorldEvent::Whois(record));
            }
        }
    }

    fn check_interaction(&self, required: Rank) -> Result<(), ClientError> {
        if !self.shared.transport.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let current = self.shared.client.lock().unwrap().rank;
        if current < required {
            return Err(ClientError::InsufficientRank { required, current });
        }
        Ok(())
    }

    /// Queues a pixel placement. The receiver resolves with the color
    /// the pixel replaced once the quota allows the send.
    pub fn place_pixel(
        &self,
        pos: Position,
        color: Color,
    ) -> Result<oneshot::Receiver<Result<Color, ClientError>>, ClientError> {
        self.check_interaction(Rank::Player)?;
        self.pixel_queue.enqueue(PixelCommand { pos, color })
    }

    /// Queues a chat line. Truncation to the rank's maximum length and
    /// the verification suffix are applied at send time.
    pub fn send_chat(
        &self,
        message: impl Into<String>,
    ) -> Result<oneshot::Receiver<Result<(), ClientError>>, ClientError> {
        self.check_interaction(Rank::None)?;
        self.chat_queue.enqueue(message.into())
    }

    pub fn run_command(
        &self,
        command: &str,
        args: &[&str],
    ) -> Result<oneshot::Receiver<Result<(), ClientError>>, ClientError> {
        let message = if args.is_empty() {
            format!("/{}", command)
        } else {
            format!("/{} {}", command, args.join(" "))
        };
        self.send_chat(message)
    }

    pub fn tell(
        &self,
        id: i32,
        message: &str,
    ) -> Result<oneshot::Receiver<Result<(), ClientError>>, ClientError> {
        self.run_command("tell", &[&id.to_string(), message])
    }

    pub fn set_nickname(
        &self,
        nickname: &str,
    ) -> Result<oneshot::Receiver<Result<(), ClientError>>, ClientError> {
        self.shared.client.lock().unwrap().nickname = Some(nickname.to_string());
        self.run_command("nick", &[nickname])
    }

    pub fn reset_nickname(
        &self,
    ) -> Result<oneshot::Receiver<Result<(), ClientError>>, ClientError> {
        self.shared.client.lock().unwrap().nickname = None;
        self.run_command("nick", &[])
    }

    pub fn login(
        &self,
        password: &str,
    ) -> Result<oneshot::Receiver<Result<(), ClientError>>, ClientError> {
        self.run_command("pass", &[password])
    }

    /// Teleports another player. Moderator only.
    pub fn move_player(
        &self,
        id: i32,
        pos: Position,
    ) -> Result<oneshot::Receiver<Result<(), ClientError>>, ClientError> {
        self.check_interaction(Rank::Moderator)?;
        self.run_command(
            "tp",
            &[&id.to_string(), &pos.x.to_string(), &pos.y.to_string()],
        )
    }

    /// Restricts placement to moderators. Moderator only.
    pub fn set_restricted(
        &self,
        restricted: bool,
    ) -> Result<oneshot::Receiver<Result<(), ClientError>>, ClientError> {
        self.check_interaction(Rank::Moderator)?;
        self.run_command("restrict", &[&restricted.to_string()])
    }

    pub fn set_tool(&self, tool: PlayerTool) -> Result<(), ClientError> {
        self.check_interaction(Rank::None)?;
        let frame = {
            let mut client = self.shared.client.lock().unwrap();
            let player = client.player.as_mut().ok_or(ClientError::NotConnected)?;
            player.tool = tool;
            encode_player(player.raw_pos, player.color, tool.to_byte())
        };
        self.shared.transport.send_binary(frame)
    }

    pub fn set_color(&self, color: Color) -> Result<(), ClientError> {
        self.check_interaction(Rank::None)?;
        let frame = {
            let mut client = self.shared.client.lock().unwrap();
            let player = client.player.as_mut().ok_or(ClientError::NotConnected)?;
            player.color = color;
            encode_player(player.raw_pos, color, player.tool.to_byte())
        };
        self.shared.transport.send_binary(frame)
    }

    /// Moves the client cursor to a canvas position.
    pub fn move_to(&self, pos: Position) -> Result<(), ClientError> {
        self.check_interaction(Rank::None)?;
        let frame = {
            let mut client = self.shared.client.lock().unwrap();
            let player = client.player.as_mut().ok_or(ClientError::NotConnected)?;
            player.raw_pos = pos * CHUNK_WIDTH;
            encode_player(player.raw_pos, player.color, player.tool.to_byte())
        };
        self.shared.transport.send_binary(frame)
    }

    pub fn protect_chunk(&self, tile: Position) -> Result<(), ClientError> {
        self.set_chunk_protected(tile, true)
    }

    pub fn unprotect_chunk(&self, tile: Position) -> Result<(), ClientError> {
        self.set_chunk_protected(tile, false)
    }

    fn set_chunk_protected(&self, tile: Position, protect: bool) -> Result<(), ClientError> {
        self.check_interaction(Rank::Moderator)?;
        self.shared
            .transport
            .send_binary(encode_chunk_protect(tile, protect))
    }

    /// Fills a whole chunk with one color. Moderator only; spends one
    /// unit of pixel allowance directly rather than going through the
    /// queue, so callers see quota exhaustion immediately.
    pub async fn fill_chunk(&self, tile: Position, color: Color) -> Result<(), ClientError> {
        self.check_interaction(Rank::Moderator)?;
        if !self.pixel_bucket.try_spend(1.0).await {
            return Err(ClientError::BucketExhausted);
        }
        self.shared
            .transport
            .send_binary(encode_chunk_fill(tile, color))
    }

    pub async fn erase_chunk(&self, tile: Position) -> Result<(), ClientError> {
        self.fill_chunk(tile, Color::WHITE).await
    }

    /// Replaces a chunk's pixel data wholesale. Moderator only.
    pub fn set_chunk_data(&self, tile: Position, data: &[u8]) -> Result<(), ClientError> {
        self.check_interaction(Rank::Moderator)?;
        self.shared
            .transport
            .send_binary(encode_chunk_data(tile, data))
    }

    pub async fn request_chunk(&self, tile: Position, force: bool) -> Result<(), ClientError> {
        self.shared.chunks.request(tile, force).await
    }

    pub async fn query_chunk(&self, tile: Position, force: bool) -> Result<Chunk, ClientError> {
        self.shared.chunks.query(tile, force).await
    }

    pub async fn query_pixel(&self, pos: Position) -> Result<Color, ClientError> {
        if let Some(color) = self.shared.chunks.get_pixel(pos).await {
            return Ok(color);
        }
        let chunk = self.shared.chunks.query(pos.to_tile(), false).await?;
        Ok(chunk.get_canvas(pos))
    }

    /// Looks up moderation data for a player. Concurrent queries for one
    /// id share a single `/whois` round trip.
    pub fn query_whois(
        &mut self,
        id: i32,
    ) -> Result<oneshot::Receiver<WhoisRecord>, ClientError> {
        self.check_interaction(Rank::None)?;
        if !self.pending_whois.contains_key(&id) {
            self.run_command("whois", &[&id.to_string()])?;
        }
        let (tx, rx) = oneshot::channel();
        self.pending_whois.entry(id).or_default().push(tx);
        Ok(rx)
    }

    /// Moves the client player locally, returning the old canvas
    /// position.
    fn move_client(&self, to: Position) -> Position {
        let mut client = self.shared.client.lock().unwrap();
        match client.player.as_mut() {
            Some(player) => {
                let from = player.pos();
                player.raw_pos = to * CHUNK_WIDTH;
                from
            }
            None => to,
        }
    }
}

fn apply_record(player: &mut Player, record: &codec::PlayerRecord) {
    player.raw_pos = record.pos;
    player.color = record.color;
    if let Some(tool) = record.tool {
        player.tool = PlayerTool::from_byte(tool);
    }
}

/// Where the cursor must move before placing at `target`, if anywhere.
/// Admins place remotely; everyone else moves once the target drifts
/// [`LAZY_MOVE_TILES`] or more tiles away.
fn place_destination(target: Position, current: Option<Position>, rank: Rank) -> Option<Position> {
    let current = match current {
        Some(pos) if pos == target => return None,
        Some(pos) => pos,
        None => return Some(target),
    };
    if rank == Rank::Admin {
        return None;
    }
    let diff = target.to_tile() - current.to_tile();
    let dist = ((diff.x as f64).powi(2) + (diff.y as f64).powi(2)).sqrt();
    if dist >= LAZY_MOVE_TILES {
        Some(target)
    } else {
        None
    }
}

async fn process_pixel(shared: &Shared, cmd: PixelCommand) -> Result<Color, ClientError> {
    let (rank, current) = {
        let client = shared.client.lock().unwrap();
        (client.rank, client.player.as_ref().map(|p| p.pos()))
    };
    if rank < Rank::Player {
        return Err(ClientError::InsufficientRank {
            required: Rank::Player,
            current: rank,
        });
    }
    if let Some(dest) = place_destination(cmd.pos, current, rank) {
        let frame = {
            let mut client = shared.client.lock().unwrap();
            let player = client.player.as_mut().ok_or(ClientError::NotConnected)?;
            player.raw_pos = dest * CHUNK_WIDTH;
            encode_player(player.raw_pos, player.color, player.tool.to_byte())
        };
        shared.transport.send_binary(frame)?;
    }
    shared
        .transport
        .send_binary(encode_pixel(cmd.pos, cmd.color))?;
    Ok(shared.chunks.set_pixel(cmd.pos, cmd.color).await)
}

fn process_chat(shared: &Shared, message: String) -> Result<(), ClientError> {
    let max = shared.client.lock().unwrap().rank.max_message_len();
    let truncated: String = message.chars().take(max).collect();
    shared
        .transport
        .send_text(format!("{}{}", truncated, CHAT_VERIFICATION))
}
