//! World event fan-out.
//!
//! Everything observable about a session is delivered as a single enum on
//! an unbounded channel. Consumers hold the receiver; the session holds a
//! cloneable sender and never blocks on delivery.

use crate::messages::{ChatMessage, WhoisRecord};
use crate::player::{Player, Rank};
use protocol::{CaptchaState, Color, Position};
use tokio::sync::mpsc;

/// A state change or server notification observed by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    /// The socket is up and the handshake has been acknowledged.
    Connected { reconnect: bool },
    /// First entry into the ready state; fires once per session lifetime.
    Ready,
    /// The chat bucket has regenerated enough to speak; once per lifetime.
    ChatReady,
    PlayerConnected(Player),
    PlayerUpdated(Player),
    PlayerDisconnected(i32),
    /// A remote pixel landed. Own placements are not echoed.
    PixelPlaced {
        player_id: i32,
        pos: Position,
        color: Color,
        previous: Color,
    },
    ChunkLoaded(Position),
    ChunkProtectionChanged { tile: Position, protected: bool },
    Teleported { from: Position, to: Position },
    RankChanged(Rank),
    PixelQuota { capacity: u16, fill_time: u16 },
    MaxPlayerCount(u16),
    DonationTimer { seconds: u16 },
    CaptchaState(CaptchaState),
    Chat(ChatMessage),
    Tell { sender_id: i32, message: String },
    Info(String),
    Error(String),
    /// Response to `/ids`: the ids currently connected.
    Ids(Vec<i32>),
    Nickname(String),
    Whois(WhoisRecord),
    Disconnected,
}

/// Creates the event channel pair used by a session.
pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<WorldEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

/// Non-blocking sender half. A dropped receiver silently discards
/// events; the session keeps running.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<WorldEvent>,
}

impl EventSender {
    pub fn emit(&self, event: WorldEvent) {
        let _ = self.tx.send(event);
    }
}
