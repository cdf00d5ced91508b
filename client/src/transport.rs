//! Outbound frame channel.
//!
//! The session never talks to a socket directly. It hands frames to a
//! [`Transport`], and whatever owns the actual connection drains the
//! paired receiver. Tests drain it in-process.

use crate::error::ClientError;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A single frame headed for the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Binary(Vec<u8>),
    Text(String),
}

/// Handle for queuing outbound frames. Cloning shares the channel and
/// the connected flag.
#[derive(Clone)]
pub struct Transport {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    connected: Arc<AtomicBool>,
}

impl Transport {
    /// Creates a transport and the receiver its frames arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Transport {
            tx,
            connected: Arc::new(AtomicBool::new(false)),
        };
        (transport, rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        debug!("Transport connected: {}", connected);
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Sends the world join frame: ASCII world id plus the verification
    /// marker.
    pub fn handshake(&self, world: &str, verification: u16) -> Result<(), ClientError> {
        self.send_binary(protocol::codec::encode_handshake(world, verification))
    }

    /// Marks the link down. Queued frames already handed over stay with
    /// the receiver; new sends fail.
    pub fn disconnect(&self) {
        self.set_connected(false);
    }

    pub fn send_binary(&self, data: Vec<u8>) -> Result<(), ClientError> {
        self.send(OutboundFrame::Binary(data))
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.send(OutboundFrame::Text(text.into()))
    }

    fn send(&self, frame: OutboundFrame) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.tx
            .send(frame)
            .map_err(|_| ClientError::TransportClosed)
    }
}
