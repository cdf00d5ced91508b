use crate::player::Rank;
use protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the synchronization engine.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An interaction was attempted without an open socket.
    #[error("socket is not connected")]
    NotConnected,

    /// The client's rank is below what the interaction requires.
    #[error("requires rank {required:?} or higher (current rank {current:?})")]
    InsufficientRank { required: Rank, current: Rank },

    /// A direct (non-queued) spend found the bucket empty.
    #[error("allowance bucket is exhausted")]
    BucketExhausted,

    /// The outbound channel to the socket glue has been dropped.
    #[error("transport channel closed")]
    TransportClosed,

    /// The queue was shut down before the item could be accepted.
    #[error("action queue is closed")]
    QueueClosed,

    /// A pending chunk or whois query was abandoned, typically because
    /// the world disconnected before the response arrived.
    #[error("pending query was abandoned")]
    QueryAborted,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
