//! Error types for the sync module.

use thiserror::Error;

use crate::peer::PeerId;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A frame line could not be decoded or encoded.
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The other end went away.
    #[error("peer disconnected")]
    Disconnected,

    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// A peer with this id is already connected.
    #[error("peer already connected: {0}")]
    DuplicatePeer(PeerId),

    /// Timeout waiting for peer.
    #[error("timeout: {0}")]
    Timeout(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
