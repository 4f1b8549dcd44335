//! Error types for the Node.

use covalent_core::{CoValueId, CoreError, ValidationError};
use covalent_crdt::CrdtError;
use covalent_perms::PermsError;
use covalent_store::StoreError;
use covalent_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during Node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Structural validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("crdt error: {0}")]
    Crdt(#[from] CrdtError),

    /// Permission error.
    #[error("permission error: {0}")]
    Permission(#[from] PermsError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Not held locally and no storage or peer could provide it.
    #[error("{0} is unavailable")]
    Unavailable(CoValueId),

    /// The local account lacks the role the operation needs.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// The CoValue has a different content type than the operation needs.
    #[error("{id} is a {actual}, expected {expected}")]
    WrongContentType {
        id: CoValueId,
        expected: &'static str,
        actual: String,
    },

    #[error("unknown content type {0}")]
    UnknownContentType(String),

    #[error("invalid invite: {0}")]
    InvalidInvite(String),

    #[error("{0} is not a branch")]
    NotABranch(CoValueId),

    /// Invalid operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for Node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
