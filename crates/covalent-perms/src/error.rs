//! Error types for the permissions module.

use covalent_core::{CoValueId, KeyId};
use thiserror::Error;

/// Errors that can occur during permission operations.
#[derive(Debug, Error)]
pub enum PermsError {
    /// The CoValue does not use the group ruleset.
    #[error("{0} is not a group")]
    NotAGroup(CoValueId),

    /// A group needed to answer the question is not loaded.
    #[error("group {0} is unavailable")]
    GroupUnavailable(CoValueId),

    #[error("invalid role: {0}")]
    InvalidRole(String),

    /// No readable path to the key.
    #[error("key {0} is not available to this agent")]
    KeyUnavailable(KeyId),

    #[error("malformed key value: {0}")]
    MalformedKey(String),

    #[error("core error: {0}")]
    CoreError(#[from] covalent_core::CoreError),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
