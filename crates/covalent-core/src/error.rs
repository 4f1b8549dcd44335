//! Error types for the Covalent core.

use thiserror::Error;

use crate::ids::{CoValueId, SessionId};

/// Core errors that can occur while building, merging or encoding CoValue data.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("gap in session {session}: we hold {have} transactions, content starts after {after}")]
    Gap {
        session: SessionId,
        have: u32,
        after: u32,
    },

    #[error("session {session} forked at transaction {index}")]
    Fork { session: SessionId, index: u32 },

    #[error("header does not hash to {expected}, got {actual}")]
    HeaderMismatch {
        expected: CoValueId,
        actual: CoValueId,
    },

    #[error("no header known for {0}")]
    MissingHeader(CoValueId),

    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("decryption error: {0}")]
    DecryptionError(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Structural errors for headers, changes and content pieces.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("signature verification failed")]
    SignatureFailed,

    #[error("header id mismatch")]
    HeaderMismatch,

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("malformed changes: {0}")]
    MalformedChanges(String),

    #[error("transaction of {size} bytes exceeds maximum of {max}")]
    TransactionTooLarge { size: usize, max: usize },

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                ValidationError::SignatureFailed
            }
            CoreError::HeaderMismatch { .. } => ValidationError::HeaderMismatch,
            CoreError::EncodingError(msg) | CoreError::DecodingError(msg) => {
                ValidationError::StructuralError(msg)
            }
            other => ValidationError::StructuralError(other.to_string()),
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
