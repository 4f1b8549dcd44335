//! Error types for CRDT operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrdtError {
    #[error("malformed change: {0}")]
    MalformedOp(String),

    #[error("index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("transaction has {0} changes, expected exactly one")]
    WrongArity(usize),
}

pub type Result<T> = std::result::Result<T, CrdtError>;
