//! # Covalent Core
//!
//! Pure primitives for Covalent: identifiers, crypto, signed session logs and
//! the per-CoValue transaction log with its validity cache.
//!
//! This crate contains no I/O, no storage, no networking, and knows nothing
//! about permissions or content types. Validity is decided by a
//! [`TransactionValidator`] handed in from outside.
//!
//! ## Key Types
//!
//! - [`CoValueHeader`] - Immutable header; its hash is the [`CoValueId`]
//! - [`Transaction`] - One signed entry in a session log
//! - [`SessionLog`] - A single writer's hash-chained transaction sequence
//! - [`CoValueCore`] - All sessions of one CoValue plus cached verdicts
//! - [`KnownState`] - What a replica holds, the currency of sync
//! - [`CoValueContent`] - The unit of transfer and persistence
//!
//! ## Canonicalization
//!
//! Headers and transactions are hashed over deterministic CBOR. See
//! [`canonical`].

pub mod canonical;
pub mod content;
pub mod covalue;
pub mod crypto;
pub mod error;
pub mod header;
pub mod ids;
pub mod known;
pub mod provider;
pub mod session;
pub mod time;
pub mod transaction;
pub mod validation;

pub use canonical::{header_bytes, transaction_bytes};
pub use content::{CoValueContent, Priority, SessionNewContent};
pub use covalue::{CoValueCore, MergeOutcome, SortKey, TransactionValidator, TxRef, Validity};
pub use crypto::{
    AgentSecret, Blake3Hash, Encrypted, KeyId, KeySecret, Sealed, SealerId, SealerSecret,
    Signature, SignerId, SignerSecret,
};
pub use error::{CoreError, Result, ValidationError};
pub use header::{content_types, CoValueHeader, Ruleset};
pub use ids::{AgentId, CoValueId, MemberId, OpId, SessionId, TransactionId};
pub use known::KnownState;
pub use provider::{CryptoProvider, DalekCrypto};
pub use session::{SessionChunk, SessionLog};
pub use time::{Clock, ManualClock, SystemClock};
pub use transaction::{Privacy, Transaction};
pub use validation::{parse_changes, validate_content_piece, validate_header, MAX_TRANSACTION_SIZE};
