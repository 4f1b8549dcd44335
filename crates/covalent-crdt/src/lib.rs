//! # Covalent CRDT
//!
//! Content views folded from validated, decrypted transactions.
//!
//! Views are pure functions of a transaction sequence in log-merge order:
//! replicas holding the same valid transactions compute the same view no
//! matter in which order the transactions arrived.
//!
//! - [`CoMap`] - last-write-wins per key, full history kept
//! - [`CoList`] - anchored insertions with tombstones
//! - [`CoStream`] - per-session append-only sequences

pub mod colist;
pub mod comap;
pub mod costream;
pub mod error;
pub mod ops;

pub use colist::{CoList, ListEntry};
pub use comap::{CoMap, MapEdit};
pub use costream::{CoStream, StreamItem};
pub use error::{CrdtError, Result};
pub use ops::{check_changes, rewrite_list_refs, After, Before, DecodedTx, ListOp, MapOp};
