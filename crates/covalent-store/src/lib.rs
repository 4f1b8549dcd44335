//! # Covalent Store
//!
//! Storage contract for Covalent replicas, with SQLite and in-memory
//! implementations.
//!
//! ## Key Types
//!
//! - [`Storage`] - The async trait for persistence
//! - [`SqliteStorage`] - SQLite-based persistent storage
//! - [`MemoryStorage`] - In-memory storage for tests
//! - [`StoredCoValue`] - A header plus per-session transactions and checkpoint signatures
//! - [`StoreOutcome`] - Result of storing content pieces
//!
//! ## Usage
//!
//! ```rust,no_run
//! use covalent_store::{SqliteStorage, Storage};
//!
//! async fn example() {
//!     let storage = SqliteStorage::open("covalent.db").unwrap();
//!     // let outcome = storage.store(&id, &pieces).await.unwrap();
//!     let ids = storage.list().await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent stores**: Pieces already held are skipped
//! - **All-or-nothing**: A gap anywhere in a call rejects the whole call
//! - **Checkpoints**: Signatures are kept per piece end so stored content can be re-served

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageExt, StoreOutcome, StoredCoValue, StoredSession};
