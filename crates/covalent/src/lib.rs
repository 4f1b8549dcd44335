//! # Covalent
//!
//! Local-first collaborative values: signed multi-writer logs, group
//! permissions, CRDT views and sync between peers.
//!
//! ## Overview
//!
//! A [`Node`] holds CoValues for one account on one device:
//!
//! - **CoValues**: Append-only logs, one per writing session, signed and hash-chained
//! - **Content**: Maps, lists and streams folded from the valid transactions
//! - **Groups**: Roles, read keys and invites that decide who may read and write
//! - **Sync**: Known-state exchange with peers over any [`Transport`](sync::Transport)
//! - **Storage**: Anything implementing [`Storage`](store::Storage), memory or SQLite
//!
//! ## Key Concepts
//!
//! - **Session**: One writer on one device. Only that writer appends to its log.
//! - **Known state**: How many transactions of each session a party holds.
//! - **Validity**: Whether a transaction was allowed, given the roles at its time.
//! - **Branch**: A copy that collects edits and merges them back later.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use covalent::{Node, NodeConfig};
//! use covalent::core::AgentSecret;
//! use covalent::store::SqliteStorage;
//!
//! async fn example() -> covalent::Result<()> {
//!     let storage = SqliteStorage::open("covalent.db")?;
//!     let mut node = Node::new(AgentSecret::generate(), storage, NodeConfig::default()).await?;
//!
//!     let group = node.create_group().await?;
//!     let todo = node.create_map(group).await?;
//!     node.set(todo, "title", "Write docs").await?;
//!
//!     let map = node.map(todo)?;
//!     assert_eq!(map.get_str("title"), Some("Write docs"));
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `covalent::core` - Ids, headers, transactions and the CoValue log
//! - `covalent::crdt` - Map, list and stream folding
//! - `covalent::perms` - Roles, group state and keys
//! - `covalent::store` - Storage contract, memory and SQLite backends
//! - `covalent::sync` - Sync protocol and transports

pub mod branch;
pub mod config;
pub mod error;
pub mod handles;
pub mod invite;
pub mod lazy;
pub mod membership;
pub mod node;
pub mod registry;
mod replica;
pub mod schema;
pub mod transfer;

// Re-export component crates
pub use covalent_core as core;
pub use covalent_crdt as crdt;
pub use covalent_perms as perms;
pub use covalent_store as store;
pub use covalent_sync as sync;

// Re-export main types for convenience
pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use handles::{ListHandle, MapHandle, StreamHandle};
pub use invite::Invite;
pub use lazy::LazyRef;
pub use membership::{AccountHandle, GroupHandle, MembershipOwner};
pub use node::{Node, NodeBuilder, PollOutcome};
pub use registry::{ContentKind, ContentRegistry};
pub use schema::{FieldType, Schema, SchemaRef, Violation};

// Re-export commonly used lower-level types
pub use covalent_core::{
    content_types, AgentId, AgentSecret, CoValueContent, CoValueId, KeyId, KnownState,
    MemberId, Privacy, SessionId, TransactionId,
};
pub use covalent_perms::{ParentRole, Role};
pub use covalent_store::{MemoryStorage, SqliteStorage, Storage};
pub use covalent_sync::{MemoryTransport, PeerId, PeerRole, SyncConfig, Transport};
