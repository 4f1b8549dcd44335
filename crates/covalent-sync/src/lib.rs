//! # Covalent Sync
//!
//! KnownState reconciliation between replicas.
//!
//! ## Overview
//!
//! Each side tracks what every peer holds of every CoValue as a
//! [`KnownState`](covalent_core::KnownState) and sends only the
//! transactions the peer lacks. What we sent is assumed optimistically until
//! the peer confirms it; a peer that lost data answers with a
//! `knownCorrection` and gets the missing range again.
//!
//! ## Key Properties
//!
//! - **Idempotent**: Re-sent content merges to the same state
//! - **Ordered by priority**: Groups travel before values, binary streams last
//! - **Resumable**: A correction restarts from whatever the peer really holds
//! - **Backpressured**: Sending waits while the transport buffer is full
//!
//! ## Message Flow
//!
//! ```text
//! Client                              Server
//!   |-------- load (known) ----------->|
//!   |<------- known -------------------|
//!   |<------- content -----------------|
//!   |-------- known ------------------>|
//!   |-------- content ---------------->|
//!   |<------- knownCorrection ---------|   (server had lost data)
//!   |-------- content (missing) ------>|
//! ```

pub mod error;
pub mod messages;
pub mod outgoing;
pub mod peer;
pub mod protocol;
pub mod transport;

pub use error::{Result, SyncError};
pub use messages::{decode_frame, encode_frame, SyncMessage};
pub use outgoing::OutgoingQueue;
pub use peer::{LoadState, PeerId, PeerRole, PeerState, PeerStats};
pub use protocol::{LoadStatus, SyncConfig, SyncHost, SyncManager};
pub use transport::{MemoryTransport, Transport};
