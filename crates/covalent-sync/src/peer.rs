//! Per-peer sync state.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use covalent_core::{CoValueId, KnownState};

/// Identifies a connected peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// A random `peer_<hex>` id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("peer_{}", hex::encode(bytes)))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a peer is to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerRole {
    /// Gets every local change, and is asked for everything we hold.
    Server,
    /// Gets updates only for CoValues it showed interest in.
    Client,
}

/// Load progress of one CoValue from one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Unknown,
    Loading,
    Available,
    Unavailable,
}

/// Counters kept per peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Transactions queued in content messages.
    pub transactions_sent: u64,
    pub corrections_sent: u64,
    pub corrections_received: u64,
}

/// Our view of one peer.
#[derive(Debug, Clone)]
pub struct PeerState {
    id: PeerId,
    role: PeerRole,
    confirmed: HashMap<CoValueId, KnownState>,
    optimistic: HashMap<CoValueId, KnownState>,
    load: HashMap<CoValueId, LoadState>,
    interested: BTreeSet<CoValueId>,
    /// Loads we forwarded on this peer's behalf and still owe an answer for.
    awaiting: BTreeSet<CoValueId>,
}

impl PeerState {
    pub fn new(id: PeerId, role: PeerRole) -> Self {
        Self {
            id,
            role,
            confirmed: HashMap::new(),
            optimistic: HashMap::new(),
            load: HashMap::new(),
            interested: BTreeSet::new(),
            awaiting: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn is_server(&self) -> bool {
        self.role == PeerRole::Server
    }

    /// Confirmed state combined with the optimistic overlay.
    pub fn known_state(&self, id: &CoValueId) -> Option<KnownState> {
        match (self.confirmed.get(id), self.optimistic.get(id)) {
            (Some(c), Some(o)) => Some(c.combine(o)),
            (Some(k), None) | (None, Some(k)) => Some(k.clone()),
            (None, None) => None,
        }
    }

    pub fn confirmed_state(&self, id: &CoValueId) -> Option<&KnownState> {
        self.confirmed.get(id)
    }

    /// The peer told us, directly or by sending content, what it holds.
    pub fn confirm(&mut self, known: &KnownState) {
        self.confirmed
            .entry(known.id)
            .and_modify(|k| k.combine_with(known))
            .or_insert_with(|| known.clone());
    }

    /// We sent content the peer will hold once it arrives.
    pub fn assume(&mut self, known: &KnownState) {
        self.optimistic
            .entry(known.id)
            .and_modify(|k| k.combine_with(known))
            .or_insert_with(|| known.clone());
    }

    /// The peer holds exactly `known`; anything we assumed is void.
    pub fn correct(&mut self, known: KnownState) {
        self.optimistic.remove(&known.id);
        self.confirmed.insert(known.id, known);
    }

    pub fn reset_optimistic(&mut self) {
        self.optimistic.clear();
    }

    pub fn load_state(&self, id: &CoValueId) -> LoadState {
        self.load.get(id).copied().unwrap_or_default()
    }

    pub fn set_load_state(&mut self, id: CoValueId, state: LoadState) {
        self.load.insert(id, state);
    }

    pub fn is_interested(&self, id: &CoValueId) -> bool {
        self.interested.contains(id)
    }

    pub fn mark_interested(&mut self, id: CoValueId) {
        self.interested.insert(id);
    }

    /// Whether local changes to `id` should be pushed to this peer.
    pub fn wants(&self, id: &CoValueId) -> bool {
        self.is_server() || self.is_interested(id)
    }

    pub(crate) fn await_answer(&mut self, id: CoValueId) {
        self.awaiting.insert(id);
    }

    pub(crate) fn take_awaiting(&mut self, id: &CoValueId) -> bool {
        self.awaiting.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covalent_core::{AgentSecret, SessionId};

    fn known(counts: &[(u8, u32)]) -> KnownState {
        let mut known = KnownState::header_only(CoValueId::from_bytes([1; 32]));
        for (n, count) in counts {
            let session = SessionId::new(None, AgentSecret::from_seed(&[*n; 32]).agent_id(), 0);
            known.set(session, *count);
        }
        known
    }

    #[test]
    fn test_optimistic_overlay_combines() {
        let mut peer = PeerState::new(PeerId::new("a"), PeerRole::Client);
        let id = known(&[]).id;
        assert_eq!(peer.known_state(&id), None);

        peer.confirm(&known(&[(1, 2)]));
        peer.assume(&known(&[(1, 5), (2, 1)]));
        assert_eq!(peer.known_state(&id), Some(known(&[(1, 5), (2, 1)])));
        assert_eq!(peer.confirmed_state(&id), Some(&known(&[(1, 2)])));

        peer.reset_optimistic();
        assert_eq!(peer.known_state(&id), Some(known(&[(1, 2)])));
    }

    #[test]
    fn test_correction_replaces_state() {
        let mut peer = PeerState::new(PeerId::new("a"), PeerRole::Server);
        let id = known(&[]).id;
        peer.confirm(&known(&[(1, 6)]));
        peer.assume(&known(&[(1, 8)]));

        peer.correct(known(&[(1, 3)]));
        assert_eq!(peer.known_state(&id), Some(known(&[(1, 3)])));
    }

    #[test]
    fn test_interest() {
        let mut client = PeerState::new(PeerId::random(), PeerRole::Client);
        let id = CoValueId::from_bytes([9; 32]);
        assert!(!client.wants(&id));
        client.mark_interested(id);
        assert!(client.wants(&id));
        assert!(PeerState::new(PeerId::new("s"), PeerRole::Server).wants(&id));
        assert!(client.id().0.starts_with("peer_"));
    }
}
