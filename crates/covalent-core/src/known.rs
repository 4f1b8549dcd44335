//! Known state: what a replica holds of a CoValue.
//!
//! A known state is a header flag plus a transaction count per session.
//! `combine` is the lattice join (per-session max, header OR), so merging
//! known states in any order and any number of times gives the same result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{CoValueId, SessionId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownState {
    pub id: CoValueId,
    pub header: bool,
    pub sessions: BTreeMap<SessionId, u32>,
}

impl KnownState {
    /// Knows nothing about `id`.
    pub fn empty(id: CoValueId) -> Self {
        Self {
            id,
            header: false,
            sessions: BTreeMap::new(),
        }
    }

    /// Has the header and no transactions.
    pub fn header_only(id: CoValueId) -> Self {
        Self {
            id,
            header: true,
            sessions: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.header && self.sessions.values().all(|n| *n == 0)
    }

    /// Transactions known in `session`.
    pub fn count(&self, session: &SessionId) -> u32 {
        self.sessions.get(session).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.sessions.values().map(|n| u64::from(*n)).sum()
    }

    /// Join of two known states.
    #[must_use]
    pub fn combine(&self, other: &KnownState) -> KnownState {
        let mut combined = self.clone();
        combined.combine_with(other);
        combined
    }

    /// In-place join.
    pub fn combine_with(&mut self, other: &KnownState) {
        self.header |= other.header;
        for (session, count) in &other.sessions {
            let entry = self.sessions.entry(session.clone()).or_insert(0);
            *entry = (*entry).max(*count);
        }
    }

    /// Whether everything `other` knows is also known here.
    pub fn covers(&self, other: &KnownState) -> bool {
        (self.header || !other.header)
            && other
                .sessions
                .iter()
                .all(|(session, count)| self.count(session) >= *count)
    }

    pub fn is_covered_by(&self, other: &KnownState) -> bool {
        other.covers(self)
    }

    /// Record that `session` is known up to `count` transactions.
    pub fn set(&mut self, session: SessionId, count: u32) {
        self.sessions.insert(session, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AgentSecret;
    use proptest::prelude::*;

    fn session(n: u8) -> SessionId {
        SessionId::new(None, AgentSecret::from_seed(&[n; 32]).agent_id(), n as u64)
    }

    fn known(header: bool, counts: &[(u8, u32)]) -> KnownState {
        let mut state = KnownState::empty(CoValueId::from_bytes([0; 32]));
        state.header = header;
        for (s, c) in counts {
            state.set(session(*s), *c);
        }
        state
    }

    fn known_strategy() -> impl Strategy<Value = KnownState> {
        (
            any::<bool>(),
            prop::collection::vec((0u8..4, 0u32..20), 0..6),
        )
            .prop_map(|(header, counts)| {
                let mut state = known(header, &[]);
                for (s, c) in counts {
                    let entry = state.sessions.entry(session(s)).or_insert(0);
                    *entry = (*entry).max(c);
                }
                state
            })
    }

    #[test]
    fn test_combine_takes_max_and_or() {
        let a = known(false, &[(1, 3), (2, 5)]);
        let b = known(true, &[(1, 4), (3, 1)]);
        let c = a.combine(&b);

        assert!(c.header);
        assert_eq!(c.count(&session(1)), 4);
        assert_eq!(c.count(&session(2)), 5);
        assert_eq!(c.count(&session(3)), 1);
    }

    #[test]
    fn test_covers() {
        let small = known(true, &[(1, 2)]);
        let big = known(true, &[(1, 3), (2, 1)]);
        assert!(big.covers(&small));
        assert!(!small.covers(&big));
        assert!(small.is_covered_by(&big));
        assert!(!known(false, &[]).covers(&known(true, &[])));
    }

    proptest! {
        #[test]
        fn combine_is_commutative(a in known_strategy(), b in known_strategy()) {
            prop_assert_eq!(a.combine(&b), b.combine(&a));
        }

        #[test]
        fn combine_is_associative(
            a in known_strategy(),
            b in known_strategy(),
            c in known_strategy(),
        ) {
            prop_assert_eq!(a.combine(&b).combine(&c), a.combine(&b.combine(&c)));
        }

        #[test]
        fn combine_is_idempotent(a in known_strategy(), b in known_strategy()) {
            let once = a.combine(&b);
            prop_assert_eq!(once.combine(&b), once.clone());
            prop_assert_eq!(a.combine(&a), a.clone());
        }

        #[test]
        fn combine_covers_both(a in known_strategy(), b in known_strategy()) {
            let joined = a.combine(&b);
            prop_assert!(joined.covers(&a));
            prop_assert!(joined.covers(&b));
        }
    }
}
