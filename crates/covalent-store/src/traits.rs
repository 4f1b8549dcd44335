//! Storage trait: the abstract interface for CoValue persistence.
//!
//! A storage backend is not a peer. It only holds what the local replica
//! has already verified, so it trusts signatures and checks only that each
//! piece continues what it holds.

use std::collections::BTreeMap;

use async_trait::async_trait;
use covalent_core::{
    CoValueContent, CoValueHeader, CoValueId, KnownState, SessionId, SessionNewContent, Signature,
    Transaction,
};

use crate::error::{Result, StoreError};

/// Transactions of one session plus the signatures kept at checkpoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredSession {
    pub transactions: Vec<Transaction>,
    /// Signature over the session hash after `key` transactions.
    pub signatures: BTreeMap<u32, Signature>,
}

impl StoredSession {
    pub fn len(&self) -> u32 {
        self.transactions.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Everything stored for one CoValue.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCoValue {
    pub header: CoValueHeader,
    pub sessions: BTreeMap<SessionId, StoredSession>,
}

impl StoredCoValue {
    pub fn new(header: CoValueHeader) -> Self {
        Self {
            header,
            sessions: BTreeMap::new(),
        }
    }

    pub fn known_state(&self, id: CoValueId) -> KnownState {
        let mut known = KnownState::header_only(id);
        for (session, stored) in &self.sessions {
            known.set(session.clone(), stored.len());
        }
        known
    }

    /// Content pieces that rebuild this CoValue: a header piece, then one
    /// piece per signature checkpoint.
    pub fn pieces(&self, id: CoValueId) -> Vec<CoValueContent> {
        let priority = self.header.priority();
        let mut first = CoValueContent::new(id, priority);
        first.header = Some(self.header.clone());
        let mut pieces = vec![first];

        for (session, stored) in &self.sessions {
            let mut start = 0u32;
            for (&end, signature) in &stored.signatures {
                if end <= start || end > stored.len() {
                    continue;
                }
                let mut piece = CoValueContent::new(id, priority);
                piece.new.insert(
                    session.clone(),
                    SessionNewContent {
                        after: start,
                        new_transactions: stored.transactions[start as usize..end as usize]
                            .to_vec(),
                        last_signature: signature.clone(),
                    },
                );
                pieces.push(piece);
                start = end;
            }
        }
        pieces
    }
}

/// Result of storing content pieces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Every piece was stored, or was already held.
    Stored,
    /// A piece did not continue the stored data; nothing was written.
    /// `known` is what the store holds.
    Gap { known: KnownState },
}

/// The Storage trait: async interface for CoValue persistence.
///
/// `store` is all-or-nothing per call. A piece whose session content starts
/// beyond what is stored, or that arrives before the header, turns the whole
/// call into [`StoreOutcome::Gap`].
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, id: &CoValueId) -> Result<Option<StoredCoValue>>;

    async fn store(&self, id: &CoValueId, pieces: &[CoValueContent]) -> Result<StoreOutcome>;

    /// Ids of every stored CoValue.
    async fn list(&self) -> Result<Vec<CoValueId>>;
}

/// Extension trait for common storage patterns.
pub trait StorageExt: Storage {
    /// Known state of a stored CoValue, if any.
    fn known_state(
        &self,
        id: &CoValueId,
    ) -> impl std::future::Future<Output = Result<Option<KnownState>>> + Send;
}

impl<S: Storage + ?Sized> StorageExt for S {
    async fn known_state(&self, id: &CoValueId) -> Result<Option<KnownState>> {
        Ok(self.get(id).await?.map(|stored| stored.known_state(*id)))
    }
}

/// New transactions of one session that extend stored data.
#[derive(Debug, Clone)]
pub(crate) struct SessionAppend {
    pub session: SessionId,
    pub start: u32,
    pub transactions: Vec<Transaction>,
    pub end: u32,
    pub signature: Signature,
}

/// What a `store` call writes once it is known to apply cleanly.
#[derive(Debug, Default)]
pub(crate) struct WritePlan {
    pub header: Option<CoValueHeader>,
    pub appends: Vec<SessionAppend>,
}

/// Work out what to write, or the held known state if a piece leaves a gap.
pub(crate) fn plan_write(
    id: &CoValueId,
    held: &KnownState,
    pieces: &[CoValueContent],
) -> Result<std::result::Result<WritePlan, KnownState>> {
    let mut known = held.clone();
    let mut plan = WritePlan::default();

    for piece in pieces {
        if piece.id != *id {
            return Err(StoreError::InvalidData(format!(
                "piece for {} stored under {id}",
                piece.id
            )));
        }
        if let Some(header) = &piece.header {
            if !known.header {
                plan.header = Some(header.clone());
                known.header = true;
            }
        }
        if !known.header {
            return Ok(Err(held.clone()));
        }

        for (session, content) in &piece.new {
            let have = known.count(session);
            if content.after > have {
                return Ok(Err(held.clone()));
            }
            if content.end() <= have {
                continue;
            }
            let skip = (have - content.after) as usize;
            plan.appends.push(SessionAppend {
                session: session.clone(),
                start: have,
                transactions: content.new_transactions[skip..].to_vec(),
                end: content.end(),
                signature: content.last_signature.clone(),
            });
            known.set(session.clone(), content.end());
        }
    }
    Ok(Ok(plan))
}

#[cfg(test)]
pub(crate) mod test_support {
    use covalent_core::{
        content_types, AgentSecret, CoValueCore, CoValueHeader, DalekCrypto, Ruleset, SessionId,
        Transaction,
    };
    use serde_json::json;

    /// A CoValue with `per_session` transactions in each of `sessions` sessions.
    pub fn sample_core(sessions: u8, per_session: u64) -> CoValueCore {
        let crypto = DalekCrypto;
        let header = CoValueHeader::new(content_types::COSTREAM, Ruleset::UnsafeAllowAll)
            .with_uniqueness("store-test");
        let mut core = CoValueCore::new(&crypto, header);
        for n in 1..=sessions {
            let agent = AgentSecret::from_seed(&[n; 32]);
            let session = SessionId::new(None, agent.agent_id(), n as u64);
            for i in 0..per_session {
                let tx = Transaction::trusting(i, &[json!({ "n": n, "i": i })]);
                core.append_local_transaction(&crypto, &agent, &session, tx)
                    .unwrap();
            }
        }
        core
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::sample_core;
    use super::*;
    use covalent_core::{CoValueCore, DalekCrypto};

    #[test]
    fn test_plan_skips_held_transactions() {
        let core = sample_core(1, 3);
        let pieces = core.new_content_since(None, 1 << 20);
        let held = KnownState::empty(core.id());

        let plan = plan_write(&core.id(), &held, &pieces).unwrap().unwrap();
        assert!(plan.header.is_some());
        assert_eq!(plan.appends.len(), 1);
        assert_eq!(plan.appends[0].transactions.len(), 3);

        let mut partial = core.known_state();
        partial.set(plan.appends[0].session.clone(), 2);
        let plan = plan_write(&core.id(), &partial, &pieces).unwrap().unwrap();
        assert!(plan.header.is_none());
        assert_eq!(plan.appends[0].start, 2);
        assert_eq!(plan.appends[0].transactions.len(), 1);
    }

    #[test]
    fn test_plan_reports_gap_without_header() {
        let core = sample_core(1, 2);
        let mut pieces = core.new_content_since(None, 1 << 20);
        pieces[0].header = None;
        let held = KnownState::empty(core.id());

        let outcome = plan_write(&core.id(), &held, &pieces).unwrap();
        assert_eq!(outcome.unwrap_err(), held);
    }

    #[test]
    fn test_pieces_rebuild_the_core() {
        let crypto = DalekCrypto;
        let core = sample_core(2, 3);
        let mut stored = StoredCoValue::new(core.header().clone());
        for log in core.sessions() {
            let entry = stored.sessions.entry(log.session().clone()).or_default();
            entry.transactions = log.transactions().to_vec();
            entry.signatures = log.checkpoints().map(|(i, s)| (i + 1, *s)).collect();
        }

        let pieces = stored.pieces(core.id());
        let mut rebuilt = CoValueCore::from_content(&crypto, &pieces[0]).unwrap();
        for piece in &pieces[1..] {
            let outcome = rebuilt.merge_content(&crypto, piece);
            assert!(outcome.gaps.is_empty() && outcome.rejected.is_empty());
        }
        assert_eq!(rebuilt.known_state(), core.known_state());
        assert_eq!(stored.known_state(core.id()), core.known_state());
    }
}
