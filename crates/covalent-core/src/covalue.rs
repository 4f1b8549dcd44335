//! The transaction log of one CoValue and its validity cache.
//!
//! `CoValueCore` holds the header and every session log, verifies signatures
//! on merge, and caches a verdict per transaction. Verdicts come from a
//! [`TransactionValidator`] supplied by the caller, so the permission rules
//! live outside this crate.
//!
//! Transactions are validated in log-merge order `(madeAt, session, index)`.
//! A cursor remembers the last validated position; new transactions sorting
//! after it are validated incrementally. One that sorts before it, or a
//! validator that needs a full replay, throws the cache away.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::content::{CoValueContent, SessionNewContent};
use crate::crypto::AgentSecret;
use crate::error::{CoreError, Result};
use crate::header::CoValueHeader;
use crate::ids::{CoValueId, SessionId, TransactionId};
use crate::known::KnownState;
use crate::provider::CryptoProvider;
use crate::session::SessionLog;
use crate::transaction::Transaction;

/// Position of a transaction in log-merge order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    pub made_at: u64,
    pub session: SessionId,
    pub tx_index: u32,
}

/// Verdict for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid(String),
}

impl Validity {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Validity::Invalid(reason.into())
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Validity::Valid)
    }
}

/// A transaction together with its position.
#[derive(Debug, Clone, Copy)]
pub struct TxRef<'a> {
    pub session: &'a SessionId,
    pub tx_index: u32,
    pub tx: &'a Transaction,
}

impl TxRef<'_> {
    pub fn id(&self) -> TransactionId {
        TransactionId::new(self.session.clone(), self.tx_index)
    }

    pub fn made_at(&self) -> u64 {
        self.tx.made_at()
    }
}

/// Decides transaction validity in log-merge order.
pub trait TransactionValidator {
    /// Whether every new transaction forces a replay from the start of the log.
    fn replays_from_start(&self) -> bool {
        false
    }

    fn validate(&mut self, tx: TxRef<'_>) -> Validity;
}

/// Outcome of merging a content piece.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Transactions that were new to us.
    pub accepted: usize,
    /// Sessions whose content started beyond what we hold.
    pub gaps: Vec<SessionId>,
    /// Sessions whose content was refused, with the reason.
    pub rejected: Vec<(SessionId, String)>,
}

#[derive(Debug, Clone, Default)]
struct ValidityCache {
    verdicts: BTreeMap<SortKey, Validity>,
    pending: BTreeSet<SortKey>,
    full_revalidations: u64,
}

impl ValidityCache {
    fn high_water(&self) -> Option<&SortKey> {
        self.verdicts.keys().next_back()
    }

    fn insert(&mut self, key: SortKey) {
        if self.high_water().is_some_and(|hw| key < *hw) {
            self.reset();
        }
        self.pending.insert(key);
    }

    fn reset(&mut self) {
        if self.verdicts.is_empty() {
            return;
        }
        let verdicts = std::mem::take(&mut self.verdicts);
        self.pending.extend(verdicts.into_keys());
        self.full_revalidations += 1;
    }
}

#[derive(Debug, Clone)]
pub struct CoValueCore {
    id: CoValueId,
    header: CoValueHeader,
    sessions: BTreeMap<SessionId, SessionLog>,
    validity: ValidityCache,
    version: u64,
}

impl CoValueCore {
    pub fn new(crypto: &dyn CryptoProvider, header: CoValueHeader) -> Self {
        Self {
            id: header.id(crypto),
            header,
            sessions: BTreeMap::new(),
            validity: ValidityCache::default(),
            version: 0,
        }
    }

    /// Start a core from a content piece that carries the header.
    pub fn from_content(crypto: &dyn CryptoProvider, content: &CoValueContent) -> Result<Self> {
        let header = content
            .header
            .clone()
            .ok_or(CoreError::MissingHeader(content.id))?;
        let core = Self::new(crypto, header);
        if core.id != content.id {
            return Err(CoreError::HeaderMismatch {
                expected: content.id,
                actual: core.id,
            });
        }
        Ok(core)
    }

    pub fn id(&self) -> CoValueId {
        self.id
    }

    pub fn header(&self) -> &CoValueHeader {
        &self.header
    }

    /// Bumped whenever transactions or verdicts change.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionLog> {
        self.sessions.values()
    }

    pub fn session(&self, session: &SessionId) -> Option<&SessionLog> {
        self.sessions.get(session)
    }

    pub fn known_state(&self) -> KnownState {
        let mut known = KnownState::header_only(self.id);
        for (session, log) in &self.sessions {
            known.set(session.clone(), log.len());
        }
        known
    }

    pub fn transaction(&self, session: &SessionId, index: u32) -> Option<&Transaction> {
        self.sessions.get(session)?.get(index)
    }

    fn sort_key(session: &SessionId, index: u32, tx: &Transaction) -> SortKey {
        SortKey {
            made_at: tx.made_at(),
            session: session.clone(),
            tx_index: index,
        }
    }

    /// Append a transaction made on this device and sign it.
    pub fn append_local_transaction(
        &mut self,
        crypto: &dyn CryptoProvider,
        agent: &AgentSecret,
        session: &SessionId,
        tx: Transaction,
    ) -> Result<TransactionId> {
        if session.agent != agent.agent_id() {
            return Err(CoreError::InvalidPublicKey);
        }
        let id = self.id;
        let log = self
            .sessions
            .entry(session.clone())
            .or_insert_with(|| SessionLog::new(crypto, &id, session.clone()));
        let index = log.len();
        let key = Self::sort_key(session, index, &tx);
        log.append_signed(crypto, &agent.signer, tx);

        self.validity.insert(key);
        self.version += 1;
        Ok(TransactionId::new(session.clone(), index))
    }

    /// Merge remote transactions of one session. Returns how many were new.
    pub fn merge_remote_transactions(
        &mut self,
        crypto: &dyn CryptoProvider,
        session: &SessionId,
        after: u32,
        txs: &[Transaction],
        signature: &crate::crypto::Signature,
    ) -> Result<usize> {
        let id = self.id;
        let created = !self.sessions.contains_key(session);
        let log = self
            .sessions
            .entry(session.clone())
            .or_insert_with(|| SessionLog::new(crypto, &id, session.clone()));
        let start = log.len();

        let accepted = match log.try_append(crypto, after, txs, signature) {
            Ok(n) => n,
            Err(e) => {
                if created {
                    self.sessions.remove(session);
                }
                return Err(e);
            }
        };

        if created && log.is_empty() {
            self.sessions.remove(session);
            return Ok(0);
        }
        if accepted > 0 {
            let keys: Vec<SortKey> = (start..start + accepted as u32)
                .filter_map(|i| log.get(i).map(|tx| Self::sort_key(session, i, tx)))
                .collect();
            for key in keys {
                self.validity.insert(key);
            }
            self.version += 1;
        }
        Ok(accepted)
    }

    /// Merge every session of a content piece, collecting per-session outcomes.
    pub fn merge_content(
        &mut self,
        crypto: &dyn CryptoProvider,
        content: &CoValueContent,
    ) -> MergeOutcome {
        let mut report = MergeOutcome::default();
        for (session, new) in &content.new {
            match self.merge_remote_transactions(
                crypto,
                session,
                new.after,
                &new.new_transactions,
                &new.last_signature,
            ) {
                Ok(n) => report.accepted += n,
                Err(CoreError::Gap { have, after, .. }) => {
                    debug!(id = %self.id, %session, have, after, "gap in incoming content");
                    report.gaps.push(session.clone());
                }
                Err(e) => {
                    warn!(id = %self.id, %session, error = %e, "rejected session content");
                    report.rejected.push((session.clone(), e.to_string()));
                }
            }
        }
        report
    }

    /// Run pending transactions through `validator`.
    pub fn validate(&mut self, validator: &mut dyn TransactionValidator) {
        if self.validity.pending.is_empty() {
            return;
        }
        if validator.replays_from_start() {
            self.validity.reset();
        }

        let pending = std::mem::take(&mut self.validity.pending);
        for key in pending {
            let Some(tx) = self.transaction(&key.session, key.tx_index) else {
                continue;
            };
            let verdict = validator.validate(TxRef {
                session: &key.session,
                tx_index: key.tx_index,
                tx,
            });
            if let Validity::Invalid(reason) = &verdict {
                debug!(id = %self.id, session = %key.session, index = key.tx_index, %reason, "invalid transaction");
            }
            self.validity.verdicts.insert(key, verdict);
        }
        self.version += 1;
    }

    /// Drop every verdict, e.g. after the owning group changed.
    pub fn invalidate_validity(&mut self) {
        if !self.validity.verdicts.is_empty() {
            self.validity.reset();
            self.version += 1;
        }
    }

    pub fn has_pending_validation(&self) -> bool {
        !self.validity.pending.is_empty()
    }

    /// Number of transactions with a cached verdict.
    pub fn validated_count(&self) -> usize {
        self.validity.verdicts.len()
    }

    /// How many times the cache was thrown away and rebuilt.
    pub fn full_revalidations(&self) -> u64 {
        self.validity.full_revalidations
    }

    pub fn validity_of(&self, id: &TransactionId) -> Option<&Validity> {
        let tx = self.transaction(&id.session, id.tx_index)?;
        self.validity
            .verdicts
            .get(&Self::sort_key(&id.session, id.tx_index, tx))
    }

    /// Invalid transactions with their reasons.
    pub fn invalid_transactions(&self) -> Vec<(TransactionId, String)> {
        self.validity
            .verdicts
            .iter()
            .filter_map(|(key, verdict)| match verdict {
                Validity::Invalid(reason) => Some((
                    TransactionId::new(key.session.clone(), key.tx_index),
                    reason.clone(),
                )),
                Validity::Valid => None,
            })
            .collect()
    }

    /// Every transaction in log-merge order, regardless of validity.
    pub fn sorted_transactions(&self) -> Vec<TxRef<'_>> {
        let mut all: Vec<(SortKey, TxRef<'_>)> = self
            .sessions
            .iter()
            .flat_map(|(session, log)| {
                log.transactions()
                    .iter()
                    .enumerate()
                    .map(move |(i, tx)| {
                        (
                            Self::sort_key(session, i as u32, tx),
                            TxRef {
                                session,
                                tx_index: i as u32,
                                tx,
                            },
                        )
                    })
            })
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all.into_iter().map(|(_, tx)| tx).collect()
    }

    /// Valid transactions in log-merge order, skipping those covered by `since`.
    ///
    /// Transactions without a verdict yet are left out.
    pub fn valid_sorted_transactions(&self, since: Option<&KnownState>) -> Vec<TxRef<'_>> {
        self.validity
            .verdicts
            .iter()
            .filter(|(_, verdict)| verdict.is_valid())
            .filter(|(key, _)| since.map_or(true, |k| key.tx_index >= k.count(&key.session)))
            .filter_map(|(key, _)| {
                let (session, log) = self.sessions.get_key_value(&key.session)?;
                Some(TxRef {
                    session,
                    tx_index: key.tx_index,
                    tx: log.get(key.tx_index)?,
                })
            })
            .collect()
    }

    /// Content this core holds beyond `known`, split into pieces of about
    /// `max_piece_bytes` of transactions each.
    pub fn new_content_since(
        &self,
        known: Option<&KnownState>,
        max_piece_bytes: usize,
    ) -> Vec<CoValueContent> {
        let priority = self.header.priority();
        let mut pieces = Vec::new();
        let mut current = CoValueContent::new(self.id, priority);
        let mut current_size = 0usize;

        if !known.is_some_and(|k| k.header) {
            current.header = Some(self.header.clone());
        }

        for (session, log) in &self.sessions {
            let from = known.map_or(0, |k| k.count(session));
            for chunk in log.chunks_since(from, max_piece_bytes) {
                let size: usize = chunk.transactions.iter().map(|t| t.encoded_size()).sum();
                let full = current_size > 0 && current_size + size > max_piece_bytes;
                if full || current.new.contains_key(session) {
                    pieces.push(std::mem::replace(
                        &mut current,
                        CoValueContent::new(self.id, priority),
                    ));
                    current_size = 0;
                }
                current.new.insert(
                    session.clone(),
                    SessionNewContent {
                        after: chunk.after,
                        new_transactions: chunk.transactions,
                        last_signature: chunk.signature,
                    },
                );
                current_size += size;
            }
        }

        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }
}
