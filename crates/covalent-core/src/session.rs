//! Session logs: one writer's append-only transaction sequence within a CoValue.
//!
//! Every transaction extends a running hash seeded from the CoValue id and
//! the session id. Signatures cover the running hash, so a transaction can
//! neither be reordered inside the session nor replayed into another CoValue.
//! Signatures are kept at checkpoints: after every local append and at the
//! end of every merged remote chunk. Content can only be re-served in chunks
//! that end on a checkpoint.

use std::collections::BTreeMap;

use crate::canonical::transaction_bytes;
use crate::crypto::{Blake3Hash, Signature, SignerSecret};
use crate::error::{CoreError, Result};
use crate::ids::{CoValueId, SessionId};
use crate::provider::CryptoProvider;
use crate::transaction::Transaction;

/// A chunk of a session ready to be shipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChunk {
    pub after: u32,
    pub transactions: Vec<Transaction>,
    pub signature: Signature,
}

#[derive(Debug, Clone)]
pub struct SessionLog {
    session: SessionId,
    transactions: Vec<Transaction>,
    encoded_sizes: Vec<usize>,
    last_hash: Blake3Hash,
    /// Signature over the running hash after transaction `index`.
    signature_after: BTreeMap<u32, Signature>,
}

impl SessionLog {
    pub fn new(crypto: &dyn CryptoProvider, covalue: &CoValueId, session: SessionId) -> Self {
        let mut seed = b"covalent-v0 session:".to_vec();
        seed.extend_from_slice(covalue.as_bytes());
        seed.extend_from_slice(session.to_string().as_bytes());
        Self {
            last_hash: crypto.hash(&seed),
            session,
            transactions: Vec::new(),
            encoded_sizes: Vec::new(),
            signature_after: BTreeMap::new(),
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn len(&self) -> u32 {
        self.transactions.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn get(&self, index: u32) -> Option<&Transaction> {
        self.transactions.get(index as usize)
    }

    pub fn last_hash(&self) -> &Blake3Hash {
        &self.last_hash
    }

    pub fn last_signature(&self) -> Option<&Signature> {
        self.signature_after.values().next_back()
    }

    /// Signature checkpoints as `(index of last covered transaction, signature)`.
    pub fn checkpoints(&self) -> impl Iterator<Item = (u32, &Signature)> {
        self.signature_after.iter().map(|(i, s)| (*i, s))
    }

    /// Append a locally made transaction and sign the new chain head.
    pub fn append_signed(
        &mut self,
        crypto: &dyn CryptoProvider,
        secret: &SignerSecret,
        tx: Transaction,
    ) -> Signature {
        let encoded = transaction_bytes(&tx);
        let hash = crypto.chain_hash(&self.last_hash, &encoded);
        let signature = crypto.sign(secret, hash.as_bytes());
        self.push(tx, encoded.len(), hash);
        self.signature_after.insert(self.len() - 1, signature);
        signature
    }

    /// Append remote transactions that continue after `after`.
    ///
    /// Transactions we already hold are checked for equality and skipped.
    /// Nothing is appended unless `signature` verifies over the new chain
    /// head with the session agent's signing key. Returns how many
    /// transactions were new.
    pub fn try_append(
        &mut self,
        crypto: &dyn CryptoProvider,
        after: u32,
        txs: &[Transaction],
        signature: &Signature,
    ) -> Result<usize> {
        let have = self.len();
        if after > have {
            return Err(CoreError::Gap {
                session: self.session.clone(),
                have,
                after,
            });
        }

        // 1. Overlap must match what we hold
        let overlap = ((have - after) as usize).min(txs.len());
        for (offset, tx) in txs[..overlap].iter().enumerate() {
            let index = after + offset as u32;
            if self.get(index) != Some(tx) {
                return Err(CoreError::Fork {
                    session: self.session.clone(),
                    index,
                });
            }
        }

        let fresh = &txs[overlap..];
        if fresh.is_empty() {
            return Ok(0);
        }

        // 2. Extend the chain on a scratch copy
        let mut hash = self.last_hash;
        let mut encoded_sizes = Vec::with_capacity(fresh.len());
        for tx in fresh {
            let encoded = transaction_bytes(tx);
            hash = crypto.chain_hash(&hash, &encoded);
            encoded_sizes.push(encoded.len());
        }

        // 3. Verify the signature over the new head
        if !crypto.verify(&self.session.agent.signer, hash.as_bytes(), signature) {
            return Err(CoreError::InvalidSignature);
        }

        // 4. Commit
        for (tx, size) in fresh.iter().zip(encoded_sizes) {
            self.transactions.push(tx.clone());
            self.encoded_sizes.push(size);
        }
        self.last_hash = hash;
        self.signature_after.insert(self.len() - 1, *signature);
        Ok(fresh.len())
    }

    /// Split the transactions after `from` into chunks of roughly `max_bytes`,
    /// each ending on a signature checkpoint.
    pub fn chunks_since(&self, from: u32, max_bytes: usize) -> Vec<SessionChunk> {
        let mut chunks = Vec::new();
        let mut start = from;
        let mut size = 0usize;

        for index in from..self.len() {
            size += self.encoded_sizes[index as usize];
            let is_last = index + 1 == self.len();
            let checkpoint = self.signature_after.get(&index);
            if let Some(signature) = checkpoint {
                if size >= max_bytes || is_last {
                    chunks.push(SessionChunk {
                        after: start,
                        transactions: self.transactions[start as usize..=index as usize].to_vec(),
                        signature: *signature,
                    });
                    start = index + 1;
                    size = 0;
                }
            }
        }
        chunks
    }

    fn push(&mut self, tx: Transaction, encoded_size: usize, hash: Blake3Hash) {
        self.transactions.push(tx);
        self.encoded_sizes.push(encoded_size);
        self.last_hash = hash;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AgentSecret;
    use crate::provider::DalekCrypto;

    fn setup() -> (DalekCrypto, AgentSecret, SessionLog, SessionLog) {
        let crypto = DalekCrypto;
        let agent = AgentSecret::from_seed(&[0x42; 32]);
        let session = SessionId::new(None, agent.agent_id(), 1);
        let covalue = CoValueId::from_bytes([1; 32]);
        let local = SessionLog::new(&crypto, &covalue, session.clone());
        let remote = SessionLog::new(&crypto, &covalue, session);
        (crypto, agent, local, remote)
    }

    fn tx(n: u64) -> Transaction {
        Transaction::trusting(n, &[serde_json::json!({"op": "set", "key": "k", "value": n})])
    }

    #[test]
    fn test_remote_replica_verifies_local_appends() {
        let (crypto, agent, mut local, mut remote) = setup();
        local.append_signed(&crypto, &agent.signer, tx(1));
        let sig = local.append_signed(&crypto, &agent.signer, tx(2));

        let accepted = remote
            .try_append(&crypto, 0, &[tx(1), tx(2)], &sig)
            .unwrap();
        assert_eq!(accepted, 2);
        assert_eq!(remote.last_hash(), local.last_hash());
    }

    #[test]
    fn test_bad_signature_appends_nothing() {
        let (crypto, agent, mut local, mut remote) = setup();
        let sig = local.append_signed(&crypto, &agent.signer, tx(1));

        // Tampered transaction
        let result = remote.try_append(&crypto, 0, &[tx(99)], &sig);
        assert!(matches!(result, Err(CoreError::InvalidSignature)));
        assert!(remote.is_empty());

        // Signed by someone else
        let stranger = AgentSecret::from_seed(&[7; 32]);
        let forged = stranger.signer.sign(local.last_hash().as_bytes());
        assert!(remote.try_append(&crypto, 0, &[tx(1)], &forged).is_err());
        assert!(remote.is_empty());
    }

    #[test]
    fn test_gap_is_reported() {
        let (crypto, agent, mut local, mut remote) = setup();
        local.append_signed(&crypto, &agent.signer, tx(1));
        let sig = local.append_signed(&crypto, &agent.signer, tx(2));

        let result = remote.try_append(&crypto, 1, &[tx(2)], &sig);
        assert!(matches!(result, Err(CoreError::Gap { have: 0, after: 1, .. })));
    }

    #[test]
    fn test_overlap_is_skipped_and_fork_detected() {
        let (crypto, agent, mut local, mut remote) = setup();
        let first = local.append_signed(&crypto, &agent.signer, tx(1));
        remote.try_append(&crypto, 0, &[tx(1)], &first).unwrap();

        let second = local.append_signed(&crypto, &agent.signer, tx(2));
        assert_eq!(remote.try_append(&crypto, 0, &[tx(1), tx(2)], &second).unwrap(), 1);
        assert_eq!(remote.len(), 2);

        let result = remote.try_append(&crypto, 0, &[tx(5)], &second);
        assert!(matches!(result, Err(CoreError::Fork { index: 0, .. })));
    }

    #[test]
    fn test_replay_into_other_covalue_fails() {
        let (crypto, agent, mut local, _) = setup();
        let sig = local.append_signed(&crypto, &agent.signer, tx(1));

        let mut elsewhere = SessionLog::new(
            &crypto,
            &CoValueId::from_bytes([2; 32]),
            local.session().clone(),
        );
        assert!(elsewhere.try_append(&crypto, 0, &[tx(1)], &sig).is_err());
    }

    #[test]
    fn test_chunks_end_on_checkpoints() {
        let (crypto, agent, mut local, mut remote) = setup();
        for n in 0..10 {
            local.append_signed(&crypto, &agent.signer, tx(n));
        }

        let chunks = local.chunks_since(0, 1);
        assert_eq!(chunks.len(), 10);

        let whole = local.chunks_since(3, usize::MAX);
        assert_eq!(whole.len(), 1);
        assert_eq!(whole[0].after, 3);
        assert_eq!(whole[0].transactions.len(), 7);

        for chunk in chunks {
            remote
                .try_append(&crypto, chunk.after, &chunk.transactions, &chunk.signature)
                .unwrap();
        }
        assert_eq!(remote.len(), 10);
        assert!(local.chunks_since(10, 1).is_empty());
    }
}
