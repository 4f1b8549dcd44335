//! Storage that loses writes on demand.
//!
//! Simulates a device that crashed before flushing: while dropping, every
//! write reports success and nothing is kept.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use covalent_core::{CoValueContent, CoValueId};
use covalent_store::{MemoryStorage, Result, Storage, StoreOutcome, StoredCoValue};

#[derive(Debug, Default)]
pub struct DroppingStorage {
    inner: MemoryStorage,
    dropping: AtomicBool,
    dropped: AtomicUsize,
}

impl DroppingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or stop discarding writes.
    pub fn set_dropping(&self, dropping: bool) {
        self.dropping.store(dropping, Ordering::SeqCst);
    }

    /// Number of writes discarded so far.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }
}

#[async_trait]
impl Storage for DroppingStorage {
    async fn get(&self, id: &CoValueId) -> Result<Option<StoredCoValue>> {
        self.inner.get(id).await
    }

    async fn store(&self, id: &CoValueId, pieces: &[CoValueContent]) -> Result<StoreOutcome> {
        if self.dropping.load(Ordering::SeqCst) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            return Ok(StoreOutcome::Stored);
        }
        self.inner.store(id, pieces).await
    }

    async fn list(&self) -> Result<Vec<CoValueId>> {
        self.inner.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covalent_core::{content_types, CoValueHeader, DalekCrypto, Priority, Ruleset};

    #[tokio::test]
    async fn test_drops_only_while_dropping() {
        let storage = DroppingStorage::new();
        let header = CoValueHeader::new(content_types::COMAP, Ruleset::UnsafeAllowAll);
        let id = header.id(&DalekCrypto);
        let mut piece = CoValueContent::new(id, Priority::Medium);
        piece.header = Some(header);

        storage.set_dropping(true);
        storage.store(&id, &[piece.clone()]).await.unwrap();
        assert_eq!(storage.dropped(), 1);
        assert!(storage.get(&id).await.unwrap().is_none());

        storage.set_dropping(false);
        storage.store(&id, &[piece]).await.unwrap();
        assert!(storage.get(&id).await.unwrap().is_some());
    }
}
