//! In-memory implementation of the Storage trait.
//!
//! Same semantics as SQLite with no persistence. Used by tests and by
//! nodes that do not need to survive a restart.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use covalent_core::{CoValueContent, CoValueId, KnownState};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::traits::{plan_write, Storage, StoreOutcome, StoredCoValue};

/// In-memory storage. Thread-safe via RwLock.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<HashMap<CoValueId, StoredCoValue>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored CoValues.
    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget a CoValue entirely.
    pub fn remove(&self, id: &CoValueId) -> Result<Option<StoredCoValue>> {
        Ok(self.write()?.remove(id))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<CoValueId, StoredCoValue>>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<CoValueId, StoredCoValue>>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, id: &CoValueId) -> Result<Option<StoredCoValue>> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn store(&self, id: &CoValueId, pieces: &[CoValueContent]) -> Result<StoreOutcome> {
        let mut inner = self.write()?;

        let held = inner
            .get(id)
            .map(|stored| stored.known_state(*id))
            .unwrap_or_else(|| KnownState::empty(*id));
        let plan = match plan_write(id, &held, pieces)? {
            Ok(plan) => plan,
            Err(known) => {
                debug!(covalue = %id, "store rejected content with a gap");
                return Ok(StoreOutcome::Gap { known });
            }
        };

        if let Some(header) = plan.header {
            inner.insert(*id, StoredCoValue::new(header));
        }
        let stored = inner
            .get_mut(id)
            .ok_or_else(|| StoreError::InvalidData(format!("no header stored for {id}")))?;
        for append in plan.appends {
            let session = stored.sessions.entry(append.session).or_default();
            session.transactions.extend(append.transactions);
            session.signatures.insert(append.end, append.signature);
        }
        Ok(StoreOutcome::Stored)
    }

    async fn list(&self) -> Result<Vec<CoValueId>> {
        let mut ids: Vec<CoValueId> = self.read()?.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::test_support::sample_core;
    use crate::StorageExt;

    #[tokio::test]
    async fn test_store_and_get() {
        let storage = MemoryStorage::new();
        let core = sample_core(2, 3);
        let pieces = core.new_content_since(None, 64);

        let outcome = storage.store(&core.id(), &pieces).await.unwrap();
        assert_eq!(outcome, StoreOutcome::Stored);

        let stored = storage.get(&core.id()).await.unwrap().unwrap();
        assert_eq!(&stored.header, core.header());
        assert_eq!(stored.known_state(core.id()), core.known_state());
        assert_eq!(storage.list().await.unwrap(), vec![core.id()]);
    }

    #[tokio::test]
    async fn test_idempotent_store() {
        let storage = MemoryStorage::new();
        let core = sample_core(1, 4);
        let pieces = core.new_content_since(None, 64);

        storage.store(&core.id(), &pieces).await.unwrap();
        storage.store(&core.id(), &pieces).await.unwrap();

        let stored = storage.get(&core.id()).await.unwrap().unwrap();
        assert_eq!(stored.known_state(core.id()), core.known_state());
    }

    #[tokio::test]
    async fn test_gap_leaves_storage_untouched() {
        let storage = MemoryStorage::new();
        let core = sample_core(1, 4);
        let pieces = core.new_content_since(None, 1);
        assert!(pieces.len() >= 3);

        storage.store(&core.id(), &pieces[..1]).await.unwrap();
        let before = storage.known_state(&core.id()).await.unwrap().unwrap();

        let outcome = storage.store(&core.id(), &pieces[2..]).await.unwrap();
        assert_eq!(
            outcome,
            StoreOutcome::Gap {
                known: before.clone()
            }
        );
        assert_eq!(storage.known_state(&core.id()).await.unwrap(), Some(before));

        storage.store(&core.id(), &pieces[1..]).await.unwrap();
        assert_eq!(
            storage.known_state(&core.id()).await.unwrap(),
            Some(core.known_state())
        );
    }

    #[tokio::test]
    async fn test_content_before_header_is_a_gap() {
        let storage = MemoryStorage::new();
        let core = sample_core(1, 2);
        let mut pieces = core.new_content_since(None, 1);
        pieces[0].header = None;

        let outcome = storage.store(&core.id(), &pieces).await.unwrap();
        assert_eq!(
            outcome,
            StoreOutcome::Gap {
                known: KnownState::empty(core.id())
            }
        );
        assert!(storage.is_empty());
    }
}
