//! SQLite implementation of the Storage trait.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`. Headers and transactions are stored as
//! JSON text, ids in their textual form.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use covalent_core::{
    CoValueContent, CoValueHeader, CoValueId, KnownState, SessionId, Signature, Transaction,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{plan_write, Storage, StoreOutcome, StoredCoValue, StoredSession};

/// SQLite-based storage.
///
/// Thread-safe via an internal Mutex; every call runs on the blocking pool.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open a database at `path`, creating and migrating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn parse<T>(text: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    text.parse()
        .map_err(|e: T::Err| StoreError::InvalidData(format!("{text}: {e}")))
}

fn read_known(conn: &Connection, id: &CoValueId) -> Result<KnownState> {
    let has_header = conn
        .query_row(
            "SELECT 1 FROM covalues WHERE id = ?1",
            params![id.to_string()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    let mut known = KnownState::empty(*id);
    known.header = has_header;

    let mut stmt = conn.prepare(
        "SELECT session, COUNT(*) FROM transactions WHERE covalue = ?1 GROUP BY session",
    )?;
    let counts = stmt
        .query_map(params![id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (session, count) in counts {
        known.set(parse(&session)?, count);
    }
    Ok(known)
}

fn read_covalue(conn: &Connection, id: &CoValueId) -> Result<Option<StoredCoValue>> {
    let header: Option<String> = conn
        .query_row(
            "SELECT header FROM covalues WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let Some(header) = header else {
        return Ok(None);
    };
    let header: CoValueHeader = serde_json::from_str(&header)?;
    let mut stored = StoredCoValue::new(header);

    let mut stmt = conn.prepare(
        "SELECT session, idx, tx FROM transactions WHERE covalue = ?1 ORDER BY session, idx",
    )?;
    let rows = stmt
        .query_map(params![id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (session, idx, tx) in rows {
        let session: SessionId = parse(&session)?;
        let entry = stored.sessions.entry(session).or_default();
        if idx != entry.len() {
            return Err(StoreError::InvalidData(format!(
                "transaction {idx} of {id} stored out of sequence"
            )));
        }
        let tx: Transaction = serde_json::from_str(&tx)?;
        entry.transactions.push(tx);
    }

    let mut stmt = conn.prepare(
        "SELECT session, end_count, signature FROM signatures WHERE covalue = ?1",
    )?;
    let rows = stmt
        .query_map(params![id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (session, end, signature) in rows {
        let session: SessionId = parse(&session)?;
        let signature: Signature = parse(&signature)?;
        stored
            .sessions
            .entry(session)
            .or_insert_with(StoredSession::default)
            .signatures
            .insert(end, signature);
    }

    Ok(Some(stored))
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get(&self, id: &CoValueId) -> Result<Option<StoredCoValue>> {
        let id = *id;
        self.blocking(move |conn| read_covalue(conn, &id)).await
    }

    async fn store(&self, id: &CoValueId, pieces: &[CoValueContent]) -> Result<StoreOutcome> {
        let id = *id;
        let pieces = pieces.to_vec();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let held = read_known(&tx, &id)?;
            let plan = match plan_write(&id, &held, &pieces)? {
                Ok(plan) => plan,
                Err(known) => {
                    debug!(covalue = %id, "store rejected content with a gap");
                    return Ok(StoreOutcome::Gap { known });
                }
            };

            let key = id.to_string();
            if let Some(header) = &plan.header {
                tx.execute(
                    "INSERT INTO covalues (id, header, stored_at) VALUES (?1, ?2, ?3)",
                    params![key, serde_json::to_string(header)?, now_millis()],
                )?;
            }
            for append in &plan.appends {
                let session = append.session.to_string();
                for (offset, transaction) in append.transactions.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO transactions (covalue, session, idx, tx) VALUES (?1, ?2, ?3, ?4)",
                        params![
                            key,
                            session,
                            append.start + offset as u32,
                            serde_json::to_string(transaction)?
                        ],
                    )?;
                }
                tx.execute(
                    "INSERT OR REPLACE INTO signatures (covalue, session, end_count, signature)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![key, session, append.end, append.signature.to_string()],
                )?;
            }

            tx.commit()?;
            Ok(StoreOutcome::Stored)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<CoValueId>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM covalues ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids.iter().map(|id| parse(id)).collect()
        })
        .await
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::test_support::sample_core;
    use crate::StorageExt;
    use covalent_core::{CoValueCore, DalekCrypto};

    #[tokio::test]
    async fn test_store_and_get() {
        let storage = SqliteStorage::open_memory().unwrap();
        let core = sample_core(2, 3);
        let pieces = core.new_content_since(None, 64);

        let outcome = storage.store(&core.id(), &pieces).await.unwrap();
        assert_eq!(outcome, StoreOutcome::Stored);

        let stored = storage.get(&core.id()).await.unwrap().unwrap();
        assert_eq!(&stored.header, core.header());
        assert_eq!(stored.known_state(core.id()), core.known_state());
        assert_eq!(storage.list().await.unwrap(), vec![core.id()]);
        assert!(storage
            .get(&CoValueId::from_bytes([0; 32]))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_gap_rolls_back() {
        let storage = SqliteStorage::open_memory().unwrap();
        let core = sample_core(1, 4);
        let pieces = core.new_content_since(None, 1);

        storage.store(&core.id(), &pieces[..1]).await.unwrap();
        let before = storage.known_state(&core.id()).await.unwrap().unwrap();

        // The second piece applies, the fourth leaves a gap: neither is kept
        let mixed = vec![pieces[1].clone(), pieces[3].clone()];
        let outcome = storage.store(&core.id(), &mixed).await.unwrap();
        assert_eq!(
            outcome,
            StoreOutcome::Gap {
                known: before.clone()
            }
        );
        assert_eq!(storage.known_state(&core.id()).await.unwrap(), Some(before));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("covalent.db");
        let core = sample_core(2, 2);

        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage
                .store(&core.id(), &core.new_content_since(None, 1))
                .await
                .unwrap();
        }

        let storage = SqliteStorage::open(&path).unwrap();
        let stored = storage.get(&core.id()).await.unwrap().unwrap();

        let crypto = DalekCrypto;
        let pieces = stored.pieces(core.id());
        let mut rebuilt = CoValueCore::from_content(&crypto, &pieces[0]).unwrap();
        for piece in &pieces[1..] {
            let outcome = rebuilt.merge_content(&crypto, piece);
            assert!(outcome.rejected.is_empty() && outcome.gaps.is_empty());
        }
        assert_eq!(rebuilt.known_state(), core.known_state());
    }
}
