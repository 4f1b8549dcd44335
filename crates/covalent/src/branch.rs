//! Branches: a CoValue that starts from a snapshot of another one and
//! collects its own edits until they are merged back.

use std::collections::HashMap;

use covalent_core::{CoValueHeader, CoValueId, SessionId, TransactionId};
use covalent_crdt::rewrite_list_refs;
use covalent_store::Storage;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::{NodeError, Result};
use crate::node::Node;
use crate::registry::ContentKind;

impl<S: Storage> Node<S> {
    // ─────────────────────────────────────────────────────────────────────────
    // Branches
    // ─────────────────────────────────────────────────────────────────────────

    /// The branch `name` of `source` made by the local account, if we hold it.
    pub fn find_branch(&self, source: CoValueId, name: &str) -> Option<CoValueId> {
        let uniqueness = branch_uniqueness(&source, name, &self.account);
        self.covalue_ids().into_iter().find(|id| {
            self.header(id).is_some_and(|h| {
                h.uniqueness == uniqueness
                    && h.branch_of().is_some_and(|(s, n)| s == source && n == name)
            })
        })
    }

    /// Branch `source` at its current state. Creating the same branch
    /// twice returns the existing one.
    pub async fn create_branch(&mut self, source: CoValueId, name: &str) -> Result<CoValueId> {
        self.load(source).await?;
        if let Some(existing) = self.find_branch(source, name) {
            return Ok(existing);
        }
        let source_header = self
            .header(&source)
            .ok_or(NodeError::Unavailable(source))?
            .clone();
        if source_header.is_group() || source_header.branch_of().is_some() {
            return Err(NodeError::InvalidOperation(format!(
                "{source} cannot be branched"
            )));
        }
        if let Some(group) = source_header.owner_group() {
            self.require_role(&group, |role| role.can_write(), "branch in")?;
        }

        let start = self
            .known_state(&source)
            .ok_or(NodeError::Unavailable(source))?;
        let mut meta = match source_header.meta {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        meta.insert("source".into(), json!(source.to_string()));
        meta.insert("branch".into(), json!(name));
        meta.insert("start".into(), serde_json::to_value(&start).unwrap_or(Value::Null));

        let header = CoValueHeader {
            meta: Some(Value::Object(meta)),
            uniqueness: branch_uniqueness(&source, name, &self.account),
            created_at: Some(self.now()),
            ..source_header
        };
        let branch = self.adopt(header).await?;
        info!(%source, %branch, name, "branch created");
        Ok(branch)
    }

    /// Replay the branch's unmerged edits onto its source. Returns how many
    /// transactions were merged.
    pub async fn merge_branch(&mut self, branch: CoValueId) -> Result<usize> {
        let (source, name) = self
            .header(&branch)
            .ok_or(NodeError::Unavailable(branch))?
            .branch_of()
            .ok_or(NodeError::NotABranch(branch))?;
        self.load(source).await?;
        let is_list = self.replica.content_kind(&source) == Some(ContentKind::List);

        // Branch transaction -> source transaction it was merged as.
        let mut merged: HashMap<(SessionId, u32), TransactionId> = HashMap::new();
        let branch_str = branch.to_string();
        for (source_tx, meta) in self.replica.valid_metas(&source) {
            let Some(from) = meta.get("mergedFrom") else {
                continue;
            };
            if from.get("branch").and_then(Value::as_str) != Some(branch_str.as_str()) {
                continue;
            }
            let session = from
                .get("session")
                .and_then(|s| serde_json::from_value::<SessionId>(s.clone()).ok());
            let index = from.get("txIndex").and_then(Value::as_u64);
            if let (Some(session), Some(index)) = (session, index) {
                merged.insert((session, index as u32), source_tx);
            }
        }

        let mut count = 0;
        for tx in self.replica.branch_own(&branch, &name) {
            let key = (tx.id.session.clone(), tx.id.tx_index);
            if merged.contains_key(&key) {
                continue;
            }
            let changes = if is_list {
                rewrite_list_refs(&tx.changes, |op| {
                    if op.branch.as_deref() != Some(name.as_str()) {
                        return op;
                    }
                    match merged.get(&(op.session.clone(), op.tx_index)) {
                        Some(target) => target.op(op.change_idx),
                        None => op,
                    }
                })?
            } else {
                tx.changes.clone()
            };
            let meta = json!({
                "mergedFrom": {
                    "branch": branch_str,
                    "session": tx.id.session,
                    "txIndex": tx.id.tx_index,
                }
            });
            let privacy = self.config.default_privacy;
            let source_tx = self.write(source, changes, privacy, Some(meta)).await?;
            merged.insert(key, source_tx);
            count += 1;
        }
        debug!(%branch, %source, count, "branch merged");
        Ok(count)
    }
}

fn branch_uniqueness(source: &CoValueId, name: &str, account: &CoValueId) -> String {
    format!("{source}/{name}/{account}")
}
