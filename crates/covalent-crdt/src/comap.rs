//! CoMap: a last-write-wins map that keeps its full edit history.
//!
//! Edits are recorded per key in fold order, so the current value of a key
//! is simply its last edit. Time travel filters the history by `madeAt`.

use std::collections::BTreeMap;

use covalent_core::{OpId, TransactionId};
use serde_json::{Map, Value};
use tracing::debug;

use crate::ops::{DecodedTx, MapOp};

/// One recorded `set` or `del` of a key.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEdit {
    pub tx: TransactionId,
    pub change_idx: u32,
    pub made_at: u64,
    /// `None` for a deletion.
    pub value: Option<Value>,
}

impl MapEdit {
    pub fn op_id(&self) -> OpId {
        self.tx.op(self.change_idx)
    }

    pub fn is_deletion(&self) -> bool {
        self.value.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoMap {
    edits: BTreeMap<String, Vec<MapEdit>>,
}

impl CoMap {
    /// Fold transactions given in log-merge order.
    pub fn from_transactions<'a>(txs: impl IntoIterator<Item = &'a DecodedTx>) -> Self {
        let mut map = CoMap::default();
        for tx in txs {
            map.apply(tx);
        }
        map
    }

    /// Apply one more transaction that sorts after everything applied so far.
    pub fn apply(&mut self, tx: &DecodedTx) {
        for (idx, change) in tx.changes.iter().enumerate() {
            let op = match MapOp::parse(change) {
                Ok(op) => op,
                Err(e) => {
                    debug!(tx = %tx.id, error = %e, "skipping malformed map change");
                    continue;
                }
            };
            let (key, value) = match op {
                MapOp::Set { key, value } => (key, Some(value)),
                MapOp::Del { key } => (key, None),
            };
            self.edits.entry(key).or_default().push(MapEdit {
                tx: tx.id.clone(),
                change_idx: idx as u32,
                made_at: tx.made_at,
                value,
            });
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.last_edit(key)?.value.as_ref()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Keys with a current value, in key order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.edits
            .iter()
            .filter(|(_, edits)| edits.last().is_some_and(|e| !e.is_deletion()))
            .map(|(key, _)| key.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.edits
            .iter()
            .filter_map(|(key, edits)| Some((key.as_str(), edits.last()?.value.as_ref()?)))
    }

    pub fn len(&self) -> usize {
        self.keys().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<Map<_, _>>(),
        )
    }

    /// The map as it was at `time` (edits with `madeAt <= time`).
    pub fn at_time(&self, time: u64) -> CoMap {
        let edits = self
            .edits
            .iter()
            .filter_map(|(key, edits)| {
                let kept: Vec<MapEdit> = edits
                    .iter()
                    .filter(|e| e.made_at <= time)
                    .cloned()
                    .collect();
                (!kept.is_empty()).then(|| (key.clone(), kept))
            })
            .collect();
        CoMap { edits }
    }

    /// Every edit of `key`, oldest first.
    pub fn edits(&self, key: &str) -> &[MapEdit] {
        self.edits.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn last_edit(&self, key: &str) -> Option<&MapEdit> {
        self.edits(key).last()
    }

    pub fn edits_at(&self, key: &str, time: u64) -> impl Iterator<Item = &MapEdit> {
        self.edits(key).iter().filter(move |e| e.made_at <= time)
    }

    /// The `n`-th edit of `key` made at or before `time`.
    pub fn nth_edit_at(&self, key: &str, n: usize, time: u64) -> Option<&MapEdit> {
        self.edits_at(key, time).nth(n)
    }

    /// Time of the latest edit of any key.
    pub fn latest_edit_time(&self) -> Option<u64> {
        self.edits
            .values()
            .filter_map(|edits| edits.last())
            .map(|e| e.made_at)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covalent_core::{AgentSecret, SessionId};
    use serde_json::json;

    fn tx(session: u8, index: u32, made_at: u64, changes: Vec<Value>) -> DecodedTx {
        let session = SessionId::new(
            None,
            AgentSecret::from_seed(&[session; 32]).agent_id(),
            session as u64,
        );
        DecodedTx {
            id: TransactionId::new(session, index),
            made_at,
            changes,
            meta: None,
        }
    }

    #[test]
    fn test_last_write_wins_and_history() {
        let txs = vec![
            tx(1, 0, 10, vec![MapOp::set("color", "red").to_value()]),
            tx(2, 0, 20, vec![MapOp::set("color", "blue").to_value()]),
            tx(1, 1, 30, vec![MapOp::del("color").to_value(), MapOp::set("size", 3).to_value()]),
        ];
        let map = CoMap::from_transactions(&txs);

        assert_eq!(map.get("color"), None);
        assert_eq!(map.get("size"), Some(&json!(3)));
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["size"]);
        assert_eq!(map.edits("color").len(), 3);
        assert!(map.last_edit("color").unwrap().is_deletion());
        assert_eq!(map.to_json(), json!({"size": 3}));

        let past = map.at_time(25);
        assert_eq!(past.get("color"), Some(&json!("blue")));
        assert!(!past.contains_key("size"));
        assert_eq!(map.nth_edit_at("color", 0, 25).unwrap().made_at, 10);
        assert_eq!(map.edits_at("color", 15).count(), 1);
        assert_eq!(map.latest_edit_time(), Some(30));
    }

    #[test]
    fn test_malformed_changes_are_skipped() {
        let txs = vec![tx(
            1,
            0,
            1,
            vec![json!({"op": "nope"}), MapOp::set("a", true).to_value()],
        )];
        let map = CoMap::from_transactions(&txs);
        assert_eq!(map.len(), 1);
        assert_eq!(map.last_edit("a").unwrap().change_idx, 1);
    }
}
