//! CoList: an ordered list built from anchored insertions.
//!
//! Every insertion names a neighbour: `app` goes after an existing item (or
//! the start), `pre` goes before one (or the end). The fold runs in two
//! phases. First every insertion and deletion is collected, so anchors may
//! refer to items that sort later. Then insertions are linked to their
//! anchors in fold order and the list is read off by a depth-first walk.
//!
//! Among concurrent `app`s after the same anchor the later one ends up
//! closest to the anchor; among `pre`s before the same anchor likewise.

use std::collections::{HashMap, HashSet};

use covalent_core::OpId;
use serde_json::Value;
use tracing::debug;

use crate::error::{CrdtError, Result};
use crate::ops::{After, Before, DecodedTx, ListOp};

/// A visible list item and the insertion that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub op: OpId,
    pub made_at: u64,
    pub value: Value,
}

#[derive(Debug, Clone)]
struct Insertion {
    value: Value,
    made_at: u64,
    anchor: Anchor,
}

#[derive(Debug, Clone)]
enum Anchor {
    After(After),
    Before(Before),
}

#[derive(Debug, Clone, Default)]
struct Links {
    /// Items inserted before this one, farthest first.
    predecessors: Vec<OpId>,
    /// Items inserted after this one, nearest first.
    successors: Vec<OpId>,
}

#[derive(Debug, Clone, Default)]
pub struct CoList {
    entries: Vec<ListEntry>,
    deletions: HashMap<OpId, OpId>,
}

impl CoList {
    /// Fold transactions given in log-merge order.
    pub fn from_transactions<'a>(txs: impl IntoIterator<Item = &'a DecodedTx>) -> Self {
        // Phase 1: collect
        let mut order: Vec<OpId> = Vec::new();
        let mut insertions: HashMap<OpId, Insertion> = HashMap::new();
        let mut deletions: HashMap<OpId, OpId> = HashMap::new();

        for tx in txs {
            for (idx, change) in tx.changes.iter().enumerate() {
                let op_id = tx.op_id(idx);
                let anchor = match ListOp::parse(change) {
                    Ok(ListOp::App { value, after }) => (value, Anchor::After(after)),
                    Ok(ListOp::Pre { value, before }) => (value, Anchor::Before(before)),
                    Ok(ListOp::Del { insertion }) => {
                        deletions.entry(insertion).or_insert(op_id);
                        continue;
                    }
                    Err(e) => {
                        debug!(tx = %tx.id, error = %e, "skipping malformed list change");
                        continue;
                    }
                };
                order.push(op_id.clone());
                insertions.insert(
                    op_id,
                    Insertion {
                        value: anchor.0,
                        made_at: tx.made_at,
                        anchor: anchor.1,
                    },
                );
            }
        }

        // Phase 2: link in fold order
        let mut after_start: Vec<OpId> = Vec::new();
        let mut before_end: Vec<OpId> = Vec::new();
        let mut links: HashMap<OpId, Links> = HashMap::new();

        for op_id in &order {
            let Some(insertion) = insertions.get(op_id) else {
                continue;
            };
            match &insertion.anchor {
                Anchor::After(After::Start) => after_start.insert(0, op_id.clone()),
                Anchor::Before(Before::End) => before_end.push(op_id.clone()),
                Anchor::After(After::Op(target)) | Anchor::Before(Before::Op(target))
                    if !insertions.contains_key(target) =>
                {
                    debug!(op = ?op_id, anchor = ?target, "list insertion anchored to unknown item");
                }
                Anchor::After(After::Op(target)) => links
                    .entry(target.clone())
                    .or_default()
                    .successors
                    .insert(0, op_id.clone()),
                Anchor::Before(Before::Op(target)) => links
                    .entry(target.clone())
                    .or_default()
                    .predecessors
                    .push(op_id.clone()),
            }
        }

        // Depth-first walk: predecessors, the item, successors
        enum Step<'a> {
            Visit(&'a OpId),
            Emit(&'a OpId),
        }
        let mut entries = Vec::new();
        let mut visited: HashSet<&OpId> = HashSet::new();
        let mut stack: Vec<Step<'_>> = after_start
            .iter()
            .chain(before_end.iter())
            .rev()
            .map(Step::Visit)
            .collect();

        while let Some(step) = stack.pop() {
            match step {
                Step::Visit(op_id) => {
                    if !visited.insert(op_id) {
                        continue;
                    }
                    let node = links.get(op_id);
                    if let Some(node) = node {
                        stack.extend(node.successors.iter().rev().map(Step::Visit));
                    }
                    stack.push(Step::Emit(op_id));
                    if let Some(node) = node {
                        stack.extend(node.predecessors.iter().rev().map(Step::Visit));
                    }
                }
                Step::Emit(op_id) => {
                    if deletions.contains_key(op_id) {
                        continue;
                    }
                    if let Some(insertion) = insertions.get(op_id) {
                        entries.push(ListEntry {
                            op: op_id.clone(),
                            made_at: insertion.made_at,
                            value: insertion.value.clone(),
                        });
                    }
                }
            }
        }

        CoList { entries, deletions }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.entries.get(index).map(|e| &e.value)
    }

    pub fn entries(&self) -> &[ListEntry] {
        &self.entries
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.entries.iter().map(|e| e.value.clone()).collect()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.to_vec())
    }

    /// The change that deleted `insertion`, if any.
    pub fn deletion_of(&self, insertion: &OpId) -> Option<&OpId> {
        self.deletions.get(insertion)
    }

    /// Position of the item inserted by `op`.
    pub fn index_of(&self, op: &OpId) -> Option<usize> {
        self.entries.iter().position(|e| &e.op == op)
    }

    fn entry(&self, index: usize) -> Result<&ListEntry> {
        self.entries.get(index).ok_or(CrdtError::IndexOutOfBounds {
            index,
            len: self.entries.len(),
        })
    }

    /// Insert `value` after item `after`, or at the end when `None`.
    pub fn append_op(&self, value: Value, after: Option<usize>) -> Result<ListOp> {
        let after = match after {
            Some(index) => After::Op(self.entry(index)?.op.clone()),
            None => match self.entries.last() {
                Some(last) => After::Op(last.op.clone()),
                None => After::Start,
            },
        };
        Ok(ListOp::App { value, after })
    }

    /// Insert `value` before item `before`, or at the start when `None`.
    pub fn prepend_op(&self, value: Value, before: Option<usize>) -> Result<ListOp> {
        let before = match before {
            Some(index) => Before::Op(self.entry(index)?.op.clone()),
            None => match self.entries.first() {
                Some(first) => Before::Op(first.op.clone()),
                None => Before::End,
            },
        };
        Ok(ListOp::Pre { value, before })
    }

    pub fn delete_op(&self, index: usize) -> Result<ListOp> {
        Ok(ListOp::Del {
            insertion: self.entry(index)?.op.clone(),
        })
    }

    /// Ops that build this list's current contents from scratch, in order.
    ///
    /// Each item is appended after the previous one; `first_op` is the id
    /// the first change will receive, and subsequent ids follow by index.
    pub fn rebuild_ops(&self, first_op: &OpId) -> Vec<ListOp> {
        let mut prev: Option<OpId> = None;
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let after = prev.take().map_or(After::Start, After::Op);
                let mut id = first_op.clone();
                id.change_idx += i as u32;
                prev = Some(id);
                ListOp::App {
                    value: entry.value.clone(),
                    after,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covalent_core::{AgentSecret, SessionId, TransactionId};
    use serde_json::json;

    fn session(n: u8) -> SessionId {
        SessionId::new(None, AgentSecret::from_seed(&[n; 32]).agent_id(), n as u64)
    }

    fn tx(s: u8, index: u32, made_at: u64, ops: Vec<ListOp>) -> DecodedTx {
        DecodedTx {
            id: TransactionId::new(session(s), index),
            made_at,
            changes: ops.iter().map(ListOp::to_value).collect(),
            meta: None,
        }
    }

    fn op(s: u8, index: u32, change: u32) -> OpId {
        TransactionId::new(session(s), index).op(change)
    }

    fn app(value: i64, after: After) -> ListOp {
        ListOp::App {
            value: json!(value),
            after,
        }
    }

    #[test]
    fn test_sequential_appends() {
        let txs = vec![
            tx(1, 0, 1, vec![app(1, After::Start)]),
            tx(1, 1, 2, vec![app(2, After::Op(op(1, 0, 0)))]),
            tx(1, 2, 3, vec![app(3, After::Op(op(1, 1, 0)))]),
        ];
        let list = CoList::from_transactions(&txs);
        assert_eq!(list.to_vec(), vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_multiple_changes_in_one_transaction() {
        let txs = vec![tx(
            1,
            0,
            1,
            vec![
                app(1, After::Start),
                app(2, After::Op(op(1, 0, 0))),
                ListOp::Pre {
                    value: json!(0),
                    before: Before::Op(op(1, 0, 0)),
                },
            ],
        )];
        let list = CoList::from_transactions(&txs);
        assert_eq!(list.to_json(), json!([0, 1, 2]));
    }

    #[test]
    fn test_concurrent_appends_newest_nearest() {
        let txs = vec![
            tx(1, 0, 1, vec![app(1, After::Start)]),
            tx(1, 1, 5, vec![app(2, After::Op(op(1, 0, 0)))]),
            tx(2, 0, 6, vec![app(3, After::Op(op(1, 0, 0)))]),
        ];
        let list = CoList::from_transactions(&txs);
        assert_eq!(list.to_json(), json!([1, 3, 2]));
    }

    #[test]
    fn test_pre_before_end_and_delete() {
        let txs = vec![
            tx(1, 0, 1, vec![ListOp::Pre {
                value: json!("a"),
                before: Before::End,
            }]),
            tx(1, 1, 2, vec![ListOp::Pre {
                value: json!("b"),
                before: Before::End,
            }]),
            tx(2, 0, 3, vec![ListOp::Del {
                insertion: op(1, 0, 0),
            }]),
        ];
        let list = CoList::from_transactions(&txs);
        assert_eq!(list.to_json(), json!(["b"]));
        assert_eq!(list.deletion_of(&op(1, 0, 0)), Some(&op(2, 0, 0)));
        assert_eq!(list.deletion_of(&op(1, 1, 0)), None);
    }

    #[test]
    fn test_anchor_sorting_later_is_resolved() {
        // The anchor's transaction has a later timestamp than the insertion
        let txs = vec![
            tx(2, 0, 1, vec![app(2, After::Op(op(1, 0, 0)))]),
            tx(1, 0, 9, vec![app(1, After::Start)]),
        ];
        let list = CoList::from_transactions(&txs);
        assert_eq!(list.to_json(), json!([1, 2]));
    }

    #[test]
    fn test_dangling_anchor_is_ignored() {
        let txs = vec![tx(1, 0, 1, vec![app(1, After::Op(op(9, 9, 9)))])];
        assert!(CoList::from_transactions(&txs).is_empty());
    }

    #[test]
    fn test_op_builders() {
        let empty = CoList::default();
        assert_eq!(empty.append_op(json!(1), None).unwrap(), app(1, After::Start));
        assert!(empty.delete_op(0).is_err());

        let txs = vec![tx(1, 0, 1, vec![app(1, After::Start)])];
        let list = CoList::from_transactions(&txs);
        assert_eq!(
            list.append_op(json!(2), None).unwrap(),
            app(2, After::Op(op(1, 0, 0)))
        );
        assert_eq!(
            list.prepend_op(json!(0), Some(0)).unwrap(),
            ListOp::Pre {
                value: json!(0),
                before: Before::Op(op(1, 0, 0)),
            }
        );
        assert!(matches!(
            list.append_op(json!(2), Some(3)),
            Err(CrdtError::IndexOutOfBounds { index: 3, len: 1 })
        ));
    }

    #[test]
    fn test_rebuild_ops_reproduce_contents() {
        let txs = vec![
            tx(1, 0, 1, vec![app(1, After::Start)]),
            tx(2, 0, 2, vec![app(2, After::Start)]),
        ];
        let list = CoList::from_transactions(&txs);

        let first = op(3, 0, 0);
        let rebuilt = tx(3, 0, 5, list.rebuild_ops(&first));
        let copy = CoList::from_transactions([&rebuilt]);
        assert_eq!(copy.to_vec(), list.to_vec());
    }
}
