//! CoStream: one append-only item sequence per session.
//!
//! Every change of a stream transaction is an item. Streams never conflict:
//! each writer only ever appends to its own sequence.

use std::collections::BTreeMap;

use covalent_core::{MemberId, SessionId, TransactionId};
use serde_json::Value;

use crate::ops::DecodedTx;

#[derive(Debug, Clone, PartialEq)]
pub struct StreamItem {
    pub tx: TransactionId,
    pub made_at: u64,
    pub value: Value,
}

#[derive(Debug, Clone, Default)]
pub struct CoStream {
    items: BTreeMap<SessionId, Vec<StreamItem>>,
}

impl CoStream {
    pub fn from_transactions<'a>(txs: impl IntoIterator<Item = &'a DecodedTx>) -> Self {
        let mut stream = CoStream::default();
        for tx in txs {
            let items = stream.items.entry(tx.id.session.clone()).or_default();
            items.extend(tx.changes.iter().map(|value| StreamItem {
                tx: tx.id.clone(),
                made_at: tx.made_at,
                value: value.clone(),
            }));
        }
        stream
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionId> {
        self.items.keys()
    }

    pub fn items(&self, session: &SessionId) -> &[StreamItem] {
        self.items.get(session).map(Vec::as_slice).unwrap_or_default()
    }

    /// The latest item of every session.
    pub fn last_per_session(&self) -> BTreeMap<&SessionId, &StreamItem> {
        self.items
            .iter()
            .filter_map(|(session, items)| Some((session, items.last()?)))
            .collect()
    }

    /// Items written by `member` across all its sessions, oldest first.
    pub fn items_by(&self, member: &MemberId) -> Vec<&StreamItem> {
        let mut items: Vec<&StreamItem> = self
            .items
            .iter()
            .filter(|(session, _)| &session.owner() == member)
            .flat_map(|(_, items)| items.iter())
            .collect();
        items.sort_by_key(|item| item.made_at);
        items
    }

    /// The most recent item written by `member`.
    pub fn last_by(&self, member: &MemberId) -> Option<&StreamItem> {
        self.items_by(member).into_iter().last()
    }

    pub fn total_items(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    /// `{ "<session>": [values...] }`
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.items
                .iter()
                .map(|(session, items)| {
                    (
                        session.to_string(),
                        Value::Array(items.iter().map(|i| i.value.clone()).collect()),
                    )
                })
                .collect(),
        )
    }
}
