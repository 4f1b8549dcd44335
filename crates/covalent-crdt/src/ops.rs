//! Change operations and decoded transactions.
//!
//! A transaction carries a JSON array of changes. For maps every change is a
//! [`MapOp`], for lists a [`ListOp`]; stream changes are arbitrary values.
//! Parsing is strict: an unknown `op` or a missing field fails, and callers
//! mark the whole transaction invalid.

use std::fmt;

use covalent_core::{content_types, parse_changes, OpId, Transaction, TransactionId, TxRef};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{CrdtError, Result};

/// A map change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum MapOp {
    Set { key: String, value: Value },
    Del { key: String },
}

impl MapOp {
    pub fn set(key: impl Into<String>, value: impl Into<Value>) -> Self {
        MapOp::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        MapOp::Del { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            MapOp::Set { key, .. } | MapOp::Del { key } => key,
        }
    }

    pub fn parse(change: &Value) -> Result<Self> {
        serde_json::from_value(change.clone()).map_err(|e| CrdtError::MalformedOp(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Left anchor of a list insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum After {
    Start,
    Op(OpId),
}

/// Right anchor of a list insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Before {
    End,
    Op(OpId),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAnchor {
    Sentinel(String),
    Op(OpId),
}

impl Serialize for After {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            After::Start => serializer.serialize_str("start"),
            After::Op(op) => op.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for After {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RawAnchor::deserialize(deserializer)? {
            RawAnchor::Sentinel(s) if s == "start" => Ok(After::Start),
            RawAnchor::Sentinel(s) => Err(D::Error::custom(format!("unknown anchor {s}"))),
            RawAnchor::Op(op) => Ok(After::Op(op)),
        }
    }
}

impl Serialize for Before {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Before::End => serializer.serialize_str("end"),
            Before::Op(op) => op.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Before {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RawAnchor::deserialize(deserializer)? {
            RawAnchor::Sentinel(s) if s == "end" => Ok(Before::End),
            RawAnchor::Sentinel(s) => Err(D::Error::custom(format!("unknown anchor {s}"))),
            RawAnchor::Op(op) => Ok(Before::Op(op)),
        }
    }
}

/// A list change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ListOp {
    App { value: Value, after: After },
    Pre { value: Value, before: Before },
    Del { insertion: OpId },
}

impl ListOp {
    pub fn parse(change: &Value) -> Result<Self> {
        serde_json::from_value(change.clone()).map_err(|e| CrdtError::MalformedOp(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Rewrite every OpId this change refers to.
    pub fn map_refs(self, mut f: impl FnMut(OpId) -> OpId) -> Self {
        match self {
            ListOp::App {
                value,
                after: After::Op(op),
            } => ListOp::App {
                value,
                after: After::Op(f(op)),
            },
            ListOp::Pre {
                value,
                before: Before::Op(op),
            } => ListOp::Pre {
                value,
                before: Before::Op(f(op)),
            },
            ListOp::Del { insertion } => ListOp::Del {
                insertion: f(insertion),
            },
            other => other,
        }
    }
}

/// Check the changes of a transaction parse for the given content type.
///
/// Unknown content types are opaque here and always pass.
pub fn check_changes(content_type: &str, changes: &[Value]) -> Result<()> {
    match content_type {
        content_types::COMAP | content_types::GROUP | content_types::ACCOUNT => {
            changes.iter().try_for_each(|c| MapOp::parse(c).map(drop))
        }
        content_types::COLIST => changes.iter().try_for_each(|c| ListOp::parse(c).map(drop)),
        _ => Ok(()),
    }
}

/// Rewrite list references inside `changes` for replay elsewhere.
pub fn rewrite_list_refs(
    changes: &[Value],
    mut f: impl FnMut(OpId) -> OpId,
) -> Result<Vec<Value>> {
    changes
        .iter()
        .map(|c| Ok(ListOp::parse(c)?.map_refs(&mut f).to_value()))
        .collect()
}

/// A transaction with its changes in the clear, ready to be folded.
#[derive(Clone, PartialEq)]
pub struct DecodedTx {
    pub id: TransactionId,
    pub made_at: u64,
    pub changes: Vec<Value>,
    pub meta: Option<Value>,
}

impl DecodedTx {
    /// Decode a trusting transaction. Private ones need a key and return `None`.
    pub fn from_trusting(tx: &TxRef<'_>) -> Option<Result<Self>> {
        let Transaction::Trusting { changes, .. } = tx.tx else {
            return None;
        };
        Some(
            parse_changes(changes)
                .map(|changes| Self {
                    id: tx.id(),
                    made_at: tx.made_at(),
                    changes,
                    meta: tx.tx.meta_json(),
                })
                .map_err(|e| CrdtError::MalformedOp(e.to_string())),
        )
    }

    /// Tag this transaction as seen through branch `name`.
    pub fn on_branch(mut self, name: &str) -> Self {
        self.id = self.id.on_branch(name);
        self
    }

    pub fn op_id(&self, change_idx: usize) -> OpId {
        self.id.op(change_idx as u32)
    }
}

impl fmt::Debug for DecodedTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DecodedTx({} @{}, {} changes)", self.id, self.made_at, self.changes.len())
    }
}
