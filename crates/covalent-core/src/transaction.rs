//! Transactions: the unit of a session log.

use serde::{Deserialize, Serialize};

use crate::canonical::transaction_bytes;
use crate::crypto::{Encrypted, KeyId};
use crate::ids::{CoValueId, TransactionId};

/// Whether changes travel in the clear or encrypted under a group key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Privacy {
    Trusting,
    Private,
}

/// One signed entry in a session log.
///
/// `changes` is the JSON text of an array of change objects. It is kept as
/// text so hashing never depends on JSON re-serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "privacy", rename_all = "camelCase")]
pub enum Transaction {
    #[serde(rename_all = "camelCase")]
    Trusting {
        made_at: u64,
        changes: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Private {
        made_at: u64,
        key_used: KeyId,
        encrypted_changes: Encrypted,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<String>,
    },
}

impl Transaction {
    /// Build a trusting transaction from change values.
    pub fn trusting(made_at: u64, changes: &[serde_json::Value]) -> Self {
        Transaction::Trusting {
            made_at,
            changes: serde_json::Value::Array(changes.to_vec()).to_string(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, new_meta: serde_json::Value) -> Self {
        match &mut self {
            Transaction::Trusting { meta, .. } | Transaction::Private { meta, .. } => {
                *meta = Some(new_meta.to_string());
            }
        }
        self
    }

    pub fn made_at(&self) -> u64 {
        match self {
            Transaction::Trusting { made_at, .. } | Transaction::Private { made_at, .. } => {
                *made_at
            }
        }
    }

    pub fn privacy(&self) -> Privacy {
        match self {
            Transaction::Trusting { .. } => Privacy::Trusting,
            Transaction::Private { .. } => Privacy::Private,
        }
    }

    pub fn meta(&self) -> Option<&str> {
        match self {
            Transaction::Trusting { meta, .. } | Transaction::Private { meta, .. } => {
                meta.as_deref()
            }
        }
    }

    /// Parsed transaction meta, if present and well-formed.
    pub fn meta_json(&self) -> Option<serde_json::Value> {
        self.meta().and_then(|m| serde_json::from_str(m).ok())
    }

    pub fn key_used(&self) -> Option<&KeyId> {
        match self {
            Transaction::Private { key_used, .. } => Some(key_used),
            Transaction::Trusting { .. } => None,
        }
    }

    /// Size of the canonical encoding, used for chunking.
    pub fn encoded_size(&self) -> usize {
        transaction_bytes(self).len()
    }

    /// Associated data binding private changes to their position.
    pub fn encryption_context(covalue: &CoValueId, tx_id: &TransactionId) -> Vec<u8> {
        format!("{}/{}/{}", covalue, tx_id.session, tx_id.tx_index).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trusting_wire_shape() {
        let tx = Transaction::trusting(42, &[json!({"op": "set", "key": "a", "value": 1})]);
        let wire = serde_json::to_value(&tx).unwrap();

        assert_eq!(wire["privacy"], "trusting");
        assert_eq!(wire["madeAt"], 42);
        assert!(wire["changes"].is_string());
        assert!(wire.get("meta").is_none());

        let back: Transaction = serde_json::from_value(wire).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn test_private_wire_shape() {
        let tx = Transaction::Private {
            made_at: 1,
            key_used: KeyId([2; 16]),
            encrypted_changes: Encrypted {
                nonce: [3; 12],
                ciphertext: bytes::Bytes::from_static(b"abc"),
            },
            meta: None,
        };
        let wire = serde_json::to_value(&tx).unwrap();
        assert_eq!(wire["privacy"], "private");
        assert!(wire["keyUsed"].as_str().unwrap().starts_with("key_"));
        assert!(wire["encryptedChanges"]
            .as_str()
            .unwrap()
            .starts_with("encrypted_"));

        let back: Transaction = serde_json::from_value(wire).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn test_meta_roundtrip() {
        let tx = Transaction::trusting(1, &[]).with_meta(json!({"mergedFrom": "x"}));
        assert_eq!(tx.meta_json(), Some(json!({"mergedFrom": "x"})));
    }
}
