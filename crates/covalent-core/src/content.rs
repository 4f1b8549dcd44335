//! Content pieces: the unit of transfer between replicas and to storage.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::Signature;
use crate::header::CoValueHeader;
use crate::ids::{CoValueId, SessionId};
use crate::known::KnownState;
use crate::transaction::Transaction;

/// Delivery priority; lower numbers go first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    High = 0,
    Medium = 3,
    Low = 6,
}

impl Priority {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Unknown numbers fall into the nearest lower-priority bucket.
    pub fn from_u8(n: u8) -> Self {
        match n {
            0..=2 => Priority::High,
            3..=5 => Priority::Medium,
            _ => Priority::Low,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Priority::from_u8(u8::deserialize(deserializer)?))
    }
}

/// New transactions of one session, continuing after `after` transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNewContent {
    pub after: u32,
    pub new_transactions: Vec<Transaction>,
    /// Signature over the session hash after the last new transaction.
    pub last_signature: Signature,
}

impl SessionNewContent {
    /// Session length once this content is applied.
    pub fn end(&self) -> u32 {
        self.after + self.new_transactions.len() as u32
    }
}

/// A chunk of a CoValue: optionally its header, plus new session content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoValueContent {
    pub id: CoValueId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<CoValueHeader>,
    pub priority: Priority,
    pub new: BTreeMap<SessionId, SessionNewContent>,
}

impl CoValueContent {
    pub fn new(id: CoValueId, priority: Priority) -> Self {
        Self {
            id,
            header: None,
            priority,
            new: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_none() && self.new.values().all(|s| s.new_transactions.is_empty())
    }

    pub fn transaction_count(&self) -> usize {
        self.new.values().map(|s| s.new_transactions.len()).sum()
    }

    /// What the sender must hold to have produced this piece.
    pub fn implied_known_state(&self) -> KnownState {
        let mut known = KnownState::header_only(self.id);
        for (session, content) in &self.new {
            known.set(session.clone(), content.end());
        }
        known
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{AgentSecret, SignerSecret};

    #[test]
    fn test_priority_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Priority::Medium).unwrap(), "3");
        let p: Priority = serde_json::from_str("6").unwrap();
        assert_eq!(p, Priority::Low);
        assert!(Priority::High < Priority::Low);
    }

    #[test]
    fn test_implied_known_state() {
        let session = SessionId::new(None, AgentSecret::from_seed(&[1; 32]).agent_id(), 1);
        let mut content = CoValueContent::new(CoValueId::from_bytes([2; 32]), Priority::Medium);
        content.new.insert(
            session.clone(),
            SessionNewContent {
                after: 3,
                new_transactions: vec![Transaction::trusting(1, &[]), Transaction::trusting(2, &[])],
                last_signature: SignerSecret::from_seed(&[1; 32]).sign(b"x"),
            },
        );

        let known = content.implied_known_state();
        assert!(known.header);
        assert_eq!(known.count(&session), 5);
        assert_eq!(content.transaction_count(), 2);
    }
}
