//! CoValue headers.
//!
//! The header is immutable and its canonical hash is the CoValue's id, so two
//! replicas that create the same header (deterministic uniqueness) agree on
//! the id without talking to each other.

use serde::{Deserialize, Serialize};

use crate::canonical::header_bytes;
use crate::content::Priority;
use crate::ids::{CoValueId, MemberId};
use crate::provider::CryptoProvider;

/// Built-in content type names.
pub mod content_types {
    pub const COMAP: &str = "comap";
    pub const COLIST: &str = "colist";
    pub const COSTREAM: &str = "costream";
    pub const GROUP: &str = "group";
    pub const ACCOUNT: &str = "account";
}

/// Who may write to a CoValue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Ruleset {
    /// The CoValue is a group; its own log defines its membership.
    #[serde(rename_all = "camelCase")]
    Group { initial_admin: MemberId },
    /// Writes are authorized by the role state of another group.
    #[serde(rename_all = "camelCase")]
    OwnedByGroup { group: CoValueId },
    /// Anyone may write. Used for tests and public scratch values.
    UnsafeAllowAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoValueHeader {
    #[serde(rename = "type")]
    pub content_type: String,
    pub ruleset: Ruleset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    pub uniqueness: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
}

impl CoValueHeader {
    /// A header with empty uniqueness; callers normally set it.
    pub fn new(content_type: impl Into<String>, ruleset: Ruleset) -> Self {
        Self {
            content_type: content_type.into(),
            ruleset,
            meta: None,
            uniqueness: String::new(),
            created_at: None,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_uniqueness(mut self, uniqueness: impl Into<String>) -> Self {
        self.uniqueness = uniqueness.into();
        self
    }

    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// The content-derived id of this header.
    pub fn id(&self, crypto: &dyn CryptoProvider) -> CoValueId {
        CoValueId(crypto.hash(&header_bytes(self)).0)
    }

    /// The group whose role state authorizes writes, if any.
    pub fn owner_group(&self) -> Option<CoValueId> {
        match &self.ruleset {
            Ruleset::OwnedByGroup { group } => Some(*group),
            _ => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.ruleset, Ruleset::Group { .. })
    }

    pub fn is_account(&self) -> bool {
        self.is_group() && self.content_type == content_types::ACCOUNT
    }

    /// Sync priority: membership first, binary streams last.
    pub fn priority(&self) -> Priority {
        if self.is_group() {
            return Priority::High;
        }
        let binary = self
            .meta
            .as_ref()
            .and_then(|m| m.get("type"))
            .and_then(|t| t.as_str())
            == Some("binary");
        if self.content_type == content_types::COSTREAM && binary {
            Priority::Low
        } else {
            Priority::Medium
        }
    }

    /// Branch metadata: `(source, branch name)` if this header describes a branch.
    pub fn branch_of(&self) -> Option<(CoValueId, String)> {
        let meta = self.meta.as_ref()?;
        let source = meta.get("source")?.as_str()?.parse().ok()?;
        let name = meta.get("branch")?.as_str()?.to_string();
        Some((source, name))
    }
}
