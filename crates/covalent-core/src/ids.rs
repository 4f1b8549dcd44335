//! Identifiers: CoValues, agents, members, sessions and operations.
//!
//! Every identifier has a stable textual form. The textual form is what goes
//! over the wire and what is used as a key inside group content, so
//! `Display` and `FromStr` must round-trip exactly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::{SealerId, SignerId};
use crate::error::CoreError;

/// Implements `Serialize`/`Deserialize` through `Display`/`FromStr`.
macro_rules! string_serde {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}
pub(crate) use string_serde;

/// Parse exactly `N` bytes from a hex string.
pub(crate) fn parse_hex<const N: usize>(s: &str) -> Result<[u8; N], CoreError> {
    let bytes = hex::decode(s).map_err(|e| CoreError::InvalidId(format!("{}: {}", s, e)))?;
    bytes
        .try_into()
        .map_err(|_| CoreError::InvalidId(format!("{}: expected {} bytes", s, N)))
}

/// Content-derived identifier of a CoValue (hash of its header).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoValueId(pub [u8; 32]);

impl CoValueId {
    pub const PREFIX: &'static str = "co_";

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string (without prefix).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for CoValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.to_hex())
    }
}

impl fmt::Debug for CoValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoValueId({}{})", Self::PREFIX, &self.to_hex()[..16])
    }
}

impl FromStr for CoValueId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| CoreError::InvalidId(s.to_string()))?;
        Ok(Self(parse_hex(hex)?))
    }
}

string_serde!(CoValueId);

/// Public identity of an agent: a signing key and a sealing key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId {
    pub signer: SignerId,
    pub sealer: SealerId,
}

impl AgentId {
    pub const PREFIX: &'static str = "agent_";
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}_{}",
            Self::PREFIX,
            self.signer.to_hex(),
            self.sealer.to_hex()
        )
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({})", &self.signer.to_hex()[..16])
    }
}

impl FromStr for AgentId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| CoreError::InvalidId(s.to_string()))?;
        let (signer, sealer) = rest
            .split_once('_')
            .ok_or_else(|| CoreError::InvalidId(s.to_string()))?;
        Ok(Self {
            signer: SignerId(parse_hex(signer)?),
            sealer: SealerId(parse_hex(sealer)?),
        })
    }
}

string_serde!(AgentId);

/// Anything that can hold a role in a group.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberId {
    /// An account, itself a group whose admins are the account's agents.
    Account(CoValueId),
    /// A bare agent (devices, invite agents).
    Agent(AgentId),
    /// The public pseudo-member.
    Everyone,
}

impl MemberId {
    pub const EVERYONE: &'static str = "everyone";

    pub fn is_everyone(&self) -> bool {
        matches!(self, MemberId::Everyone)
    }

    pub fn as_account(&self) -> Option<&CoValueId> {
        match self {
            MemberId::Account(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_agent(&self) -> Option<&AgentId> {
        match self {
            MemberId::Agent(agent) => Some(agent),
            _ => None,
        }
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberId::Account(id) => fmt::Display::fmt(id, f),
            MemberId::Agent(agent) => fmt::Display::fmt(agent, f),
            MemberId::Everyone => f.write_str(Self::EVERYONE),
        }
    }
}

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberId::Account(id) => fmt::Debug::fmt(id, f),
            MemberId::Agent(agent) => fmt::Debug::fmt(agent, f),
            MemberId::Everyone => f.write_str("Everyone"),
        }
    }
}

impl FromStr for MemberId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::EVERYONE {
            Ok(MemberId::Everyone)
        } else if s.starts_with(AgentId::PREFIX) {
            Ok(MemberId::Agent(s.parse()?))
        } else if s.starts_with(CoValueId::PREFIX) {
            Ok(MemberId::Account(s.parse()?))
        } else {
            Err(CoreError::InvalidId(s.to_string()))
        }
    }
}

impl From<CoValueId> for MemberId {
    fn from(id: CoValueId) -> Self {
        MemberId::Account(id)
    }
}

impl From<AgentId> for MemberId {
    fn from(agent: AgentId) -> Self {
        MemberId::Agent(agent)
    }
}

string_serde!(MemberId);

/// A writer session: one agent on one device, optionally acting for an account.
///
/// Sessions are shared by every CoValue the device edits; each CoValue keeps
/// its own log per session.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    pub account: Option<CoValueId>,
    pub agent: AgentId,
    pub nonce: u64,
}

impl SessionId {
    const SEPARATOR: &'static str = "_session_";

    pub fn new(account: Option<CoValueId>, agent: AgentId, nonce: u64) -> Self {
        Self {
            account,
            agent,
            nonce,
        }
    }

    /// The member this session writes as.
    pub fn owner(&self) -> MemberId {
        match self.account {
            Some(account) => MemberId::Account(account),
            None => MemberId::Agent(self.agent),
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(account) = &self.account {
            write!(f, "{}~", account)?;
        }
        write!(f, "{}{}{:016x}", self.agent, Self::SEPARATOR, self.nonce)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.account {
            Some(account) => write!(f, "Session({:?}~{:?}#{:x})", account, self.agent, self.nonce),
            None => write!(f, "Session({:?}#{:x})", self.agent, self.nonce),
        }
    }
}

impl FromStr for SessionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, nonce) = s
            .rsplit_once(Self::SEPARATOR)
            .ok_or_else(|| CoreError::InvalidId(s.to_string()))?;
        let nonce = u64::from_str_radix(nonce, 16)
            .map_err(|e| CoreError::InvalidId(format!("{}: {}", s, e)))?;
        let (account, agent) = match owner.split_once('~') {
            Some((account, agent)) => (Some(account.parse()?), agent.parse()?),
            None => (None, owner.parse()?),
        };
        Ok(Self {
            account,
            agent,
            nonce,
        })
    }
}

string_serde!(SessionId);

/// Position of a transaction: its session, its index, and the branch it was
/// made on when viewed through a branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId {
    #[serde(rename = "sessionID")]
    pub session: SessionId,
    #[serde(rename = "txIndex")]
    pub tx_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl TransactionId {
    pub fn new(session: SessionId, tx_index: u32) -> Self {
        Self {
            session,
            tx_index,
            branch: None,
        }
    }

    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// The id of the `change_idx`-th change in this transaction.
    pub fn op(&self, change_idx: u32) -> OpId {
        OpId {
            session: self.session.clone(),
            tx_index: self.tx_index,
            branch: self.branch.clone(),
            change_idx,
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.session, self.tx_index)?;
        if let Some(branch) = &self.branch {
            write!(f, "@{}", branch)?;
        }
        Ok(())
    }
}

/// A single change inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId {
    #[serde(rename = "sessionID")]
    pub session: SessionId,
    #[serde(rename = "txIndex")]
    pub tx_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(rename = "changeIdx")]
    pub change_idx: u32,
}

impl OpId {
    pub fn tx_id(&self) -> TransactionId {
        TransactionId {
            session: self.session.clone(),
            tx_index: self.tx_index,
            branch: self.branch.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AgentSecret;

    fn agent() -> AgentId {
        AgentSecret::from_seed(&[0x42; 32]).agent_id()
    }

    #[test]
    fn test_covalue_id_text_roundtrip() {
        let id = CoValueId::from_bytes([0xab; 32]);
        let text = id.to_string();
        assert!(text.starts_with("co_"));
        assert_eq!(text.parse::<CoValueId>().unwrap(), id);
        assert!("xx_abcd".parse::<CoValueId>().is_err());
    }

    #[test]
    fn test_member_id_parsing() {
        let account = MemberId::Account(CoValueId::from_bytes([1; 32]));
        let agent = MemberId::Agent(agent());

        for member in [account, agent, MemberId::Everyone] {
            assert_eq!(member.to_string().parse::<MemberId>().unwrap(), member);
        }
        assert!("nobody".parse::<MemberId>().is_err());
    }

    #[test]
    fn test_session_id_with_and_without_account() {
        let plain = SessionId::new(None, agent(), 7);
        let acting = SessionId::new(Some(CoValueId::from_bytes([9; 32])), agent(), 0xdead);

        assert_eq!(plain.to_string().parse::<SessionId>().unwrap(), plain);
        assert_eq!(acting.to_string().parse::<SessionId>().unwrap(), acting);
        assert_eq!(plain.owner(), MemberId::Agent(agent()));
        assert_eq!(
            acting.owner(),
            MemberId::Account(CoValueId::from_bytes([9; 32]))
        );
    }

    #[test]
    fn test_op_id_json_shape() {
        let session = SessionId::new(None, agent(), 1);
        let op = TransactionId::new(session.clone(), 3).op(2);
        let json = serde_json::to_value(&op).unwrap();

        assert_eq!(json["txIndex"], 3);
        assert_eq!(json["changeIdx"], 2);
        assert_eq!(json["sessionID"], session.to_string());
        assert!(json.get("branch").is_none());

        let back: OpId = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
