//! Key material stored in group values.
//!
//! Read keys are never stored in the clear except when revealed to
//! `everyone`. A key is made available by writing `<keyId>_for_<target>`:
//!
//! - target is a member: the key sealed to that member's agent (`sealed_…`)
//! - target is another key: the key encrypted under it (`encrypted_…`)
//! - target is `everyone`: the key as plain hex
//!
//! [`KeyFinder`] walks these entries, through parent groups when needed,
//! to recover a key for the local agent.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use covalent_core::{
    AgentId, AgentSecret, CoValueId, CryptoProvider, Encrypted, KeyId, KeySecret, MemberId,
    Sealed,
};
use tracing::debug;

use crate::error::{PermsError, Result};
use crate::state::{GroupResolver, GroupState};

/// Who a key reveal is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealTarget {
    Member(MemberId),
    Key(KeyId),
}

impl RevealTarget {
    pub const EVERYONE: RevealTarget = RevealTarget::Member(MemberId::Everyone);
}

/// `<keyId>_for_<target>`
pub fn reveal_name(key: &KeyId, target: &RevealTarget) -> String {
    match target {
        RevealTarget::Member(member) => format!("{key}_for_{member}"),
        RevealTarget::Key(other) => format!("{key}_for_{other}"),
    }
}

pub fn parse_reveal(name: &str) -> Option<(KeyId, RevealTarget)> {
    let (key, target) = name.split_once("_for_")?;
    let key = KeyId::from_str(key).ok()?;
    let target = if target.starts_with(KeyId::PREFIX) {
        RevealTarget::Key(target.parse().ok()?)
    } else {
        RevealTarget::Member(target.parse().ok()?)
    };
    Some((key, target))
}

fn seal_context(group: &CoValueId, key: &KeyId) -> Vec<u8> {
    format!("{group}/{key}").into_bytes()
}

fn wrap_context(key: &KeyId, under: &KeyId) -> Vec<u8> {
    format!("{key}_for_{under}").into_bytes()
}

fn key_from_bytes(bytes: &[u8], expected: &KeyId) -> Result<KeySecret> {
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| PermsError::MalformedKey(format!("expected 32 bytes, got {}", bytes.len())))?;
    let key = KeySecret::from_bytes(bytes);
    if key.id() != *expected {
        return Err(PermsError::MalformedKey(format!(
            "revealed key does not match {expected}"
        )));
    }
    Ok(key)
}

/// Seal `key` to `recipient` for use in `group`.
pub fn seal_key(
    crypto: &dyn CryptoProvider,
    key: &KeySecret,
    recipient: &AgentId,
    group: &CoValueId,
) -> Result<String> {
    let sealed = crypto.seal(&recipient.sealer, key.as_bytes(), &seal_context(group, &key.id()))?;
    Ok(sealed.to_string())
}

pub fn unseal_key(
    crypto: &dyn CryptoProvider,
    sealed: &str,
    agent: &AgentSecret,
    group: &CoValueId,
    key_id: &KeyId,
) -> Result<KeySecret> {
    let sealed: Sealed = sealed.parse()?;
    let bytes = crypto.unseal(&agent.sealer, &sealed, &seal_context(group, key_id))?;
    key_from_bytes(&bytes, key_id)
}

/// Encrypt `key` under `under`.
pub fn wrap_key(crypto: &dyn CryptoProvider, key: &KeySecret, under: &KeySecret) -> Result<String> {
    let encrypted = crypto.encrypt(under, key.as_bytes(), &wrap_context(&key.id(), &under.id()))?;
    Ok(encrypted.to_string())
}

pub fn unwrap_key(
    crypto: &dyn CryptoProvider,
    wrapped: &str,
    key_id: &KeyId,
    under: &KeySecret,
) -> Result<KeySecret> {
    let encrypted: Encrypted = wrapped.parse()?;
    let bytes = crypto.decrypt(under, &encrypted, &wrap_context(key_id, &under.id()))?;
    key_from_bytes(&bytes, key_id)
}

/// Plain reveal for `<keyId>_for_everyone`.
pub fn reveal_to_everyone(key: &KeySecret) -> String {
    key.to_hex()
}

/// Recovers keys for one local agent, caching what it finds.
pub struct KeyFinder<'a> {
    crypto: &'a dyn CryptoProvider,
    agent: &'a AgentSecret,
    identities: Vec<MemberId>,
    resolver: &'a dyn GroupResolver,
    cache: &'a mut HashMap<KeyId, KeySecret>,
}

impl<'a> KeyFinder<'a> {
    pub fn new(
        crypto: &'a dyn CryptoProvider,
        agent: &'a AgentSecret,
        account: Option<CoValueId>,
        resolver: &'a dyn GroupResolver,
        cache: &'a mut HashMap<KeyId, KeySecret>,
    ) -> Self {
        let mut identities = vec![MemberId::Agent(agent.agent_id())];
        identities.extend(account.map(MemberId::Account));
        Self {
            crypto,
            agent,
            identities,
            resolver,
            cache,
        }
    }

    /// Also try reveals addressed to `member`, e.g. an invite agent.
    pub fn with_identity(mut self, member: MemberId) -> Self {
        self.identities.push(member);
        self
    }

    /// The current read key of `group`, if this agent can get it.
    pub fn read_key(&mut self, group: &GroupState) -> Option<(KeyId, KeySecret)> {
        let id = group.read_key_id()?;
        let key = self.find(group, &id)?;
        Some((id, key))
    }

    pub fn find(&mut self, group: &GroupState, key_id: &KeyId) -> Option<KeySecret> {
        self.find_inner(group, key_id, &mut BTreeSet::new())
    }

    fn find_inner(
        &mut self,
        group: &GroupState,
        key_id: &KeyId,
        visiting: &mut BTreeSet<(CoValueId, KeyId)>,
    ) -> Option<KeySecret> {
        if let Some(key) = self.cache.get(key_id) {
            return Some(key.clone());
        }
        if !visiting.insert((group.id(), *key_id)) {
            return None;
        }

        let found = self
            .sealed_to_me(group, key_id)
            .or_else(|| self.revealed_to_everyone(group, key_id))
            .or_else(|| self.via_other_key(group, key_id, visiting));

        if let Some(key) = &found {
            self.cache.insert(*key_id, key.clone());
        }
        found
    }

    fn sealed_to_me(&self, group: &GroupState, key_id: &KeyId) -> Option<KeySecret> {
        self.identities.iter().find_map(|me| {
            let sealed = group.value_str(&reveal_name(key_id, &RevealTarget::Member(*me)))?;
            unseal_key(self.crypto, sealed, self.agent, &group.id(), key_id)
                .map_err(|e| debug!(group = %group.id(), key = %key_id, error = %e, "cannot unseal key"))
                .ok()
        })
    }

    fn revealed_to_everyone(&self, group: &GroupState, key_id: &KeyId) -> Option<KeySecret> {
        let hex = group.value_str(&reveal_name(key_id, &RevealTarget::EVERYONE))?;
        let key = KeySecret::from_hex(hex).ok()?;
        (key.id() == *key_id).then_some(key)
    }

    fn via_other_key(
        &mut self,
        group: &GroupState,
        key_id: &KeyId,
        visiting: &mut BTreeSet<(CoValueId, KeyId)>,
    ) -> Option<KeySecret> {
        let wrapped: Vec<(KeyId, String)> = group
            .values()
            .entries()
            .filter_map(|(name, value)| match parse_reveal(name)? {
                (k, RevealTarget::Key(under)) if k == *key_id => {
                    Some((under, value.as_str()?.to_string()))
                }
                _ => None,
            })
            .collect();

        let parents: Vec<_> = group
            .parents()
            .into_iter()
            .filter_map(|(id, _)| self.resolver.group_state(&id))
            .collect();

        for (under_id, wrapped) in wrapped {
            let under = self.find_inner(group, &under_id, visiting).or_else(|| {
                parents
                    .iter()
                    .find_map(|parent| self.find_inner(parent, &under_id, visiting))
            });
            if let Some(under) = under {
                if let Ok(key) = unwrap_key(self.crypto, &wrapped, key_id, &under) {
                    return Some(key);
                }
            }
        }
        None
    }
}
