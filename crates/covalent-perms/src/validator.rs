//! Permission validation.
//!
//! Three [`TransactionValidator`]s cover the three rulesets:
//!
//! - [`GroupValidator`] replays a group's own log, building [`GroupState`]
//!   as it accepts transactions.
//! - [`OwnedValidator`] checks writes to a CoValue owned by a group against
//!   the group's role timeline at each transaction's `madeAt`.
//! - [`AllowAllValidator`] only checks structure.
//!
//! Every rule violation becomes `Validity::Invalid` with a reason; nothing
//! here fails the whole log.

use std::sync::Arc;

use covalent_core::{
    CoValueCore, CoValueHeader, CoValueId, KeyId, MemberId, SessionId, TransactionId,
    TransactionValidator, TxRef, Validity,
};
use covalent_crdt::{check_changes, CrdtError, DecodedTx, MapOp};
use serde_json::Value;

use crate::error::Result;
use crate::keys::{parse_reveal, RevealTarget};
use crate::role::{ParentRole, Role};
use crate::state::{GroupResolver, GroupState, LinkOrder, ParentLink, RoleAssignment};

/// Work out which member a session writes as, at `at`.
///
/// An account session acting in the account itself writes as its agent.
/// Elsewhere it writes as the account, provided its agent is an admin of
/// the account at that time.
pub fn resolve_transactor(
    session: &SessionId,
    group: &CoValueId,
    at: u64,
    resolver: &dyn GroupResolver,
) -> std::result::Result<MemberId, String> {
    match session.account {
        None => Ok(MemberId::Agent(session.agent)),
        Some(account) if account == *group => Ok(MemberId::Agent(session.agent)),
        Some(account) => {
            let state = resolver
                .group_state(&account)
                .ok_or_else(|| format!("account {account} is unavailable"))?;
            if state.direct_role(&MemberId::Agent(session.agent), at) == Some(Role::Admin) {
                Ok(MemberId::Account(account))
            } else {
                Err(format!("agent is not an admin of account {account}"))
            }
        }
    }
}

/// Replay a group log from the start and return its state.
pub fn compute_member_state(
    core: &mut CoValueCore,
    resolver: &dyn GroupResolver,
) -> Result<GroupState> {
    let mut validator = GroupValidator::new(core.id(), core.header(), resolver)?;
    core.invalidate_validity();
    core.validate(&mut validator);
    Ok(validator.into_state())
}

enum Effect {
    None,
    Role(MemberId, Role),
    Parent(CoValueId, ParentRole),
    Child(CoValueId),
}

pub struct GroupValidator<'a> {
    resolver: &'a dyn GroupResolver,
    state: GroupState,
}

impl<'a> GroupValidator<'a> {
    pub fn new(
        id: CoValueId,
        header: &CoValueHeader,
        resolver: &'a dyn GroupResolver,
    ) -> Result<Self> {
        Ok(Self {
            resolver,
            state: GroupState::new(id, header)?,
        })
    }

    pub fn into_state(self) -> GroupState {
        self.state
    }

    fn check(&mut self, tx: &TxRef<'_>) -> std::result::Result<(), String> {
        let made_at = tx.made_at();
        let transactor = resolve_transactor(tx.session, &self.state.id(), made_at, self.resolver)?;
        let role = self.state.role_of(&transactor, made_at, self.resolver);

        let decoded = match DecodedTx::from_trusting(tx) {
            None if role == Some(Role::Admin) => return Ok(()),
            None => return Err(format!("private group transaction by non-admin {transactor}")),
            Some(decoded) => decoded.map_err(|e| e.to_string())?,
        };

        if decoded.changes.len() != 1 {
            return Err(CrdtError::WrongArity(decoded.changes.len()).to_string());
        }
        let (key, value) = match MapOp::parse(&decoded.changes[0]).map_err(|e| e.to_string())? {
            MapOp::Set { key, value } => (key, value),
            MapOp::Del { .. } => return Err("group entries cannot be deleted".into()),
        };

        let tx_id = tx.id();
        let effect = self.check_set(&transactor, role, &key, &value, made_at, &tx_id)?;
        match effect {
            Effect::None => {}
            Effect::Role(member, role) => self.state.assign_role(
                member,
                RoleAssignment {
                    role,
                    made_at,
                    by: transactor,
                    tx: tx_id,
                },
            ),
            Effect::Parent(parent, role) => self.state.link_parent(
                parent,
                ParentLink {
                    role,
                    made_at,
                    tx: tx_id,
                },
            ),
            Effect::Child(child) => self.state.add_child(child),
        }
        self.state.record_values(&decoded);
        Ok(())
    }

    fn check_set(
        &self,
        transactor: &MemberId,
        role: Option<Role>,
        key: &str,
        value: &Value,
        made_at: u64,
        tx: &TransactionId,
    ) -> std::result::Result<Effect, String> {
        let is_admin = role == Some(Role::Admin);
        let admin_only = |what: &str| {
            if is_admin {
                Ok(Effect::None)
            } else {
                Err(format!("only admins may set {what}"))
            }
        };

        // Special keys first
        if key == "readKey" || key == "profile" {
            return admin_only(key);
        }

        if let Some(parent) = key.strip_prefix("parent_") {
            admin_only(key)?;
            return self.check_parent(parent, value, made_at, tx);
        }

        if let Some(child) = key.strip_prefix("child_") {
            let child: CoValueId = child.parse().map_err(|e| format!("{e}"))?;
            return Ok(Effect::Child(child));
        }

        if let Some(member) = key.strip_prefix("writeKeyFor_") {
            let member: MemberId = member.parse().map_err(|e| format!("{e}"))?;
            let allowed =
                is_admin || role == Some(Role::WriteOnlyInvite) || *transactor == member;
            if !allowed {
                return Err(format!("{transactor} may not set the write key of {member}"));
            }
            if !is_admin && self.state.write_key_for(&member).is_some() {
                return Err(format!("write key of {member} is already set"));
            }
            value
                .as_str()
                .and_then(|s| s.parse::<KeyId>().ok())
                .ok_or("write key must be a key id")?;
            return Ok(Effect::None);
        }

        if let Some((key_id, target)) = parse_reveal(key) {
            let own_write_key = target == RevealTarget::Member(*transactor)
                && self.state.write_key_for(transactor) == Some(key_id);
            if is_admin || role.is_some_and(Role::is_invite) || own_write_key {
                return Ok(Effect::None);
            }
            return Err(format!("{transactor} may not reveal keys"));
        }

        match key.parse::<MemberId>() {
            Ok(member) => self.check_role_assignment(transactor, role, member, value, made_at),
            Err(_) => Err(format!("unknown group key {key}")),
        }
    }

    /// A link closing a cycle is refused. Cycles are judged on links ordered
    /// before this one, so of two concurrent links forming a cycle the one
    /// later in log-merge order is the one refused.
    fn check_parent(
        &self,
        parent: &str,
        value: &Value,
        made_at: u64,
        tx: &TransactionId,
    ) -> std::result::Result<Effect, String> {
        let parent: CoValueId = parent.parse().map_err(|e| format!("{e}"))?;
        let link: ParentRole = value
            .as_str()
            .ok_or("parent link must be a string")?
            .parse()
            .map_err(|e| format!("{e}"))?;

        if link != ParentRole::Fixed(Role::Revoked) {
            if parent == self.state.id() {
                return Err("circular parent reference".into());
            }
            let parent_state = self
                .resolver
                .group_state(&parent)
                .ok_or_else(|| format!("parent group {parent} is unavailable"))?;
            let id = self.state.id();
            let before = LinkOrder {
                made_at,
                tx,
                group: &id,
            };
            if parent_state.reaches_before(&id, before, self.resolver) {
                return Err("circular parent reference".into());
            }
        }
        Ok(Effect::Parent(parent, link))
    }

    fn check_role_assignment(
        &self,
        transactor: &MemberId,
        transactor_role: Option<Role>,
        member: MemberId,
        value: &Value,
        made_at: u64,
    ) -> std::result::Result<Effect, String> {
        let role: Role = value
            .as_str()
            .ok_or("role must be a string")?
            .parse()
            .map_err(|e| format!("{e}"))?;

        if member.is_everyone() && !role.allowed_for_everyone() {
            return Err(format!("everyone cannot be {role}"));
        }

        let current = self.state.direct_role(&member, made_at);
        let is_self = member == *transactor;

        if is_self
            && role == Role::Admin
            && *transactor == *self.state.initial_admin()
            && self.state.role_timeline(&member).is_empty()
        {
            return Ok(Effect::Role(member, role));
        }
        if is_self && role == Role::Revoked {
            return Ok(Effect::Role(member, role));
        }

        match transactor_role {
            Some(Role::Admin) => {
                if current == Some(Role::Admin) && !is_self && role != Role::Admin {
                    return Err("admins cannot demote other admins".into());
                }
                Ok(Effect::Role(member, role))
            }
            Some(invite) if invite.is_invite() => {
                let target = invite.invite_target();
                if Some(role) != target {
                    return Err(format!("{invite} cannot grant {role}"));
                }
                if member.is_everyone() {
                    return Err("invites cannot be used for everyone".into());
                }
                match current {
                    Some(Role::Revoked) => {
                        Err("revoked members cannot rejoin through an invite".into())
                    }
                    Some(existing) if existing.rank() >= role.rank() => {
                        Err(format!("member already has role {existing}"))
                    }
                    _ => Ok(Effect::Role(member, role)),
                }
            }
            other => Err(format!(
                "{transactor} with role {} cannot assign roles",
                other.map_or("none", Role::as_str)
            )),
        }
    }
}

impl TransactionValidator for GroupValidator<'_> {
    fn replays_from_start(&self) -> bool {
        true
    }

    fn validate(&mut self, tx: TxRef<'_>) -> Validity {
        match self.check(&tx) {
            Ok(()) => Validity::Valid,
            Err(reason) => Validity::Invalid(reason),
        }
    }
}

/// Validates writes to a CoValue owned by a group.
pub struct OwnedValidator<'a> {
    group: Arc<GroupState>,
    resolver: &'a dyn GroupResolver,
    content_type: String,
}

impl<'a> OwnedValidator<'a> {
    pub fn new(
        group: Arc<GroupState>,
        resolver: &'a dyn GroupResolver,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            group,
            resolver,
            content_type: content_type.into(),
        }
    }
}

impl TransactionValidator for OwnedValidator<'_> {
    fn validate(&mut self, tx: TxRef<'_>) -> Validity {
        let made_at = tx.made_at();
        let transactor =
            match resolve_transactor(tx.session, &self.group.id(), made_at, self.resolver) {
                Ok(member) => member,
                Err(reason) => return Validity::Invalid(reason),
            };

        match self.group.role_of(&transactor, made_at, self.resolver) {
            Some(role) if role.can_write() => {}
            role => {
                return Validity::invalid(format!(
                    "{transactor} cannot write with role {}",
                    role.map_or("none", Role::as_str)
                ))
            }
        }

        structural_verdict(&self.content_type, &tx)
    }
}

/// Accepts any well-formed transaction.
pub struct AllowAllValidator {
    content_type: String,
}

impl AllowAllValidator {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
        }
    }
}

impl TransactionValidator for AllowAllValidator {
    fn validate(&mut self, tx: TxRef<'_>) -> Validity {
        structural_verdict(&self.content_type, &tx)
    }
}

/// Private transactions can only be checked once decrypted, so they pass.
fn structural_verdict(content_type: &str, tx: &TxRef<'_>) -> Validity {
    match DecodedTx::from_trusting(tx) {
        None => Validity::Valid,
        Some(Err(e)) => Validity::Invalid(e.to_string()),
        Some(Ok(decoded)) => match check_changes(content_type, &decoded.changes) {
            Ok(()) => Validity::Valid,
            Err(e) => Validity::Invalid(e.to_string()),
        },
    }
}
