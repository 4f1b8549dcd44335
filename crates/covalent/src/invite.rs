//! Invites: a secret agent that may hand out one role in a group.
//!
//! The admin creates an invite agent, gives it the invite role and, for
//! roles that read, seals the read key to it. Whoever holds the invite
//! secret signs as that agent to grant themselves the target role.

use std::fmt;
use std::str::FromStr;

use covalent_core::{AgentSecret, CoValueId, MemberId, SessionId, Transaction, TransactionId};
use covalent_crdt::MapOp;
use covalent_perms::{reveal_name, seal_key, RevealTarget, Role};
use covalent_store::Storage;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{NodeError, Result};
use crate::node::Node;

/// A shareable invite to `group`, rendered as `group/role/secret`.
#[derive(Clone)]
pub struct Invite {
    pub group: CoValueId,
    /// The role the invite grants.
    pub role: Role,
    pub secret: AgentSecret,
}

impl fmt::Display for Invite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.group,
            self.role,
            self.secret.to_secret_string()
        )
    }
}

impl fmt::Debug for Invite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invite")
            .field("group", &self.group)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl FromStr for Invite {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '/');
        let (Some(group), Some(role), Some(secret)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(NodeError::InvalidInvite("expected group/role/secret".into()));
        };
        let role: Role = role
            .parse()
            .map_err(|e| NodeError::InvalidInvite(format!("{e}")))?;
        if role.invite().is_none() {
            return Err(NodeError::InvalidInvite(format!("{role} cannot be invited")));
        }
        Ok(Self {
            group: group
                .parse()
                .map_err(|e| NodeError::InvalidInvite(format!("{e}")))?,
            role,
            secret: secret
                .parse()
                .map_err(|e| NodeError::InvalidInvite(format!("{e}")))?,
        })
    }
}

impl<S: Storage> Node<S> {
    // ─────────────────────────────────────────────────────────────────────────
    // Invites
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an invite granting `role` in `group`.
    pub async fn create_invite(&mut self, group: CoValueId, role: Role) -> Result<Invite> {
        let invite_role = role
            .invite()
            .ok_or_else(|| NodeError::InvalidOperation(format!("{role} cannot be invited")))?;
        self.require_role(&group, |r| r == Role::Admin, "invite to")?;

        let secret = self.crypto.new_agent_secret();
        let agent = MemberId::Agent(secret.agent_id());
        self.set_group_entry(group, &agent.to_string(), json!(invite_role.as_str()))
            .await?;
        if role.can_read() {
            let (_, key) = self.group_read_key(&group)?;
            self.reveal_key(group, &key, &agent).await?;
        }
        info!(%group, %role, "invite created");
        Ok(Invite {
            group,
            role,
            secret,
        })
    }

    /// Stop an unused invite from being accepted.
    pub async fn revoke_invite(&mut self, invite: &Invite) -> Result<()> {
        self.require_role(&invite.group, |r| r == Role::Admin, "revoke invites of")?;
        let agent = MemberId::Agent(invite.secret.agent_id());
        self.set_group_entry(invite.group, &agent.to_string(), json!(Role::Revoked.as_str()))
            .await?;
        Ok(())
    }

    /// Join `invite.group` with the invited role.
    ///
    /// Accepting an invite for a role no higher than the one already held
    /// does nothing.
    pub async fn accept_invite(&mut self, invite: &Invite) -> Result<()> {
        let group = invite.group;
        self.load(group).await?;
        let me = self.member_in(&group);
        let state = self
            .replica
            .group(&group)
            .ok_or(NodeError::Unavailable(group))?;
        if let Some(current) = state.current_role(&me, self.replica.groups()) {
            if current.rank() >= invite.role.rank() {
                debug!(%group, %current, "already a member, invite not used");
                return Ok(());
            }
        }

        let session = SessionId::new(None, invite.secret.agent_id(), self.crypto.random_u64());
        let joined = self
            .write_as_invite(invite, &session, &me.to_string(), json!(invite.role.as_str()))
            .await?;
        if let Some((_, reason)) = self
            .invalid_transactions(&group)
            .into_iter()
            .find(|(id, _)| *id == joined)
        {
            return Err(NodeError::InvalidInvite(reason));
        }

        if invite.role.can_read() {
            let (key_id, key) = self
                .replica
                .read_key_as(&group, &invite.secret)
                .ok_or_else(|| NodeError::InvalidInvite("invite cannot read the group key".into()))?;
            let sealed = seal_key(&*self.crypto, &key, &self.agent_id(), &group)?;
            let name = reveal_name(&key_id, &RevealTarget::Member(me));
            self.write_as_invite(invite, &session, &name, json!(sealed))
                .await?;
        }
        if invite.role == Role::WriteOnly {
            self.accept_write_only(invite, &session, me).await?;
        }
        info!(%group, role = %invite.role, "invite accepted");
        Ok(())
    }

    /// A write-only member's key, sealed to the member and to every admin.
    async fn accept_write_only(
        &mut self,
        invite: &Invite,
        session: &SessionId,
        me: MemberId,
    ) -> Result<()> {
        let group = invite.group;
        let write_key = self.crypto.new_key_secret();
        self.write_as_invite(
            invite,
            session,
            &format!("writeKeyFor_{me}"),
            json!(write_key.id().to_string()),
        )
        .await?;

        let admins: Vec<MemberId> = self
            .replica
            .group(&group)
            .map(|state| {
                state
                    .members()
                    .into_iter()
                    .filter(|(_, role)| *role == Role::Admin)
                    .map(|(member, _)| member)
                    .collect()
            })
            .unwrap_or_default();
        for member in std::iter::once(me).chain(admins) {
            let agent = match self.recipient(&member).await {
                Ok(agent) => agent,
                Err(e) => {
                    warn!(%group, %member, error = %e, "cannot share write key");
                    continue;
                }
            };
            let sealed = seal_key(&*self.crypto, &write_key, &agent, &group)?;
            let name = reveal_name(&write_key.id(), &RevealTarget::Member(member));
            self.write_as_invite(invite, session, &name, json!(sealed))
                .await?;
        }
        Ok(())
    }

    async fn write_as_invite(
        &mut self,
        invite: &Invite,
        session: &SessionId,
        key: &str,
        value: Value,
    ) -> Result<TransactionId> {
        let tx = Transaction::trusting(self.now(), &[MapOp::set(key, value).to_value()]);
        let id = self
            .replica
            .append_as(&invite.group, &invite.secret, session, tx)?;
        self.after_local_change(invite.group).await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_text_form() {
        let invite = Invite {
            group: CoValueId::from_bytes([4; 32]),
            role: Role::Writer,
            secret: AgentSecret::from_seed(&[8; 32]),
        };
        let parsed: Invite = invite.to_string().parse().unwrap();
        assert_eq!(parsed.group, invite.group);
        assert_eq!(parsed.role, Role::Writer);
        assert_eq!(parsed.secret.agent_id(), invite.secret.agent_id());
        assert!(!format!("{invite:?}").contains("agentSecret_"));
    }

    #[test]
    fn test_malformed_invites() {
        let group = CoValueId::from_bytes([4; 32]);
        let secret = AgentSecret::from_seed(&[8; 32]).to_secret_string();
        for text in [
            String::from("nonsense"),
            format!("{group}/writer"),
            format!("{group}/revoked/{secret}"),
            format!("{group}/readerInvite/{secret}"),
            format!("{group}/writer/agentSecret_zz"),
        ] {
            assert!(
                matches!(text.parse::<Invite>(), Err(NodeError::InvalidInvite(_))),
                "{text}"
            );
        }
    }
}
