//! Groups, accounts and the keys that go with their membership.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use covalent_core::{
    content_types, AgentId, CoValueHeader, CoValueId, KeyId, KeySecret, MemberId, Privacy,
    Ruleset,
};
use covalent_perms::{
    reveal_name, reveal_to_everyone, seal_key, wrap_key, GroupResolver, GroupState, ParentRole,
    RevealTarget, Role,
};
use covalent_store::Storage;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{NodeError, Result};
use crate::node::Node;

/// Read access to something with members: a group or an account.
pub trait MembershipOwner {
    fn owner_id(&self) -> CoValueId;

    fn group_state(&self) -> &GroupState;

    /// Other groups, for roles inherited through parents.
    fn resolver(&self) -> &dyn GroupResolver;

    /// The member the local account acts as here.
    fn me(&self) -> MemberId;

    /// Effective role of `member`, including parents and `everyone`.
    fn role_of(&self, member: &MemberId) -> Option<Role> {
        self.group_state().current_role(member, self.resolver())
    }

    fn my_role(&self) -> Option<Role> {
        self.role_of(&self.me())
    }

    /// Direct members and their current roles.
    fn members(&self) -> BTreeMap<MemberId, Role> {
        self.group_state().members()
    }

    fn can_read(&self) -> bool {
        self.my_role().is_some_and(Role::can_read)
    }

    fn can_write(&self) -> bool {
        self.my_role().is_some_and(Role::can_write)
    }

    fn is_admin(&self) -> bool {
        self.my_role() == Some(Role::Admin)
    }
}

/// Snapshot of a group as the node saw it.
#[derive(Debug, Clone)]
pub struct GroupHandle {
    state: Arc<GroupState>,
    groups: HashMap<CoValueId, Arc<GroupState>>,
    me: MemberId,
}

impl GroupHandle {
    pub fn id(&self) -> CoValueId {
        self.state.id()
    }

    /// Role of `member` at `at`, e.g. when a historical write was made.
    pub fn role_at(&self, member: &MemberId, at: u64) -> Option<Role> {
        self.state.role_of(member, at, &self.groups)
    }

    pub fn parents(&self) -> Vec<(CoValueId, ParentRole)> {
        self.state.parents()
    }

    pub fn children(&self) -> Vec<CoValueId> {
        self.state.children().copied().collect()
    }

    pub fn read_key_id(&self) -> Option<KeyId> {
        self.state.read_key_id()
    }
}

impl MembershipOwner for GroupHandle {
    fn owner_id(&self) -> CoValueId {
        self.state.id()
    }

    fn group_state(&self) -> &GroupState {
        &self.state
    }

    fn resolver(&self) -> &dyn GroupResolver {
        &self.groups
    }

    fn me(&self) -> MemberId {
        self.me
    }
}

/// Snapshot of an account.
#[derive(Debug, Clone)]
pub struct AccountHandle {
    state: Arc<GroupState>,
    groups: HashMap<CoValueId, Arc<GroupState>>,
    me: MemberId,
}

impl AccountHandle {
    pub fn id(&self) -> CoValueId {
        self.state.id()
    }

    /// The agent this account acts through.
    pub fn agent(&self) -> Option<AgentId> {
        self.state.account_agent()
    }

    pub fn profile(&self) -> Option<CoValueId> {
        self.state.profile()
    }
}

impl MembershipOwner for AccountHandle {
    fn owner_id(&self) -> CoValueId {
        self.state.id()
    }

    fn group_state(&self) -> &GroupState {
        &self.state
    }

    fn resolver(&self) -> &dyn GroupResolver {
        &self.groups
    }

    fn me(&self) -> MemberId {
        self.me
    }
}

fn is_admin(role: Role) -> bool {
    role == Role::Admin
}

impl<S: Storage> Node<S> {
    // ─────────────────────────────────────────────────────────────────────────
    // Groups
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a group with the local account as its only admin.
    pub async fn create_group(&mut self) -> Result<CoValueId> {
        let me = MemberId::Account(self.account);
        let header = CoValueHeader::new(
            content_types::GROUP,
            Ruleset::Group { initial_admin: me },
        )
        .with_uniqueness(hex::encode(self.crypto.random_u64().to_be_bytes()))
        .with_created_at(self.now());
        let group = self.adopt(header).await?;

        self.set_group_entry(group, &me.to_string(), json!(Role::Admin.as_str()))
            .await?;
        let key = self.crypto.new_key_secret();
        self.set_group_entry(group, "readKey", json!(key.id().to_string()))
            .await?;
        self.reveal_key(group, &key, &me).await?;
        info!(%group, "group created");
        Ok(group)
    }

    pub async fn group(&mut self, id: CoValueId) -> Result<GroupHandle> {
        self.load(id).await?;
        let state = self.replica.group(&id).ok_or(NodeError::WrongContentType {
            id,
            expected: content_types::GROUP,
            actual: self
                .replica
                .header(&id)
                .map(|h| h.content_type.clone())
                .unwrap_or_default(),
        })?;
        Ok(GroupHandle {
            me: self.member_in(&id),
            groups: self.replica.groups().clone(),
            state,
        })
    }

    /// The local account.
    pub fn account(&mut self) -> Result<AccountHandle> {
        self.account_handle(self.account)
    }

    /// Any loaded account.
    pub fn account_handle(&mut self, id: CoValueId) -> Result<AccountHandle> {
        let state = self
            .replica
            .group(&id)
            .filter(|state| state.is_account())
            .ok_or(NodeError::Unavailable(id))?;
        Ok(AccountHandle {
            me: self.member_in(&id),
            groups: self.replica.groups().clone(),
            state,
        })
    }

    /// Give `member` a role in `group`, sharing the keys the role needs.
    pub async fn add_member(&mut self, group: CoValueId, member: MemberId, role: Role) -> Result<()> {
        if role.is_invite() {
            return Err(NodeError::InvalidOperation(
                "invite roles are handed out with create_invite".into(),
            ));
        }
        if member.is_everyone() && !role.allowed_for_everyone() {
            return Err(NodeError::InvalidOperation(format!(
                "everyone cannot be {role}"
            )));
        }
        self.require_role(&group, is_admin, "add members to")?;
        if let MemberId::Account(account) = member {
            self.load(account).await?;
        }

        self.set_group_entry(group, &member.to_string(), json!(role.as_str()))
            .await?;

        if role.can_read() {
            let (_, key) = self.group_read_key(&group)?;
            self.reveal_key(group, &key, &member).await?;
        }
        if role == Role::WriteOnly {
            self.give_write_key(group, member).await?;
        }
        debug!(%group, %member, %role, "member added");
        Ok(())
    }

    /// Revoke `member` and rotate the read key so it cannot read what follows.
    pub async fn remove_member(&mut self, group: CoValueId, member: MemberId) -> Result<()> {
        self.require_role(&group, is_admin, "remove members from")?;
        self.set_group_entry(group, &member.to_string(), json!(Role::Revoked.as_str()))
            .await?;
        self.rotate_read_key(group).await?;
        info!(%group, %member, "member removed");
        Ok(())
    }

    /// Replace the read key of `group` and of every child group we administer.
    pub async fn rotate_read_key(&mut self, group: CoValueId) -> Result<KeyId> {
        let mut rotated = None;
        let mut queue = vec![group];
        let mut seen = BTreeSet::new();
        while let Some(next) = queue.pop() {
            if !seen.insert(next) {
                continue;
            }
            if let Err(e) = self.load(next).await {
                warn!(group = %next, error = %e, "cannot load child group for rotation");
                continue;
            }
            match self.rotate_one(next).await {
                Ok(key) if next == group => rotated = Some(key),
                Ok(_) => {}
                Err(NodeError::Unauthorized(reason)) if next != group => {
                    warn!(group = %next, %reason, "skipping rotation of child group");
                    continue;
                }
                Err(e) => return Err(e),
            }
            if let Some(state) = self.replica.group(&next) {
                queue.extend(state.children().copied());
            }
        }
        rotated.ok_or(NodeError::Unavailable(group))
    }

    async fn rotate_one(&mut self, group: CoValueId) -> Result<KeyId> {
        self.require_role(&group, is_admin, "rotate keys of")?;
        let state = self
            .replica
            .group(&group)
            .ok_or(NodeError::Unavailable(group))?;
        let old = self.replica.read_key(&group);
        let new = self.crypto.new_key_secret();

        self.set_group_entry(group, "readKey", json!(new.id().to_string()))
            .await?;

        let mut readers: Vec<MemberId> = state
            .members()
            .into_iter()
            .filter(|(_, role)| {
                role.can_read() || role.invite_target().is_some_and(Role::can_read)
            })
            .map(|(member, _)| member)
            .collect();
        let me = self.member_in(&group);
        if !readers.contains(&me) {
            readers.push(me);
        }
        for member in readers {
            match self.reveal_key(group, &new, &member).await {
                Ok(()) => {}
                Err(NodeError::Unavailable(id)) => {
                    warn!(%group, %member, account = %id, "cannot reveal new key to unloadable account");
                }
                Err(e) => return Err(e),
            }
        }

        // Old content stays readable through the new key.
        if let Some((_, old)) = old {
            self.wrap_under(group, &old, &new).await?;
        }
        for (member, role) in state.members() {
            if role != Role::WriteOnly {
                continue;
            }
            let Some(write_key) = state
                .write_key_for(&member)
                .and_then(|id| self.replica.find_key(&group, &id))
            else {
                continue;
            };
            self.wrap_under(group, &write_key, &new).await?;
        }
        for (parent, _) in state.parents() {
            if let Some((_, parent_key)) = self.replica.read_key(&parent) {
                self.wrap_under(group, &new, &parent_key).await?;
            }
        }
        debug!(%group, key = %new.id(), "read key rotated");
        Ok(new.id())
    }

    /// Make `child` inherit members from `parent`.
    pub async fn extend_group(
        &mut self,
        child: CoValueId,
        parent: CoValueId,
        link: ParentRole,
    ) -> Result<()> {
        self.require_role(&child, is_admin, "extend")?;
        self.load(parent).await?;
        if link == ParentRole::Fixed(Role::Revoked) {
            return self.unlink_parent(child, parent).await;
        }
        let (_, parent_key) = self.group_read_key(&parent)?;
        let (_, child_key) = self.group_read_key(&child)?;

        self.set_group_entry(child, &format!("parent_{parent}"), json!(link.as_str()))
            .await?;
        self.set_group_entry(parent, &format!("child_{child}"), json!(link.as_str()))
            .await?;
        self.wrap_under(child, &child_key, &parent_key).await?;
        info!(%child, %parent, link = link.as_str(), "group extended");
        Ok(())
    }

    /// Cut the link from `child` to `parent` and rotate the child's key.
    pub async fn unlink_parent(&mut self, child: CoValueId, parent: CoValueId) -> Result<()> {
        self.require_role(&child, is_admin, "unlink")?;
        self.set_group_entry(
            child,
            &format!("parent_{parent}"),
            json!(Role::Revoked.as_str()),
        )
        .await?;
        self.rotate_read_key(child).await?;
        Ok(())
    }

    /// Publish a profile map readable by everyone and point the account at it.
    pub async fn set_profile(&mut self, name: &str) -> Result<CoValueId> {
        let group = self.create_group().await?;
        self.add_member(group, MemberId::Everyone, Role::Reader).await?;
        let profile = self.create_map(group).await?;
        self.set_with(profile, "name", name, Privacy::Trusting).await?;
        self.set_group_entry(self.account, "profile", json!(profile.to_string()))
            .await?;
        Ok(profile)
    }

    // ---- Key plumbing ----

    /// Whether the local account can unlock `key_id` of `group` from the
    /// reveals it can see, whatever role it holds now.
    pub fn holds_key(&mut self, group: &CoValueId, key_id: &KeyId) -> bool {
        self.replica.find_key(group, key_id).is_some()
    }

    pub(crate) fn group_read_key(&mut self, group: &CoValueId) -> Result<(KeyId, KeySecret)> {
        self.replica
            .read_key(group)
            .ok_or_else(|| NodeError::Unauthorized(format!("cannot read the key of {group}")))
    }

    /// The agent `member` acts through, loading its account if needed.
    pub(crate) async fn recipient(&mut self, member: &MemberId) -> Result<AgentId> {
        match member {
            MemberId::Agent(agent) => Ok(*agent),
            MemberId::Account(account) if *account == self.account => Ok(self.agent_id()),
            MemberId::Account(account) => {
                self.load(*account).await?;
                self.replica
                    .group(account)
                    .and_then(|state| state.account_agent())
                    .ok_or_else(|| {
                        NodeError::InvalidOperation(format!("{account} is not an account"))
                    })
            }
            MemberId::Everyone => Err(NodeError::InvalidOperation(
                "everyone has no agent".into(),
            )),
        }
    }

    /// Write `<key>_for_<member>`: sealed to the member, or plain for everyone.
    pub(crate) async fn reveal_key(
        &mut self,
        group: CoValueId,
        key: &KeySecret,
        member: &MemberId,
    ) -> Result<()> {
        let value = match member {
            MemberId::Everyone => reveal_to_everyone(key),
            _ => {
                let agent = self.recipient(member).await?;
                seal_key(&*self.crypto, key, &agent, &group)?
            }
        };
        let name = reveal_name(&key.id(), &RevealTarget::Member(*member));
        self.set_group_entry(group, &name, json!(value)).await?;
        Ok(())
    }

    /// Write `<key>_for_<under>`: `key` encrypted under another key.
    pub(crate) async fn wrap_under(
        &mut self,
        group: CoValueId,
        key: &KeySecret,
        under: &KeySecret,
    ) -> Result<()> {
        let wrapped = wrap_key(&*self.crypto, key, under)?;
        let name = reveal_name(&key.id(), &RevealTarget::Key(under.id()));
        self.set_group_entry(group, &name, json!(wrapped)).await?;
        Ok(())
    }

    /// A fresh write key for a write-only member, readable by readers.
    async fn give_write_key(&mut self, group: CoValueId, member: MemberId) -> Result<()> {
        let write_key = self.crypto.new_key_secret();
        self.set_group_entry(
            group,
            &format!("writeKeyFor_{member}"),
            json!(write_key.id().to_string()),
        )
        .await?;
        self.reveal_key(group, &write_key, &member).await?;
        let (_, read_key) = self.group_read_key(&group)?;
        self.wrap_under(group, &write_key, &read_key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covalent_core::{AgentSecret, ManualClock};
    use covalent_store::MemoryStorage;

    async fn node(seed: u8) -> Node<MemoryStorage> {
        Node::builder(AgentSecret::from_seed(&[seed; 32]), MemoryStorage::new())
            .clock(Arc::new(ManualClock::new(1_000)))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_group_makes_us_admin() {
        let mut node = node(1).await;
        let group = node.create_group().await.unwrap();
        let handle = node.group(group).await.unwrap();
        assert!(handle.is_admin());
        assert!(handle.can_read());
        assert!(handle.read_key_id().is_some());
        assert_eq!(
            handle.members().get(&MemberId::Account(node.account_id())),
            Some(&Role::Admin)
        );
        assert!(node.invalid_transactions(&group).is_empty());
    }

    #[tokio::test]
    async fn test_private_write_round_trip() {
        let mut node = node(1).await;
        let group = node.create_group().await.unwrap();
        let map = node.create_map(group).await.unwrap();
        node.set(map, "secret", "s3cr3t").await.unwrap();

        let core = node.replica.core(&map).unwrap();
        let tx = core.sorted_transactions()[0].tx.clone();
        assert!(tx.key_used().is_some());
        assert_eq!(node.map(map).unwrap().get_str("secret"), Some("s3cr3t"));
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_content_readable() {
        let mut node = node(1).await;
        let group = node.create_group().await.unwrap();
        let map = node.create_map(group).await.unwrap();
        node.set(map, "before", 1).await.unwrap();

        let old = node.group(group).await.unwrap().read_key_id();
        let new = node.rotate_read_key(group).await.unwrap();
        assert_ne!(old, Some(new));
        node.set(map, "after", 2).await.unwrap();

        let view = node.map(map).unwrap();
        assert_eq!(view.get_i64("before"), Some(1));
        assert_eq!(view.get_i64("after"), Some(2));
        assert!(node.holds_key(&group, &new));
        assert!(node.holds_key(&group, &old.unwrap()));
    }

    #[tokio::test]
    async fn test_invite_roles_are_refused() {
        let mut node = node(1).await;
        let group = node.create_group().await.unwrap();
        let other = MemberId::Agent(AgentSecret::from_seed(&[9; 32]).agent_id());
        assert!(matches!(
            node.add_member(group, other, Role::ReaderInvite).await,
            Err(NodeError::InvalidOperation(_))
        ));
        assert!(matches!(
            node.add_member(group, MemberId::Everyone, Role::Admin).await,
            Err(NodeError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_profile() {
        let mut node = node(1).await;
        let profile = node.set_profile("Ada").await.unwrap();
        assert_eq!(node.account().unwrap().profile(), Some(profile));
        assert_eq!(node.map(profile).unwrap().get_str("name"), Some("Ada"));
    }
}
