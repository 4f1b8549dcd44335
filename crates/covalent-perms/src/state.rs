//! Group state computation.
//!
//! Group state is derived only, by replaying the group log through the
//! [`GroupValidator`](crate::validator::GroupValidator). It keeps every
//! valid role assignment and parent link as a timeline, so the role a
//! member held at any past instant can be answered without replaying again.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use covalent_core::{AgentId, CoValueHeader, CoValueId, KeyId, MemberId, Ruleset, TransactionId};
use covalent_crdt::{CoMap, DecodedTx};
use serde_json::Value;

use crate::error::{PermsError, Result};
use crate::role::{higher, ParentRole, Role};

/// Looks up the computed state of other groups (parents, accounts).
pub trait GroupResolver {
    fn group_state(&self, id: &CoValueId) -> Option<Arc<GroupState>>;
}

/// A resolver that knows no groups.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGroups;

impl GroupResolver for NoGroups {
    fn group_state(&self, _id: &CoValueId) -> Option<Arc<GroupState>> {
        None
    }
}

impl GroupResolver for HashMap<CoValueId, Arc<GroupState>> {
    fn group_state(&self, id: &CoValueId) -> Option<Arc<GroupState>> {
        self.get(id).cloned()
    }
}

/// One valid role assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleAssignment {
    pub role: Role,
    pub made_at: u64,
    pub by: MemberId,
    pub tx: TransactionId,
}

/// One valid change of a parent link.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentLink {
    pub role: ParentRole,
    pub made_at: u64,
    pub tx: TransactionId,
}

/// Where a parent link sits among the links of every group: log-merge
/// order, then the id of the group holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LinkOrder<'a> {
    pub made_at: u64,
    pub tx: &'a TransactionId,
    pub group: &'a CoValueId,
}

/// Membership and values of a group, as of its valid transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupState {
    id: CoValueId,
    initial_admin: MemberId,
    is_account: bool,
    roles: BTreeMap<MemberId, Vec<RoleAssignment>>,
    parents: BTreeMap<CoValueId, Vec<ParentLink>>,
    children: BTreeSet<CoValueId>,
    values: CoMap,
}

impl GroupState {
    /// Empty state for the group with this header.
    pub fn new(id: CoValueId, header: &CoValueHeader) -> Result<Self> {
        let Ruleset::Group { initial_admin } = &header.ruleset else {
            return Err(PermsError::NotAGroup(id));
        };
        Ok(Self {
            id,
            initial_admin: *initial_admin,
            is_account: header.is_account(),
            roles: BTreeMap::new(),
            parents: BTreeMap::new(),
            children: BTreeSet::new(),
            values: CoMap::default(),
        })
    }

    pub fn id(&self) -> CoValueId {
        self.id
    }

    pub fn initial_admin(&self) -> &MemberId {
        &self.initial_admin
    }

    pub fn is_account(&self) -> bool {
        self.is_account
    }

    /// The agent an account acts through.
    pub fn account_agent(&self) -> Option<AgentId> {
        match (self.is_account, self.initial_admin) {
            (true, MemberId::Agent(agent)) => Some(agent),
            _ => None,
        }
    }

    /// Every assignment ever made to `member`, oldest first.
    pub fn role_timeline(&self, member: &MemberId) -> &[RoleAssignment] {
        self.roles.get(member).map(Vec::as_slice).unwrap_or_default()
    }

    /// Role assigned directly in this group at `at`.
    pub fn direct_role(&self, member: &MemberId, at: u64) -> Option<Role> {
        self.role_timeline(member)
            .iter()
            .rev()
            .find(|a| a.made_at <= at)
            .map(|a| a.role)
    }

    pub fn current_direct_role(&self, member: &MemberId) -> Option<Role> {
        self.direct_role(member, u64::MAX)
    }

    /// Effective role at `at`: the highest of the direct role, the role of
    /// `everyone`, and roles derived through parent groups.
    pub fn role_of(&self, member: &MemberId, at: u64, resolver: &dyn GroupResolver) -> Option<Role> {
        self.role_of_inner(member, at, resolver, &mut BTreeSet::new())
    }

    fn role_of_inner(
        &self,
        member: &MemberId,
        at: u64,
        resolver: &dyn GroupResolver,
        visiting: &mut BTreeSet<CoValueId>,
    ) -> Option<Role> {
        if !visiting.insert(self.id) {
            return None;
        }

        let direct = self.direct_role(member, at);
        let everyone = if member.is_everyone() {
            None
        } else {
            self.direct_role(&MemberId::Everyone, at)
        };
        let mut best = higher(direct, everyone);

        for (parent_id, link) in self.parent_links_at(at) {
            let Some(parent) = resolver.group_state(&parent_id) else {
                continue;
            };
            let inherited = parent
                .role_of_inner(member, at, resolver, visiting)
                .and_then(|role| link.derive(role));
            best = higher(best, inherited);
        }

        visiting.remove(&self.id);
        best
    }

    pub fn current_role(&self, member: &MemberId, resolver: &dyn GroupResolver) -> Option<Role> {
        self.role_of(member, u64::MAX, resolver)
    }

    /// Direct roles as of `at`.
    pub fn snapshot_at(&self, at: u64) -> BTreeMap<MemberId, Role> {
        self.roles
            .keys()
            .filter_map(|m| Some((*m, self.direct_role(m, at)?)))
            .collect()
    }

    /// Current direct members and their roles.
    pub fn members(&self) -> BTreeMap<MemberId, Role> {
        self.snapshot_at(u64::MAX)
    }

    /// Active parent links at `at`.
    pub fn parent_links_at(&self, at: u64) -> Vec<(CoValueId, ParentRole)> {
        self.parents
            .iter()
            .filter_map(|(id, links)| {
                let link = links.iter().rev().find(|l| l.made_at <= at)?;
                (link.role != ParentRole::Fixed(Role::Revoked)).then_some((*id, link.role))
            })
            .collect()
    }

    pub fn parents(&self) -> Vec<(CoValueId, ParentRole)> {
        self.parent_links_at(u64::MAX)
    }

    pub fn children(&self) -> impl Iterator<Item = &CoValueId> {
        self.children.iter()
    }

    /// Parent links as they stood just before `before`.
    pub fn parent_links_before(&self, before: LinkOrder<'_>) -> Vec<(CoValueId, ParentRole)> {
        self.parents
            .iter()
            .filter_map(|(id, links)| {
                let link = links
                    .iter()
                    .filter(|l| self.link_order(l) < before)
                    .max_by(|a, b| self.link_order(a).cmp(&self.link_order(b)))?;
                (link.role != ParentRole::Fixed(Role::Revoked)).then_some((*id, link.role))
            })
            .collect()
    }

    /// Whether `target` is this group or reachable from it through parent
    /// links ordered before `before`.
    ///
    /// Only earlier links count, so every replica reaches the same answer
    /// whatever order it computed groups in.
    pub fn reaches_before(
        &self,
        target: &CoValueId,
        before: LinkOrder<'_>,
        resolver: &dyn GroupResolver,
    ) -> bool {
        let mut seen = BTreeSet::new();
        let mut queue = vec![self.id];
        while let Some(id) = queue.pop() {
            if id == *target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            let links = if id == self.id {
                self.parent_links_before(before)
            } else {
                match resolver.group_state(&id) {
                    Some(state) => state.parent_links_before(before),
                    None => continue,
                }
            };
            queue.extend(links.into_iter().map(|(id, _)| id));
        }
        false
    }

    fn link_order<'a>(&'a self, link: &'a ParentLink) -> LinkOrder<'a> {
        LinkOrder {
            made_at: link.made_at,
            tx: &link.tx,
            group: &self.id,
        }
    }

    /// All keyed values, including role and key entries.
    pub fn values(&self) -> &CoMap {
        &self.values
    }

    pub fn value_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Id of the key current readers use.
    pub fn read_key_id(&self) -> Option<KeyId> {
        self.value_str("readKey")?.parse().ok()
    }

    /// Id of the write key of a write-only member.
    pub fn write_key_for(&self, member: &MemberId) -> Option<KeyId> {
        self.value_str(&format!("writeKeyFor_{member}"))?.parse().ok()
    }

    pub fn profile(&self) -> Option<CoValueId> {
        self.value_str("profile")?.parse().ok()
    }

    pub(crate) fn assign_role(&mut self, member: MemberId, assignment: RoleAssignment) {
        self.roles.entry(member).or_default().push(assignment);
    }

    pub(crate) fn link_parent(&mut self, parent: CoValueId, link: ParentLink) {
        self.parents.entry(parent).or_default().push(link);
    }

    pub(crate) fn add_child(&mut self, child: CoValueId) {
        self.children.insert(child);
    }

    pub(crate) fn record_values(&mut self, tx: &DecodedTx) {
        self.values.apply(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covalent_core::{content_types, AgentSecret, SessionId};

    fn member(n: u8) -> MemberId {
        MemberId::Agent(AgentSecret::from_seed(&[n; 32]).agent_id())
    }

    fn assignment(role: Role, made_at: u64) -> RoleAssignment {
        let session = SessionId::new(None, AgentSecret::from_seed(&[1; 32]).agent_id(), 0);
        RoleAssignment {
            role,
            made_at,
            by: member(1),
            tx: TransactionId::new(session, 0),
        }
    }

    fn group(id: u8) -> GroupState {
        let header = CoValueHeader::new(
            content_types::GROUP,
            Ruleset::Group {
                initial_admin: member(1),
            },
        );
        GroupState::new(CoValueId::from_bytes([id; 32]), &header).unwrap()
    }

    fn link(role: ParentRole, made_at: u64) -> ParentLink {
        ParentLink {
            role,
            made_at,
            tx: assignment(Role::Admin, 0).tx,
        }
    }

    #[test]
    fn test_role_timeline() {
        let mut state = group(1);
        state.assign_role(member(2), assignment(Role::Writer, 10));
        state.assign_role(member(2), assignment(Role::Revoked, 20));

        assert_eq!(state.direct_role(&member(2), 5), None);
        assert_eq!(state.direct_role(&member(2), 15), Some(Role::Writer));
        assert_eq!(state.current_direct_role(&member(2)), Some(Role::Revoked));
        assert_eq!(state.snapshot_at(15).len(), 1);
    }

    #[test]
    fn test_everyone_role_applies_to_all() {
        let mut state = group(1);
        state.assign_role(MemberId::Everyone, assignment(Role::Reader, 1));
        assert_eq!(state.current_role(&member(9), &NoGroups), Some(Role::Reader));
        assert_eq!(state.current_role(&MemberId::Everyone, &NoGroups), Some(Role::Reader));
    }

    #[test]
    fn test_parent_roles_are_derived() {
        let mut parent = group(1);
        parent.assign_role(member(2), assignment(Role::Writer, 1));
        parent.assign_role(member(3), assignment(Role::WriteOnly, 1));

        let mut child = group(2);
        child.link_parent(parent.id(), link(ParentRole::Extend, 5));
        child.link_parent(parent.id(), link(ParentRole::Fixed(Role::Revoked), 50));

        let mut resolver: HashMap<CoValueId, Arc<GroupState>> = HashMap::new();
        resolver.insert(parent.id(), Arc::new(parent.clone()));

        assert_eq!(child.role_of(&member(2), 10, &resolver), Some(Role::Writer));
        assert_eq!(child.role_of(&member(2), 2, &resolver), None);
        assert_eq!(child.role_of(&member(3), 10, &resolver), None);
        assert_eq!(child.role_of(&member(2), 60, &resolver), None);
        assert!(child.parents().is_empty());
        assert_eq!(child.parent_links_at(10).len(), 1);
    }

    #[test]
    fn test_cyclic_links_terminate() {
        let mut a = group(1);
        let mut b = group(2);
        a.link_parent(b.id(), link(ParentRole::Extend, 1));
        b.link_parent(a.id(), link(ParentRole::Extend, 1));
        b.assign_role(member(2), assignment(Role::Reader, 1));

        let mut resolver: HashMap<CoValueId, Arc<GroupState>> = HashMap::new();
        resolver.insert(a.id(), Arc::new(a.clone()));
        resolver.insert(b.id(), Arc::new(b.clone()));

        assert_eq!(a.current_role(&member(2), &resolver), Some(Role::Reader));
        let tx = assignment(Role::Admin, 0).tx;
        let late = LinkOrder {
            made_at: 5,
            tx: &tx,
            group: &a.id(),
        };
        assert!(a.reaches_before(&b.id(), late, &resolver));
        assert!(!a.reaches_before(&CoValueId::from_bytes([9; 32]), late, &resolver));
    }

    #[test]
    fn test_reachability_only_counts_earlier_links() {
        let mut a = group(1);
        let mut b = group(2);
        let c = group(3);
        a.link_parent(b.id(), link(ParentRole::Extend, 10));
        b.link_parent(c.id(), link(ParentRole::Extend, 30));

        let mut resolver: HashMap<CoValueId, Arc<GroupState>> = HashMap::new();
        resolver.insert(b.id(), Arc::new(b.clone()));
        let tx = assignment(Role::Admin, 0).tx;
        let checker = CoValueId::from_bytes([8; 32]);
        let at = |made_at| LinkOrder {
            made_at,
            tx: &tx,
            group: &checker,
        };

        assert!(!a.reaches_before(&b.id(), at(5), &resolver));
        assert!(a.reaches_before(&b.id(), at(20), &resolver));
        assert!(!a.reaches_before(&c.id(), at(20), &resolver));
        assert!(a.reaches_before(&c.id(), at(40), &resolver));
        assert_eq!(a.parent_links_before(at(20)), vec![(b.id(), ParentRole::Extend)]);

        // Same time and transaction id: the group id decides.
        let low = CoValueId::from_bytes([0; 32]);
        let high = CoValueId::from_bytes([255; 32]);
        let tie = |group| LinkOrder {
            made_at: 10,
            tx: &tx,
            group,
        };
        assert_eq!(a.parent_links_before(tie(&high)).len(), 1);
        assert!(a.parent_links_before(tie(&low)).is_empty());
    }
}
