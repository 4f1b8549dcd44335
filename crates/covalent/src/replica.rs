//! The CoValues a node holds in memory.
//!
//! The replica owns every [`CoValueCore`], keeps group states current and
//! folds content views on demand. Group states are recomputed when their
//! own log or a group they depend on changes, and a group's generation
//! moves only when its recomputed state differs. A value owned by a group
//! is revalidated from scratch only when the generation of a group its
//! verdicts depend on moved; otherwise new transactions are validated
//! incrementally.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use covalent_core::{
    parse_changes, validate_content_piece, AgentSecret, CoValueContent, CoValueCore, CoValueHeader,
    CoValueId, CryptoProvider, KeyId, KeySecret, KnownState, MergeOutcome, Priority, Ruleset,
    SessionId, Transaction, TransactionId, TxRef,
};
use covalent_crdt::{check_changes, CoList, CoMap, CoStream, DecodedTx, MapOp};
use covalent_perms::{
    compute_member_state, AllowAllValidator, GroupState, KeyFinder, OwnedValidator,
};
use covalent_sync::SyncHost;
use tracing::{debug, warn};

use crate::error::{NodeError, Result};
use crate::registry::{ContentKind, ContentRegistry};

/// A folded view, shared with the handles built from it.
#[derive(Debug, Clone)]
pub(crate) enum View {
    Map(Arc<CoMap>),
    List(Arc<CoList>),
    Stream(Arc<CoStream>),
    Opaque,
}

struct Entry {
    core: CoValueCore,
    /// Core version and dependency generations the group state was computed from.
    group_stamp: Option<Vec<u64>>,
    /// Group generations the cached verdicts were computed under.
    validated_stamp: Option<Stamp>,
    /// Group dependencies as of a core version.
    deps: Option<(u64, Vec<CoValueId>)>,
    view: Option<((Vec<u64>, Stamp), View)>,
}

/// Generations of the groups something was computed from.
type Stamp = Vec<(CoValueId, u64)>;

/// Passes over the groups before giving up on them settling.
const MAX_SETTLE_PASSES: usize = 32;

impl Entry {
    fn new(core: CoValueCore) -> Self {
        Self {
            core,
            group_stamp: None,
            validated_stamp: None,
            deps: None,
            view: None,
        }
    }
}

pub(crate) struct Replica {
    crypto: Arc<dyn CryptoProvider>,
    registry: ContentRegistry,
    agent: AgentSecret,
    account: Option<CoValueId>,
    entries: HashMap<CoValueId, Entry>,
    groups: HashMap<CoValueId, Arc<GroupState>>,
    generations: HashMap<CoValueId, u64>,
    keys: HashMap<KeyId, KeySecret>,
}

impl Replica {
    pub(crate) fn new(
        crypto: Arc<dyn CryptoProvider>,
        registry: ContentRegistry,
        agent: AgentSecret,
    ) -> Self {
        Self {
            crypto,
            registry,
            agent,
            account: None,
            entries: HashMap::new(),
            groups: HashMap::new(),
            generations: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    pub(crate) fn agent(&self) -> &AgentSecret {
        &self.agent
    }

    pub(crate) fn set_account(&mut self, account: CoValueId) {
        self.account = Some(account);
    }

    pub(crate) fn registry(&self) -> &ContentRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut ContentRegistry {
        // Views depend on registered kinds.
        for entry in self.entries.values_mut() {
            entry.view = None;
        }
        &mut self.registry
    }

    pub(crate) fn contains(&self, id: &CoValueId) -> bool {
        self.entries.contains_key(id)
    }

    pub(crate) fn ids(&self) -> Vec<CoValueId> {
        let mut ids: Vec<CoValueId> = self.entries.keys().copied().collect();
        ids.sort();
        ids
    }

    pub(crate) fn core(&self, id: &CoValueId) -> Option<&CoValueCore> {
        self.entries.get(id).map(|e| &e.core)
    }

    pub(crate) fn header(&self, id: &CoValueId) -> Option<&CoValueHeader> {
        self.core(id).map(CoValueCore::header)
    }

    /// Start holding a freshly created CoValue.
    pub(crate) fn create(&mut self, header: CoValueHeader) -> CoValueId {
        let core = CoValueCore::new(&*self.crypto, header);
        let id = core.id();
        self.entries.entry(id).or_insert_with(|| Entry::new(core));
        id
    }

    /// Forget a CoValue. Group states built from it are dropped too.
    pub(crate) fn evict(&mut self, id: &CoValueId) -> bool {
        let removed = self.entries.remove(id).is_some();
        if self.groups.remove(id).is_some() {
            *self.generations.entry(*id).or_default() += 1;
        }
        removed
    }

    pub(crate) fn append(
        &mut self,
        id: &CoValueId,
        session: &SessionId,
        tx: Transaction,
    ) -> Result<TransactionId> {
        let entry = self.entries.get_mut(id).ok_or(NodeError::Unavailable(*id))?;
        Ok(entry
            .core
            .append_local_transaction(&*self.crypto, &self.agent, session, tx)?)
    }

    /// Append signed by another agent, e.g. an invite agent.
    pub(crate) fn append_as(
        &mut self,
        id: &CoValueId,
        agent: &AgentSecret,
        session: &SessionId,
        tx: Transaction,
    ) -> Result<TransactionId> {
        let entry = self.entries.get_mut(id).ok_or(NodeError::Unavailable(*id))?;
        Ok(entry
            .core
            .append_local_transaction(&*self.crypto, agent, session, tx)?)
    }

    // ---- Groups ----

    /// Current state of a group, recomputed if anything it depends on changed.
    pub(crate) fn group(&mut self, id: &CoValueId) -> Option<Arc<GroupState>> {
        self.refresh_groups();
        self.groups.get(id).cloned()
    }

    /// Every group state, refreshed.
    pub(crate) fn groups(&mut self) -> &HashMap<CoValueId, Arc<GroupState>> {
        self.refresh_groups();
        &self.groups
    }

    /// Recompute stale group states until a pass changes none of them.
    ///
    /// Groups linked in a cycle are computed against each other's previous
    /// state, so one pass is not enough for them.
    fn refresh_groups(&mut self) {
        let mut ids: Vec<CoValueId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.core.header().is_group())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        for _ in 0..MAX_SETTLE_PASSES {
            let mut done = BTreeSet::new();
            let mut changed = false;
            for id in &ids {
                changed |= self.refresh_group(*id, &mut done);
            }
            if !changed {
                return;
            }
        }
        warn!(groups = ids.len(), "group states did not settle");
    }

    /// Returns whether the state of `id` changed.
    fn refresh_group(&mut self, id: CoValueId, done: &mut BTreeSet<CoValueId>) -> bool {
        if !done.insert(id) {
            return false;
        }
        let deps = match self.entries.get_mut(&id) {
            Some(entry) if entry.core.header().is_group() => {
                let version = entry.core.version();
                match &entry.deps {
                    Some((at, deps)) if *at == version => deps.clone(),
                    _ => {
                        let deps = group_dependencies(&entry.core);
                        entry.deps = Some((version, deps.clone()));
                        deps
                    }
                }
            }
            _ => return false,
        };
        let mut changed = false;
        for dep in &deps {
            changed |= self.refresh_group(*dep, done);
        }

        let Some(entry) = self.entries.get_mut(&id) else {
            return changed;
        };
        let dep_generations: Vec<u64> = deps
            .iter()
            .map(|d| self.generations.get(d).copied().unwrap_or(0))
            .collect();
        let stamp: Vec<u64> = std::iter::once(entry.core.version())
            .chain(dep_generations.iter().copied())
            .collect();
        if entry.group_stamp.as_ref() == Some(&stamp) {
            return changed;
        }

        match compute_member_state(&mut entry.core, &self.groups) {
            Ok(state) if self.groups.get(&id).is_some_and(|old| **old == state) => {}
            Ok(state) => {
                debug!(group = %id, members = state.members().len(), "group state recomputed");
                self.groups.insert(id, Arc::new(state));
                *self.generations.entry(id).or_default() += 1;
                changed = true;
            }
            Err(e) => warn!(group = %id, error = %e, "cannot compute group state"),
        }
        entry.group_stamp = Some(
            std::iter::once(entry.core.version())
                .chain(dep_generations)
                .collect(),
        );
        changed
    }

    /// Generations of every group the verdicts and keys of `id` depend on:
    /// its owner, the accounts writing to it, and what those depend on.
    fn dependency_stamp(&self, id: &CoValueId) -> Stamp {
        let Some(entry) = self.entries.get(id) else {
            return Stamp::new();
        };
        let mut queue: Vec<CoValueId> = entry.core.header().owner_group().into_iter().collect();
        queue.extend(entry.core.sessions().filter_map(|log| log.session().account));
        if entry.core.header().is_group() {
            queue.push(*id);
        }
        let mut seen = BTreeSet::new();
        while let Some(next) = queue.pop() {
            if !seen.insert(next) {
                continue;
            }
            if let Some((_, deps)) = self.entries.get(&next).and_then(|e| e.deps.as_ref()) {
                queue.extend(deps.iter().copied());
            }
        }
        seen.into_iter()
            .map(|group| (group, self.generations.get(&group).copied().unwrap_or(0)))
            .collect()
    }

    /// The read key of `group`, if the local agent can get it.
    pub(crate) fn read_key(&mut self, group: &CoValueId) -> Option<(KeyId, KeySecret)> {
        let state = self.group(group)?;
        KeyFinder::new(
            &*self.crypto,
            &self.agent,
            self.account,
            &self.groups,
            &mut self.keys,
        )
        .read_key(&state)
    }

    pub(crate) fn find_key(&mut self, group: &CoValueId, key_id: &KeyId) -> Option<KeySecret> {
        let state = self.group(group)?;
        KeyFinder::new(
            &*self.crypto,
            &self.agent,
            self.account,
            &self.groups,
            &mut self.keys,
        )
        .find(&state, key_id)
    }

    /// The read key of `group` as seen by `agent` alone.
    pub(crate) fn read_key_as(
        &mut self,
        group: &CoValueId,
        agent: &AgentSecret,
    ) -> Option<(KeyId, KeySecret)> {
        let state = self.group(group)?;
        KeyFinder::new(&*self.crypto, agent, None, &self.groups, &mut self.keys).read_key(&state)
    }

    // ---- Validation and views ----

    /// Bring the verdicts of `id` up to date.
    pub(crate) fn validate(&mut self, id: &CoValueId) {
        self.refresh_groups();
        let Some(header) = self.header(id).cloned() else {
            return;
        };
        let structural = self.registry.structural_type(&header.content_type);

        match header.ruleset {
            // Validated while refreshing.
            Ruleset::Group { .. } => {}
            Ruleset::OwnedByGroup { group } => {
                let Some(state) = self.groups.get(&group).cloned() else {
                    debug!(covalue = %id, %group, "owner group not loaded yet");
                    return;
                };
                let stamp = self.dependency_stamp(id);
                let Some(entry) = self.entries.get_mut(id) else {
                    return;
                };
                if entry.validated_stamp.as_ref() != Some(&stamp) {
                    entry.core.invalidate_validity();
                    entry.validated_stamp = Some(stamp);
                }
                let mut validator = OwnedValidator::new(state, &self.groups, structural);
                entry.core.validate(&mut validator);
            }
            Ruleset::UnsafeAllowAll => {
                if let Some(entry) = self.entries.get_mut(id) {
                    entry.core.validate(&mut AllowAllValidator::new(structural));
                }
            }
        }
    }

    pub(crate) fn invalid_transactions(&mut self, id: &CoValueId) -> Vec<(TransactionId, String)> {
        self.validate(id);
        self.core(id)
            .map(CoValueCore::invalid_transactions)
            .unwrap_or_default()
    }

    /// Valid transactions of `id` that we can read, decoded, in log-merge order.
    pub(crate) fn decoded(&mut self, id: &CoValueId) -> Vec<DecodedTx> {
        self.validate(id);
        let Some(entry) = self.entries.get(id) else {
            return Vec::new();
        };
        let structural = self
            .registry
            .structural_type(&entry.core.header().content_type);
        let owner = entry
            .core
            .header()
            .owner_group()
            .and_then(|g| self.groups.get(&g).cloned());
        let mut finder = KeyFinder::new(
            &*self.crypto,
            &self.agent,
            self.account,
            &self.groups,
            &mut self.keys,
        );

        let mut decoded = Vec::new();
        for tx in entry.core.valid_sorted_transactions(None) {
            let tx_decoded = match DecodedTx::from_trusting(&tx) {
                Some(Ok(d)) => d,
                Some(Err(e)) => {
                    debug!(covalue = %id, tx = %tx.id(), error = %e, "skipping undecodable transaction");
                    continue;
                }
                None => {
                    match decrypt(&*self.crypto, &mut finder, owner.as_deref(), id, &tx) {
                        Some(d) => d,
                        None => continue,
                    }
                }
            };
            if let Err(e) = check_changes(structural, &tx_decoded.changes) {
                debug!(covalue = %id, tx = %tx.id(), error = %e, "skipping malformed private transaction");
                continue;
            }
            decoded.push(tx_decoded);
        }
        decoded
    }

    /// Folded view of `id`, reusing the cached one if nothing changed.
    pub(crate) fn view(&mut self, id: &CoValueId) -> Result<View> {
        self.validate(id);
        let header = self.header(id).ok_or(NodeError::Unavailable(*id))?.clone();
        let branch = header.branch_of();
        let source_version = match &branch {
            Some((source, _)) => {
                self.validate(source);
                self.core(source).map_or(0, CoValueCore::version)
            }
            None => 0,
        };

        let mut groups = self.dependency_stamp(id);
        if let Some((source, _)) = &branch {
            groups.extend(self.dependency_stamp(source));
        }
        let Some(entry) = self.entries.get(id) else {
            return Err(NodeError::Unavailable(*id));
        };
        let stamp = (vec![entry.core.version(), source_version], groups);
        if let Some((cached, view)) = &entry.view {
            if *cached == stamp {
                return Ok(view.clone());
            }
        }

        let txs = match &branch {
            Some((source, name)) => self.branch_transactions(id, source, name, &header),
            None => self.decoded(id),
        };
        let view = match self.registry.kind_or_opaque(&header.content_type) {
            ContentKind::Map => View::Map(Arc::new(CoMap::from_transactions(&txs))),
            ContentKind::List => View::List(Arc::new(CoList::from_transactions(&txs))),
            ContentKind::Stream => View::Stream(Arc::new(CoStream::from_transactions(&txs))),
            ContentKind::Group | ContentKind::Opaque => View::Opaque,
        };
        if let Some(entry) = self.entries.get_mut(id) {
            entry.view = Some((stamp, view.clone()));
        }
        Ok(view)
    }

    /// The branch's own transactions, tagged with the branch name.
    pub(crate) fn branch_own(&mut self, id: &CoValueId, name: &str) -> Vec<DecodedTx> {
        self.decoded(id)
            .into_iter()
            .map(|tx| tx.on_branch(name))
            .collect()
    }

    /// Source transactions up to the branch point, then the branch's own.
    fn branch_transactions(
        &mut self,
        id: &CoValueId,
        source: &CoValueId,
        name: &str,
        header: &CoValueHeader,
    ) -> Vec<DecodedTx> {
        let start: Option<KnownState> = header
            .meta
            .as_ref()
            .and_then(|m| m.get("start"))
            .and_then(|s| serde_json::from_value(s.clone()).ok());
        let mut txs: Vec<DecodedTx> = self
            .decoded(source)
            .into_iter()
            .filter(|tx| {
                start
                    .as_ref()
                    .map_or(true, |s| tx.id.tx_index < s.count(&tx.id.session))
            })
            .collect();
        txs.extend(self.branch_own(id, name));
        txs.sort_by(|a, b| (a.made_at, &a.id).cmp(&(b.made_at, &b.id)));
        txs
    }

    /// Raw valid transactions with their meta, without decrypting.
    pub(crate) fn valid_metas(&mut self, id: &CoValueId) -> Vec<(TransactionId, serde_json::Value)> {
        self.validate(id);
        self.core(id)
            .map(|core| {
                core.valid_sorted_transactions(None)
                    .iter()
                    .filter_map(|tx| Some((tx.id(), tx.tx.meta_json()?)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn content_kind(&self, id: &CoValueId) -> Option<ContentKind> {
        self.header(id)
            .map(|h| self.registry.kind_or_opaque(&h.content_type))
    }
}

fn decrypt(
    crypto: &dyn CryptoProvider,
    finder: &mut KeyFinder<'_>,
    owner: Option<&GroupState>,
    covalue: &CoValueId,
    tx: &TxRef<'_>,
) -> Option<DecodedTx> {
    let Transaction::Private {
        key_used,
        encrypted_changes,
        ..
    } = tx.tx
    else {
        return None;
    };
    let Some(key) = owner.and_then(|group| finder.find(group, key_used)) else {
        debug!(covalue = %covalue, tx = %tx.id(), key = %key_used, "no key for private transaction");
        return None;
    };
    let context = Transaction::encryption_context(covalue, &tx.id());
    let plain = crypto
        .decrypt(&key, encrypted_changes, &context)
        .map_err(|e| debug!(covalue = %covalue, tx = %tx.id(), error = %e, "cannot decrypt"))
        .ok()?;
    let changes = String::from_utf8(plain)
        .ok()
        .and_then(|text| parse_changes(&text).ok())?;
    Some(DecodedTx {
        id: tx.id(),
        made_at: tx.made_at(),
        changes,
        meta: tx.tx.meta_json(),
    })
}

/// Groups a group's validity depends on: accounts of its writers and its parents.
fn group_dependencies(core: &CoValueCore) -> Vec<CoValueId> {
    let mut deps = BTreeSet::new();
    for log in core.sessions() {
        if let Some(account) = log.session().account {
            deps.insert(account);
        }
    }
    for tx in core.sorted_transactions() {
        let Some(Ok(decoded)) = DecodedTx::from_trusting(&tx) else {
            continue;
        };
        for change in &decoded.changes {
            if let Ok(MapOp::Set { key, .. }) = MapOp::parse(change) {
                if let Some(parent) = key.strip_prefix("parent_") {
                    if let Ok(parent) = parent.parse() {
                        deps.insert(parent);
                    }
                }
            }
        }
    }
    deps.remove(&core.id());
    deps.into_iter().collect()
}

impl SyncHost for Replica {
    fn known_state(&self, id: &CoValueId) -> Option<KnownState> {
        self.core(id).map(CoValueCore::known_state)
    }

    fn priority(&self, id: &CoValueId) -> Priority {
        self.header(id)
            .map_or(Priority::Medium, CoValueHeader::priority)
    }

    fn dependencies(&self, id: &CoValueId) -> Vec<CoValueId> {
        let Some(core) = self.core(id) else {
            return Vec::new();
        };
        let header = core.header();
        let mut deps: BTreeSet<CoValueId> = BTreeSet::new();
        deps.extend(header.owner_group());
        deps.extend(header.branch_of().map(|(source, _)| source));
        if header.is_group() {
            deps.extend(group_dependencies(core));
        } else {
            deps.extend(core.sessions().filter_map(|log| log.session().account));
        }
        deps.remove(id);
        deps.into_iter().collect()
    }

    fn new_content_since(
        &self,
        id: &CoValueId,
        known: Option<&KnownState>,
        max_piece_bytes: usize,
    ) -> Vec<CoValueContent> {
        self.core(id)
            .map(|core| core.new_content_since(known, max_piece_bytes))
            .unwrap_or_default()
    }

    fn merge_content(&mut self, content: &CoValueContent) -> MergeOutcome {
        if let Err(e) = validate_content_piece(&*self.crypto, content) {
            warn!(covalue = %content.id, error = %e, "refusing content piece");
            return MergeOutcome {
                rejected: content
                    .new
                    .keys()
                    .map(|s| (s.clone(), e.to_string()))
                    .collect(),
                ..MergeOutcome::default()
            };
        }
        if !self.entries.contains_key(&content.id) {
            match CoValueCore::from_content(&*self.crypto, content) {
                Ok(core) => {
                    self.entries.insert(content.id, Entry::new(core));
                }
                Err(e) => {
                    debug!(covalue = %content.id, error = %e, "content for a CoValue we do not hold");
                    return MergeOutcome::default();
                }
            }
        }
        match self.entries.get_mut(&content.id) {
            Some(entry) => entry.core.merge_content(&*self.crypto, content),
            None => MergeOutcome::default(),
        }
    }

    fn covalue_ids(&self) -> Vec<CoValueId> {
        self.ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covalent_core::{content_types, DalekCrypto, MemberId};
    use covalent_perms::ParentRole;
    use serde_json::json;

    fn replica(seed: u8) -> Replica {
        Replica::new(
            Arc::new(DalekCrypto),
            ContentRegistry::default(),
            AgentSecret::from_seed(&[seed; 32]),
        )
    }

    fn session(replica: &Replica) -> SessionId {
        SessionId::new(None, replica.agent().agent_id(), 1)
    }

    fn set(made_at: u64, key: &str, value: serde_json::Value) -> Transaction {
        Transaction::trusting(made_at, &[MapOp::set(key, value).to_value()])
    }

    #[test]
    fn test_group_state_follows_new_transactions() {
        let mut replica = replica(1);
        let me = MemberId::Agent(replica.agent().agent_id());
        let group = replica.create(
            CoValueHeader::new(content_types::GROUP, Ruleset::Group { initial_admin: me })
                .with_uniqueness("g"),
        );
        let session = session(&replica);
        replica
            .append(&group, &session, set(1, &me.to_string(), json!("admin")))
            .unwrap();
        assert!(replica.group(&group).unwrap().current_direct_role(&me).is_some());

        let other = MemberId::Agent(AgentSecret::from_seed(&[2; 32]).agent_id());
        let generation = |replica: &Replica| replica.generations.get(&group).copied();
        let before = generation(&replica);
        replica
            .append(&group, &session, set(2, &other.to_string(), json!("reader")))
            .unwrap();
        let state = replica.group(&group).unwrap();
        assert_eq!(state.members().len(), 2);
        assert!(generation(&replica) > before);

        // Nothing changed, nothing recomputed.
        let after = generation(&replica);
        replica.group(&group);
        assert_eq!(generation(&replica), after);
    }

    #[test]
    fn test_owned_value_revalidates_after_revocation() {
        let mut replica = replica(1);
        let admin = MemberId::Agent(replica.agent().agent_id());
        let group = replica.create(
            CoValueHeader::new(content_types::GROUP, Ruleset::Group { initial_admin: admin })
                .with_uniqueness("g"),
        );
        let session = session(&replica);
        replica
            .append(&group, &session, set(1, &admin.to_string(), json!("admin")))
            .unwrap();

        let writer = AgentSecret::from_seed(&[5; 32]);
        let writer_id = MemberId::Agent(writer.agent_id());
        let writer_session = SessionId::new(None, writer.agent_id(), 7);
        replica
            .append(&group, &session, set(2, &writer_id.to_string(), json!("writer")))
            .unwrap();

        let map = replica.create(
            CoValueHeader::new(content_types::COMAP, Ruleset::OwnedByGroup { group })
                .with_uniqueness("m"),
        );
        replica
            .append_as(&map, &writer, &writer_session, set(3, "a", json!(1)))
            .unwrap();
        let View::Map(view) = replica.view(&map).unwrap() else {
            panic!("expected a map view");
        };
        assert_eq!(view.get("a"), Some(&json!(1)));

        // Revoked before the write: the write no longer counts.
        replica
            .append(&group, &session, set(2, &writer_id.to_string(), json!("revoked")))
            .unwrap();
        let View::Map(view) = replica.view(&map).unwrap() else {
            panic!("expected a map view");
        };
        assert_eq!(view.get("a"), None);
        assert_eq!(replica.invalid_transactions(&map).len(), 1);
    }

    fn admin_group(replica: &mut Replica, uniqueness: &str) -> CoValueId {
        let me = MemberId::Agent(replica.agent().agent_id());
        let group = replica.create(
            CoValueHeader::new(content_types::GROUP, Ruleset::Group { initial_admin: me })
                .with_uniqueness(uniqueness),
        );
        let session = session(replica);
        replica
            .append(&group, &session, set(1, &me.to_string(), json!("admin")))
            .unwrap();
        group
    }

    #[test]
    fn test_concurrent_parent_cycle_resolves_the_same_in_any_order() {
        let mut origin = replica(1);
        let a = admin_group(&mut origin, "a");
        let b = admin_group(&mut origin, "b");
        let max = 100_000;
        let start: Vec<CoValueContent> = [a, b]
            .iter()
            .flat_map(|id| origin.new_content_since(id, None, max))
            .collect();
        let known_a = origin.known_state(&a);
        let known_b = origin.known_state(&b);

        // A -> B first, B -> A later: the later link closes the cycle.
        let session = session(&origin);
        origin
            .append(&a, &session, set(10, &format!("parent_{b}"), json!("extend")))
            .unwrap();
        origin
            .append(&b, &session, set(20, &format!("parent_{a}"), json!("extend")))
            .unwrap();
        let a_link = origin.new_content_since(&a, known_a.as_ref(), max);
        let b_link = origin.new_content_since(&b, known_b.as_ref(), max);

        let deliver = |order: [&Vec<CoValueContent>; 2]| {
            let mut target = replica(2);
            for piece in &start {
                target.merge_content(piece);
            }
            target.groups();
            for pieces in order {
                for piece in pieces {
                    target.merge_content(piece);
                }
                target.groups();
            }
            target
        };

        for mut target in [deliver([&a_link, &b_link]), deliver([&b_link, &a_link])] {
            assert_eq!(target.known_state(&a), origin.known_state(&a));
            assert_eq!(
                target.group(&a).unwrap().parents(),
                vec![(b, ParentRole::Extend)]
            );
            assert!(target.group(&b).unwrap().parents().is_empty());
            assert!(target.invalid_transactions(&a).is_empty());
            assert_eq!(target.invalid_transactions(&b).len(), 1);
        }
    }

    #[test]
    fn test_unrelated_group_change_keeps_verdicts() {
        let mut replica = replica(1);
        let owner = admin_group(&mut replica, "owner");
        let other = admin_group(&mut replica, "other");
        let map = replica.create(
            CoValueHeader::new(content_types::COMAP, Ruleset::OwnedByGroup { group: owner })
                .with_uniqueness("m"),
        );
        let session = session(&replica);
        replica.append(&map, &session, set(2, "a", json!(1))).unwrap();
        replica.validate(&map);
        let rebuilt = replica.core(&map).unwrap().full_revalidations();

        let stranger = MemberId::Agent(AgentSecret::from_seed(&[6; 32]).agent_id());
        replica
            .append(&other, &session, set(3, &stranger.to_string(), json!("reader")))
            .unwrap();
        replica.append(&map, &session, set(4, "b", json!(2))).unwrap();
        replica.validate(&map);
        assert_eq!(replica.core(&map).unwrap().full_revalidations(), rebuilt);
        assert_eq!(replica.core(&map).unwrap().validated_count(), 2);

        // A change to the owner does force a rebuild.
        replica
            .append(&owner, &session, set(5, &stranger.to_string(), json!("reader")))
            .unwrap();
        replica.validate(&map);
        assert!(replica.core(&map).unwrap().full_revalidations() > rebuilt);
        assert_eq!(replica.invalid_transactions(&map).len(), 0);
    }

    #[test]
    fn test_unknown_content_without_header_is_ignored() {
        let mut replica = replica(1);
        let content = CoValueContent::new(CoValueId::from_bytes([1; 32]), Priority::Medium);
        let outcome = replica.merge_content(&content);
        assert_eq!(outcome, MergeOutcome::default());
        assert!(!replica.contains(&content.id));
    }
}
