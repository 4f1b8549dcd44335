//! The Node: one account on one device.
//!
//! The Node brings together the replica, storage and sync into the
//! interface applications use. Every local write is signed into the node's
//! session, persisted, and queued for every interested peer.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use covalent_core::{
    content_types, AgentId, AgentSecret, Clock, CoValueHeader, CoValueId, CryptoProvider,
    DalekCrypto, KnownState, MemberId, Privacy, Ruleset, SessionId, SystemClock, Transaction,
    TransactionId,
};
use covalent_crdt::{check_changes, MapOp};
use covalent_perms::{reveal_name, seal_key, RevealTarget, Role};
use covalent_store::{Storage, StoreOutcome};
use covalent_sync::{
    decode_frame, LoadStatus, PeerId, PeerRole, PeerStats, SyncError, SyncHost, SyncManager,
    Transport,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::handles::{ListHandle, MapHandle, StreamHandle};
use crate::registry::{ContentKind, ContentRegistry};
use crate::replica::{Replica, View};

/// Builds a [`Node`], optionally with a custom clock, crypto provider or
/// extra content types.
pub struct NodeBuilder<S: Storage> {
    agent: AgentSecret,
    storage: S,
    config: NodeConfig,
    crypto: Arc<dyn CryptoProvider>,
    clock: Arc<dyn Clock>,
    registry: ContentRegistry,
}

impl<S: Storage> NodeBuilder<S> {
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = crypto;
        self
    }

    /// Register a custom content type before the node starts.
    pub fn content_type(mut self, name: impl Into<String>, kind: ContentKind) -> Result<Self> {
        self.registry.register(name, kind)?;
        Ok(self)
    }

    /// Start the node, creating the account on first use.
    pub async fn build(self) -> Result<Node<S>> {
        let agent_id = self.agent.agent_id();
        let account_header = account_header(agent_id);
        let account = account_header.id(&*self.crypto);
        let session = SessionId::new(Some(account), agent_id, self.crypto.random_u64());

        let mut replica = Replica::new(Arc::clone(&self.crypto), self.registry, self.agent);
        replica.set_account(account);

        let mut node = Node {
            sync: SyncManager::new(self.config.sync.clone()),
            config: self.config,
            crypto: self.crypto,
            clock: self.clock,
            account,
            session,
            replica,
            storage: self.storage,
            persisted: HashMap::new(),
        };

        if node.load_from_storage(account).await? {
            debug!(%account, "account loaded from storage");
        } else {
            node.create_account(account_header).await?;
            info!(%account, "account created");
        }
        Ok(node)
    }
}

/// Header of the account owned by `agent`. Deterministic, so the same
/// agent always gets the same account.
fn account_header(agent: AgentId) -> CoValueHeader {
    CoValueHeader::new(
        content_types::ACCOUNT,
        Ruleset::Group {
            initial_admin: MemberId::Agent(agent),
        },
    )
    .with_uniqueness("account")
}

/// Outcome of one [`Node::poll`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Messages handled.
    pub messages: usize,
    /// CoValues whose content changed.
    pub changed: Vec<CoValueId>,
}

/// A local-first node.
///
/// Provides:
/// - Creating CoValues and writing to them
/// - Reading folded maps, lists and streams
/// - Managing groups, invites and branches
/// - Loading from storage and peers, and syncing changes back
pub struct Node<S: Storage> {
    pub(crate) config: NodeConfig,
    pub(crate) crypto: Arc<dyn CryptoProvider>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) account: CoValueId,
    /// The session every local write is signed into.
    pub(crate) session: SessionId,
    pub(crate) replica: Replica,
    pub(crate) sync: SyncManager,
    pub(crate) storage: S,
    /// What storage holds of each CoValue, as far as we know.
    pub(crate) persisted: HashMap<CoValueId, KnownState>,
}

impl<S: Storage> Node<S> {
    /// Start a node with the default clock, crypto and content types.
    pub async fn new(agent: AgentSecret, storage: S, config: NodeConfig) -> Result<Self> {
        Self::builder(agent, storage).config(config).build().await
    }

    pub fn builder(agent: AgentSecret, storage: S) -> NodeBuilder<S> {
        NodeBuilder {
            agent,
            storage,
            config: NodeConfig::default(),
            crypto: Arc::new(DalekCrypto),
            clock: Arc::new(SystemClock),
            registry: ContentRegistry::default(),
        }
    }

    pub fn account_id(&self) -> CoValueId {
        self.account
    }

    pub fn agent_id(&self) -> AgentId {
        self.replica.agent().agent_id()
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Register a content type at runtime.
    pub fn register_content_type(&mut self, name: impl Into<String>, kind: ContentKind) -> Result<()> {
        self.replica.registry_mut().register(name, kind)
    }

    pub fn registry(&self) -> &ContentRegistry {
        self.replica.registry()
    }

    /// The member the local account acts as inside `group`.
    pub(crate) fn member_in(&self, group: &CoValueId) -> MemberId {
        if *group == self.account {
            MemberId::Agent(self.agent_id())
        } else {
            MemberId::Account(self.account)
        }
    }

    async fn create_account(&mut self, header: CoValueHeader) -> Result<()> {
        let account = self.replica.create(header);
        let me = MemberId::Agent(self.agent_id());
        self.set_group_entry(account, &me.to_string(), json!(Role::Admin.as_str()))
            .await?;

        let key = self.crypto.new_key_secret();
        self.set_group_entry(account, "readKey", json!(key.id().to_string()))
            .await?;
        let sealed = seal_key(&*self.crypto, &key, &self.agent_id(), &account)?;
        self.set_group_entry(
            account,
            &reveal_name(&key.id(), &RevealTarget::Member(me)),
            json!(sealed),
        )
        .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Creating CoValues
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a CoValue of any registered content type.
    ///
    /// With an owner group, writes are checked against that group's roles;
    /// without one, anyone may write.
    pub async fn create(
        &mut self,
        content_type: &str,
        owner: Option<CoValueId>,
        meta: Option<Value>,
    ) -> Result<CoValueId> {
        if self.replica.registry().kind(content_type).is_none() {
            return Err(NodeError::UnknownContentType(content_type.to_string()));
        }
        if matches!(
            self.replica.registry().kind(content_type),
            Some(ContentKind::Group)
        ) {
            return Err(NodeError::InvalidOperation(
                "use create_group for groups".into(),
            ));
        }
        let ruleset = match owner {
            Some(group) => {
                self.require_role(&group, Role::can_write, "create values in")?;
                Ruleset::OwnedByGroup { group }
            }
            None => Ruleset::UnsafeAllowAll,
        };
        let mut header = CoValueHeader::new(content_type, ruleset)
            .with_uniqueness(hex::encode(self.crypto.random_u64().to_be_bytes()))
            .with_created_at(self.now());
        if let Some(meta) = meta {
            header = header.with_meta(meta);
        }
        self.adopt(header).await
    }

    pub async fn create_map(&mut self, group: CoValueId) -> Result<CoValueId> {
        self.create(content_types::COMAP, Some(group), None).await
    }

    pub async fn create_list(&mut self, group: CoValueId) -> Result<CoValueId> {
        self.create(content_types::COLIST, Some(group), None).await
    }

    pub async fn create_stream(&mut self, group: CoValueId) -> Result<CoValueId> {
        self.create(content_types::COSTREAM, Some(group), None).await
    }

    /// Start holding a header we built, persisting and announcing it.
    pub(crate) async fn adopt(&mut self, header: CoValueHeader) -> Result<CoValueId> {
        let id = self.replica.create(header);
        self.after_local_change(id).await?;
        Ok(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writing
    // ─────────────────────────────────────────────────────────────────────────

    /// Append one transaction with `changes` to `id`.
    pub async fn transact(
        &mut self,
        id: CoValueId,
        changes: Vec<Value>,
        privacy: Privacy,
    ) -> Result<TransactionId> {
        self.write(id, changes, privacy, None).await
    }

    pub(crate) async fn write(
        &mut self,
        id: CoValueId,
        changes: Vec<Value>,
        privacy: Privacy,
        meta: Option<Value>,
    ) -> Result<TransactionId> {
        let header = self
            .replica
            .header(&id)
            .ok_or(NodeError::Unavailable(id))?
            .clone();
        check_changes(
            self.replica.registry().structural_type(&header.content_type),
            &changes,
        )?;

        let owner = header.owner_group();
        if let Some(group) = &owner {
            self.require_role(group, Role::can_write, "write to")?;
        }

        let made_at = self.now();
        let tx = match (privacy, owner) {
            (Privacy::Private, Some(group)) => self.encrypt(id, group, &changes, made_at)?,
            _ => Transaction::trusting(made_at, &changes),
        };
        let tx = match meta {
            Some(meta) => tx.with_meta(meta),
            None => tx,
        };

        let tx_id = self.replica.append(&id, &self.session, tx)?;
        debug!(covalue = %id, tx = %tx_id, "local transaction");
        self.after_local_change(id).await?;
        Ok(tx_id)
    }

    fn encrypt(
        &mut self,
        id: CoValueId,
        group: CoValueId,
        changes: &[Value],
        made_at: u64,
    ) -> Result<Transaction> {
        let me = self.member_in(&group);
        let state = self
            .replica
            .group(&group)
            .ok_or(NodeError::Unavailable(group))?;
        let role = state.current_role(&me, self.replica.groups());

        let key = if role == Some(Role::WriteOnly) {
            state
                .write_key_for(&me)
                .and_then(|key_id| self.replica.find_key(&group, &key_id))
        } else {
            self.replica.read_key(&group).map(|(_, key)| key)
        };
        let key = key
            .ok_or_else(|| NodeError::Unauthorized(format!("no key to encrypt for group {group}")))?;

        let tx_index = self
            .replica
            .core(&id)
            .and_then(|core| core.session(&self.session))
            .map_or(0, |log| log.len());
        let tx_id = TransactionId::new(self.session.clone(), tx_index);
        let plaintext = Value::Array(changes.to_vec()).to_string();
        let encrypted_changes = self.crypto.encrypt(
            &key,
            plaintext.as_bytes(),
            &Transaction::encryption_context(&id, &tx_id),
        )?;
        Ok(Transaction::Private {
            made_at,
            key_used: key.id(),
            encrypted_changes,
            meta: None,
        })
    }

    /// One trusting `set` in a group. Group transactions carry a single change.
    pub(crate) async fn set_group_entry(
        &mut self,
        group: CoValueId,
        key: &str,
        value: Value,
    ) -> Result<TransactionId> {
        self.write(
            group,
            vec![MapOp::set(key, value).to_value()],
            Privacy::Trusting,
            None,
        )
        .await
    }

    /// Fail unless the local account's role in `group` passes `allowed`.
    pub(crate) fn require_role(
        &mut self,
        group: &CoValueId,
        allowed: fn(Role) -> bool,
        what: &str,
    ) -> Result<Role> {
        let me = self.member_in(group);
        let state = self
            .replica
            .group(group)
            .ok_or(NodeError::Unavailable(*group))?;
        match state.current_role(&me, self.replica.groups()) {
            Some(role) if allowed(role) => Ok(role),
            role => Err(NodeError::Unauthorized(format!(
                "{me} cannot {what} {group} with role {}",
                role.map_or("none", Role::as_str)
            ))),
        }
    }

    // ---- Maps ----

    pub async fn set(
        &mut self,
        id: CoValueId,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<TransactionId> {
        let privacy = self.config.default_privacy;
        self.set_with(id, key, value, privacy).await
    }

    pub async fn set_with(
        &mut self,
        id: CoValueId,
        key: &str,
        value: impl Into<Value>,
        privacy: Privacy,
    ) -> Result<TransactionId> {
        self.expect_kind(&id, ContentKind::Map)?;
        self.write(id, vec![MapOp::set(key, value).to_value()], privacy, None)
            .await
    }

    pub async fn delete(&mut self, id: CoValueId, key: &str) -> Result<TransactionId> {
        self.expect_kind(&id, ContentKind::Map)?;
        let privacy = self.config.default_privacy;
        self.write(id, vec![MapOp::del(key).to_value()], privacy, None)
            .await
    }

    // ---- Lists ----

    /// Append at the end.
    pub async fn push(&mut self, id: CoValueId, value: impl Into<Value>) -> Result<TransactionId> {
        let op = self.list(id)?.view().append_op(value.into(), None)?;
        self.write_list(id, op.to_value()).await
    }

    pub async fn insert_after(
        &mut self,
        id: CoValueId,
        index: usize,
        value: impl Into<Value>,
    ) -> Result<TransactionId> {
        let op = self.list(id)?.view().append_op(value.into(), Some(index))?;
        self.write_list(id, op.to_value()).await
    }

    pub async fn insert_before(
        &mut self,
        id: CoValueId,
        index: usize,
        value: impl Into<Value>,
    ) -> Result<TransactionId> {
        let op = self.list(id)?.view().prepend_op(value.into(), Some(index))?;
        self.write_list(id, op.to_value()).await
    }

    /// Insert at the start.
    pub async fn prepend(&mut self, id: CoValueId, value: impl Into<Value>) -> Result<TransactionId> {
        let op = self.list(id)?.view().prepend_op(value.into(), None)?;
        self.write_list(id, op.to_value()).await
    }

    pub async fn remove_at(&mut self, id: CoValueId, index: usize) -> Result<TransactionId> {
        let op = self.list(id)?.view().delete_op(index)?;
        self.write_list(id, op.to_value()).await
    }

    async fn write_list(&mut self, id: CoValueId, change: Value) -> Result<TransactionId> {
        let privacy = self.config.default_privacy;
        self.write(id, vec![change], privacy, None).await
    }

    // ---- Streams ----

    pub async fn stream_push(
        &mut self,
        id: CoValueId,
        value: impl Into<Value>,
    ) -> Result<TransactionId> {
        self.expect_kind(&id, ContentKind::Stream)?;
        let privacy = self.config.default_privacy;
        self.write(id, vec![value.into()], privacy, None).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────────────────

    pub fn contains(&self, id: &CoValueId) -> bool {
        self.replica.contains(id)
    }

    pub fn known_state(&self, id: &CoValueId) -> Option<KnownState> {
        self.replica.known_state(id)
    }

    pub fn header(&self, id: &CoValueId) -> Option<&CoValueHeader> {
        self.replica.header(id)
    }

    /// Every CoValue held in memory.
    pub fn covalue_ids(&self) -> Vec<CoValueId> {
        self.replica.ids()
    }

    /// Transactions the permission rules rejected, with reasons.
    pub fn invalid_transactions(&mut self, id: &CoValueId) -> Vec<(TransactionId, String)> {
        self.replica.invalid_transactions(id)
    }

    pub fn map(&mut self, id: CoValueId) -> Result<MapHandle> {
        let content_type = self.expect_kind(&id, ContentKind::Map)?;
        match self.readable_view(&id)? {
            View::Map(map) => Ok(MapHandle::new(id, content_type, map)),
            _ => Err(self.wrong_type(id, "comap")),
        }
    }

    pub fn list(&mut self, id: CoValueId) -> Result<ListHandle> {
        self.expect_kind(&id, ContentKind::List)?;
        match self.readable_view(&id)? {
            View::List(list) => Ok(ListHandle::new(id, list)),
            _ => Err(self.wrong_type(id, "colist")),
        }
    }

    pub fn stream(&mut self, id: CoValueId) -> Result<StreamHandle> {
        self.expect_kind(&id, ContentKind::Stream)?;
        match self.readable_view(&id)? {
            View::Stream(stream) => Ok(StreamHandle::new(id, stream)),
            _ => Err(self.wrong_type(id, "costream")),
        }
    }

    fn readable_view(&mut self, id: &CoValueId) -> Result<View> {
        let owner = self
            .replica
            .header(id)
            .ok_or(NodeError::Unavailable(*id))?
            .owner_group();
        if let Some(group) = owner {
            self.require_role(
                &group,
                |role| role.can_read() || role == Role::WriteOnly,
                "read",
            )?;
        }
        self.replica.view(id)
    }

    /// Content type of `id`, failing unless it folds as `kind`.
    fn expect_kind(&self, id: &CoValueId, kind: ContentKind) -> Result<String> {
        let header = self.replica.header(id).ok_or(NodeError::Unavailable(*id))?;
        if self.replica.registry().kind_or_opaque(&header.content_type) != kind {
            return Err(NodeError::WrongContentType {
                id: *id,
                expected: kind.base_type(),
                actual: header.content_type.clone(),
            });
        }
        Ok(header.content_type.clone())
    }

    fn wrong_type(&self, id: CoValueId, expected: &'static str) -> NodeError {
        NodeError::WrongContentType {
            id,
            expected,
            actual: self
                .replica
                .header(&id)
                .map(|h| h.content_type.clone())
                .unwrap_or_default(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Hand storage whatever it lacks of `id`.
    pub(crate) async fn persist(&mut self, id: CoValueId) -> Result<()> {
        let Some(core) = self.replica.core(&id) else {
            return Ok(());
        };
        let max = self.config.sync.max_piece_bytes;
        let pieces = core.new_content_since(self.persisted.get(&id), max);
        if pieces.is_empty() {
            return Ok(());
        }
        let ours = core.known_state();

        match self.storage.store(&id, &pieces).await? {
            StoreOutcome::Stored => {
                self.persisted.insert(id, ours);
            }
            StoreOutcome::Gap { known } => {
                // Storage holds less than we thought; resend from what it has.
                warn!(covalue = %id, "storage reported a gap, resending");
                let pieces = self
                    .replica
                    .core(&id)
                    .map(|core| core.new_content_since(Some(&known), max))
                    .unwrap_or_default();
                match self.storage.store(&id, &pieces).await? {
                    StoreOutcome::Stored => {
                        self.persisted.insert(id, ours);
                    }
                    StoreOutcome::Gap { known } => {
                        warn!(covalue = %id, "storage refused content twice");
                        self.persisted.insert(id, known);
                    }
                }
            }
        }
        Ok(())
    }

    /// Load `id` and what it depends on from storage. Returns whether `id`
    /// was found.
    pub(crate) async fn load_from_storage(&mut self, id: CoValueId) -> Result<bool> {
        let mut found = false;
        let mut queue = vec![id];
        let mut seen = BTreeSet::new();
        while let Some(next) = queue.pop() {
            if !seen.insert(next) || self.replica.contains(&next) {
                continue;
            }
            let Some(stored) = self.storage.get(&next).await? else {
                continue;
            };
            for piece in stored.pieces(next) {
                let outcome = self.replica.merge_content(&piece);
                if !outcome.gaps.is_empty() || !outcome.rejected.is_empty() {
                    warn!(covalue = %next, "stored content did not merge cleanly");
                }
            }
            self.persisted.insert(next, stored.known_state(next));
            found |= next == id;
            queue.extend(self.replica.dependencies(&next));
        }
        Ok(found)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Loading and Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Make `id` available locally: memory, then storage, then peers.
    pub async fn load(&mut self, id: CoValueId) -> Result<()> {
        if self.replica.contains(&id) {
            return Ok(());
        }
        if self.load_from_storage(id).await? {
            // Subscribe for anything newer than what storage had.
            self.sync.request_load(id, &self.replica);
            self.flush().await;
            return Ok(());
        }
        self.load_from_peers(id).await
    }

    async fn load_from_peers(&mut self, id: CoValueId) -> Result<()> {
        if self.sync.request_load(id, &self.replica) == 0 {
            return Err(NodeError::Unavailable(id));
        }
        self.flush().await;

        let deadline = tokio::time::Instant::now() + self.config.load_timeout;
        loop {
            self.poll().await?;
            let status = self.sync.load_status(&id);
            if self.replica.contains(&id) && status != LoadStatus::Pending {
                return Ok(());
            }
            if status == LoadStatus::Unavailable && !self.replica.contains(&id) {
                debug!(covalue = %id, "no peer has it");
                return Err(NodeError::Unavailable(id));
            }
            if tokio::time::Instant::now() >= deadline {
                return if self.replica.contains(&id) {
                    Ok(())
                } else {
                    Err(NodeError::Unavailable(id))
                };
            }
            tokio::time::sleep(self.config.sync.backpressure_poll_interval).await;
        }
    }

    /// Connect a peer. Server peers are asked for everything we hold.
    pub async fn add_peer(
        &mut self,
        id: PeerId,
        role: PeerRole,
        transport: Box<dyn Transport>,
    ) -> Result<()> {
        self.sync.add_peer(id, role, transport, &self.replica)?;
        self.flush().await;
        Ok(())
    }

    pub fn remove_peer(&mut self, id: &PeerId) -> bool {
        self.sync.remove_peer(id)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.sync.peer_ids()
    }

    pub fn peer_stats(&self, id: &PeerId) -> Option<PeerStats> {
        self.sync.stats(id)
    }

    /// Send everything queued. Peers whose transport failed are dropped.
    pub async fn flush(&mut self) {
        for peer in self.sync.flush().await {
            warn!(%peer, "peer dropped after failed send");
        }
    }

    /// Handle every frame that has arrived, persist what changed and send
    /// the replies.
    pub async fn poll(&mut self) -> Result<PollOutcome> {
        let mut outcome = PollOutcome::default();
        let mut changed = BTreeSet::new();

        for (peer, frame) in self.sync.take_incoming() {
            for message in decode_frame(&frame) {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(%peer, error = %e, "dropping undecodable message");
                        continue;
                    }
                };
                let id = message.id();
                if !self.replica.contains(&id) {
                    self.load_from_storage(id).await?;
                }
                outcome.messages += 1;
                match self.sync.handle_message(&peer, message, &mut self.replica) {
                    Ok(Some(id)) => {
                        changed.insert(id);
                    }
                    Ok(None) => {}
                    Err(SyncError::UnknownPeer(_)) => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }

        for id in &changed {
            self.persist(*id).await?;
        }
        self.flush().await;
        outcome.changed = changed.into_iter().collect();
        Ok(outcome)
    }

    /// Keep polling until `shutdown` completes.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let interval = self.config.sync.backpressure_poll_interval;
        loop {
            tokio::select! {
                _ = &mut shutdown => return Ok(()),
                _ = tokio::time::sleep(interval) => {
                    self.poll().await?;
                }
            }
        }
    }

    /// Persist a local change and queue it for peers.
    pub(crate) async fn after_local_change(&mut self, id: CoValueId) -> Result<()> {
        self.persist(id).await?;
        self.sync.sync_covalue(&id, &self.replica);
        self.flush().await;
        Ok(())
    }

    /// Drop `id` from memory. Storage and peers keep their copies.
    pub fn evict(&mut self, id: &CoValueId) -> bool {
        self.persisted.remove(id);
        self.replica.evict(id)
    }

    /// Send what is queued, disconnect every peer, and hand back storage.
    pub async fn shutdown(mut self) -> Result<S> {
        self.flush().await;
        for peer in self.sync.peer_ids() {
            self.sync.remove_peer(&peer);
        }
        self.replica.registry_mut().clear_custom();
        info!(account = %self.account, "node shut down");
        Ok(self.storage)
    }
}
