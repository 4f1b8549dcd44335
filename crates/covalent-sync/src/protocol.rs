//! Sync protocol state machine.
//!
//! [`SyncManager`] keeps one [`PeerState`] and outgoing queue per peer and
//! reacts to incoming messages against a [`SyncHost`], the replica that
//! owns the CoValues. Handling a message only queues replies; `flush` sends
//! them and `poll`/`wait_incoming` feed received frames back in.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use covalent_core::{CoValueContent, CoValueId, KnownState, MergeOutcome, Priority};

use crate::error::{Result, SyncError};
use crate::messages::{decode_frame, SyncMessage};
use crate::outgoing::OutgoingQueue;
use crate::peer::{LoadState, PeerId, PeerRole, PeerState, PeerStats};
use crate::transport::Transport;

/// Configuration for sync behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Maximum bytes of messages joined into one frame.
    pub batch_bytes: usize,
    /// Target size of transactions in one content message.
    pub max_piece_bytes: usize,
    /// Sending pauses while the transport holds this many unsent bytes.
    pub outgoing_buffer_limit: usize,
    pub backpressure_poll_interval: Duration,
    /// Timeout for waiting for peer messages.
    pub message_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_bytes: 100_000,
            max_piece_bytes: 100_000,
            outgoing_buffer_limit: 1_000_000,
            backpressure_poll_interval: Duration::from_millis(10),
            message_timeout: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    pub fn with_batch_bytes(mut self, bytes: usize) -> Self {
        self.batch_bytes = bytes;
        self
    }

    pub fn with_max_piece_bytes(mut self, bytes: usize) -> Self {
        self.max_piece_bytes = bytes;
        self
    }

    pub fn with_outgoing_buffer_limit(mut self, bytes: usize) -> Self {
        self.outgoing_buffer_limit = bytes;
        self
    }

    pub fn with_backpressure_poll_interval(mut self, interval: Duration) -> Self {
        self.backpressure_poll_interval = interval;
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }
}

/// The replica side of sync: what the manager reads and merges into.
pub trait SyncHost: Send {
    /// Known state of a CoValue we hold the header of.
    fn known_state(&self, id: &CoValueId) -> Option<KnownState>;

    fn priority(&self, id: &CoValueId) -> Priority;

    /// CoValues a peer needs before it can validate `id`.
    fn dependencies(&self, id: &CoValueId) -> Vec<CoValueId>;

    fn new_content_since(
        &self,
        id: &CoValueId,
        known: Option<&KnownState>,
        max_piece_bytes: usize,
    ) -> Vec<CoValueContent>;

    /// Merge incoming content, creating the CoValue if the piece has a header.
    fn merge_content(&mut self, content: &CoValueContent) -> MergeOutcome;

    /// Every CoValue held.
    fn covalue_ids(&self) -> Vec<CoValueId>;
}

/// Where a requested load stands across server peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Some server peer has not answered yet.
    Pending,
    /// A server peer has it.
    Available,
    /// No server peer has it, or there are none.
    Unavailable,
}

struct Peer {
    state: PeerState,
    transport: Box<dyn Transport>,
    outgoing: OutgoingQueue,
    stats: PeerStats,
}

impl Peer {
    fn queue(&mut self, message: &SyncMessage, priority: Priority) {
        match message.encode() {
            Ok(line) => {
                self.stats.messages_sent += 1;
                self.outgoing.push(priority, line);
            }
            Err(e) => warn!(peer = %self.state.id(), error = %e, "cannot encode message"),
        }
    }
}

/// Drives the load/known/content/knownCorrection exchange with all peers.
pub struct SyncManager {
    config: SyncConfig,
    peers: BTreeMap<PeerId, Peer>,
}

impl SyncManager {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            peers: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Register a connected peer. Server peers are told about everything
    /// we hold right away.
    pub fn add_peer(
        &mut self,
        id: PeerId,
        role: PeerRole,
        transport: Box<dyn Transport>,
        host: &dyn SyncHost,
    ) -> Result<()> {
        if self.peers.contains_key(&id) {
            return Err(SyncError::DuplicatePeer(id));
        }
        let mut peer = Peer {
            state: PeerState::new(id.clone(), role),
            transport,
            outgoing: OutgoingQueue::new(),
            stats: PeerStats::default(),
        };
        if role == PeerRole::Server {
            let mut ids = host.covalue_ids();
            ids.sort_by_key(|id| host.priority(id));
            for covalue in ids {
                if let Some(known) = host.known_state(&covalue) {
                    peer.state.set_load_state(covalue, LoadState::Loading);
                    peer.queue(&SyncMessage::Load(known), host.priority(&covalue));
                }
            }
        }
        debug!(peer = %id, ?role, "peer added");
        self.peers.insert(id, peer);
        Ok(())
    }

    /// Drop a peer and everything we knew about it.
    pub fn remove_peer(&mut self, id: &PeerId) -> bool {
        match self.peers.remove(id) {
            Some(peer) => {
                peer.transport.close();
                debug!(peer = %id, "peer removed");
                true
            }
            None => false,
        }
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().cloned().collect()
    }

    pub fn peer_state(&self, id: &PeerId) -> Option<&PeerState> {
        self.peers.get(id).map(|p| &p.state)
    }

    pub fn stats(&self, id: &PeerId) -> Option<PeerStats> {
        self.peers.get(id).map(|p| p.stats)
    }

    /// Whether anything is waiting to be sent.
    pub fn has_outgoing(&self) -> bool {
        self.peers.values().any(|p| !p.outgoing.is_empty())
    }

    /// Ask every server peer for `id`. Returns how many were asked.
    pub fn request_load(&mut self, id: CoValueId, host: &dyn SyncHost) -> usize {
        let known = host
            .known_state(&id)
            .unwrap_or_else(|| KnownState::empty(id));
        let priority = host.priority(&id);
        let mut asked = 0;
        for peer in self.peers.values_mut().filter(|p| p.state.is_server()) {
            if peer.state.load_state(&id) == LoadState::Unavailable {
                continue;
            }
            peer.state.set_load_state(id, LoadState::Loading);
            peer.queue(&SyncMessage::Load(known.clone()), priority);
            asked += 1;
        }
        asked
    }

    pub fn load_status(&self, id: &CoValueId) -> LoadStatus {
        let mut status = LoadStatus::Unavailable;
        for peer in self.peers.values().filter(|p| p.state.is_server()) {
            match peer.state.load_state(id) {
                LoadState::Available => return LoadStatus::Available,
                LoadState::Loading => status = LoadStatus::Pending,
                LoadState::Unknown | LoadState::Unavailable => {}
            }
        }
        status
    }

    /// Queue whatever each interested peer lacks of `id`.
    pub fn sync_covalue(&mut self, id: &CoValueId, host: &dyn SyncHost) {
        self.sync_covalue_except(id, host, None);
    }

    fn sync_covalue_except(&mut self, id: &CoValueId, host: &dyn SyncHost, except: Option<&PeerId>) {
        for (peer_id, peer) in self.peers.iter_mut() {
            if Some(peer_id) == except || !peer.state.wants(id) {
                continue;
            }
            queue_content(peer, id, host, &self.config, &mut BTreeSet::new());
        }
    }

    /// Decode and handle one frame. Returns the CoValues whose content changed.
    pub fn handle_frame(
        &mut self,
        from: &PeerId,
        frame: &str,
        host: &mut dyn SyncHost,
    ) -> Result<Vec<CoValueId>> {
        let mut changed = Vec::new();
        for message in decode_frame(frame) {
            match message {
                Ok(message) => {
                    if let Some(id) = self.handle_message(from, message, host)? {
                        changed.push(id);
                    }
                }
                Err(e) => warn!(peer = %from, error = %e, "dropping undecodable message"),
            }
        }
        Ok(changed)
    }

    /// Handle one message. Returns the CoValue id if its content changed.
    pub fn handle_message(
        &mut self,
        from: &PeerId,
        message: SyncMessage,
        host: &mut dyn SyncHost,
    ) -> Result<Option<CoValueId>> {
        let config = self.config.clone();
        let peer = self
            .peers
            .get_mut(from)
            .ok_or_else(|| SyncError::UnknownPeer(from.clone()))?;
        peer.stats.messages_received += 1;
        let id = message.id();
        debug!(peer = %from, action = message.action(), covalue = %id, "received");

        match message {
            SyncMessage::Load(known) => {
                peer.state.mark_interested(id);
                peer.state.confirm(&known);
                match host.known_state(&id) {
                    Some(ours) => {
                        peer.queue(&SyncMessage::Known(ours), host.priority(&id));
                        queue_content(peer, &id, host, &config, &mut BTreeSet::new());
                    }
                    None => {
                        peer.state.await_answer(id);
                        if self.forward_load(from, id, &*host) == 0 {
                            self.answer_unavailable(id);
                        }
                    }
                }
                Ok(None)
            }

            SyncMessage::Known(known) => {
                let load = if known.header {
                    LoadState::Available
                } else {
                    LoadState::Unavailable
                };
                if peer.state.load_state(&id) != LoadState::Available {
                    peer.state.set_load_state(id, load);
                }
                peer.state.confirm(&known);
                if host.known_state(&id).is_some() && peer.state.wants(&id) {
                    queue_content(peer, &id, &*host, &config, &mut BTreeSet::new());
                }
                if !known.header && self.load_status(&id) == LoadStatus::Unavailable {
                    self.answer_unavailable(id);
                }
                Ok(None)
            }

            SyncMessage::KnownCorrection(known) => {
                peer.stats.corrections_received += 1;
                debug!(peer = %from, covalue = %id, "peer corrected its known state");
                peer.state.correct(known);
                if host.known_state(&id).is_some() {
                    queue_content(peer, &id, &*host, &config, &mut BTreeSet::new());
                }
                Ok(None)
            }

            SyncMessage::Content(content) => {
                peer.state.mark_interested(id);
                let outcome = host.merge_content(&content);
                let ours = host.known_state(&id);

                match &ours {
                    Some(ours) if outcome.gaps.is_empty() => {
                        peer.state.set_load_state(id, LoadState::Available);
                        peer.state.confirm(&content.implied_known_state());
                        peer.queue(&SyncMessage::Known(ours.clone()), host.priority(&id));
                    }
                    _ => {
                        let actual = ours.clone().unwrap_or_else(|| KnownState::empty(id));
                        warn!(peer = %from, covalue = %id, "content leaves a gap, sending correction");
                        peer.stats.corrections_sent += 1;
                        peer.queue(&SyncMessage::KnownCorrection(actual), host.priority(&id));
                    }
                }
                for (session, reason) in &outcome.rejected {
                    warn!(peer = %from, covalue = %id, %session, %reason, "rejected content");
                }

                if outcome.accepted > 0 || (content.header.is_some() && ours.is_some()) {
                    self.sync_covalue_except(&id, &*host, Some(from));
                    Ok(Some(id))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Pass a load on to server peers other than `from`.
    fn forward_load(&mut self, from: &PeerId, id: CoValueId, host: &dyn SyncHost) -> usize {
        let priority = host.priority(&id);
        let mut asked = 0;
        for (peer_id, peer) in self.peers.iter_mut() {
            if peer_id == from || !peer.state.is_server() {
                continue;
            }
            match peer.state.load_state(&id) {
                LoadState::Unavailable => continue,
                LoadState::Loading => {}
                LoadState::Unknown | LoadState::Available => {
                    peer.state.set_load_state(id, LoadState::Loading);
                    peer.queue(&SyncMessage::Load(KnownState::empty(id)), priority);
                }
            }
            asked += 1;
        }
        asked
    }

    /// Tell peers waiting on a forwarded load that nobody has `id`.
    fn answer_unavailable(&mut self, id: CoValueId) {
        for peer in self.peers.values_mut() {
            if peer.state.take_awaiting(&id) {
                peer.queue(&SyncMessage::Known(KnownState::empty(id)), Priority::Medium);
            }
        }
    }

    /// Send every queued frame, waiting for transport buffers to drain.
    /// Returns peers dropped because their transport failed.
    pub async fn flush(&mut self) -> Vec<PeerId> {
        let mut failed = Vec::new();
        for (id, peer) in self.peers.iter_mut() {
            while let Some(frame) = peer.outgoing.pop_batch(self.config.batch_bytes) {
                wait_for_buffer(peer.transport.as_ref(), &self.config).await;
                match peer.transport.send(frame).await {
                    Ok(()) => peer.stats.frames_sent += 1,
                    Err(e) => {
                        warn!(peer = %id, error = %e, "send failed");
                        peer.state.reset_optimistic();
                        peer.outgoing.clear();
                        failed.push(id.clone());
                        break;
                    }
                }
            }
        }
        for id in &failed {
            self.remove_peer(id);
        }
        failed
    }

    /// Take every frame already waiting, dropping peers whose transport
    /// went away.
    pub fn take_incoming(&mut self) -> Vec<(PeerId, String)> {
        let mut frames = Vec::new();
        let mut gone = Vec::new();
        for (id, peer) in self.peers.iter_mut() {
            loop {
                match peer.transport.try_recv() {
                    Ok(Some(frame)) => {
                        peer.stats.frames_received += 1;
                        frames.push((id.clone(), frame));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(peer = %id, error = %e, "peer went away");
                        gone.push(id.clone());
                        break;
                    }
                }
            }
        }
        for id in &gone {
            self.remove_peer(id);
        }
        frames
    }

    /// Handle every frame already waiting. Returns the CoValues that changed.
    pub fn poll(&mut self, host: &mut dyn SyncHost) -> Result<Vec<CoValueId>> {
        let mut changed = Vec::new();
        for (from, frame) in self.take_incoming() {
            changed.extend(self.handle_frame(&from, &frame, host)?);
        }
        Ok(changed)
    }

    /// Poll until a frame arrives or `timeout` passes.
    pub async fn wait_incoming(
        &mut self,
        timeout: Duration,
        host: &mut dyn SyncHost,
    ) -> Result<Vec<CoValueId>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let received_before = self.frames_received();
            let changed = self.poll(host)?;
            if self.frames_received() > received_before || tokio::time::Instant::now() >= deadline {
                return Ok(changed);
            }
            tokio::time::sleep(self.config.backpressure_poll_interval).await;
        }
    }

    fn frames_received(&self) -> u64 {
        self.peers.values().map(|p| p.stats.frames_received).sum()
    }
}

/// Queue content of `id` (and of what it depends on) that `peer` lacks.
fn queue_content(
    peer: &mut Peer,
    id: &CoValueId,
    host: &dyn SyncHost,
    config: &SyncConfig,
    visited: &mut BTreeSet<CoValueId>,
) {
    if !visited.insert(*id) {
        return;
    }
    let Some(ours) = host.known_state(id) else {
        return;
    };
    for dependency in host.dependencies(id) {
        peer.state.mark_interested(dependency);
        queue_content(peer, &dependency, host, config, visited);
    }

    let theirs = peer.state.known_state(id);
    if theirs.as_ref().is_some_and(|t| t.covers(&ours)) {
        return;
    }
    let priority = host.priority(id);
    for piece in host.new_content_since(id, theirs.as_ref(), config.max_piece_bytes) {
        peer.stats.transactions_sent += piece.transaction_count() as u64;
        peer.queue(&SyncMessage::Content(piece), priority);
    }
    peer.state.assume(&ours);
}

async fn wait_for_buffer(transport: &dyn Transport, config: &SyncConfig) {
    while transport.is_connected() && transport.buffered_amount() >= config.outgoing_buffer_limit {
        tokio::time::sleep(config.backpressure_poll_interval).await;
    }
}
