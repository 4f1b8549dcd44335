//! Read handles over folded content.
//!
//! A handle is a snapshot: it shares the view the node computed when it was
//! taken and does not follow later changes. Take a fresh one after writing
//! or syncing.

use std::sync::Arc;

use covalent_core::{CoValueId, MemberId, SessionId};
use covalent_crdt::{CoList, CoMap, CoStream, ListEntry, MapEdit, StreamItem};
use serde_json::Value;

/// Snapshot of a map-kind CoValue.
#[derive(Debug, Clone)]
pub struct MapHandle {
    id: CoValueId,
    content_type: String,
    map: Arc<CoMap>,
}

impl MapHandle {
    pub(crate) fn new(id: CoValueId, content_type: String, map: Arc<CoMap>) -> Self {
        Self {
            id,
            content_type,
            map,
        }
    }

    pub fn id(&self) -> CoValueId {
        self.id
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.as_i64()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_f64()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.as_bool()
    }

    /// A value holding another CoValue's id.
    pub fn get_ref(&self, key: &str) -> Option<CoValueId> {
        self.get_str(key)?.parse().ok()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn to_json(&self) -> Value {
        self.map.to_json()
    }

    /// The map as it was at `time`.
    pub fn at_time(&self, time: u64) -> MapHandle {
        MapHandle {
            id: self.id,
            content_type: self.content_type.clone(),
            map: Arc::new(self.map.at_time(time)),
        }
    }

    /// Every edit of `key`, oldest first.
    pub fn edits(&self, key: &str) -> &[MapEdit] {
        self.map.edits(key)
    }

    pub fn last_edit(&self, key: &str) -> Option<&MapEdit> {
        self.map.last_edit(key)
    }

    /// Who made the latest edit of `key`.
    pub fn last_editor(&self, key: &str) -> Option<MemberId> {
        self.last_edit(key).map(|edit| edit.tx.session.owner())
    }

    pub fn view(&self) -> &CoMap {
        &self.map
    }
}

/// Snapshot of a list-kind CoValue.
#[derive(Debug, Clone)]
pub struct ListHandle {
    id: CoValueId,
    list: Arc<CoList>,
}

impl ListHandle {
    pub(crate) fn new(id: CoValueId, list: Arc<CoList>) -> Self {
        Self { id, list }
    }

    pub fn id(&self) -> CoValueId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.list.get(index)
    }

    pub fn get_str(&self, index: usize) -> Option<&str> {
        self.get(index)?.as_str()
    }

    pub fn get_i64(&self, index: usize) -> Option<i64> {
        self.get(index)?.as_i64()
    }

    pub fn get_ref(&self, index: usize) -> Option<CoValueId> {
        self.get_str(index)?.parse().ok()
    }

    pub fn entries(&self) -> &[ListEntry] {
        self.list.entries()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.list.to_vec()
    }

    pub fn to_json(&self) -> Value {
        self.list.to_json()
    }

    pub fn view(&self) -> &CoList {
        &self.list
    }
}

/// Snapshot of a stream-kind CoValue.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    id: CoValueId,
    stream: Arc<CoStream>,
}

impl StreamHandle {
    pub(crate) fn new(id: CoValueId, stream: Arc<CoStream>) -> Self {
        Self { id, stream }
    }

    pub fn id(&self) -> CoValueId {
        self.id
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionId> {
        self.stream.sessions()
    }

    pub fn items(&self, session: &SessionId) -> &[StreamItem] {
        self.stream.items(session)
    }

    /// Items written by `member` across all of its sessions.
    pub fn items_by(&self, member: &MemberId) -> Vec<&StreamItem> {
        self.stream.items_by(member)
    }

    pub fn last_by(&self, member: &MemberId) -> Option<&StreamItem> {
        self.stream.last_by(member)
    }

    pub fn total_items(&self) -> usize {
        self.stream.total_items()
    }

    pub fn to_json(&self) -> Value {
        self.stream.to_json()
    }

    pub fn view(&self) -> &CoStream {
        &self.stream
    }
}
