//! Sync protocol message types.
//!
//! Every message is one JSON object with an `action` field. Several
//! messages travel in one frame, joined by newlines.

use serde::{Deserialize, Serialize};

use covalent_core::{CoValueContent, CoValueId, KnownState};

use crate::error::Result;

/// Sync protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SyncMessage {
    /// Ask for a CoValue, telling the peer what we already hold.
    Load(KnownState),
    /// What the sender holds.
    Known(KnownState),
    /// What the sender actually holds, after the peer assumed more.
    KnownCorrection(KnownState),
    /// New content.
    Content(CoValueContent),
}

impl SyncMessage {
    pub fn id(&self) -> CoValueId {
        match self {
            SyncMessage::Load(known)
            | SyncMessage::Known(known)
            | SyncMessage::KnownCorrection(known) => known.id,
            SyncMessage::Content(content) => content.id,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            SyncMessage::Load(_) => "load",
            SyncMessage::Known(_) => "known",
            SyncMessage::KnownCorrection(_) => "knownCorrection",
            SyncMessage::Content(_) => "content",
        }
    }

    /// Single-line JSON encoding.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Join encoded messages into one frame.
pub fn encode_frame(messages: &[SyncMessage]) -> Result<String> {
    let lines = messages
        .iter()
        .map(SyncMessage::encode)
        .collect::<Result<Vec<_>>>()?;
    Ok(lines.join("\n"))
}

/// Split a frame into messages. A bad line does not spoil the others.
pub fn decode_frame(frame: &str) -> Vec<Result<SyncMessage>> {
    frame
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(SyncMessage::decode)
        .collect()
}
