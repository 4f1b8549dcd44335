//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use covalent::{Node, NodeConfig};
use covalent_core::{AgentSecret, ManualClock, SessionId, TransactionId};
use covalent_crdt::DecodedTx;
use covalent_store::{MemoryStorage, Storage};
use serde_json::Value;

/// Deterministic agent from a one-byte seed.
pub fn agent(seed: u8) -> AgentSecret {
    AgentSecret::from_seed(&[seed; 32])
}

/// Start time of every fixture clock.
pub const EPOCH_MILLIS: u64 = 1_700_000_000_000;

/// Nodes sharing one manual clock, so transaction times are distinct and
/// ordered across nodes.
pub struct TestFixture {
    pub clock: Arc<ManualClock>,
    pub config: NodeConfig,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ManualClock::new(EPOCH_MILLIS)),
            config: NodeConfig::default(),
        }
    }

    pub fn with_config(config: NodeConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    /// A node with in-memory storage.
    pub async fn node(&self, seed: u8) -> anyhow::Result<Node<MemoryStorage>> {
        self.node_with(seed, MemoryStorage::new()).await
    }

    pub async fn node_with<S: Storage>(&self, seed: u8, storage: S) -> anyhow::Result<Node<S>> {
        let node = Node::builder(agent(seed), storage)
            .config(self.config.clone())
            .clock(self.clock.clone())
            .build()
            .await?;
        Ok(node)
    }

    /// A node with a random agent.
    pub async fn random_node(&self) -> anyhow::Result<Node<MemoryStorage>> {
        let node = Node::builder(AgentSecret::from_seed(&rand::random()), MemoryStorage::new())
            .config(self.config.clone())
            .clock(self.clock.clone())
            .build()
            .await?;
        Ok(node)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded transaction by agent `seed`, for folding views directly.
pub fn decoded_tx(seed: u8, tx_index: u32, made_at: u64, changes: Vec<Value>) -> DecodedTx {
    let session = SessionId::new(None, agent(seed).agent_id(), u64::from(seed));
    DecodedTx {
        id: TransactionId::new(session, tx_index),
        made_at,
        changes,
        meta: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nodes_share_the_clock() {
        let fixture = TestFixture::new();
        let a = fixture.node(1).await.unwrap();
        let b = fixture.node(2).await.unwrap();
        assert_ne!(a.account_id(), b.account_id());
        assert!(b.now() > a.now());
    }

    #[test]
    fn test_decoded_tx() {
        let tx = decoded_tx(3, 2, 10, vec![]);
        assert_eq!(tx.id.tx_index, 2);
        assert_eq!(tx.id.session.agent, agent(3).agent_id());
    }
}
