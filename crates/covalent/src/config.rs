//! Node configuration.

use std::time::Duration;

use covalent_core::Privacy;
use covalent_sync::SyncConfig;
use serde::{Deserialize, Serialize};

/// Configuration for a [`Node`](crate::Node).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeConfig {
    /// Sync configuration.
    pub sync: SyncConfig,
    /// How long a load waits for peers before giving up.
    pub load_timeout: Duration,
    /// Privacy of transactions made without an explicit choice.
    pub default_privacy: Privacy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            load_timeout: Duration::from_secs(5),
            default_privacy: Privacy::Private,
        }
    }
}

impl NodeConfig {
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn with_default_privacy(mut self, privacy: Privacy) -> Self {
        self.default_privacy = privacy;
        self
    }
}
