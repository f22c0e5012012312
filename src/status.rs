//! Latest per-host scan results.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Outcome of the most recent scan of a single host.
///
/// `agent_online` implies `online`; a nonempty `active_user` implies
/// `agent_online`. An empty `error` means the pipeline completed without a
/// surfaced error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub online: bool,
    pub agent_online: bool,
    pub active_user: String,
    pub updated_at: DateTime<Utc>,
    pub error: String,
}

/// Keyed snapshot of the latest statuses: concurrent reads, serialized writes.
#[derive(Default)]
pub struct StatusStore {
    statuses: RwLock<HashMap<String, HostStatus>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the status for `name`.
    pub async fn put(&self, name: &str, status: HostStatus) {
        self.statuses.write().await.insert(name.to_string(), status);
    }

    pub async fn get(&self, name: &str) -> Option<HostStatus> {
        self.statuses.read().await.get(name).cloned()
    }

    /// Stable copy of the current statuses; order unspecified.
    pub async fn snapshot(&self) -> Vec<HostStatus> {
        self.statuses.read().await.values().cloned().collect()
    }

    /// Drop statuses of hosts that are no longer in the catalog.
    pub async fn retain(&self, names: &HashSet<String>) {
        self.statuses
            .write()
            .await
            .retain(|name, _| names.contains(name));
    }
}
