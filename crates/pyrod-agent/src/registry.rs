//! In-memory registry of supervised containers
//!
//! At most one entry exists per server id at any instant. An entry owns the
//! background tasks attached to its container (log pump, online promotion);
//! evicting the entry aborts them and drops the cached stats sample.

use crate::stats::StatsSample;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// One supervised container binding
pub struct ContainerHandle {
    pub container_name: String,
    pub log_task: Option<JoinHandle<()>>,
    pub promotion_task: Option<JoinHandle<()>>,
}

impl ContainerHandle {
    fn abort_tasks(&self) {
        if let Some(task) = &self.log_task {
            task.abort();
        }
        if let Some(task) = &self.promotion_task {
            task.abort();
        }
    }
}

/// Registry of live container bindings plus the last stats sample per id
#[derive(Default)]
pub struct ContainerRegistry {
    containers: RwLock<HashMap<String, ContainerHandle>>,
    stats: RwLock<HashMap<String, StatsSample>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding; any previous binding for the id is evicted first
    pub async fn register(&self, id: &str, handle: ContainerHandle) {
        let mut containers = self.containers.write().await;
        if let Some(old) = containers.insert(id.to_string(), handle) {
            old.abort_tasks();
        }
    }

    /// Remove a binding, aborting its tasks and dropping cached stats
    pub async fn evict(&self, id: &str) -> Option<String> {
        let removed = self.containers.write().await.remove(id);
        self.stats.write().await.remove(id);
        removed.map(|handle| {
            handle.abort_tasks();
            handle.container_name
        })
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.containers.read().await.contains_key(id)
    }

    pub async fn container_name(&self, id: &str) -> Option<String> {
        self.containers
            .read()
            .await
            .get(id)
            .map(|h| h.container_name.clone())
    }

    /// Snapshot of (server id, container name) pairs for the tickers
    pub async fn entries(&self) -> Vec<(String, String)> {
        self.containers
            .read()
            .await
            .iter()
            .map(|(id, h)| (id.clone(), h.container_name.clone()))
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.containers.read().await.len()
    }

    pub async fn set_stats(&self, id: &str, sample: StatsSample) {
        self.stats.write().await.insert(id.to_string(), sample);
    }

    pub async fn last_stats(&self, id: &str) -> Option<StatsSample> {
        self.stats.read().await.get(id).cloned()
    }

    /// Abort every attached task; used on daemon shutdown
    pub async fn abort_all(&self) {
        let containers = self.containers.read().await;
        for handle in containers.values() {
            handle.abort_tasks();
        }
    }
}
