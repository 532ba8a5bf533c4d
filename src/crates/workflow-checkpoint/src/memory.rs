//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointStorage`] keeps every record in an
//! `Arc<RwLock<HashMap>>` keyed by workflow name, each entry holding the
//! records of that workflow in save order. Data is lost when the process
//! exits. Cloning the storage shares the underlying map.

use crate::{
    checkpoint::{CheckpointId, WorkflowCheckpoint},
    error::{CheckpointError, Result},
    traits::{CheckpointStorage, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory checkpoint storage implementation
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointStorage {
    storage: Arc<RwLock<HashMap<String, Vec<WorkflowCheckpoint>>>>,
}

impl InMemoryCheckpointStorage {
    /// Create a new empty storage
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of workflows with at least one stored checkpoint
    pub async fn workflow_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of stored checkpoints
    pub async fn checkpoint_count(&self) -> usize {
        self.storage.read().await.values().map(Vec::len).sum()
    }

    /// Remove everything (test isolation)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

impl Default for InMemoryCheckpointStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStorage for InMemoryCheckpointStorage {
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<CheckpointId> {
        let id = checkpoint.checkpoint_id.clone();
        let mut storage = self.storage.write().await;
        let entries = storage.entry(checkpoint.workflow_name.clone()).or_default();

        match entries.iter_mut().find(|c| c.checkpoint_id == id) {
            Some(existing) => *existing = checkpoint,
            None => entries.push(checkpoint),
        }

        tracing::trace!(checkpoint_id = %id, "Saved checkpoint in memory");
        Ok(id)
    }

    async fn load(&self, checkpoint_id: &str) -> Result<WorkflowCheckpoint> {
        let storage = self.storage.read().await;
        storage
            .values()
            .flat_map(|entries| entries.iter())
            .find(|c| c.checkpoint_id == checkpoint_id)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.to_string()))
    }

    async fn list(&self, workflow_name: Option<&str>) -> Result<CheckpointStream> {
        let storage = self.storage.read().await;
        let mut results: Vec<WorkflowCheckpoint> = match workflow_name {
            Some(name) => storage.get(name).cloned().unwrap_or_default(),
            None => storage.values().flatten().cloned().collect(),
        };
        // Save order within a workflow is already chronological; across
        // workflows the timestamp decides.
        results.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        Ok(Box::pin(stream::iter(results.into_iter().map(Ok::<_, CheckpointError>))))
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        let mut storage = self.storage.write().await;
        let mut removed = false;
        for entries in storage.values_mut() {
            let before = entries.len();
            entries.retain(|c| c.checkpoint_id != checkpoint_id);
            removed |= entries.len() != before;
        }
        storage.retain(|_, entries| !entries.is_empty());
        Ok(removed)
    }
}
