//! Storage interface for workflow checkpoints.

use crate::{
    checkpoint::{CheckpointId, WorkflowCheckpoint},
    error::Result,
};
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;

/// Type alias for async stream of checkpoints
pub type CheckpointStream =
    Pin<Box<dyn Stream<Item = Result<WorkflowCheckpoint>> + Send + 'static>>;

/// Core trait for implementing checkpoint storage backends
///
/// The engine calls [`save`](CheckpointStorage::save) once per completed
/// superstep and [`load`](CheckpointStorage::load) when a run is resumed.
/// Records are immutable once saved; saving a record whose ID already exists
/// replaces it.
///
/// Implementations must be thread-safe (`Send + Sync`); a single storage may
/// be shared by several workflows.
///
/// ## Example
///
/// ```rust,no_run
/// use workflow_checkpoint::{CheckpointStorage, InMemoryCheckpointStorage, WorkflowCheckpoint};
///
/// # async fn demo() -> workflow_checkpoint::Result<()> {
/// let storage = InMemoryCheckpointStorage::new();
/// let id = storage.save(WorkflowCheckpoint::new("orders", "graph-hash")).await?;
/// let loaded = storage.load(&id).await?;
/// assert_eq!(loaded.workflow_name, "orders");
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait CheckpointStorage: Send + Sync {
    /// Persist a checkpoint and return its ID.
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<CheckpointId>;

    /// Load a checkpoint by ID.
    ///
    /// Fails with [`CheckpointError::NotFound`](crate::CheckpointError::NotFound)
    /// when no record with that ID exists.
    async fn load(&self, checkpoint_id: &str) -> Result<WorkflowCheckpoint>;

    /// Stream stored checkpoints, oldest first, optionally restricted to one workflow.
    async fn list(&self, workflow_name: Option<&str>) -> Result<CheckpointStream>;

    /// Remove a checkpoint. Returns `false` if it did not exist.
    async fn delete(&self, checkpoint_id: &str) -> Result<bool>;

    /// IDs of stored checkpoints, oldest first.
    async fn list_ids(&self, workflow_name: Option<&str>) -> Result<Vec<CheckpointId>> {
        let mut stream = self.list(workflow_name).await?;
        let mut ids = Vec::new();
        while let Some(checkpoint) = stream.next().await {
            ids.push(checkpoint?.checkpoint_id);
        }
        Ok(ids)
    }

    /// Most recently captured checkpoint of a workflow, if any.
    async fn latest(&self, workflow_name: &str) -> Result<Option<WorkflowCheckpoint>> {
        let mut stream = self.list(Some(workflow_name)).await?;
        let mut latest: Option<WorkflowCheckpoint> = None;
        while let Some(checkpoint) = stream.next().await {
            let checkpoint = checkpoint?;
            let newer = latest
                .as_ref()
                .map_or(true, |current| checkpoint.timestamp >= current.timestamp);
            if newer {
                latest = Some(checkpoint);
            }
        }
        Ok(latest)
    }
}
