//! File-backed checkpoint storage.
//!
//! Layout: `{root}/{workflow_name}/{checkpoint_id}.json`, one pretty-printed
//! JSON record per file. Writes go to a `.tmp` sibling first and are renamed
//! into place, so a crash never leaves a truncated record behind.

use crate::{
    checkpoint::{CheckpointId, WorkflowCheckpoint},
    error::{CheckpointError, Result},
    traits::{CheckpointStorage, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const RECORD_EXTENSION: &str = "json";

/// Checkpoint storage persisting one JSON file per checkpoint.
#[derive(Debug, Clone)]
pub struct FileCheckpointStorage {
    root: PathBuf,
}

impl FileCheckpointStorage {
    /// Create a storage rooted at `root`. The directory is created lazily on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the storage
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn workflow_dir(&self, workflow_name: &str) -> PathBuf {
        self.root.join(sanitize_component(workflow_name))
    }

    /// Locate the file holding `checkpoint_id`, scanning every workflow directory.
    async fn find_record(&self, checkpoint_id: &str) -> Result<Option<PathBuf>> {
        validate_id(checkpoint_id)?;
        let file_name = format!("{}.{}", checkpoint_id, RECORD_EXTENSION);

        for dir in self.workflow_dirs().await? {
            let candidate = dir.join(&file_name);
            if tokio::fs::try_exists(&candidate).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    async fn workflow_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    async fn read_dir_records(&self, dir: &Path, out: &mut Vec<WorkflowCheckpoint>) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match read_record(&path).await {
                Ok(checkpoint) => out.push(checkpoint),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint file"),
            }
        }
        Ok(())
    }
}

async fn read_record(path: &Path) -> Result<WorkflowCheckpoint> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Checkpoint IDs become file names; reject anything that could escape the directory.
fn validate_id(checkpoint_id: &str) -> Result<()> {
    let ok = !checkpoint_id.is_empty()
        && checkpoint_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CheckpointError::Invalid(format!(
            "checkpoint id '{}' is not a valid file name",
            checkpoint_id
        )))
    }
}

fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl CheckpointStorage for FileCheckpointStorage {
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<CheckpointId> {
        validate_id(&checkpoint.checkpoint_id)?;

        let dir = self.workflow_dir(&checkpoint.workflow_name);
        tokio::fs::create_dir_all(&dir).await?;

        let id = checkpoint.checkpoint_id.clone();
        let final_path = dir.join(format!("{}.{}", id, RECORD_EXTENSION));
        let tmp_path = dir.join(format!("{}.tmp", id));

        let body = serde_json::to_vec_pretty(&checkpoint)?;
        tokio::fs::write(&tmp_path, body).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;

        debug!(checkpoint_id = %id, path = %final_path.display(), "Checkpoint written");
        Ok(id)
    }

    async fn load(&self, checkpoint_id: &str) -> Result<WorkflowCheckpoint> {
        match self.find_record(checkpoint_id).await? {
            Some(path) => read_record(&path).await,
            None => Err(CheckpointError::NotFound(checkpoint_id.to_string())),
        }
    }

    async fn list(&self, workflow_name: Option<&str>) -> Result<CheckpointStream> {
        let mut results = Vec::new();
        match workflow_name {
            Some(name) => {
                let dir = self.workflow_dir(name);
                self.read_dir_records(&dir, &mut results).await?;
                // Sanitised names can collide; keep only exact matches.
                results.retain(|c| c.workflow_name == name);
            }
            None => {
                for dir in self.workflow_dirs().await? {
                    self.read_dir_records(&dir, &mut results).await?;
                }
            }
        }
        results.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        Ok(Box::pin(stream::iter(results.into_iter().map(Ok::<_, CheckpointError>))))
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        match self.find_record(checkpoint_id).await? {
            Some(path) => {
                tokio::fs::remove_file(&path).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
