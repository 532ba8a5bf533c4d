//! Buffered entry points.
//!
//! Each of these drives the same event stream as its streaming counterpart
//! and collects it. A failure returns a [`RunError`] holding every event
//! emitted before the terminal error.

use super::streaming::Launch;
use super::{EventStream, Workflow};
use crate::error::RunError;
use crate::event::WorkflowRunResult;
use crate::payload::Payload;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use workflow_checkpoint::CheckpointStorage;

/// Result of a buffered entry point
pub type RunResult = std::result::Result<WorkflowRunResult, RunError>;

impl Workflow {
    /// Run from `input` until the workflow converges, pauses or fails.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let result = workflow.run(0i64).await?;
    /// assert_eq!(result.final_output(), Some(&serde_json::json!(10)));
    /// ```
    pub async fn run(&self, input: impl Into<Payload>) -> RunResult {
        let stream = self.launch(Launch::Fresh(input.into())).await?;
        collect(stream).await
    }

    /// Answer pending requests (`request_id -> response`) and continue the run.
    ///
    /// Unknown IDs and responses no executor handles are rejected before
    /// anything changes.
    pub async fn send_responses(&self, responses: HashMap<String, Payload>) -> RunResult {
        let stream = self.launch(Launch::Responses(responses)).await?;
        collect(stream).await
    }

    /// Restore a checkpoint and continue the run.
    ///
    /// See [`run_stream_from_checkpoint`](Self::run_stream_from_checkpoint)
    /// for how the storage is chosen.
    pub async fn run_from_checkpoint(
        &self,
        checkpoint_id: &str,
        storage: Option<Arc<dyn CheckpointStorage>>,
        responses: Option<HashMap<String, Payload>>,
    ) -> RunResult {
        let stream = self
            .launch(Launch::Checkpoint {
                checkpoint_id: checkpoint_id.to_string(),
                storage,
                responses,
            })
            .await?;
        collect(stream).await
    }
}

async fn collect(mut stream: EventStream) -> RunResult {
    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => events.push(event),
            Err(error) => {
                tracing::debug!(error = %error, events = events.len(), "Run ended with error");
                return Err(RunError { error, events });
            }
        }
    }
    Ok(WorkflowRunResult::from_events(events))
}
