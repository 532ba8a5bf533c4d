//! Streaming entry points and the shared launch path.

use super::{EventStream, RunningGuard, Workflow};
use crate::error::{Result, WorkflowError};
use crate::event::{RunState, WorkflowEvent};
use crate::payload::Payload;
use crate::pregel::loop_impl::emit;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use workflow_checkpoint::{CheckpointError, CheckpointId, CheckpointStorage};

/// What a run starts from.
pub(super) enum Launch {
    Fresh(Payload),
    Responses(HashMap<String, Payload>),
    Checkpoint {
        checkpoint_id: CheckpointId,
        storage: Option<Arc<dyn CheckpointStorage>>,
        responses: Option<HashMap<String, Payload>>,
    },
}

impl Workflow {
    /// Start a run and stream its events.
    ///
    /// Dropping the stream cancels the run.
    #[tracing::instrument(skip(self, input), fields(workflow = %self.name))]
    pub async fn run_stream(&self, input: impl Into<Payload>) -> Result<EventStream> {
        self.launch(Launch::Fresh(input.into())).await
    }

    /// Answer pending requests and stream the resumed run.
    ///
    /// Only a run that paused on requests can be resumed this way; a failed
    /// or cancelled run has to be restored from a checkpoint.
    #[tracing::instrument(skip(self, responses), fields(workflow = %self.name, responses = responses.len()))]
    pub async fn send_responses_streaming(
        &self,
        responses: HashMap<String, Payload>,
    ) -> Result<EventStream> {
        self.launch(Launch::Responses(responses)).await
    }

    /// Restore a checkpoint and stream the continued run.
    ///
    /// The checkpoint is read from this workflow's own storage when
    /// checkpointing is enabled, otherwise from `storage`. `responses`
    /// answers requests that were pending when the checkpoint was taken.
    #[tracing::instrument(skip(self, storage, responses), fields(workflow = %self.name))]
    pub async fn run_stream_from_checkpoint(
        &self,
        checkpoint_id: &str,
        storage: Option<Arc<dyn CheckpointStorage>>,
        responses: Option<HashMap<String, Payload>>,
    ) -> Result<EventStream> {
        self.launch(Launch::Checkpoint {
            checkpoint_id: checkpoint_id.to_string(),
            storage,
            responses,
        })
        .await
    }

    /// Validate the launch, then spawn the run.
    ///
    /// Every check happens before the run task exists, so a rejected launch
    /// leaves the previous run state untouched.
    pub(super) async fn launch(&self, launch: Launch) -> Result<EventStream> {
        let guard = RunningGuard::acquire(&self.running, &self.name)?;
        // installed before the first await so cancel() always reaches this run
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        let mut runner = self.runner.clone().lock_owned().await;

        match launch {
            Launch::Fresh(payload) => {
                let mut fresh = runner.fresh();
                fresh.seed(payload)?;
                *runner = fresh;
            }
            Launch::Responses(responses) => {
                if runner.status() != RunState::Idle {
                    return Err(WorkflowError::NotPaused);
                }
                runner.queue_responses(responses)?;
            }
            Launch::Checkpoint {
                checkpoint_id,
                storage,
                responses,
            } => {
                let storage = self.storage.clone().or(storage).ok_or_else(|| {
                    WorkflowError::Configuration(
                        "no checkpoint storage configured or supplied".to_string(),
                    )
                })?;
                let checkpoint = storage.load(&checkpoint_id).await.map_err(|e| match e {
                    CheckpointError::NotFound(_) => WorkflowError::CheckpointNotFound(checkpoint_id.clone()),
                    other => WorkflowError::Checkpoint(other),
                })?;
                let mut restored = runner.restored(&checkpoint)?;
                if let Some(responses) = responses.filter(|r| !r.is_empty()) {
                    restored.queue_responses(responses)?;
                }
                tracing::info!(checkpoint_id = %checkpoint_id, "Resuming from checkpoint");
                *runner = restored;
            }
        }

        let (tx, rx) = mpsc::channel(self.event_buffer);
        let workflow_name = self.name.clone();
        let run_token = token.clone();
        let handle = tokio::spawn(async move {
            emit(&tx, WorkflowEvent::Started { workflow_name }).await;
            let result = runner.run_until_idle(&tx, &run_token).await;
            // unlock the runner before clearing the running flag
            drop(runner);
            drop(guard);
            result
        });

        let drop_guard = token.drop_guard();
        let stream = async_stream::stream! {
            let _drop_guard = drop_guard;
            let mut events = ReceiverStream::new(rx);
            while let Some(event) = events.next().await {
                yield Ok(event);
            }
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(error)) => yield Err(error),
                Err(join_error) => {
                    tracing::error!(error = %join_error, "Workflow run task failed");
                    yield Err(WorkflowError::Custom(format!("run task failed: {}", join_error)));
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
