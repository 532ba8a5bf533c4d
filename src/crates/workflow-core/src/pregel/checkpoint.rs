//! Capture and restore of runner state.
//!
//! A checkpoint holds everything needed to continue a run exactly where it
//! stopped:
//!
//! | Checkpoint field     | Runner source                               |
//! |----------------------|---------------------------------------------|
//! | `shared_state`       | committed shared scope                      |
//! | `executor_states`    | committed per-executor scopes               |
//! | `pending_messages`   | messages queued for the next superstep      |
//! | `edge_states`        | fan-in buffers, keyed by edge group ID      |
//! | `pending_requests`   | outstanding host requests                   |
//! | `iteration_count`    | supersteps completed                        |
//!
//! Restoring is all-or-nothing: a new [`Runner`] is assembled from the
//! checkpoint and only handed back once every part has been validated.

use super::loop_impl::Runner;
use crate::error::{Result, WorkflowError};
use crate::message::Message;
use crate::request_info::RequestInfoExecutor;
use crate::state::{State, StateSnapshot};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use workflow_checkpoint::WorkflowCheckpoint;

const METADATA_STATE_VERSION: &str = "state_version";
const METADATA_NEXT_SEQ: &str = "next_seq";

impl Runner {
    /// Snapshot the runner at a superstep boundary.
    pub(crate) fn capture(&self) -> Result<WorkflowCheckpoint> {
        let snapshot = self.state.export();

        let mut checkpoint =
            WorkflowCheckpoint::new(self.workflow_name.clone(), self.graph.signature_hash())
                .with_iterations(self.iteration, self.max_iterations)
                .with_previous(self.previous_checkpoint_id.clone())
                .with_metadata(METADATA_NEXT_SEQ, Value::from(self.next_seq));

        checkpoint.shared_state = snapshot.shared;
        checkpoint.state_version = snapshot.version;
        checkpoint.executor_states = snapshot
            .executors
            .into_iter()
            .map(|(id, values)| (id, Value::Object(values.into_iter().collect())))
            .collect();

        for (source, messages) in &self.pending {
            let encoded = messages
                .iter()
                .map(serde_json::to_value)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            checkpoint.pending_messages.insert(source.clone(), encoded);
        }

        for runner in &self.edge_runners {
            if let Some(state) = runner.export_state()? {
                checkpoint
                    .edge_states
                    .insert(runner.group_id().to_string(), state);
            }
        }

        checkpoint.pending_requests = self.request_info.export()?;
        checkpoint
            .metadata
            .insert(METADATA_STATE_VERSION.into(), Value::from(snapshot.version));
        Ok(checkpoint)
    }

    /// Build a runner positioned at `checkpoint`.
    ///
    /// `self` is left untouched; the caller swaps the result in on success.
    pub(crate) fn restored(&self, checkpoint: &WorkflowCheckpoint) -> Result<Runner> {
        if checkpoint.graph_signature_hash != self.graph.signature_hash() {
            return Err(WorkflowError::GraphMismatch {
                expected: self.graph.signature_hash().to_string(),
                actual: checkpoint.graph_signature_hash.clone(),
            });
        }

        let mut executors = HashMap::new();
        for (id, value) in &checkpoint.executor_states {
            let Value::Object(map) = value else {
                return Err(WorkflowError::MalformedCheckpoint(format!(
                    "state of executor '{}' is not a key/value map",
                    id
                )));
            };
            if self.graph.executor(id).is_none() {
                return Err(WorkflowError::MalformedCheckpoint(format!(
                    "state for unknown executor '{}'",
                    id
                )));
            }
            executors.insert(id.clone(), map.clone().into_iter().collect());
        }

        let mut pending = BTreeMap::new();
        for (source, encoded) in &checkpoint.pending_messages {
            let messages = encoded
                .iter()
                .map(|value| serde_json::from_value::<Message>(value.clone()))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    WorkflowError::MalformedCheckpoint(format!(
                        "pending message from '{}': {}",
                        source, e
                    ))
                })?;
            if !messages.is_empty() {
                pending.insert(source.clone(), messages);
            }
        }

        let mut runner = self.fresh();
        for (group_id, state) in &checkpoint.edge_states {
            let edge = runner
                .edge_runners
                .iter_mut()
                .find(|r| r.group_id() == group_id)
                .ok_or_else(|| {
                    WorkflowError::MalformedCheckpoint(format!("unknown edge group '{}'", group_id))
                })?;
            edge.import_state(state)?;
        }

        let recorded_seq = checkpoint
            .metadata
            .get(METADATA_NEXT_SEQ)
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let buffered_seq = runner
            .edge_runners
            .iter()
            .filter_map(|r| r.max_seq())
            .max()
            .map_or(0, |seq| seq + 1);

        let state = State::new();
        state.import(StateSnapshot {
            shared: checkpoint.shared_state.clone(),
            executors,
            version: checkpoint.state_version,
        });

        runner.state = Arc::new(state);
        runner.pending = pending;
        runner.request_info = RequestInfoExecutor::import(&checkpoint.pending_requests)?;
        runner.iteration = checkpoint.iteration_count;
        runner.next_seq = recorded_seq.max(buffered_seq);
        runner.previous_checkpoint_id = Some(checkpoint.checkpoint_id.clone());
        runner.resumed = true;
        tracing::debug!(
            checkpoint_id = %checkpoint.checkpoint_id,
            iteration = runner.iteration,
            pending_sources = runner.pending.len(),
            "Runner restored from checkpoint"
        );
        Ok(runner)
    }
}
