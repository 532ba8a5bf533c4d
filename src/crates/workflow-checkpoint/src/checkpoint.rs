//! The checkpoint record written at superstep boundaries.
//!
//! A [`WorkflowCheckpoint`] is a self-contained, immutable snapshot of one run:
//! committed state, pending messages keyed by the executor that sent them,
//! partially filled fan-in buffers, outstanding external requests, and the
//! iteration counters needed to resume. Checkpoints of the same run form a
//! chain through [`WorkflowCheckpoint::previous_checkpoint_id`].
//!
//! The record is deliberately engine-agnostic: message and edge payloads are
//! stored as `serde_json::Value` so storage backends never depend on the
//! engine's types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint ID type
pub type CheckpointId = String;

/// Snapshot of a workflow run taken after a superstep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowCheckpoint {
    /// Record format version
    pub version: u32,

    /// Unique identifier (UUID v4)
    pub checkpoint_id: CheckpointId,

    /// Name of the workflow that produced the checkpoint
    pub workflow_name: String,

    /// Hash of the graph topology the run was executing
    pub graph_signature_hash: String,

    /// Wall-clock time of capture
    pub timestamp: DateTime<Utc>,

    /// Committed shared-scope state
    #[serde(default)]
    pub shared_state: HashMap<String, serde_json::Value>,

    /// Committed per-executor state, keyed by executor ID.
    /// Every value is expected to be a JSON object.
    #[serde(default)]
    pub executor_states: HashMap<String, serde_json::Value>,

    /// State version counter at capture time
    #[serde(default)]
    pub state_version: u64,

    /// Messages queued for the next superstep, keyed by source executor ID
    #[serde(default)]
    pub pending_messages: HashMap<String, Vec<serde_json::Value>>,

    /// Run-scoped edge group state (fan-in buffers), keyed by edge group ID
    #[serde(default)]
    pub edge_states: HashMap<String, serde_json::Value>,

    /// Outstanding external requests, keyed by request ID
    #[serde(default)]
    pub pending_requests: HashMap<String, serde_json::Value>,

    /// Supersteps completed when the checkpoint was taken
    pub iteration_count: usize,

    /// Iteration limit of the run
    pub max_iterations: usize,

    /// Checkpoint this one follows in the same run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_checkpoint_id: Option<CheckpointId>,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkflowCheckpoint {
    /// Current checkpoint format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Create an empty checkpoint for the given workflow and graph hash.
    pub fn new(workflow_name: impl Into<String>, graph_signature_hash: impl Into<String>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            checkpoint_id: Uuid::new_v4().to_string(),
            workflow_name: workflow_name.into(),
            graph_signature_hash: graph_signature_hash.into(),
            timestamp: Utc::now(),
            shared_state: HashMap::new(),
            executor_states: HashMap::new(),
            state_version: 0,
            pending_messages: HashMap::new(),
            edge_states: HashMap::new(),
            pending_requests: HashMap::new(),
            iteration_count: 0,
            max_iterations: 0,
            previous_checkpoint_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the iteration counters
    pub fn with_iterations(mut self, iteration_count: usize, max_iterations: usize) -> Self {
        self.iteration_count = iteration_count;
        self.max_iterations = max_iterations;
        self
    }

    /// Set the previous checkpoint in the chain
    pub fn with_previous(mut self, previous: Option<CheckpointId>) -> Self {
        self.previous_checkpoint_id = previous;
        self
    }

    /// Add custom metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Total number of queued messages across all sources
    pub fn pending_message_count(&self) -> usize {
        self.pending_messages.values().map(Vec::len).sum()
    }

    /// Whether the run was paused waiting for external responses
    pub fn has_pending_requests(&self) -> bool {
        !self.pending_requests.is_empty()
    }
}
