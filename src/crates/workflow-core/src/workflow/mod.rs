//! Runnable workflows.
//!
//! A [`Workflow`] is produced by [`WorkflowBuilder`](crate::WorkflowBuilder)
//! and owns an immutable graph plus the mutable run state. Entry points come
//! in two flavours:
//!
//! | Buffered                     | Streaming                              |
//! |------------------------------|----------------------------------------|
//! | [`run`](Workflow::run)       | [`run_stream`](Workflow::run_stream)   |
//! | [`send_responses`](Workflow::send_responses) | [`send_responses_streaming`](Workflow::send_responses_streaming) |
//! | [`run_from_checkpoint`](Workflow::run_from_checkpoint) | [`run_stream_from_checkpoint`](Workflow::run_stream_from_checkpoint) |
//!
//! The run itself executes on a spawned task and writes events into a bounded
//! channel. Streaming entry points hand that channel to the caller; buffered
//! entry points collect it and return either a [`WorkflowRunResult`] or a
//! [`RunError`](crate::RunError) carrying every event produced before the
//! failure.
//!
//! [`WorkflowRunResult`]: crate::WorkflowRunResult

mod execution;
mod streaming;

pub use execution::RunResult;

use crate::error::Result;
use crate::event::{RunState, WorkflowEvent};
use crate::graph::WorkflowGraph;
use crate::payload::TypeRegistry;
use crate::pregel::Runner;
use crate::request_info::PendingRequest;
use crate::state::StateSnapshot;
use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use workflow_checkpoint::CheckpointStorage;

/// Stream of run events, ending with an `Err` item if the run failed.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<WorkflowEvent>> + Send>>;

/// Everything [`WorkflowBuilder::build`](crate::WorkflowBuilder::build) hands over.
pub(crate) struct WorkflowSettings {
    pub(crate) name: String,
    pub(crate) graph: Arc<WorkflowGraph>,
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) storage: Option<Arc<dyn CheckpointStorage>>,
    pub(crate) max_iterations: usize,
    pub(crate) event_buffer: usize,
}

/// A validated, runnable workflow.
///
/// Only one run may be active at a time; starting another while one is in
/// progress fails with [`AlreadyRunning`](crate::WorkflowError::AlreadyRunning).
pub struct Workflow {
    name: String,
    graph: Arc<WorkflowGraph>,
    storage: Option<Arc<dyn CheckpointStorage>>,
    max_iterations: usize,
    event_buffer: usize,
    runner: Arc<tokio::sync::Mutex<Runner>>,
    running: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("graph", &self.graph)
            .field("max_iterations", &self.max_iterations)
            .field("checkpointing", &self.storage.is_some())
            .finish_non_exhaustive()
    }
}

impl Workflow {
    pub(crate) fn new(settings: WorkflowSettings) -> Self {
        let runner = Runner::new(
            settings.graph.clone(),
            settings.registry,
            settings.name.clone(),
            settings.max_iterations,
            settings.storage.clone(),
        );
        Self {
            name: settings.name,
            graph: settings.graph,
            storage: settings.storage,
            max_iterations: settings.max_iterations,
            event_buffer: settings.event_buffer,
            runner: Arc::new(tokio::sync::Mutex::new(runner)),
            running: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Workflow name; checkpoints are grouped under it
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Structural hash stored in every checkpoint
    pub fn signature_hash(&self) -> &str {
        self.graph.signature_hash()
    }

    /// The validated topology
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Superstep limit
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Whether every superstep is checkpointed
    pub fn has_checkpointing(&self) -> bool {
        self.storage.is_some()
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// State of the current or most recent run.
    pub fn run_state(&self) -> RunState {
        if self.is_running() {
            return RunState::Running;
        }
        self.runner
            .try_lock()
            .map_or(RunState::Running, |runner| runner.status())
    }

    /// Requests awaiting a host response, ordered by ID.
    ///
    /// Waits for an active run to finish.
    pub async fn pending_requests(&self) -> Vec<PendingRequest> {
        self.runner.lock().await.pending_requests()
    }

    /// Committed state of the most recent run.
    ///
    /// Waits for an active run to finish.
    pub async fn state_snapshot(&self) -> StateSnapshot {
        self.runner.lock().await.state().export()
    }

    /// Supersteps completed by the most recent run
    pub async fn iteration_count(&self) -> usize {
        self.runner.lock().await.iteration()
    }

    /// Cancel the active run.
    ///
    /// In-flight handlers are dropped and no further superstep starts. Does
    /// nothing when no run is active.
    pub fn cancel(&self) {
        if self.is_running() {
            tracing::info!(workflow = %self.name, "Cancelling workflow run");
        }
        self.cancel.lock().cancel();
    }
}

/// Clears the running flag when the run ends or fails to start.
struct RunningGuard {
    flag: Arc<AtomicBool>,
}

impl RunningGuard {
    fn acquire(flag: &Arc<AtomicBool>, name: &str) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| crate::error::WorkflowError::AlreadyRunning(name.to_string()))?;
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
