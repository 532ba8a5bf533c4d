//! Error types for workflow construction and execution.
//!
//! Errors fall into five families, and callers are expected to tell them apart:
//!
//! - **Construction** - raised by [`ExecutorBuilder::build`](crate::ExecutorBuilder::build)
//!   and [`WorkflowBuilder::build`](crate::WorkflowBuilder::build); never reach a run.
//! - **Convergence** - [`WorkflowError::ConvergenceExhausted`], distinct from handler failure.
//! - **Handler failure** - [`WorkflowError::NodeExecution`], carrying the handler's message verbatim.
//! - **Checkpoint** - restore-time problems, each with its own variant.
//! - **Caller** - bad request IDs or responses passed to `send_responses`; run state is untouched.

use crate::event::WorkflowEvent;
use thiserror::Error;

/// Convenience result type using [`WorkflowError`]
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Error type for every workflow operation
///
/// # Examples
///
/// ```rust
/// use workflow_core::WorkflowError;
///
/// fn describe(err: &WorkflowError) -> &'static str {
///     match err {
///         WorkflowError::ConvergenceExhausted { .. } => "cycle never settled",
///         WorkflowError::NodeExecution { .. } => "handler failed",
///         e if e.is_caller_error() => "bad responses",
///         _ => "other",
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Graph or executor structure is invalid
    ///
    /// **Common causes**:
    /// - Edge endpoint references an unknown executor
    /// - Fan-in with fewer than two sources, fan-out with fewer than two targets
    /// - Missing start executor
    /// - Reserved executor ID used by user code
    #[error("Workflow validation failed: {0}")]
    Validation(String),

    /// Two executors were registered with the same ID
    #[error("Executor '{0}' is registered more than once")]
    DuplicateExecutor(String),

    /// An executor registered two handlers for the same payload kind
    #[error("Executor '{executor}' registers more than one handler for '{kind}'")]
    DuplicateHandler {
        /// Executor being built
        executor: String,
        /// Conflicting payload kind
        kind: String,
    },

    /// An executor registered two response handlers for the same (request, response) pair
    #[error(
        "Executor '{executor}' registers more than one response handler for ({request_kind}, {response_kind})"
    )]
    DuplicateResponseHandler {
        /// Executor being built
        executor: String,
        /// Request kind of the pair
        request_kind: String,
        /// Response kind of the pair
        response_kind: String,
    },

    /// An edge connects a source whose declared outputs the target cannot accept
    #[error("Edge '{source_id}' -> '{target}' is not type compatible: {detail}")]
    TypeMismatch {
        /// Source executor
        source_id: String,
        /// Target executor
        target: String,
        /// What could not be matched
        detail: String,
    },

    /// The iteration budget ran out before the run went quiet
    ///
    /// **Recovery**: raise `max_iterations` or break the message cycle.
    #[error("Workflow did not converge within {max_iterations} supersteps (ran {iteration_count})")]
    ConvergenceExhausted {
        /// Configured limit
        max_iterations: usize,
        /// Supersteps completed when the limit was hit
        iteration_count: usize,
    },

    /// A handler returned an error
    #[error("Executor '{executor}' failed: {error}")]
    NodeExecution {
        /// Executor whose handler failed
        executor: String,
        /// Error message from the handler
        error: String,
    },

    /// A payload reached an executor with no handler for its kind
    #[error("Executor '{executor}' has no handler for payload kind '{kind}'")]
    NoHandler {
        /// Receiving executor
        executor: String,
        /// Payload kind that was not handled
        kind: String,
    },

    /// A state read found no value under the key
    #[error("Key '{key}' not found in {scope} state")]
    KeyNotFound {
        /// Scope that was read
        scope: String,
        /// Missing key
        key: String,
    },

    /// The run was cancelled before it finished
    #[error("Workflow run was cancelled")]
    Cancelled,

    /// Another run of the same workflow is in progress
    #[error("Workflow '{0}' is already running")]
    AlreadyRunning(String),

    /// The checkpoint was produced by a different graph topology
    #[error("Checkpoint graph signature '{actual}' does not match workflow signature '{expected}'")]
    GraphMismatch {
        /// Signature of the live graph
        expected: String,
        /// Signature stored in the checkpoint
        actual: String,
    },

    /// No checkpoint with the requested ID exists
    #[error("Checkpoint '{0}' not found")]
    CheckpointNotFound(String),

    /// A checkpoint record exists but cannot be restored
    #[error("Malformed checkpoint: {0}")]
    MalformedCheckpoint(String),

    /// Checkpoint storage error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] workflow_checkpoint::CheckpointError),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A response references a request ID that is not pending
    #[error("Request '{0}' is not pending")]
    UnknownRequest(String),

    /// No executor accepts the (request, response) pair of a response
    #[error("No executor handles response of kind '{response_kind}' to request '{request_id}' ({request_kind})")]
    UnmatchedResponse {
        /// Request being answered
        request_id: String,
        /// Kind of the original request
        request_kind: String,
        /// Kind of the supplied response
        response_kind: String,
    },

    /// Responses were supplied but the workflow is not waiting for any
    #[error("Workflow is not waiting for responses")]
    NotPaused,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

impl WorkflowError {
    /// Build a [`WorkflowError::NodeExecution`]
    pub fn node_execution(executor: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            executor: executor.into(),
            error: error.into(),
        }
    }

    /// Build a [`WorkflowError::KeyNotFound`]
    pub fn key_not_found(scope: impl std::fmt::Display, key: impl Into<String>) -> Self {
        Self::KeyNotFound {
            scope: scope.to_string(),
            key: key.into(),
        }
    }

    /// Errors caused by the caller's responses; the run can continue after correcting them.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownRequest(_) | Self::UnmatchedResponse { .. } | Self::NotPaused
        )
    }

    /// Errors raised while loading or restoring a checkpoint.
    pub fn is_checkpoint_error(&self) -> bool {
        matches!(
            self,
            Self::GraphMismatch { .. }
                | Self::CheckpointNotFound(_)
                | Self::MalformedCheckpoint(_)
                | Self::Checkpoint(_)
        )
    }

    /// Errors raised while the graph is being assembled.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::DuplicateExecutor(_)
                | Self::DuplicateHandler { .. }
                | Self::DuplicateResponseHandler { .. }
                | Self::TypeMismatch { .. }
        )
    }
}

/// Terminal error of a buffered run together with every event produced before it.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct RunError {
    /// The error that ended the run
    #[source]
    pub error: WorkflowError,
    /// Events drained before the failure, in emission order
    pub events: Vec<WorkflowEvent>,
}

impl RunError {
    /// Outputs yielded before the failure
    pub fn outputs(&self) -> Vec<&serde_json::Value> {
        self.events
            .iter()
            .filter_map(|event| match event {
                WorkflowEvent::Output { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }
}

impl From<WorkflowError> for RunError {
    fn from(error: WorkflowError) -> Self {
        Self {
            error,
            events: Vec::new(),
        }
    }
}
