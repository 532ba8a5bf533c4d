//! Events emitted by a workflow run.

use crate::message::{ExecutorId, RUNNER_ID};
use crate::payload::{Payload, PayloadKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No run has started
    NotStarted,
    /// Supersteps are executing
    Running,
    /// Quiescent but waiting for external responses
    Idle,
    /// No pending messages and no pending requests
    Converged,
    /// Stopped by an error
    Failed,
    /// Stopped by cancellation
    Cancelled,
}

impl RunState {
    /// Whether no further supersteps will run without new input.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::NotStarted | RunState::Running)
    }
}

/// Event observable by the host of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A run (or a resumption) began
    Started {
        /// Workflow name
        workflow_name: String,
    },
    /// Run state transition
    Status {
        /// New state
        state: RunState,
    },
    /// A superstep is about to deliver messages
    SuperstepStarted {
        /// Zero-based superstep index
        iteration: usize,
    },
    /// A superstep passed its barrier
    SuperstepCompleted {
        /// Zero-based superstep index
        iteration: usize,
    },
    /// An executor received messages in this superstep; sent before its
    /// handlers start
    ExecutorInvoked {
        /// Invoked executor
        executor_id: ExecutorId,
    },
    /// An executor processed all its messages
    ExecutorCompleted {
        /// Completed executor
        executor_id: ExecutorId,
    },
    /// An executor handler returned an error
    ExecutorFailed {
        /// Failing executor
        executor_id: ExecutorId,
        /// Error message
        error: String,
    },
    /// A value yielded as workflow output
    Output {
        /// Executor that yielded it
        executor_id: ExecutorId,
        /// Output value
        data: Value,
    },
    /// A request waiting for an external response
    RequestInfo {
        /// ID to answer with
        request_id: String,
        /// Executor that asked
        source_executor_id: ExecutorId,
        /// The request itself
        request: Payload,
        /// Kind of response the asker expects
        response_kind: PayloadKind,
    },
    /// Event raised by handler code
    Custom {
        /// Executor that raised it
        executor_id: ExecutorId,
        /// Event name
        name: String,
        /// Event data
        data: Value,
    },
    /// The run stopped with an error
    Failed {
        /// Error message
        error: String,
    },
}

impl WorkflowEvent {
    /// Executor the event originates from. Runner-level events report [`RUNNER_ID`].
    pub fn source_executor_id(&self) -> &str {
        match self {
            WorkflowEvent::ExecutorInvoked { executor_id }
            | WorkflowEvent::ExecutorCompleted { executor_id }
            | WorkflowEvent::ExecutorFailed { executor_id, .. }
            | WorkflowEvent::Output { executor_id, .. }
            | WorkflowEvent::Custom { executor_id, .. } => executor_id,
            WorkflowEvent::RequestInfo {
                source_executor_id, ..
            } => source_executor_id,
            WorkflowEvent::Started { .. }
            | WorkflowEvent::Status { .. }
            | WorkflowEvent::SuperstepStarted { .. }
            | WorkflowEvent::SuperstepCompleted { .. }
            | WorkflowEvent::Failed { .. } => RUNNER_ID,
        }
    }

    pub(crate) fn status(state: RunState) -> Self {
        WorkflowEvent::Status { state }
    }
}

/// Result of a buffered run.
#[derive(Debug, Clone)]
pub struct WorkflowRunResult {
    /// Every event in emission order
    pub events: Vec<WorkflowEvent>,
    /// State the run ended in
    pub final_state: RunState,
}

impl WorkflowRunResult {
    pub(crate) fn from_events(events: Vec<WorkflowEvent>) -> Self {
        let final_state = events
            .iter()
            .rev()
            .find_map(|event| match event {
                WorkflowEvent::Status { state } => Some(*state),
                _ => None,
            })
            .unwrap_or(RunState::Converged);
        Self {
            events,
            final_state,
        }
    }

    /// Yielded outputs in order
    pub fn outputs(&self) -> Vec<&Value> {
        self.events
            .iter()
            .filter_map(|event| match event {
                WorkflowEvent::Output { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Last yielded output, if any
    pub fn final_output(&self) -> Option<&Value> {
        self.outputs().into_iter().last()
    }

    /// Request events raised by the run
    pub fn request_info_events(&self) -> Vec<&WorkflowEvent> {
        self.events
            .iter()
            .filter(|event| matches!(event, WorkflowEvent::RequestInfo { .. }))
            .collect()
    }

    /// IDs of the requests raised by the run
    pub fn request_ids(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                WorkflowEvent::RequestInfo { request_id, .. } => Some(request_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Custom events with the given name
    pub fn custom_events(&self, name: &str) -> Vec<&Value> {
        self.events
            .iter()
            .filter_map(|event| match event {
                WorkflowEvent::Custom { name: n, data, .. } if n == name => Some(data),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = WorkflowEvent::Output {
            executor_id: "a".to_string(),
            data: json!(3),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "output");
        assert_eq!(value["data"]["executor_id"], "a");
    }

    #[test]
    fn test_source_executor_id() {
        assert_eq!(WorkflowEvent::status(RunState::Running).source_executor_id(), RUNNER_ID);
        let custom = WorkflowEvent::Custom {
            executor_id: "x".into(),
            name: "progress".into(),
            data: json!(1),
        };
        assert_eq!(custom.source_executor_id(), "x");
    }

    #[test]
    fn test_run_result_final_state_and_outputs() {
        let result = WorkflowRunResult::from_events(vec![
            WorkflowEvent::status(RunState::Running),
            WorkflowEvent::Output {
                executor_id: "a".into(),
                data: json!(1),
            },
            WorkflowEvent::Output {
                executor_id: "b".into(),
                data: json!(2),
            },
            WorkflowEvent::status(RunState::Idle),
        ]);
        assert_eq!(result.final_state, RunState::Idle);
        assert_eq!(result.outputs().len(), 2);
        assert_eq!(result.final_output(), Some(&json!(2)));
        assert!(result.request_ids().is_empty());
    }
}
