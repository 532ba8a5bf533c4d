//! Messages exchanged between executors.

use crate::payload::Payload;
use serde::{Deserialize, Serialize};

/// Executor identifier, unique within a workflow
pub type ExecutorId = String;

/// Source ID of the message that starts a run
pub const START_EXECUTOR_ID: &str = "__start__";

/// Reserved executor that turns requests into external request events
pub const REQUEST_INFO_EXECUTOR_ID: &str = "__request_info__";

/// Origin of runner-level events (status, superstep boundaries)
pub const RUNNER_ID: &str = "__runner__";

/// Whether `id` is reserved for the engine.
pub fn is_reserved_id(id: &str) -> bool {
    matches!(id, START_EXECUTOR_ID | REQUEST_INFO_EXECUTOR_ID | RUNNER_ID)
}

/// A payload in flight from one executor to the next superstep.
///
/// `target_id = None` is a broadcast; the edge groups attached to the source
/// decide who receives it. With a target set, only a group containing that
/// target delivers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// What is being sent
    pub payload: Payload,
    /// Executor that sent it
    pub source_id: ExecutorId,
    /// Explicit recipient, if any
    pub target_id: Option<ExecutorId>,
}

impl Message {
    /// Broadcast message from `source_id`
    pub fn new(payload: Payload, source_id: impl Into<ExecutorId>) -> Self {
        Self {
            payload,
            source_id: source_id.into(),
            target_id: None,
        }
    }

    /// Address the message to a single executor
    pub fn to(mut self, target_id: impl Into<ExecutorId>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// Kind of the payload
    pub fn kind(&self) -> &str {
        &self.payload.kind
    }

    /// Whether the message may be delivered to `target`
    pub fn is_addressed_to(&self, target: &str) -> bool {
        self.target_id.as_deref().map_or(true, |t| t == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_anyone() {
        let message = Message::new(Payload::from(1i64), "a");
        assert!(message.is_addressed_to("b"));
        assert!(message.is_addressed_to("c"));
    }

    #[test]
    fn test_targeted_message() {
        let message = Message::new(Payload::from(1i64), "a").to("b");
        assert!(message.is_addressed_to("b"));
        assert!(!message.is_addressed_to("c"));
        assert_eq!(message.kind(), "int");
    }

    #[test]
    fn test_reserved_ids() {
        assert!(is_reserved_id(START_EXECUTOR_ID));
        assert!(is_reserved_id(REQUEST_INFO_EXECUTOR_ID));
        assert!(!is_reserved_id("worker"));
    }
}
