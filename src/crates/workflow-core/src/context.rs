//! Per-invocation handle given to executor handlers.
//!
//! A [`WorkflowContext`] is created for every executor invocation in a
//! superstep. Everything a handler produces (messages, outputs, custom events)
//! is buffered in the context and only applied by the runner at the barrier,
//! in executor ID order. State writes go straight to the shared [`State`] but
//! stay staged until the same barrier commits them.

use crate::error::{Result, WorkflowError};
use crate::event::WorkflowEvent;
use crate::message::{ExecutorId, Message, REQUEST_INFO_EXECUTOR_ID};
use crate::payload::{Payload, PayloadKind, PayloadType};
use crate::request_info::RequestInfoMessage;
use crate::state::{State, StateScope};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What one invocation produced
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    pub(crate) messages: Vec<Message>,
    pub(crate) events: Vec<WorkflowEvent>,
}

/// Handle through which a handler talks to the running workflow.
///
/// Cloning is cheap; clones share the same buffers.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    executor_id: ExecutorId,
    iteration: usize,
    state: Arc<State>,
    outbox: Arc<Mutex<Outbox>>,
    cancel: CancellationToken,
}

impl WorkflowContext {
    pub(crate) fn new(
        executor_id: impl Into<ExecutorId>,
        iteration: usize,
        state: Arc<State>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor_id: executor_id.into(),
            iteration,
            state,
            outbox: Arc::new(Mutex::new(Outbox::default())),
            cancel,
        }
    }

    /// ID of the executor being invoked
    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    /// Zero-based index of the current superstep
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Whether the run has been cancelled. Long handlers should check this between steps.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the run is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Broadcast a value to every edge leaving this executor.
    pub fn send_message<T: PayloadType>(&self, value: T) -> Result<()> {
        self.send_payload(Payload::new(value)?, None);
        Ok(())
    }

    /// Send a value to one successor only.
    pub fn send_message_to<T: PayloadType>(&self, target: impl Into<ExecutorId>, value: T) -> Result<()> {
        self.send_payload(Payload::new(value)?, Some(target.into()));
        Ok(())
    }

    /// Send an already-built payload.
    pub fn send_payload(&self, payload: Payload, target: Option<ExecutorId>) {
        let mut message = Message::new(payload, self.executor_id.clone());
        message.target_id = target;
        self.outbox.lock().messages.push(message);
    }

    /// Yield a workflow output.
    pub fn yield_output<T: Serialize>(&self, value: T) -> Result<()> {
        let data = serde_json::to_value(value)?;
        self.outbox.lock().events.push(WorkflowEvent::Output {
            executor_id: self.executor_id.clone(),
            data,
        });
        Ok(())
    }

    /// Raise a custom event.
    pub fn add_event(&self, name: impl Into<String>, data: Value) {
        self.outbox.lock().events.push(WorkflowEvent::Custom {
            executor_id: self.executor_id.clone(),
            name: name.into(),
            data,
        });
    }

    /// Ask the host for a `Resp` answer to `request`.
    ///
    /// The run raises a request event in the next superstep and, once nothing
    /// else is left to do, pauses until the host answers.
    pub fn request_info<Req: PayloadType, Resp: PayloadType>(&self, request: Req) -> Result<()> {
        self.request_info_payload(Payload::new(request)?, Resp::KIND)
    }

    /// Untyped variant of [`request_info`](Self::request_info).
    pub fn request_info_payload(&self, request: Payload, response_kind: impl Into<PayloadKind>) -> Result<()> {
        let info = RequestInfoMessage {
            request,
            response_kind: response_kind.into(),
        };
        self.send_payload(Payload::new(info)?, Some(REQUEST_INFO_EXECUTOR_ID.to_string()));
        Ok(())
    }

    /// Committed shared value of `key`
    pub fn get_shared_state(&self, key: &str) -> Result<Value> {
        self.state.get(&StateScope::Shared, key)
    }

    /// Committed shared value of `key`, decoded
    pub fn get_shared_state_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        serde_json::from_value(self.get_shared_state(key)?).map_err(WorkflowError::from)
    }

    /// Stage a shared write, visible next superstep
    pub fn set_shared_state<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<()> {
        self.state
            .set(StateScope::Shared, key, serde_json::to_value(value)?);
        Ok(())
    }

    /// Committed value of `key` in this executor's private scope
    pub fn get_state(&self, key: &str) -> Result<Value> {
        self.state.get(&self.own_scope(), key)
    }

    /// Private value of `key`, decoded
    pub fn get_state_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        serde_json::from_value(self.get_state(key)?).map_err(WorkflowError::from)
    }

    /// Stage a private write
    pub fn set_state<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<()> {
        self.state.set(self.own_scope(), key, serde_json::to_value(value)?);
        Ok(())
    }

    /// Stage a private delete
    pub fn delete_state(&self, key: impl Into<String>) {
        self.state.delete(self.own_scope(), key);
    }

    fn own_scope(&self) -> StateScope {
        StateScope::Executor(self.executor_id.clone())
    }

    pub(crate) fn take_outbox(&self) -> Outbox {
        std::mem::take(&mut *self.outbox.lock())
    }
}
