//! Request/response protocol for pausing a run on external input.
//!
//! A handler calls [`WorkflowContext::request_info`](crate::WorkflowContext::request_info);
//! the request travels as a [`RequestInfoMessage`] to the reserved request-info
//! executor in the next superstep. There it is recorded as a [`PendingRequest`]
//! under a fresh `request_id` and surfaced as a
//! [`WorkflowEvent::RequestInfo`]. The branch stops; other branches keep going.
//!
//! When the host answers through `send_responses`, each answer is wrapped in a
//! [`RequestResponse`] and delivered to the executor whose
//! `(request kind, response kind)` handler matches.

use crate::error::{Result, WorkflowError};
use crate::event::WorkflowEvent;
use crate::message::{ExecutorId, Message};
use crate::payload::{Payload, PayloadKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Kind of a request travelling to the request-info executor
pub const REQUEST_INFO_KIND: &str = "request_info";

/// Kind of a wrapped answer travelling back to the asker
pub const REQUEST_RESPONSE_KIND: &str = "request_response";

/// A request for external input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInfoMessage {
    /// The question
    pub request: Payload,
    /// Kind of the expected answer
    pub response_kind: PayloadKind,
}

crate::payload_type!(RequestInfoMessage, REQUEST_INFO_KIND);

/// An external answer paired with the request it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResponse {
    /// ID of the answered request
    pub request_id: String,
    /// The request as originally sent
    pub original_request: Payload,
    /// The answer
    pub response: Payload,
}

crate::payload_type!(RequestResponse, REQUEST_RESPONSE_KIND);

/// A request recorded by the request-info executor and not yet answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Generated request ID
    pub request_id: String,
    /// Executor that asked
    pub source_executor_id: ExecutorId,
    /// The request
    pub request: Payload,
    /// Kind of the expected answer
    pub response_kind: PayloadKind,
}

impl PendingRequest {
    /// The event announcing this request to the host
    pub fn to_event(&self) -> WorkflowEvent {
        WorkflowEvent::RequestInfo {
            request_id: self.request_id.clone(),
            source_executor_id: self.source_executor_id.clone(),
            request: self.request.clone(),
            response_kind: self.response_kind.clone(),
        }
    }
}

/// The reserved executor holding outstanding requests of a run.
#[derive(Debug, Default, Clone)]
pub struct RequestInfoExecutor {
    pending: BTreeMap<String, PendingRequest>,
}

impl RequestInfoExecutor {
    /// Executor with no outstanding requests
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivered request and return the event announcing it.
    pub fn record(&mut self, message: &Message) -> Result<WorkflowEvent> {
        let info: RequestInfoMessage = message.payload.decode()?;
        let pending = PendingRequest {
            request_id: Uuid::new_v4().to_string(),
            source_executor_id: message.source_id.clone(),
            request: info.request,
            response_kind: info.response_kind,
        };
        tracing::debug!(
            request_id = %pending.request_id,
            source = %pending.source_executor_id,
            "Recorded pending request"
        );
        let event = pending.to_event();
        self.pending.insert(pending.request_id.clone(), pending);
        Ok(event)
    }

    /// Outstanding request by ID
    pub fn get(&self, request_id: &str) -> Option<&PendingRequest> {
        self.pending.get(request_id)
    }

    /// Remove an answered request
    pub fn resolve(&mut self, request_id: &str) -> Option<PendingRequest> {
        self.pending.remove(request_id)
    }

    /// Whether any request awaits an answer
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Outstanding requests ordered by ID
    pub fn pending(&self) -> Vec<PendingRequest> {
        self.pending.values().cloned().collect()
    }

    /// Serialized form for checkpoints
    pub fn export(&self) -> Result<HashMap<String, serde_json::Value>> {
        self.pending
            .iter()
            .map(|(id, request)| Ok((id.clone(), serde_json::to_value(request)?)))
            .collect()
    }

    /// Rebuild from a checkpoint's `pending_requests`
    pub fn import(records: &HashMap<String, serde_json::Value>) -> Result<Self> {
        let mut pending = BTreeMap::new();
        for (id, record) in records {
            let request: PendingRequest = serde_json::from_value(record.clone()).map_err(|e| {
                WorkflowError::MalformedCheckpoint(format!("pending request '{}': {}", id, e))
            })?;
            pending.insert(id.clone(), request);
        }
        Ok(Self { pending })
    }
}
