//! Run-time routing for edge groups.
//!
//! Every [`EdgeGroup`] is compiled into an [`EdgeRunner`] when a run starts.
//! The runner feeds each queued message to the runners whose sources include
//! the sender; they return the deliveries for the coming superstep.
//!
//! Only [`FanInRunner`] keeps state between messages: a queue per source and a
//! global arrival sequence so a completed set is delivered in arrival order.
//! That state is exported into checkpoints.

use crate::edge::{Case, EdgeCondition, EdgeGroup, FanOutSelector};
use crate::error::{Result, WorkflowError};
use crate::executor::Executor;
use crate::message::{ExecutorId, Message};
use crate::payload::{Payload, TypeRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// A message bound for one executor in the next superstep.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Delivery {
    pub(crate) target: ExecutorId,
    pub(crate) message: Message,
}

/// Read-only view of the graph needed to decide whether a target accepts a payload.
pub(crate) struct RouteContext<'a> {
    pub(crate) executors: &'a BTreeMap<ExecutorId, Arc<Executor>>,
    pub(crate) registry: &'a TypeRegistry,
}

impl RouteContext<'_> {
    fn accepts(&self, target: &str, payload: &Payload) -> bool {
        let accepted = self
            .executors
            .get(target)
            .map_or(false, |executor| executor.can_handle(&payload.kind, self.registry));
        if !accepted {
            tracing::warn!(
                executor = %target,
                kind = %payload.kind,
                "Dropping message: target has no handler for payload kind"
            );
        }
        accepted
    }

    pub(crate) fn deliver(&self, target: &str, message: &Message) -> Option<Delivery> {
        if !message.is_addressed_to(target) || !self.accepts(target, &message.payload) {
            return None;
        }
        Some(Delivery {
            target: target.to_string(),
            message: message.clone(),
        })
    }
}

/// Routing behaviour of one edge group during a run.
pub(crate) trait EdgeRunner: Send + Sync {
    /// Identifier of the underlying group
    fn group_id(&self) -> &str;

    /// Whether messages from `source` pass through this group
    fn has_source(&self, source: &str) -> bool;

    /// Route one message; `seq` is its global arrival number.
    fn route(&mut self, message: &Message, seq: u64, ctx: &RouteContext<'_>) -> Vec<Delivery>;

    /// State to persist in checkpoints, if the group keeps any
    fn export_state(&self) -> Result<Option<Value>> {
        Ok(None)
    }

    /// Restore state written by [`export_state`](Self::export_state)
    fn import_state(&mut self, _state: &Value) -> Result<()> {
        Ok(())
    }

    /// Highest arrival number currently held
    fn max_seq(&self) -> Option<u64> {
        None
    }

    /// Messages waiting in buffers
    fn buffered(&self) -> usize {
        0
    }

    /// Whether a buffered set is ready to deliver without further input
    fn has_deliverable(&self) -> bool {
        false
    }

    /// Deliver every set that is ready without further input
    fn flush(&mut self, _ctx: &RouteContext<'_>) -> Vec<Delivery> {
        Vec::new()
    }
}

/// Compile edge groups into their runners, preserving declaration order.
pub(crate) fn build_runners(groups: &[EdgeGroup]) -> Vec<Box<dyn EdgeRunner>> {
    groups
        .iter()
        .map(|group| -> Box<dyn EdgeRunner> {
            let id = group.id();
            match group {
                EdgeGroup::Single {
                    source,
                    target,
                    condition,
                } => Box::new(SingleRunner {
                    id,
                    source: source.clone(),
                    target: target.clone(),
                    condition: condition.clone(),
                }),
                EdgeGroup::FanOut {
                    source,
                    targets,
                    selector,
                } => Box::new(FanOutRunner {
                    id,
                    source: source.clone(),
                    targets: targets.clone(),
                    selector: selector.clone(),
                }),
                EdgeGroup::FanIn { sources, target } => {
                    Box::new(FanInRunner::new(id, sources.clone(), target.clone()))
                }
                EdgeGroup::SwitchCase {
                    source,
                    cases,
                    default,
                } => Box::new(SwitchCaseRunner {
                    id,
                    source: source.clone(),
                    cases: cases.clone(),
                    default: default.clone(),
                }),
            }
        })
        .collect()
}

struct SingleRunner {
    id: String,
    source: ExecutorId,
    target: ExecutorId,
    condition: Option<EdgeCondition>,
}

impl EdgeRunner for SingleRunner {
    fn group_id(&self) -> &str {
        &self.id
    }

    fn has_source(&self, source: &str) -> bool {
        self.source == source
    }

    fn route(&mut self, message: &Message, _seq: u64, ctx: &RouteContext<'_>) -> Vec<Delivery> {
        if let Some(condition) = &self.condition {
            if !condition(&message.payload) {
                return Vec::new();
            }
        }
        ctx.deliver(&self.target, message).into_iter().collect()
    }
}

struct FanOutRunner {
    id: String,
    source: ExecutorId,
    targets: Vec<ExecutorId>,
    selector: Option<FanOutSelector>,
}

impl EdgeRunner for FanOutRunner {
    fn group_id(&self) -> &str {
        &self.id
    }

    fn has_source(&self, source: &str) -> bool {
        self.source == source
    }

    fn route(&mut self, message: &Message, _seq: u64, ctx: &RouteContext<'_>) -> Vec<Delivery> {
        let chosen: Vec<ExecutorId> = match &self.selector {
            Some(selector) => {
                let picked = selector(&message.payload, &self.targets);
                picked
                    .into_iter()
                    .filter(|t| {
                        let known = self.targets.contains(t);
                        if !known {
                            tracing::warn!(group = %self.id, executor = %t, "Selector chose a target outside the group");
                        }
                        known
                    })
                    .collect()
            }
            None => self.targets.clone(),
        };

        chosen
            .iter()
            .filter_map(|target| ctx.deliver(target, message))
            .collect()
    }
}

struct SwitchCaseRunner {
    id: String,
    source: ExecutorId,
    cases: Vec<Case>,
    default: ExecutorId,
}

impl EdgeRunner for SwitchCaseRunner {
    fn group_id(&self) -> &str {
        &self.id
    }

    fn has_source(&self, source: &str) -> bool {
        self.source == source
    }

    fn route(&mut self, message: &Message, _seq: u64, ctx: &RouteContext<'_>) -> Vec<Delivery> {
        let target = self
            .cases
            .iter()
            .find(|case| (case.predicate)(&message.payload))
            .map_or(&self.default, |case| &case.target);
        ctx.deliver(target, message).into_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Buffered {
    seq: u64,
    message: Message,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FanInState {
    buffers: BTreeMap<ExecutorId, VecDeque<Buffered>>,
}

/// Collects one message from every source, then delivers them as a list.
pub(crate) struct FanInRunner {
    id: String,
    sources: Vec<ExecutorId>,
    target: ExecutorId,
    state: FanInState,
}

impl FanInRunner {
    pub(crate) fn new(id: String, sources: Vec<ExecutorId>, target: ExecutorId) -> Self {
        Self {
            id,
            sources,
            target,
            state: FanInState::default(),
        }
    }

    fn is_complete(&self) -> bool {
        self.sources.iter().all(|source| {
            self.state
                .buffers
                .get(source)
                .map_or(false, |queue| !queue.is_empty())
        })
    }

    fn take_round(&mut self) -> Vec<Buffered> {
        let mut round: Vec<Buffered> = self
            .sources
            .iter()
            .filter_map(|source| {
                self.state
                    .buffers
                    .get_mut(source)
                    .and_then(VecDeque::pop_front)
            })
            .collect();
        self.state.buffers.retain(|_, queue| !queue.is_empty());
        round.sort_by_key(|b| b.seq);
        round
    }
}

impl EdgeRunner for FanInRunner {
    fn group_id(&self) -> &str {
        &self.id
    }

    fn has_source(&self, source: &str) -> bool {
        self.sources.iter().any(|s| s == source)
    }

    fn route(&mut self, message: &Message, seq: u64, ctx: &RouteContext<'_>) -> Vec<Delivery> {
        if !message.is_addressed_to(&self.target) {
            return Vec::new();
        }
        self.state
            .buffers
            .entry(message.source_id.clone())
            .or_default()
            .push_back(Buffered {
                seq,
                message: message.clone(),
            });

        self.flush(ctx)
    }

    fn flush(&mut self, ctx: &RouteContext<'_>) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        while self.is_complete() {
            let round = self.take_round();
            // the latest arrival is the one that completed the round
            let Some(source) = round.last().map(|b| b.message.source_id.clone()) else {
                break;
            };
            let payload = Payload::list(round.into_iter().map(|b| b.message.payload).collect());
            let aggregated = Message::new(payload, source).to(self.target.clone());
            tracing::debug!(group = %self.id, executor = %self.target, "Fan-in round complete");
            deliveries.extend(ctx.deliver(&self.target, &aggregated));
        }
        deliveries
    }

    fn export_state(&self) -> Result<Option<Value>> {
        if self.state.buffers.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::to_value(&self.state)?))
    }

    fn import_state(&mut self, state: &Value) -> Result<()> {
        let restored: FanInState = serde_json::from_value(state.clone()).map_err(|e| {
            WorkflowError::MalformedCheckpoint(format!("edge state of '{}': {}", self.id, e))
        })?;
        if let Some(unknown) = restored.buffers.keys().find(|s| !self.has_source(s)) {
            return Err(WorkflowError::MalformedCheckpoint(format!(
                "edge state of '{}' buffers unknown source '{}'",
                self.id, unknown
            )));
        }
        self.state = restored;
        Ok(())
    }

    fn max_seq(&self) -> Option<u64> {
        self.state
            .buffers
            .values()
            .flat_map(|queue| queue.iter().map(|b| b.seq))
            .max()
    }

    fn buffered(&self) -> usize {
        self.state.buffers.values().map(VecDeque::len).sum()
    }

    fn has_deliverable(&self) -> bool {
        self.is_complete()
    }
}
