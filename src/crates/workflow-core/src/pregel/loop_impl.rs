//! The superstep loop.

use super::routing::{build_runners, Delivery, EdgeRunner, RouteContext};
use crate::context::WorkflowContext;
use crate::error::{Result, WorkflowError};
use crate::event::{RunState, WorkflowEvent};
use crate::graph::WorkflowGraph;
use crate::message::{ExecutorId, Message, REQUEST_INFO_EXECUTOR_ID, START_EXECUTOR_ID};
use crate::payload::{Payload, TypeRegistry};
use crate::request_info::{PendingRequest, RequestInfoExecutor, RequestResponse};
use crate::state::State;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use workflow_checkpoint::{CheckpointId, CheckpointStorage};

/// Owns everything that changes while a workflow runs.
///
/// One `Runner` lives inside each [`Workflow`](crate::Workflow) and is reset
/// for every fresh run. Restoring a checkpoint builds a new runner and swaps
/// it in only once the checkpoint has been fully validated.
pub(crate) struct Runner {
    pub(super) graph: Arc<WorkflowGraph>,
    pub(super) registry: Arc<TypeRegistry>,
    pub(super) state: Arc<State>,
    pub(super) edge_runners: Vec<Box<dyn EdgeRunner>>,
    /// Messages for the next superstep, keyed by sender
    pub(super) pending: BTreeMap<ExecutorId, Vec<Message>>,
    pub(super) request_info: RequestInfoExecutor,
    pub(super) iteration: usize,
    pub(super) max_iterations: usize,
    pub(super) storage: Option<Arc<dyn CheckpointStorage>>,
    pub(super) workflow_name: String,
    pub(super) previous_checkpoint_id: Option<CheckpointId>,
    /// Skip the checkpoint write of the first superstep after a restore
    pub(super) resumed: bool,
    /// Global arrival counter for routed messages
    pub(super) next_seq: u64,
    pub(super) status: RunState,
}

impl Runner {
    pub(crate) fn new(
        graph: Arc<WorkflowGraph>,
        registry: Arc<TypeRegistry>,
        workflow_name: impl Into<String>,
        max_iterations: usize,
        storage: Option<Arc<dyn CheckpointStorage>>,
    ) -> Self {
        let edge_runners = build_runners(graph.edge_groups());
        Self {
            graph,
            registry,
            state: Arc::new(State::new()),
            edge_runners,
            pending: BTreeMap::new(),
            request_info: RequestInfoExecutor::new(),
            iteration: 0,
            max_iterations,
            storage,
            workflow_name: workflow_name.into(),
            previous_checkpoint_id: None,
            resumed: false,
            next_seq: 0,
            status: RunState::NotStarted,
        }
    }

    /// A runner over the same graph with nothing run yet.
    pub(crate) fn fresh(&self) -> Self {
        Self::new(
            self.graph.clone(),
            self.registry.clone(),
            self.workflow_name.clone(),
            self.max_iterations,
            self.storage.clone(),
        )
    }

    pub(crate) fn status(&self) -> RunState {
        self.status
    }

    pub(crate) fn iteration(&self) -> usize {
        self.iteration
    }

    pub(crate) fn state(&self) -> &Arc<State> {
        &self.state
    }

    pub(crate) fn pending_requests(&self) -> Vec<PendingRequest> {
        self.request_info.pending()
    }

    /// Queue the initial message for the start executor.
    pub(crate) fn seed(&mut self, payload: Payload) -> Result<()> {
        let start = self.graph.start_executor().to_string();
        let accepts = self
            .graph
            .executor(&start)
            .map_or(false, |executor| executor.can_handle(&payload.kind, &self.registry));
        if !accepts {
            return Err(WorkflowError::NoHandler {
                executor: start,
                kind: payload.kind,
            });
        }
        self.queue(Message::new(payload, START_EXECUTOR_ID).to(start));
        Ok(())
    }

    /// Validate every response, then queue them for the next superstep.
    ///
    /// Nothing is changed unless all responses are acceptable.
    pub(crate) fn queue_responses(&mut self, responses: HashMap<String, Payload>) -> Result<()> {
        if responses.is_empty() && !self.request_info.has_pending() {
            return Err(WorkflowError::NotPaused);
        }

        let mut ordered: Vec<(String, Payload)> = responses.into_iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));

        let mut routed = Vec::with_capacity(ordered.len());
        for (request_id, response) in ordered {
            let request = self
                .request_info
                .get(&request_id)
                .ok_or_else(|| WorkflowError::UnknownRequest(request_id.clone()))?;
            let target = self.response_target(request, &response.kind)?;
            routed.push((request_id, response, target));
        }

        for (request_id, response, target) in routed {
            let Some(request) = self.request_info.resolve(&request_id) else {
                continue;
            };
            let wrapped = RequestResponse {
                request_id,
                original_request: request.request,
                response,
            };
            self.queue(Message::new(Payload::new(wrapped)?, REQUEST_INFO_EXECUTOR_ID).to(target));
        }
        Ok(())
    }

    /// Originating executor when it can take the response, else the first
    /// executor by ID that can.
    fn response_target(&self, request: &PendingRequest, response_kind: &str) -> Result<ExecutorId> {
        let supports = |id: &str| {
            self.graph.executor(id).map_or(false, |executor| {
                executor.is_request_supported(&request.request.kind, response_kind, &self.registry)
            })
        };
        if supports(&request.source_executor_id) {
            return Ok(request.source_executor_id.clone());
        }
        self.graph
            .executor_ids()
            .into_iter()
            .find(|id| supports(id))
            .map(str::to_string)
            .ok_or_else(|| WorkflowError::UnmatchedResponse {
                request_id: request.request_id.clone(),
                request_kind: request.request.kind.clone(),
                response_kind: response_kind.to_string(),
            })
    }

    fn queue(&mut self, message: Message) {
        self.pending
            .entry(message.source_id.clone())
            .or_default()
            .push(message);
    }

    fn has_work(&self) -> bool {
        !self.pending.is_empty() || self.edge_runners.iter().any(|r| r.has_deliverable())
    }

    /// Run supersteps until nothing is left to deliver.
    ///
    /// Returns [`RunState::Idle`] when the run paused on pending requests and
    /// [`RunState::Converged`] otherwise. On error the terminal events
    /// (`Failed`, `Status`) have already been sent.
    pub(crate) async fn run_until_idle(
        &mut self,
        tx: &mpsc::Sender<WorkflowEvent>,
        cancel: &CancellationToken,
    ) -> Result<RunState> {
        self.status = RunState::Running;
        emit(tx, WorkflowEvent::status(RunState::Running)).await;

        match self.drive(tx, cancel).await {
            Ok(state) => {
                self.status = state;
                emit(tx, WorkflowEvent::status(state)).await;
                Ok(state)
            }
            Err(error) => {
                let state = if matches!(error, WorkflowError::Cancelled) {
                    RunState::Cancelled
                } else {
                    emit(
                        tx,
                        WorkflowEvent::Failed {
                            error: error.to_string(),
                        },
                    )
                    .await;
                    RunState::Failed
                };
                self.status = state;
                emit(tx, WorkflowEvent::status(state)).await;
                Err(error)
            }
        }
    }

    async fn drive(
        &mut self,
        tx: &mpsc::Sender<WorkflowEvent>,
        cancel: &CancellationToken,
    ) -> Result<RunState> {
        loop {
            if cancel.is_cancelled() {
                tracing::info!(iteration = self.iteration, "Run cancelled between supersteps");
                return Err(WorkflowError::Cancelled);
            }

            if !self.has_work() {
                let leftover: usize = self.edge_runners.iter().map(|r| r.buffered()).sum();
                if leftover > 0 {
                    tracing::warn!(
                        buffered = leftover,
                        "Run stopped with incomplete fan-in rounds"
                    );
                }
                let state = if self.request_info.has_pending() {
                    RunState::Idle
                } else {
                    RunState::Converged
                };
                tracing::debug!(iteration = self.iteration, ?state, "Run quiesced");
                return Ok(state);
            }

            if self.iteration >= self.max_iterations {
                return Err(WorkflowError::ConvergenceExhausted {
                    max_iterations: self.max_iterations,
                    iteration_count: self.iteration,
                });
            }

            self.superstep(tx, cancel).await?;
        }
    }

    async fn superstep(
        &mut self,
        tx: &mpsc::Sender<WorkflowEvent>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let iteration = self.iteration;
        tracing::debug!(iteration, "Superstep started");
        emit(tx, WorkflowEvent::SuperstepStarted { iteration }).await;

        let deliveries = self.route_pending(tx).await?;

        let mut invocations = Vec::with_capacity(deliveries.len());
        for (executor_id, messages) in deliveries {
            let Some(executor) = self.graph.executor(&executor_id).cloned() else {
                continue;
            };
            emit(
                tx,
                WorkflowEvent::ExecutorInvoked {
                    executor_id: executor_id.clone(),
                },
            )
            .await;
            let ctx = WorkflowContext::new(
                executor_id.clone(),
                iteration,
                self.state.clone(),
                cancel.clone(),
            );
            let registry = self.registry.clone();
            invocations.push(async move {
                let mut result = Ok(());
                for message in messages {
                    if let Err(error) = executor.execute(message.payload, ctx.clone(), &registry).await {
                        result = Err(error);
                        break;
                    }
                }
                (executor_id, ctx.take_outbox(), result)
            });
        }

        let results = tokio::select! {
            results = join_all(invocations) => results,
            _ = cancel.cancelled() => {
                self.state.discard_pending();
                tracing::info!(iteration, "Run cancelled during superstep");
                return Err(WorkflowError::Cancelled);
            }
        };

        // barrier
        let mut produced = Vec::new();
        let mut failure = None;
        for (executor_id, outbox, result) in results {
            for event in outbox.events {
                emit(tx, event).await;
            }
            match result {
                Ok(()) => {
                    emit(
                        tx,
                        WorkflowEvent::ExecutorCompleted {
                            executor_id: executor_id.clone(),
                        },
                    )
                    .await;
                    produced.extend(outbox.messages);
                }
                Err(error) => {
                    tracing::error!(executor = %executor_id, iteration, error = %error, "Executor failed");
                    emit(
                        tx,
                        WorkflowEvent::ExecutorFailed {
                            executor_id: executor_id.clone(),
                            error: error.to_string(),
                        },
                    )
                    .await;
                    if failure.is_none() {
                        failure = Some(match error {
                            e @ (WorkflowError::NoHandler { .. }
                            | WorkflowError::UnmatchedResponse { .. }
                            | WorkflowError::NodeExecution { .. }) => e,
                            e => WorkflowError::node_execution(executor_id, e.to_string()),
                        });
                    }
                }
            }
        }

        if let Some(error) = failure {
            self.state.discard_pending();
            return Err(error);
        }

        let written = self.state.commit();
        for message in produced {
            self.queue(message);
        }
        self.iteration += 1;
        tracing::debug!(iteration, state_writes = written, "Superstep completed");
        emit(tx, WorkflowEvent::SuperstepCompleted { iteration }).await;

        self.checkpoint_after_superstep().await;
        Ok(())
    }

    /// Route every queued message and group the deliveries by target.
    async fn route_pending(
        &mut self,
        tx: &mpsc::Sender<WorkflowEvent>,
    ) -> Result<BTreeMap<ExecutorId, Vec<Message>>> {
        let graph = self.graph.clone();
        let registry = self.registry.clone();
        let ctx = RouteContext {
            executors: graph.executors(),
            registry: &registry,
        };

        let mut deliveries: Vec<Delivery> = Vec::new();
        let pending = std::mem::take(&mut self.pending);
        for (source, messages) in pending {
            for message in messages {
                let seq = self.next_seq;
                self.next_seq += 1;

                if message.target_id.as_deref() == Some(REQUEST_INFO_EXECUTOR_ID) {
                    let event = self.request_info.record(&message)?;
                    emit(tx, event).await;
                    continue;
                }

                if source == START_EXECUTOR_ID || source == REQUEST_INFO_EXECUTOR_ID {
                    if let Some(target) = message.target_id.clone() {
                        deliveries.extend(ctx.deliver(&target, &message));
                    }
                    continue;
                }

                for runner in self.edge_runners.iter_mut().filter(|r| r.has_source(&source)) {
                    deliveries.extend(runner.route(&message, seq, &ctx));
                }
            }
        }
        for runner in self.edge_runners.iter_mut() {
            deliveries.extend(runner.flush(&ctx));
        }

        let mut by_target: BTreeMap<ExecutorId, Vec<Message>> = BTreeMap::new();
        for delivery in deliveries {
            by_target
                .entry(delivery.target)
                .or_default()
                .push(delivery.message);
        }
        Ok(by_target)
    }

    async fn checkpoint_after_superstep(&mut self) {
        let Some(storage) = self.storage.clone() else {
            return;
        };
        if self.resumed {
            self.resumed = false;
            return;
        }

        let checkpoint = match self.capture() {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to capture checkpoint");
                return;
            }
        };
        match storage.save(checkpoint).await {
            Ok(id) => {
                tracing::debug!(checkpoint_id = %id, iteration = self.iteration, "Checkpoint saved");
                self.previous_checkpoint_id = Some(id);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to save checkpoint"),
        }
    }
}

/// Send an event; a closed receiver means the host stopped listening.
pub(crate) async fn emit(tx: &mpsc::Sender<WorkflowEvent>, event: WorkflowEvent) {
    if tx.send(event).await.is_err() {
        tracing::trace!("Event receiver dropped");
    }
}
