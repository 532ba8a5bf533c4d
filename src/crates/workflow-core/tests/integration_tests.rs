//! Integration tests for complete workflows
//!
//! These tests drive workflows through the public API only: building graphs,
//! running them buffered and streaming, pausing on requests, cancelling, and
//! resuming from checkpoints.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use workflow_checkpoint::CheckpointStream;
use workflow_core::{
    payload_type, Case, CheckpointId, CheckpointStorage, Executor, InMemoryCheckpointStorage, Payload, RunState,
    Workflow, WorkflowBuilder, WorkflowCheckpoint, WorkflowConfig, WorkflowContext, WorkflowError,
    WorkflowEvent,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Draft {
    text: String,
    revision: u32,
}

payload_type!(Draft, "draft");

fn adder(id: &str, amount: i64) -> Executor {
    Executor::builder(id)
        .on(move |n: i64, ctx: WorkflowContext| async move { ctx.send_message(n + amount) })
        .build()
        .unwrap()
}

fn sink(id: &str) -> Executor {
    Executor::builder(id)
        .on(|n: i64, ctx: WorkflowContext| async move { ctx.yield_output(n) })
        .build()
        .unwrap()
}

fn linear_pipeline(storage: Option<Arc<dyn CheckpointStorage>>) -> Workflow {
    let mut builder = WorkflowBuilder::new();
    builder
        .with_name("pipeline")
        .add_executor(adder("a", 1))
        .add_executor(adder("b", 10))
        .add_executor(adder("c", 100))
        .add_executor(sink("out"))
        .add_edge("a", "b")
        .add_edge("b", "c")
        .add_edge("c", "out")
        .set_start_executor("a");
    if let Some(storage) = storage {
        builder.with_checkpointing(storage);
    }
    builder.build().unwrap()
}

/// `a` stops once the value reaches `limit`, otherwise `a -> b -> a` keeps incrementing.
fn ping_pong(limit: Option<i64>, max_iterations: usize) -> Workflow {
    let a = Executor::builder("a")
        .on(move |n: i64, ctx: WorkflowContext| async move {
            match limit {
                Some(limit) if n >= limit => ctx.yield_output(n),
                _ => ctx.send_message(n + 1),
            }
        })
        .build()
        .unwrap();

    let mut builder = WorkflowBuilder::new();
    builder
        .add_executor(a)
        .add_executor(adder("b", 1))
        .add_edge("a", "b")
        .add_edge("b", "a")
        .set_start_executor("a")
        .set_max_iterations(max_iterations);
    builder.build().unwrap()
}

/// `writer -> reviewer`; the reviewer asks the host for approval and sends
/// rejected drafts back to the writer.
fn review_loop(storage: Option<Arc<dyn CheckpointStorage>>) -> Workflow {
    let writer = Executor::builder("writer")
        .on(|draft: Draft, ctx: WorkflowContext| async move {
            ctx.send_message(Draft {
                text: format!("{} (rev {})", draft.text, draft.revision + 1),
                revision: draft.revision + 1,
            })
        })
        .build()
        .unwrap();
    let reviewer = Executor::builder("reviewer")
        .on(|draft: Draft, ctx: WorkflowContext| async move { ctx.request_info::<Draft, bool>(draft) })
        .on_response(|draft: Draft, approved: bool, ctx: WorkflowContext| async move {
            if approved {
                ctx.yield_output(&draft)
            } else {
                ctx.send_message(draft)
            }
        })
        .build()
        .unwrap();

    let mut builder = WorkflowBuilder::new();
    builder
        .with_name("review")
        .add_executor(writer)
        .add_executor(reviewer)
        .add_edge("writer", "reviewer")
        .add_edge("reviewer", "writer")
        .set_start_executor("writer");
    if let Some(storage) = storage {
        builder.with_checkpointing(storage);
    }
    builder.build().unwrap()
}

fn first_draft() -> Payload {
    Payload::new(Draft {
        text: "intro".into(),
        revision: 0,
    })
    .unwrap()
}

/// `fast -> slow -> after`; `slow` never finishes on its own.
fn slow_chain(slow_done: Arc<AtomicUsize>, after_started: Arc<AtomicUsize>) -> Workflow {
    let slow = Executor::builder("slow")
        .on(move |n: i64, ctx: WorkflowContext| {
            let slow_done = slow_done.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                slow_done.fetch_add(1, Ordering::SeqCst);
                ctx.send_message(n)
            }
        })
        .build()
        .unwrap();
    let after = Executor::builder("after")
        .on(move |_: i64, _ctx: WorkflowContext| {
            let after_started = after_started.clone();
            async move {
                after_started.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build()
        .unwrap();

    let mut builder = WorkflowBuilder::new();
    builder
        .add_executor(adder("fast", 0))
        .add_executor(slow)
        .add_executor(after)
        .add_edge("fast", "slow")
        .add_edge("slow", "after")
        .set_start_executor("fast");
    builder.build().unwrap()
}

/// `split` fans out to `quick` and `detour -> relay`; `quick` and `relay` fan
/// in to `join`, so the message from `quick` waits one superstep in the buffer.
fn staggered_fan_in(storage: Option<Arc<dyn CheckpointStorage>>) -> Workflow {
    let join = Executor::builder("join")
        .on_payload("list", |payload: Payload, ctx: WorkflowContext| async move {
            let values: Vec<i64> = payload
                .items()?
                .iter()
                .map(|item| item.decode::<i64>())
                .collect::<workflow_core::Result<_>>()?;
            ctx.yield_output(values)
        })
        .build()
        .unwrap();

    let mut builder = WorkflowBuilder::new();
    builder
        .with_name("staggered")
        .add_executor(adder("split", 0))
        .add_executor(adder("quick", 1))
        .add_executor(adder("detour", 2))
        .add_executor(adder("relay", 3))
        .add_executor(join)
        .add_fan_out_edges("split", ["quick", "detour"])
        .add_edge("detour", "relay")
        .add_fan_in_edges(["quick", "relay"], "join")
        .set_start_executor("split");
    if let Some(storage) = storage {
        builder.with_checkpointing(storage);
    }
    builder.build().unwrap()
}

/// Checkpoint storage whose loads take `delay`.
struct SlowLoadStorage {
    inner: Arc<InMemoryCheckpointStorage>,
    delay: Duration,
}

#[async_trait]
impl CheckpointStorage for SlowLoadStorage {
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> workflow_checkpoint::Result<CheckpointId> {
        self.inner.save(checkpoint).await
    }

    async fn load(&self, checkpoint_id: &str) -> workflow_checkpoint::Result<WorkflowCheckpoint> {
        tokio::time::sleep(self.delay).await;
        self.inner.load(checkpoint_id).await
    }

    async fn list(&self, workflow_name: Option<&str>) -> workflow_checkpoint::Result<CheckpointStream> {
        self.inner.list(workflow_name).await
    }

    async fn delete(&self, checkpoint_id: &str) -> workflow_checkpoint::Result<bool> {
        self.inner.delete(checkpoint_id).await
    }
}

fn approve(request_id: &str, approved: bool) -> HashMap<String, Payload> {
    HashMap::from([(request_id.to_string(), Payload::from(approved))])
}

#[tokio::test]
async fn test_linear_path_composes_in_order() {
    let workflow = linear_pipeline(None);
    let result = workflow.run(0i64).await.unwrap();

    assert_eq!(result.final_state, RunState::Converged);
    assert_eq!(result.outputs(), vec![&json!(111)]);

    let invoked: Vec<&str> = result
        .events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::ExecutorInvoked { executor_id } => Some(executor_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(invoked, vec!["a", "b", "c", "out"]);
    assert_eq!(workflow.iteration_count().await, 4);
}

#[tokio::test]
async fn test_events_start_and_end_with_run_status() {
    let workflow = linear_pipeline(None);
    let events: Vec<WorkflowEvent> = workflow
        .run_stream(0i64)
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;

    assert!(matches!(events.first(), Some(WorkflowEvent::Started { workflow_name }) if workflow_name == "pipeline"));
    assert_eq!(events[1], WorkflowEvent::Status { state: RunState::Running });
    assert_eq!(
        events.last(),
        Some(&WorkflowEvent::Status {
            state: RunState::Converged
        })
    );
}

#[tokio::test]
async fn test_fan_in_delivers_one_list_per_round() {
    let join = Executor::builder("join")
        .on_payload("list", |payload: Payload, ctx: WorkflowContext| async move {
            let values: Vec<i64> = payload
                .items()?
                .iter()
                .map(|item| item.decode::<i64>())
                .collect::<workflow_core::Result<_>>()?;
            ctx.yield_output(json!({"count": values.len(), "sum": values.iter().sum::<i64>()}))
        })
        .build()
        .unwrap();

    let mut builder = WorkflowBuilder::new();
    builder
        .add_executor(adder("split", 0))
        .add_executor(adder("left", 1))
        .add_executor(adder("middle", 2))
        .add_executor(adder("right", 3))
        .add_executor(join)
        .add_fan_out_edges("split", ["left", "middle", "right"])
        .add_fan_in_edges(["left", "middle", "right"], "join")
        .set_start_executor("split");
    let workflow = builder.build().unwrap();

    let result = workflow.run(10i64).await.unwrap();
    assert_eq!(result.outputs(), vec![&json!({"count": 3, "sum": 36})]);
}

#[tokio::test]
async fn test_switch_case_routes_without_changing_payload() {
    let mut builder = WorkflowBuilder::new();
    builder
        .add_executor(adder("classify", 0))
        .add_executor(
            Executor::builder("small")
                .on(|n: i64, ctx: WorkflowContext| async move { ctx.yield_output(json!({"small": n})) })
                .build()
                .unwrap(),
        )
        .add_executor(
            Executor::builder("large")
                .on(|n: i64, ctx: WorkflowContext| async move { ctx.yield_output(json!({"large": n})) })
                .build()
                .unwrap(),
        )
        .add_switch_case_edge_group(
            "classify",
            vec![Case::new(
                |payload: &Payload| payload.decode::<i64>().map_or(false, |n| n < 5),
                "small",
            )],
            "large",
        )
        .set_start_executor("classify");
    let workflow = builder.build().unwrap();

    let small = workflow.run(3i64).await.unwrap();
    assert_eq!(small.outputs(), vec![&json!({"small": 3})]);

    let large = workflow.run(9i64).await.unwrap();
    assert_eq!(large.outputs(), vec![&json!({"large": 9})]);
}

#[tokio::test]
async fn test_cycle_reaches_limit_of_ten() {
    let workflow = ping_pong(Some(10), 100);
    let result = workflow.run(0i64).await.unwrap();
    assert_eq!(result.final_output(), Some(&json!(10)));
    assert_eq!(result.final_state, RunState::Converged);
}

#[tokio::test]
async fn test_unbounded_cycle_exhausts_iterations() {
    let workflow = ping_pong(None, 10);
    let err = workflow.run(0i64).await.unwrap_err();

    match err.error {
        WorkflowError::ConvergenceExhausted {
            max_iterations,
            iteration_count,
        } => {
            assert_eq!(max_iterations, 10);
            assert_eq!(iteration_count, 10);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.events.iter().any(|e| matches!(e, WorkflowEvent::Failed { .. })));
    assert_eq!(workflow.run_state(), RunState::Failed);
}

#[tokio::test]
async fn test_handler_failure_drains_events_first() {
    let flaky = Executor::builder("flaky")
        .on(|_: i64, _ctx: WorkflowContext| async { Err(WorkflowError::Custom("disk full".into())) })
        .build()
        .unwrap();
    let reporter = Executor::builder("reporter")
        .on(|n: i64, ctx: WorkflowContext| async move {
            ctx.yield_output(n)?;
            ctx.send_message(n)
        })
        .build()
        .unwrap();

    let mut builder = WorkflowBuilder::new();
    builder
        .add_executor(reporter)
        .add_executor(flaky)
        .add_edge("reporter", "flaky")
        .set_start_executor("reporter");
    let workflow = builder.build().unwrap();

    let err = workflow.run(5i64).await.unwrap_err();
    assert!(matches!(
        &err.error,
        WorkflowError::NodeExecution { executor, error } if executor == "flaky" && error == "disk full"
    ));
    assert_eq!(err.outputs(), vec![&json!(5)]);
    assert!(err
        .events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::ExecutorFailed { executor_id, .. } if executor_id == "flaky")));
}

#[tokio::test]
async fn test_request_info_approve_produces_output() {
    let workflow = review_loop(None);
    let paused = workflow.run(first_draft()).await.unwrap();

    assert_eq!(paused.final_state, RunState::Idle);
    let ids = paused.request_ids();
    assert_eq!(ids.len(), 1);
    assert_eq!(workflow.pending_requests().await.len(), 1);

    let done = workflow.send_responses(approve(&ids[0], true)).await.unwrap();
    assert_eq!(done.final_state, RunState::Converged);
    assert_eq!(
        done.final_output(),
        Some(&json!({"text": "intro (rev 1)", "revision": 1}))
    );
    assert!(workflow.pending_requests().await.is_empty());
}

#[tokio::test]
async fn test_request_info_reject_asks_again() {
    let workflow = review_loop(None);
    let paused = workflow.run(first_draft()).await.unwrap();
    let first_id = paused.request_ids().remove(0);

    let again = workflow.send_responses(approve(&first_id, false)).await.unwrap();
    assert_eq!(again.final_state, RunState::Idle);
    assert!(again.outputs().is_empty());

    let pending = workflow.pending_requests().await;
    assert_eq!(pending.len(), 1);
    assert_ne!(pending[0].request_id, first_id);
    let draft: Draft = pending[0].request.decode().unwrap();
    assert_eq!(draft.revision, 2);
}

#[tokio::test]
async fn test_unknown_request_id_leaves_run_intact() {
    let workflow = review_loop(None);
    let paused = workflow.run(first_draft()).await.unwrap();
    let real_id = paused.request_ids().remove(0);

    let mut responses = approve(&real_id, true);
    responses.insert("not-a-request".into(), Payload::from(true));
    let err = workflow.send_responses(responses).await.unwrap_err();
    assert!(matches!(err.error, WorkflowError::UnknownRequest(ref id) if id == "not-a-request"));
    assert!(err.error.is_caller_error());
    assert!(err.events.is_empty());

    assert_eq!(workflow.pending_requests().await.len(), 1);
    assert_eq!(workflow.run_state(), RunState::Idle);

    let done = workflow.send_responses(approve(&real_id, true)).await.unwrap();
    assert_eq!(done.outputs().len(), 1);
}

#[tokio::test]
async fn test_unmatched_response_kind_is_rejected() {
    let workflow = review_loop(None);
    let paused = workflow.run(first_draft()).await.unwrap();
    let id = paused.request_ids().remove(0);

    let responses = HashMap::from([(id, Payload::from("yes please"))]);
    let err = workflow.send_responses(responses).await.unwrap_err();
    assert!(matches!(err.error, WorkflowError::UnmatchedResponse { .. }));
    assert_eq!(workflow.pending_requests().await.len(), 1);
}

#[tokio::test]
async fn test_send_responses_without_pause_fails() {
    let workflow = linear_pipeline(None);
    workflow.run(0i64).await.unwrap();
    let err = workflow.send_responses(HashMap::new()).await.unwrap_err();
    assert!(matches!(err.error, WorkflowError::NotPaused));
}

#[tokio::test]
async fn test_failed_run_cannot_be_resumed_with_responses() {
    let asker = Executor::builder("asker")
        .on(|n: i64, ctx: WorkflowContext| async move { ctx.request_info::<i64, bool>(n) })
        .on_response(|_: i64, approved: bool, ctx: WorkflowContext| async move { ctx.yield_output(approved) })
        .build()
        .unwrap();
    let failer = Executor::builder("failer")
        .on(|_: i64, _ctx: WorkflowContext| async { Err(WorkflowError::Custom("boom".into())) })
        .build()
        .unwrap();

    let mut builder = WorkflowBuilder::new();
    builder
        .add_executor(adder("start", 0))
        .add_executor(asker)
        .add_executor(adder("relay", 0))
        .add_executor(failer)
        .add_fan_out_edges("start", ["asker", "relay"])
        .add_edge("relay", "failer")
        .set_start_executor("start");
    let workflow = builder.build().unwrap();

    let err = workflow.run(1i64).await.unwrap_err();
    assert!(matches!(err.error, WorkflowError::NodeExecution { ref executor, .. } if executor == "failer"));
    assert_eq!(workflow.run_state(), RunState::Failed);
    let pending = workflow.pending_requests().await;
    assert_eq!(pending.len(), 1);

    let err = workflow
        .send_responses(approve(&pending[0].request_id, true))
        .await
        .unwrap_err();
    assert!(matches!(err.error, WorkflowError::NotPaused));
    assert!(err.events.is_empty());
    assert_eq!(workflow.run_state(), RunState::Failed);
    assert_eq!(workflow.pending_requests().await.len(), 1);
}

#[tokio::test]
async fn test_cancel_stops_slow_executor() {
    let slow_done = Arc::new(AtomicUsize::new(0));
    let after_started = Arc::new(AtomicUsize::new(0));
    let workflow = slow_chain(slow_done.clone(), after_started.clone());

    let mut stream = workflow.run_stream(1i64).await.unwrap();
    let mut last = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(WorkflowEvent::SuperstepStarted { iteration: 1 }) => workflow.cancel(),
            Ok(_) => {}
            Err(error) => last = Some(error),
        }
    }

    assert!(matches!(last, Some(WorkflowError::Cancelled)));
    assert_eq!(slow_done.load(Ordering::SeqCst), 0);
    assert_eq!(after_started.load(Ordering::SeqCst), 0);
    assert_eq!(workflow.run_state(), RunState::Cancelled);
}

#[tokio::test]
async fn test_invoked_event_arrives_while_executor_runs() {
    let slow_done = Arc::new(AtomicUsize::new(0));
    let workflow = slow_chain(slow_done.clone(), Arc::new(AtomicUsize::new(0)));

    let mut stream = workflow.run_stream(1i64).await.unwrap();
    let mut announced = false;
    let mut last = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(WorkflowEvent::ExecutorInvoked { executor_id }) if executor_id == "slow" => {
                announced = true;
                workflow.cancel();
            }
            Ok(_) => {}
            Err(error) => last = Some(error),
        }
    }

    assert!(announced);
    assert!(matches!(last, Some(WorkflowError::Cancelled)));
    assert_eq!(slow_done.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_while_checkpoint_loads_stops_run() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    linear_pipeline(Some(storage.clone())).run(0i64).await.unwrap();
    let id = storage.list_ids(Some("pipeline")).await.unwrap().remove(0);
    let slow: Arc<dyn CheckpointStorage> = Arc::new(SlowLoadStorage {
        inner: storage,
        delay: Duration::from_millis(300),
    });

    let workflow = Arc::new(linear_pipeline(None));
    let resuming = workflow.clone();
    let handle = tokio::spawn(async move { resuming.run_from_checkpoint(&id, Some(slow), None).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(workflow.is_running());
    workflow.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err.error, WorkflowError::Cancelled));
    assert!(err.outputs().is_empty());
    assert_eq!(workflow.run_state(), RunState::Cancelled);
}

#[tokio::test]
async fn test_dropping_stream_cancels_run() {
    let slow_done = Arc::new(AtomicUsize::new(0));
    let workflow = slow_chain(slow_done.clone(), Arc::new(AtomicUsize::new(0)));

    let mut stream = workflow.run_stream(1i64).await.unwrap();
    while let Some(item) = stream.next().await {
        if matches!(item, Ok(WorkflowEvent::SuperstepStarted { iteration: 1 })) {
            break;
        }
    }
    drop(stream);

    for _ in 0..100 {
        if !workflow.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!workflow.is_running());
    assert_eq!(workflow.run_state(), RunState::Cancelled);
    assert_eq!(slow_done.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let workflow = slow_chain(Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let stream = workflow.run_stream(1i64).await.unwrap();

    let err = workflow.run(1i64).await.unwrap_err();
    assert!(matches!(err.error, WorkflowError::AlreadyRunning(_)));

    workflow.cancel();
    let items: Vec<_> = stream.collect().await;
    assert!(matches!(items.last(), Some(Err(WorkflowError::Cancelled))));
}

#[tokio::test]
async fn test_checkpoint_round_trip_reaches_same_output() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let original = linear_pipeline(Some(storage.clone()));
    let expected = original.run(0i64).await.unwrap();

    let ids = storage.list_ids(Some("pipeline")).await.unwrap();
    assert_eq!(ids.len(), 4);
    let after_first = storage.load(&ids[0]).await.unwrap();
    assert_eq!(after_first.iteration_count, 1);
    assert_eq!(after_first.graph_signature_hash, original.signature_hash());

    let resumed = linear_pipeline(None);
    let result = resumed
        .run_from_checkpoint(&ids[0], Some(storage.clone()), None)
        .await
        .unwrap();
    assert_eq!(result.outputs(), expected.outputs());
    assert_eq!(resumed.iteration_count().await, 4);
}

#[tokio::test]
async fn test_partial_fan_in_survives_checkpoint() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let expected = staggered_fan_in(Some(storage.clone())).run(10i64).await.unwrap();
    assert_eq!(expected.outputs(), vec![&json!([11, 15])]);

    let checkpoints: Vec<WorkflowCheckpoint> = storage
        .list(Some("staggered"))
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;
    let partial: Vec<&WorkflowCheckpoint> = checkpoints
        .iter()
        .filter(|c| !c.edge_states.is_empty())
        .collect();
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0].iteration_count, 3);

    let resumed = staggered_fan_in(None);
    let result = resumed
        .run_from_checkpoint(&partial[0].checkpoint_id, Some(storage.clone()), None)
        .await
        .unwrap();
    assert_eq!(result.outputs(), expected.outputs());

    let joins = result
        .events
        .iter()
        .filter(|e| matches!(e, WorkflowEvent::ExecutorInvoked { executor_id } if executor_id == "join"))
        .count();
    assert_eq!(joins, 1);
}

#[tokio::test]
async fn test_restore_into_different_graph_is_refused() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    linear_pipeline(Some(storage.clone())).run(0i64).await.unwrap();
    let id = storage.list_ids(Some("pipeline")).await.unwrap().remove(0);

    let mut builder = WorkflowBuilder::new();
    builder
        .with_name("pipeline")
        .add_executor(adder("a", 1))
        .add_executor(sink("b"))
        .add_edge("a", "b")
        .set_start_executor("a");
    let other = builder.build().unwrap();

    let err = other
        .run_from_checkpoint(&id, Some(storage.clone()), None)
        .await
        .unwrap_err();
    assert!(matches!(err.error, WorkflowError::GraphMismatch { .. }));
    assert!(err.error.is_checkpoint_error());
    assert_eq!(other.run_state(), RunState::NotStarted);
    assert_eq!(other.iteration_count().await, 0);
    assert!(other.state_snapshot().await.shared.is_empty());
}

#[tokio::test]
async fn test_restore_requires_storage_and_existing_id() {
    let workflow = linear_pipeline(None);
    let err = workflow.run_from_checkpoint("anything", None, None).await.unwrap_err();
    assert!(matches!(err.error, WorkflowError::Configuration(_)));

    let storage: Arc<dyn CheckpointStorage> = Arc::new(InMemoryCheckpointStorage::new());
    let err = workflow
        .run_from_checkpoint("missing", Some(storage), None)
        .await
        .unwrap_err();
    assert!(matches!(err.error, WorkflowError::CheckpointNotFound(ref id) if id == "missing"));
}

#[tokio::test]
async fn test_paused_run_resumes_from_checkpoint_with_responses() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let workflow = review_loop(Some(storage.clone()));

    let paused = workflow.run(first_draft()).await.unwrap();
    let request_id = paused.request_ids().remove(0);

    let latest = storage.latest("review").await.unwrap().unwrap();
    assert!(latest.has_pending_requests());

    let fresh = review_loop(None);
    let result = fresh
        .run_from_checkpoint(
            &latest.checkpoint_id,
            Some(storage.clone()),
            Some(approve(&request_id, true)),
        )
        .await
        .unwrap();
    assert_eq!(result.final_state, RunState::Converged);
    assert_eq!(result.outputs().len(), 1);
}

#[tokio::test]
async fn test_file_checkpoints_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = WorkflowConfig {
        name: Some("files".into()),
        checkpoint_dir: Some(dir.path().to_path_buf()),
        ..WorkflowConfig::default()
    };

    let build = || {
        let mut builder = WorkflowBuilder::new();
        builder
            .add_executor(adder("a", 2))
            .add_executor(sink("b"))
            .add_edge("a", "b")
            .set_start_executor("a")
            .with_config(&config);
        builder.build().unwrap()
    };

    let workflow = build();
    let expected = workflow.run(1i64).await.unwrap();
    assert_eq!(expected.outputs(), vec![&json!(3)]);

    let files = std::fs::read_dir(dir.path().join("files")).unwrap().count();
    assert_eq!(files, 2);

    let storage = workflow_core::FileCheckpointStorage::new(dir.path());
    let first = storage.list_ids(Some("files")).await.unwrap().remove(0);

    let restored = build();
    let result = restored.run_from_checkpoint(&first, None, None).await.unwrap();
    assert_eq!(result.outputs(), expected.outputs());
}

#[tokio::test]
async fn test_state_is_visible_in_next_superstep_only() {
    let writer = Executor::builder("writer")
        .on(|n: i64, ctx: WorkflowContext| async move {
            ctx.set_shared_state("last", n)?;
            let before = ctx.get_shared_state("last");
            ctx.yield_output(json!({"visible_same_step": before.is_ok()}))?;
            ctx.send_message(n)
        })
        .build()
        .unwrap();
    let reader = Executor::builder("reader")
        .on(|_: i64, ctx: WorkflowContext| async move {
            let last: i64 = ctx.get_shared_state_as("last")?;
            ctx.yield_output(json!({"next_step": last}))
        })
        .build()
        .unwrap();

    let mut builder = WorkflowBuilder::new();
    builder
        .add_executor(writer)
        .add_executor(reader)
        .add_edge("writer", "reader")
        .set_start_executor("writer");
    let workflow = builder.build().unwrap();

    let result = workflow.run(4i64).await.unwrap();
    assert_eq!(
        result.outputs(),
        vec![&json!({"visible_same_step": false}), &json!({"next_step": 4})]
    );
    assert_eq!(workflow.state_snapshot().await.shared["last"], json!(4));
}

#[tokio::test]
async fn test_missing_state_key_fails_the_run() {
    let reader = Executor::builder("reader")
        .on(|_: i64, ctx: WorkflowContext| async move {
            ctx.get_shared_state("never-written")?;
            Ok(())
        })
        .build()
        .unwrap();
    let mut builder = WorkflowBuilder::new();
    builder.add_executor(reader).set_start_executor("reader");
    let workflow = builder.build().unwrap();

    let err = workflow.run(0i64).await.unwrap_err();
    match err.error {
        WorkflowError::NodeExecution { executor, error } => {
            assert_eq!(executor, "reader");
            assert!(error.contains("never-written"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
