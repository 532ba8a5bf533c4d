//! # workflow-core - Superstep Workflow Engine
//!
//! Build graphs of message-driven **executors**, connect them with typed
//! **edge groups**, and run them in bulk-synchronous supersteps with
//! checkpointing, cancellation and a request/response protocol for pausing
//! on external input.
//!
//! ## Overview
//!
//! - **Executors** ([`Executor`]) register one async handler per payload kind
//!   and, optionally, handlers for responses to their own requests.
//! - **Edge groups** ([`EdgeGroup`]) route messages: single edges (with an
//!   optional condition), fan-out, fan-in and switch-case.
//! - **Supersteps**: everything sent in superstep `N` is delivered in `N + 1`.
//!   Executors of one superstep run concurrently; their events are flushed in
//!   executor ID order so runs are deterministic.
//! - **State** ([`State`]): shared and per-executor values whose writes become
//!   visible only after the superstep barrier.
//! - **Checkpoints**: with storage configured, the complete run state is saved
//!   after every superstep and can be resumed with
//!   [`Workflow::run_from_checkpoint`].
//! - **Requests**: [`WorkflowContext::request_info`] pauses a branch until the
//!   host answers through [`Workflow::send_responses`].
//!
//! ```text
//!             ┌──────────┐   single    ┌──────────┐
//!  input ───▶ │  start   │ ──────────▶ │  review  │ ──┐ request_info
//!             └──────────┘             └──────────┘   │
//!                                           ▲         ▼
//!                                           │   ┌─────────────┐
//!                          send_responses ──┴── │    host     │
//!                                               └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use workflow_core::{Executor, WorkflowBuilder, WorkflowContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let increment = Executor::builder("increment")
//!         .on(|n: i64, ctx: WorkflowContext| async move { ctx.send_message(n + 1) })
//!         .build()?;
//!     let report = Executor::builder("report")
//!         .on(|n: i64, ctx: WorkflowContext| async move { ctx.yield_output(n) })
//!         .build()?;
//!
//!     let mut builder = WorkflowBuilder::new();
//!     builder
//!         .add_executor(increment)
//!         .add_executor(report)
//!         .add_edge("increment", "report")
//!         .set_start_executor("increment");
//!     let workflow = builder.build()?;
//!
//!     let result = workflow.run(41i64).await?;
//!     println!("{:?}", result.final_output());
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! ```rust,no_run
//! # use workflow_core::Workflow;
//! use futures::StreamExt;
//!
//! # async fn demo(workflow: Workflow) -> workflow_core::Result<()> {
//! let mut events = workflow.run_stream(0i64).await?;
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod context;
pub mod edge;
pub mod error;
pub mod event;
pub mod executor;
pub mod graph;
pub mod message;
pub mod payload;
pub(crate) mod pregel;
pub mod request_info;
pub mod state;
pub mod workflow;

// Re-export main types
pub use builder::WorkflowBuilder;
pub use config::WorkflowConfig;
pub use context::WorkflowContext;
pub use edge::{Case, EdgeCondition, EdgeGroup, FanOutSelector};
pub use error::{Result, RunError, WorkflowError};
pub use event::{RunState, WorkflowEvent, WorkflowRunResult};
pub use executor::{Executor, ExecutorBuilder};
pub use graph::WorkflowGraph;
pub use message::{ExecutorId, Message};
pub use payload::{Payload, PayloadKind, PayloadType, TypeRegistry};
pub use request_info::{PendingRequest, RequestResponse};
pub use state::{State, StateScope, StateSnapshot};
pub use workflow::{EventStream, RunResult, Workflow};

pub use workflow_checkpoint::{
    CheckpointError, CheckpointId, CheckpointStorage, FileCheckpointStorage,
    InMemoryCheckpointStorage, WorkflowCheckpoint,
};
