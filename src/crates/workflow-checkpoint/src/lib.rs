//! # workflow-checkpoint - Durable Snapshots for Superstep Workflows
//!
//! Checkpoint records and storage backends used by `workflow-core` to persist
//! a run after every superstep and to resume it later, possibly in another
//! process.
//!
//! ## Overview
//!
//! A [`WorkflowCheckpoint`] captures everything needed to continue a run:
//!
//! - **Committed state** - shared scope and per-executor scope
//! - **Pending messages** - queued for the next superstep, keyed by sender
//! - **Edge state** - partially filled fan-in buffers
//! - **Pending requests** - outstanding external questions of a paused run
//! - **Counters** - iteration count and limit
//! - **Graph signature hash** - restoring against a different topology is refused
//!
//! Checkpoints of one run are chained through `previous_checkpoint_id`.
//!
//! ## Storage backends
//!
//! The [`CheckpointStorage`] trait is the only seam the engine depends on.
//! Two implementations ship with the crate:
//!
//! - [`InMemoryCheckpointStorage`] - tests and short-lived processes
//! - [`FileCheckpointStorage`] - one JSON file per checkpoint under a root directory
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │     workflow-core (Runner)         │
//! │  save() after each superstep       │
//! │  load() on run_from_checkpoint     │
//! └─────────────────┬──────────────────┘
//!                   ▼
//! ┌────────────────────────────────────┐
//! │  CheckpointStorage (this crate)    │
//! └───────┬───────────────────┬────────┘
//!         ▼                   ▼
//!  ┌─────────────┐    ┌──────────────────┐
//!  │  In-Memory  │    │  File (JSON)     │
//!  └─────────────┘    └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use workflow_checkpoint::{CheckpointStorage, FileCheckpointStorage, WorkflowCheckpoint};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = FileCheckpointStorage::new("./checkpoints");
//!     let checkpoint = WorkflowCheckpoint::new("orders", "graph-hash").with_iterations(1, 100);
//!
//!     let id = storage.save(checkpoint).await?;
//!     let restored = storage.load(&id).await?;
//!     println!("restored iteration {}", restored.iteration_count);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

// Re-export main types
pub use checkpoint::{CheckpointId, WorkflowCheckpoint};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointStorage;
pub use memory::InMemoryCheckpointStorage;
pub use traits::{CheckpointStorage, CheckpointStream};
