//! Superstep execution engine.
//!
//! A run is a sequence of **supersteps**. Messages produced during superstep
//! `N` are only delivered in superstep `N + 1`:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Superstep N                             │
//! │                                                             │
//! │  1. Route queued messages through edge runners              │
//! │     (requests for the host are recorded here)               │
//! │     ↓                                                       │
//! │  2. Announce, then invoke target executors concurrently     │
//! │     ├── executor A  ├── executor B  ├── executor C          │
//! │     ↓                                                       │
//! │  3. Barrier: flush events in executor ID order,             │
//! │     commit staged state, queue produced messages            │
//! │     ↓                                                       │
//! │  4. Checkpoint (when storage is configured)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                         ↓
//!          Messages queued?  yes → superstep N + 1
//!                            no  → Idle (requests pending) / Converged
//! ```
//!
//! - `routing`: [`EdgeGroup`](crate::EdgeGroup)s compiled into stateful edge runners
//! - `checkpoint`: capture and restore of the complete runner state
//! - `loop_impl`: the [`Runner`] driving supersteps

pub(crate) mod checkpoint;
pub(crate) mod loop_impl;
pub(crate) mod routing;

pub(crate) use loop_impl::Runner;
