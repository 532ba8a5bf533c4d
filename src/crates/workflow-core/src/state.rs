//! Run-scoped key/value state with staged writes.
//!
//! [`State`] has two scopes: a shared scope visible to every executor and a
//! per-executor scope. Reads only ever see *committed* values. Writes and
//! deletes are staged and applied in order when the runner commits at the
//! superstep barrier, so a write made during superstep N becomes visible in
//! superstep N+1 and no invocation observes its own or a sibling's writes from
//! the current round.
//!
//! ```text
//!    superstep N            barrier             superstep N+1
//!  ┌──────────────┐       ┌──────────┐        ┌──────────────┐
//!  │ set: staged  │──────▶│  commit  │───────▶│ get: visible │
//!  │ get: old     │       │ version+1│        │              │
//!  └──────────────┘       └──────────┘        └──────────────┘
//! ```

use crate::error::{Result, WorkflowError};
use crate::message::ExecutorId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Which half of the state a key lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateScope {
    /// Visible to all executors
    Shared,
    /// Private to one executor
    Executor(ExecutorId),
}

impl fmt::Display for StateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateScope::Shared => write!(f, "shared"),
            StateScope::Executor(id) => write!(f, "executor '{}'", id),
        }
    }
}

#[derive(Debug, Clone)]
enum StagedWrite {
    Set { scope: StateScope, key: String, value: Value },
    Delete { scope: StateScope, key: String },
}

/// Committed contents of a [`State`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Shared scope
    pub shared: HashMap<String, Value>,
    /// Per-executor scopes
    pub executors: HashMap<ExecutorId, HashMap<String, Value>>,
    /// Commit counter
    pub version: u64,
}

#[derive(Debug, Default)]
struct StateInner {
    committed: StateSnapshot,
    staged: Vec<StagedWrite>,
}

impl StateInner {
    fn scope(&self, scope: &StateScope) -> Option<&HashMap<String, Value>> {
        match scope {
            StateScope::Shared => Some(&self.committed.shared),
            StateScope::Executor(id) => self.committed.executors.get(id),
        }
    }

    fn scope_mut(&mut self, scope: &StateScope) -> &mut HashMap<String, Value> {
        match scope {
            StateScope::Shared => &mut self.committed.shared,
            StateScope::Executor(id) => self.committed.executors.entry(id.clone()).or_default(),
        }
    }
}

/// Versioned key/value store shared by the executors of one run.
#[derive(Debug, Default)]
pub struct State {
    inner: RwLock<StateInner>,
}

impl State {
    /// Empty state at version 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed value of `key`, or [`WorkflowError::KeyNotFound`].
    pub fn get(&self, scope: &StateScope, key: &str) -> Result<Value> {
        self.try_get(scope, key)
            .ok_or_else(|| WorkflowError::key_not_found(scope, key))
    }

    /// Committed value of `key`, if present.
    pub fn try_get(&self, scope: &StateScope, key: &str) -> Option<Value> {
        let inner = self.inner.read();
        inner.scope(scope).and_then(|values| values.get(key)).cloned()
    }

    /// Whether `key` has a committed value.
    pub fn contains(&self, scope: &StateScope, key: &str) -> bool {
        let inner = self.inner.read();
        inner
            .scope(scope)
            .map_or(false, |values| values.contains_key(key))
    }

    /// Stage a write; visible after the next [`commit`](Self::commit).
    pub fn set(&self, scope: StateScope, key: impl Into<String>, value: Value) {
        self.inner.write().staged.push(StagedWrite::Set {
            scope,
            key: key.into(),
            value,
        });
    }

    /// Stage a delete; deleting an absent key is a no-op at commit.
    pub fn delete(&self, scope: StateScope, key: impl Into<String>) {
        self.inner.write().staged.push(StagedWrite::Delete {
            scope,
            key: key.into(),
        });
    }

    /// Whether writes are waiting for a commit.
    pub fn has_pending(&self) -> bool {
        !self.inner.read().staged.is_empty()
    }

    /// Apply staged writes in order and bump the version. Returns how many writes were applied.
    pub fn commit(&self) -> usize {
        let mut inner = self.inner.write();
        let staged = std::mem::take(&mut inner.staged);
        let applied = staged.len();

        for write in staged {
            match write {
                StagedWrite::Set { scope, key, value } => {
                    inner.scope_mut(&scope).insert(key, value);
                }
                StagedWrite::Delete { scope, key } => {
                    inner.scope_mut(&scope).remove(&key);
                }
            }
        }
        inner.committed.executors.retain(|_, values| !values.is_empty());
        inner.committed.version += 1;
        applied
    }

    /// Drop staged writes without applying them.
    pub fn discard_pending(&self) {
        self.inner.write().staged.clear();
    }

    /// Number of commits so far
    pub fn version(&self) -> u64 {
        self.inner.read().committed.version
    }

    /// Committed per-executor values of `executor_id`
    pub fn executor_state(&self, executor_id: &str) -> HashMap<String, Value> {
        self.inner
            .read()
            .committed
            .executors
            .get(executor_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Copy of the committed contents. Staged writes are not included.
    pub fn export(&self) -> StateSnapshot {
        self.inner.read().committed.clone()
    }

    /// Replace the committed contents and drop staged writes.
    pub fn import(&self, snapshot: StateSnapshot) {
        let mut inner = self.inner.write();
        inner.committed = snapshot;
        inner.staged.clear();
    }
}
