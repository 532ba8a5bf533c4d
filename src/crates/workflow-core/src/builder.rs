//! Fluent construction of workflows.
//!
//! Wiring mistakes are collected while the builder is used and reported by
//! [`WorkflowBuilder::build`], which also validates the assembled graph.
//!
//! # Example
//!
//! ```rust,ignore
//! use workflow_core::{Executor, WorkflowBuilder};
//!
//! let double = Executor::builder("double")
//!     .on(|n: i64, ctx| async move { ctx.send_message(n * 2) })
//!     .build()?;
//! let print = Executor::builder("print")
//!     .on(|n: i64, ctx| async move { ctx.yield_output(n) })
//!     .build()?;
//!
//! let mut builder = WorkflowBuilder::new();
//! builder
//!     .add_executor(double)
//!     .add_executor(print)
//!     .add_edge("double", "print")
//!     .set_start_executor("double");
//! let workflow = builder.build()?;
//! ```

use crate::config::{WorkflowConfig, DEFAULT_EVENT_BUFFER, DEFAULT_MAX_ITERATIONS};
use crate::edge::{Case, EdgeGroup};
use crate::error::{Result, WorkflowError};
use crate::executor::Executor;
use crate::graph::WorkflowGraph;
use crate::message::ExecutorId;
use crate::payload::{Payload, TypeRegistry};
use crate::workflow::{Workflow, WorkflowSettings};
use std::sync::Arc;
use workflow_checkpoint::{CheckpointStorage, FileCheckpointStorage};

/// Builder for [`Workflow`].
pub struct WorkflowBuilder {
    name: Option<String>,
    executors: Vec<Executor>,
    edge_groups: Vec<EdgeGroup>,
    start_executor: Option<ExecutorId>,
    max_iterations: usize,
    event_buffer: usize,
    storage: Option<Arc<dyn CheckpointStorage>>,
    registry: TypeRegistry,
    errors: Vec<WorkflowError>,
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowBuilder {
    /// Empty builder with the default superstep limit
    pub fn new() -> Self {
        Self {
            name: None,
            executors: Vec::new(),
            edge_groups: Vec::new(),
            start_executor: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            storage: None,
            registry: TypeRegistry::new(),
            errors: Vec::new(),
        }
    }

    /// Register an executor.
    pub fn add_executor(&mut self, executor: Executor) -> &mut Self {
        self.executors.push(executor);
        self
    }

    /// Unconditional edge from `source` to `target`.
    pub fn add_edge(&mut self, source: impl Into<ExecutorId>, target: impl Into<ExecutorId>) -> &mut Self {
        self.edge_groups.push(EdgeGroup::Single {
            source: source.into(),
            target: target.into(),
            condition: None,
        });
        self
    }

    /// Edge that only carries payloads for which `condition` holds.
    pub fn add_edge_with_condition<F>(
        &mut self,
        source: impl Into<ExecutorId>,
        target: impl Into<ExecutorId>,
        condition: F,
    ) -> &mut Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        self.edge_groups.push(EdgeGroup::Single {
            source: source.into(),
            target: target.into(),
            condition: Some(Arc::new(condition)),
        });
        self
    }

    /// Broadcast every message from `source` to all `targets`.
    pub fn add_fan_out_edges<I, T>(&mut self, source: impl Into<ExecutorId>, targets: I) -> &mut Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ExecutorId>,
    {
        self.edge_groups.push(EdgeGroup::FanOut {
            source: source.into(),
            targets: targets.into_iter().map(Into::into).collect(),
            selector: None,
        });
        self
    }

    /// Fan-out where `selector` picks the targets of each payload.
    pub fn add_fan_out_edges_with_selector<I, T, F>(
        &mut self,
        source: impl Into<ExecutorId>,
        targets: I,
        selector: F,
    ) -> &mut Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ExecutorId>,
        F: Fn(&Payload, &[ExecutorId]) -> Vec<ExecutorId> + Send + Sync + 'static,
    {
        self.edge_groups.push(EdgeGroup::FanOut {
            source: source.into(),
            targets: targets.into_iter().map(Into::into).collect(),
            selector: Some(Arc::new(selector)),
        });
        self
    }

    /// Deliver one list to `target` once every source has sent a message.
    pub fn add_fan_in_edges<I, S>(&mut self, sources: I, target: impl Into<ExecutorId>) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ExecutorId>,
    {
        self.edge_groups.push(EdgeGroup::FanIn {
            sources: sources.into_iter().map(Into::into).collect(),
            target: target.into(),
        });
        self
    }

    /// Route each payload to the first case whose predicate holds, else `default`.
    pub fn add_switch_case_edge_group(
        &mut self,
        source: impl Into<ExecutorId>,
        cases: Vec<Case>,
        default: impl Into<ExecutorId>,
    ) -> &mut Self {
        self.edge_groups.push(EdgeGroup::SwitchCase {
            source: source.into(),
            cases,
            default: default.into(),
        });
        self
    }

    /// Executor that receives the initial payload.
    pub fn set_start_executor(&mut self, id: impl Into<ExecutorId>) -> &mut Self {
        self.start_executor = Some(id.into());
        self
    }

    /// Superstep limit before a run fails with
    /// [`ConvergenceExhausted`](WorkflowError::ConvergenceExhausted).
    pub fn set_max_iterations(&mut self, max_iterations: usize) -> &mut Self {
        if max_iterations == 0 {
            self.errors.push(WorkflowError::Validation(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        self.max_iterations = max_iterations;
        self
    }

    /// Save a checkpoint after every superstep.
    pub fn with_checkpointing(&mut self, storage: Arc<dyn CheckpointStorage>) -> &mut Self {
        self.storage = Some(storage);
        self
    }

    /// Name used for events and to group checkpoints.
    pub fn with_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the payload compatibility table.
    pub fn with_type_registry(&mut self, registry: TypeRegistry) -> &mut Self {
        self.registry = registry;
        self
    }

    /// Apply a [`WorkflowConfig`]; a `checkpoint_dir` enables file checkpoints.
    pub fn with_config(&mut self, config: &WorkflowConfig) -> &mut Self {
        if let Some(name) = &config.name {
            self.name = Some(name.clone());
        }
        self.set_max_iterations(config.max_iterations);
        if config.event_buffer == 0 {
            self.errors.push(WorkflowError::Configuration(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        self.event_buffer = config.event_buffer;
        if let Some(dir) = &config.checkpoint_dir {
            self.storage = Some(Arc::new(FileCheckpointStorage::new(dir.clone())));
        }
        self
    }

    /// Validate the graph and produce a runnable workflow.
    pub fn build(mut self) -> Result<Workflow> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }
        let start = self.start_executor.take().ok_or_else(|| {
            WorkflowError::Validation("no start executor set".to_string())
        })?;

        let graph = WorkflowGraph::new(self.executors, self.edge_groups, start, &self.registry)?;
        let name = self
            .name
            .unwrap_or_else(|| format!("workflow-{}", &graph.signature_hash()[..12]));

        tracing::debug!(
            workflow = %name,
            executors = graph.executors().len(),
            edge_groups = graph.edge_groups().len(),
            checkpointing = self.storage.is_some(),
            "Workflow built"
        );

        Ok(Workflow::new(WorkflowSettings {
            name,
            graph: Arc::new(graph),
            registry: Arc::new(self.registry),
            storage: self.storage,
            max_iterations: self.max_iterations,
            event_buffer: self.event_buffer,
        }))
    }
}
