//! Immutable workflow topology.
//!
//! A [`WorkflowGraph`] is produced by
//! [`WorkflowBuilder::build`](crate::WorkflowBuilder::build) and never changes
//! afterwards. It owns the executors, the edge groups, the start executor and
//! the **graph signature hash**: a SHA-256 over a canonical description of the
//! topology (sorted executor IDs with their input kinds, edge groups with
//! their endpoints, the start executor). Checkpoints carry the hash; restoring
//! one into a graph with a different hash is refused.

use crate::edge::EdgeGroup;
use crate::error::{Result, WorkflowError};
use crate::executor::Executor;
use crate::message::{is_reserved_id, ExecutorId};
use crate::payload::{TypeRegistry, LIST_KIND};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

/// Validated executor/edge topology.
#[derive(Debug)]
pub struct WorkflowGraph {
    executors: BTreeMap<ExecutorId, Arc<Executor>>,
    edge_groups: Vec<EdgeGroup>,
    start_executor: ExecutorId,
    signature_hash: String,
}

impl WorkflowGraph {
    /// Validate the parts and compute the signature.
    pub(crate) fn new(
        executors: Vec<Executor>,
        edge_groups: Vec<EdgeGroup>,
        start_executor: ExecutorId,
        registry: &TypeRegistry,
    ) -> Result<Self> {
        let mut by_id = BTreeMap::new();
        for executor in executors {
            let id = executor.id().to_string();
            if by_id.insert(id.clone(), Arc::new(executor)).is_some() {
                return Err(WorkflowError::DuplicateExecutor(id));
            }
        }

        let mut graph = Self {
            executors: by_id,
            edge_groups,
            start_executor,
            signature_hash: String::new(),
        };
        graph.validate(registry)?;
        graph.signature_hash = compute_signature_hash(&graph.signature_description());
        Ok(graph)
    }

    /// Executor by ID
    pub fn executor(&self, id: &str) -> Option<&Arc<Executor>> {
        self.executors.get(id)
    }

    /// All executors keyed by ID
    pub fn executors(&self) -> &BTreeMap<ExecutorId, Arc<Executor>> {
        &self.executors
    }

    /// Sorted executor IDs
    pub fn executor_ids(&self) -> Vec<&str> {
        self.executors.keys().map(String::as_str).collect()
    }

    /// Edge groups in declaration order
    pub fn edge_groups(&self) -> &[EdgeGroup] {
        &self.edge_groups
    }

    /// Executor receiving the initial message
    pub fn start_executor(&self) -> &str {
        &self.start_executor
    }

    /// Hex SHA-256 of [`signature_description`](Self::signature_description)
    pub fn signature_hash(&self) -> &str {
        &self.signature_hash
    }

    /// Canonical text the signature hash is computed over.
    pub fn signature_description(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("start={}", self.start_executor));
        for (id, executor) in &self.executors {
            let mut kinds: Vec<&str> = executor.input_kinds();
            kinds.sort_unstable();
            let mut pairs: Vec<String> = executor
                .response_pairs()
                .into_iter()
                .map(|(req, resp)| format!("{}/{}", req, resp))
                .collect();
            pairs.sort();
            lines.push(format!(
                "executor={}|inputs={}|responses={}",
                id,
                kinds.join(","),
                pairs.join(",")
            ));
        }
        let mut edges: Vec<String> = self.edge_groups.iter().map(EdgeGroup::signature).collect();
        edges.sort();
        for edge in edges {
            lines.push(format!("edge={}", edge));
        }
        lines.join("\n")
    }

    /// Executors reachable from the start executor by following edge groups
    pub fn reachable(&self) -> BTreeSet<&str> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([self.start_executor.as_str()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            for group in &self.edge_groups {
                if group.sources().contains(&id) {
                    queue.extend(group.targets());
                }
            }
        }
        seen
    }

    fn validate(&self, registry: &TypeRegistry) -> Result<()> {
        if !self.executors.contains_key(&self.start_executor) {
            return Err(WorkflowError::Validation(format!(
                "start executor '{}' is not registered",
                self.start_executor
            )));
        }

        let mut group_ids = HashSet::new();
        for group in &self.edge_groups {
            let id = group.id();
            if !group_ids.insert(id.clone()) {
                return Err(WorkflowError::Validation(format!(
                    "edge group '{}' is declared twice",
                    id
                )));
            }

            for endpoint in group.sources().into_iter().chain(group.targets()) {
                if is_reserved_id(endpoint) {
                    return Err(WorkflowError::Validation(format!(
                        "edge group '{}' uses reserved executor id '{}'",
                        id, endpoint
                    )));
                }
                if !self.executors.contains_key(endpoint) {
                    return Err(WorkflowError::Validation(format!(
                        "edge group '{}' references unknown executor '{}'",
                        id, endpoint
                    )));
                }
            }

            self.validate_shape(group)?;
            self.validate_types(group, registry)?;
        }

        let reachable = self.reachable();
        for id in self.executors.keys() {
            if !reachable.contains(id.as_str()) {
                tracing::warn!(executor = %id, "Executor is not reachable from the start executor");
            }
        }
        Ok(())
    }

    fn validate_shape(&self, group: &EdgeGroup) -> Result<()> {
        let distinct = |ids: &[ExecutorId]| ids.iter().collect::<HashSet<_>>().len() == ids.len();
        match group {
            EdgeGroup::Single { .. } => Ok(()),
            EdgeGroup::FanOut { targets, .. } if targets.len() < 2 || !distinct(targets.as_slice()) => {
                Err(WorkflowError::Validation(format!(
                    "fan-out '{}' needs at least two distinct targets",
                    group.id()
                )))
            }
            EdgeGroup::FanIn { sources, .. } if sources.len() < 2 || !distinct(sources.as_slice()) => {
                Err(WorkflowError::Validation(format!(
                    "fan-in '{}' needs at least two distinct sources",
                    group.id()
                )))
            }
            EdgeGroup::SwitchCase { cases, .. } if cases.is_empty() => {
                Err(WorkflowError::Validation(format!(
                    "switch-case '{}' needs at least one case",
                    group.id()
                )))
            }
            _ => Ok(()),
        }
    }

    /// A source that declares its outputs must send something every target accepts.
    fn validate_types(&self, group: &EdgeGroup, registry: &TypeRegistry) -> Result<()> {
        if let EdgeGroup::FanIn { target, .. } = group {
            return match self.executors.get(target) {
                Some(executor) if !executor.can_handle(LIST_KIND, registry) => {
                    Err(WorkflowError::TypeMismatch {
                        source_id: group.sources().join(","),
                        target: target.clone(),
                        detail: "fan-in target has no handler for list payloads".to_string(),
                    })
                }
                _ => Ok(()),
            };
        }

        for source in group.sources() {
            let Some(executor) = self.executors.get(source) else {
                continue;
            };
            let outputs = executor.output_kinds();
            if outputs.is_empty() {
                continue;
            }
            for target in group.targets() {
                let Some(receiver) = self.executors.get(target) else {
                    continue;
                };
                if !outputs.iter().any(|kind| receiver.can_handle(kind, registry)) {
                    return Err(WorkflowError::TypeMismatch {
                        source_id: source.to_string(),
                        target: target.to_string(),
                        detail: format!("target accepts none of [{}]", outputs.join(", ")),
                    });
                }
            }
        }
        Ok(())
    }
}

fn compute_signature_hash(description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ANY_KIND;

    fn passthrough(id: &str) -> Executor {
        Executor::builder(id)
            .on_payload(ANY_KIND, |_, _| async { Ok(()) })
            .build()
            .unwrap()
    }

    fn single(source: &str, target: &str) -> EdgeGroup {
        EdgeGroup::Single {
            source: source.into(),
            target: target.into(),
            condition: None,
        }
    }

    #[test]
    fn test_signature_is_stable_and_structural() {
        let registry = TypeRegistry::new();
        let a = WorkflowGraph::new(
            vec![passthrough("a"), passthrough("b")],
            vec![single("a", "b")],
            "a".into(),
            &registry,
        )
        .unwrap();
        let b = WorkflowGraph::new(
            vec![passthrough("b"), passthrough("a")],
            vec![single("a", "b")],
            "a".into(),
            &registry,
        )
        .unwrap();
        let c = WorkflowGraph::new(
            vec![passthrough("a"), passthrough("b"), passthrough("c")],
            vec![single("a", "b"), single("b", "c")],
            "a".into(),
            &registry,
        )
        .unwrap();

        assert_eq!(a.signature_hash(), b.signature_hash());
        assert_ne!(a.signature_hash(), c.signature_hash());
        assert_eq!(a.signature_hash().len(), 64);
    }

    #[test]
    fn test_missing_start_and_unknown_endpoint() {
        let registry = TypeRegistry::new();
        let err = WorkflowGraph::new(vec![passthrough("a")], vec![], "zzz".into(), &registry).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));

        let err = WorkflowGraph::new(vec![passthrough("a")], vec![single("a", "ghost")], "a".into(), &registry)
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_executor() {
        let registry = TypeRegistry::new();
        let err = WorkflowGraph::new(vec![passthrough("a"), passthrough("a")], vec![], "a".into(), &registry)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateExecutor(_)));
    }

    #[test]
    fn test_fan_shapes_are_checked() {
        let registry = TypeRegistry::new();
        let execs = || vec![passthrough("a"), passthrough("b")];
        let fan_out = EdgeGroup::FanOut {
            source: "a".into(),
            targets: vec!["b".into()],
            selector: None,
        };
        assert!(WorkflowGraph::new(execs(), vec![fan_out], "a".into(), &registry).is_err());

        let fan_in = EdgeGroup::FanIn {
            sources: vec!["a".into(), "a".into()],
            target: "b".into(),
        };
        assert!(WorkflowGraph::new(execs(), vec![fan_in], "a".into(), &registry).is_err());
    }

    #[test]
    fn test_declared_outputs_must_be_accepted() {
        let registry = TypeRegistry::new();
        let sender = Executor::builder("a")
            .on(|_: i64, _ctx| async { Ok(()) })
            .sends::<String>()
            .build()
            .unwrap();
        let receiver = Executor::builder("b")
            .on(|_: i64, _ctx| async { Ok(()) })
            .build()
            .unwrap();

        let err = WorkflowGraph::new(vec![sender, receiver], vec![single("a", "b")], "a".into(), &registry)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::TypeMismatch { .. }));
    }

    #[test]
    fn test_fan_in_target_needs_list_handler() {
        let registry = TypeRegistry::new();
        let join = Executor::builder("join")
            .on(|_: i64, _ctx| async { Ok(()) })
            .build()
            .unwrap();
        let fan_in = EdgeGroup::FanIn {
            sources: vec!["a".into(), "b".into()],
            target: "join".into(),
        };
        let err = WorkflowGraph::new(
            vec![passthrough("a"), passthrough("b"), join],
            vec![fan_in],
            "a".into(),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::TypeMismatch { .. }));
    }

    #[test]
    fn test_reachable() {
        let registry = TypeRegistry::new();
        let graph = WorkflowGraph::new(
            vec![passthrough("a"), passthrough("b"), passthrough("island")],
            vec![single("a", "b")],
            "a".into(),
            &registry,
        )
        .unwrap();
        let reachable = graph.reachable();
        assert!(reachable.contains("b"));
        assert!(!reachable.contains("island"));
    }
}
