//! Edge groups: routing rules between executors.
//!
//! | Group        | Sources | Targets | Behaviour                                    |
//! |--------------|---------|---------|----------------------------------------------|
//! | `Single`     | 1       | 1       | direct, optional condition                   |
//! | `FanOut`     | 1       | N ≥ 2   | broadcast or selector-chosen subset          |
//! | `FanIn`      | N ≥ 2   | 1       | waits for every source, delivers one list    |
//! | `SwitchCase` | 1       | cases+1 | first matching predicate wins, else default  |
//!
//! Predicates and selectors are pure functions over the payload. They are not
//! part of the graph signature; changing one leaves checkpoints restorable.

use crate::message::ExecutorId;
use crate::payload::Payload;
use std::fmt;
use std::sync::Arc;

/// Pure predicate over a payload
pub type EdgeCondition = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// Chooses the fan-out targets of one payload
pub type FanOutSelector = Arc<dyn Fn(&Payload, &[ExecutorId]) -> Vec<ExecutorId> + Send + Sync>;

/// One `(predicate, target)` arm of a switch-case group.
#[derive(Clone)]
pub struct Case {
    /// Predicate deciding whether this arm matches
    pub predicate: EdgeCondition,
    /// Executor receiving matching payloads
    pub target: ExecutorId,
}

impl Case {
    /// New case arm
    pub fn new<F>(predicate: F, target: impl Into<ExecutorId>) -> Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            target: target.into(),
        }
    }
}

impl fmt::Debug for Case {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Case")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// A routing rule between executors.
#[derive(Clone)]
pub enum EdgeGroup {
    /// One source to one target
    Single {
        /// Sender
        source: ExecutorId,
        /// Receiver
        target: ExecutorId,
        /// Deliver only when the condition holds
        condition: Option<EdgeCondition>,
    },
    /// One source to several targets
    FanOut {
        /// Sender
        source: ExecutorId,
        /// Receivers
        targets: Vec<ExecutorId>,
        /// Per-payload subset choice; all targets when absent
        selector: Option<FanOutSelector>,
    },
    /// Several sources to one target, delivered together
    FanIn {
        /// Senders, all of which must contribute
        sources: Vec<ExecutorId>,
        /// Receiver of the aggregated list
        target: ExecutorId,
    },
    /// One source, first matching case wins
    SwitchCase {
        /// Sender
        source: ExecutorId,
        /// Ordered case arms
        cases: Vec<Case>,
        /// Receiver when no case matches
        default: ExecutorId,
    },
}

impl EdgeGroup {
    /// Stable identifier derived from the group's kind and endpoints.
    pub fn id(&self) -> String {
        format!(
            "{}:{}->{}",
            self.kind(),
            self.sources().join(","),
            self.targets().join(",")
        )
    }

    /// Short name of the group type
    pub fn kind(&self) -> &'static str {
        match self {
            EdgeGroup::Single { .. } => "single",
            EdgeGroup::FanOut { .. } => "fan_out",
            EdgeGroup::FanIn { .. } => "fan_in",
            EdgeGroup::SwitchCase { .. } => "switch_case",
        }
    }

    /// Source executors
    pub fn sources(&self) -> Vec<&str> {
        match self {
            EdgeGroup::Single { source, .. }
            | EdgeGroup::FanOut { source, .. }
            | EdgeGroup::SwitchCase { source, .. } => vec![source.as_str()],
            EdgeGroup::FanIn { sources, .. } => sources.iter().map(String::as_str).collect(),
        }
    }

    /// Target executors; for switch-case the case targets followed by the default
    pub fn targets(&self) -> Vec<&str> {
        match self {
            EdgeGroup::Single { target, .. } | EdgeGroup::FanIn { target, .. } => {
                vec![target.as_str()]
            }
            EdgeGroup::FanOut { targets, .. } => targets.iter().map(String::as_str).collect(),
            EdgeGroup::SwitchCase { cases, default, .. } => cases
                .iter()
                .map(|c| c.target.as_str())
                .chain(std::iter::once(default.as_str()))
                .collect(),
        }
    }

    /// Canonical structural description, used for the graph signature.
    pub(crate) fn signature(&self) -> String {
        match self {
            EdgeGroup::Single { condition, .. } => {
                format!("{}|conditional={}", self.id(), condition.is_some())
            }
            EdgeGroup::FanOut { selector, .. } => {
                format!("{}|selector={}", self.id(), selector.is_some())
            }
            EdgeGroup::FanIn { .. } => self.id(),
            EdgeGroup::SwitchCase { cases, .. } => format!("{}|cases={}", self.id(), cases.len()),
        }
    }
}

impl fmt::Debug for EdgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeGroup::Single {
                source,
                target,
                condition,
            } => f
                .debug_struct("Single")
                .field("source", source)
                .field("target", target)
                .field("conditional", &condition.is_some())
                .finish(),
            EdgeGroup::FanOut {
                source,
                targets,
                selector,
            } => f
                .debug_struct("FanOut")
                .field("source", source)
                .field("targets", targets)
                .field("selector", &selector.is_some())
                .finish(),
            EdgeGroup::FanIn { sources, target } => f
                .debug_struct("FanIn")
                .field("sources", sources)
                .field("target", target)
                .finish(),
            EdgeGroup::SwitchCase {
                source,
                cases,
                default,
            } => f
                .debug_struct("SwitchCase")
                .field("source", source)
                .field("cases", cases)
                .field("default", default)
                .finish(),
        }
    }
}
