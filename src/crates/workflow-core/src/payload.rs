//! Tagged message payloads and the type-compatibility registry.
//!
//! Every value travelling between executors is a [`Payload`]: a JSON value
//! plus a string discriminator (`kind`). Rust types opt in through
//! [`PayloadType`]; handler dispatch, switch-case predicates and response
//! matching all switch on the kind, never on the JSON shape.
//!
//! Compatibility between kinds (numeric widening, "this request is also a
//! generic request") lives in a [`TypeRegistry`] owned by each workflow.

use crate::error::{Result, WorkflowError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Payload type discriminator
pub type PayloadKind = String;

/// Kind accepted by every handler declared over it
pub const ANY_KIND: &str = "any";

/// Kind of the aggregated payload a fan-in delivers
pub const LIST_KIND: &str = "list";

/// A Rust type that can travel inside a [`Payload`].
///
/// Use [`payload_type!`](crate::payload_type) to implement it for your own types.
pub trait PayloadType: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Discriminator stored in [`Payload::kind`]
    const KIND: &'static str;
}

/// Implement [`PayloadType`] for a serde type.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Approval {
///     approved: bool,
/// }
///
/// workflow_core::payload_type!(Approval, "approval");
/// ```
#[macro_export]
macro_rules! payload_type {
    ($ty:ty, $kind:expr) => {
        impl $crate::payload::PayloadType for $ty {
            const KIND: &'static str = $kind;
        }
    };
}

payload_type!(i64, "int");
payload_type!(f64, "float");
payload_type!(bool, "bool");
payload_type!(String, "string");
payload_type!(Value, "any");
payload_type!(Vec<Payload>, "list");

/// A typed value moving between executors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Type discriminator
    pub kind: PayloadKind,
    /// Serialized value
    pub data: Value,
}

impl Payload {
    /// Wrap a typed value.
    pub fn new<T: PayloadType>(value: T) -> Result<Self> {
        Ok(Self {
            kind: T::KIND.to_string(),
            data: serde_json::to_value(value)?,
        })
    }

    /// Build a payload from an explicit kind and JSON value.
    pub fn raw(kind: impl Into<PayloadKind>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Aggregate several payloads into one `list` payload, preserving order.
    pub fn list(items: Vec<Payload>) -> Self {
        let data = items
            .into_iter()
            .map(|item| serde_json::json!({ "kind": item.kind, "data": item.data }))
            .collect();
        Self {
            kind: LIST_KIND.to_string(),
            data: Value::Array(data),
        }
    }

    /// Decode the data as `T`.
    ///
    /// The kind is not checked here; dispatch has already matched it.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(WorkflowError::from)
    }

    /// Items of a `list` payload.
    pub fn items(&self) -> Result<Vec<Payload>> {
        if self.kind != LIST_KIND {
            return Err(WorkflowError::Custom(format!(
                "payload of kind '{}' is not a list",
                self.kind
            )));
        }
        self.decode()
    }

    /// Whether the payload carries exactly `T`'s kind.
    pub fn is<T: PayloadType>(&self) -> bool {
        self.kind == T::KIND
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::raw(<i64 as PayloadType>::KIND, Value::from(value))
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Self::raw(<f64 as PayloadType>::KIND, Value::from(value))
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Self::raw(<bool as PayloadType>::KIND, Value::Bool(value))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::raw(<String as PayloadType>::KIND, Value::String(value))
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

/// Compatibility relation between payload kinds.
///
/// `is_compatible(actual, declared)` holds when the kinds are equal, when the
/// declared kind is [`ANY_KIND`], or when a chain of registered relations
/// leads from `actual` to `declared`. A fresh registry knows `int -> float`.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    relations: HashMap<PayloadKind, BTreeSet<PayloadKind>>,
}

impl TypeRegistry {
    /// Registry with the default numeric widening.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_compatible("int", "float");
        registry
    }

    /// Registry with no relations at all.
    pub fn empty() -> Self {
        Self {
            relations: HashMap::new(),
        }
    }

    /// Declare that payloads of kind `actual` may be handled as `declared`.
    pub fn register_compatible(
        &mut self,
        actual: impl Into<PayloadKind>,
        declared: impl Into<PayloadKind>,
    ) -> &mut Self {
        self.relations
            .entry(actual.into())
            .or_default()
            .insert(declared.into());
        self
    }

    /// Builder-style variant of [`register_compatible`](Self::register_compatible).
    pub fn with_compatible(
        mut self,
        actual: impl Into<PayloadKind>,
        declared: impl Into<PayloadKind>,
    ) -> Self {
        self.register_compatible(actual, declared);
        self
    }

    /// Whether a payload of kind `actual` satisfies a declaration of kind `declared`.
    pub fn is_compatible(&self, actual: &str, declared: &str) -> bool {
        if actual == declared || declared == ANY_KIND {
            return true;
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([actual]);
        while let Some(kind) = queue.pop_front() {
            if !seen.insert(kind) {
                continue;
            }
            if let Some(next) = self.relations.get(kind) {
                for candidate in next {
                    if candidate == declared {
                        return true;
                    }
                    queue.push_back(candidate.as_str());
                }
            }
        }
        false
    }

    /// Registered relations as sorted `(actual, declared)` pairs.
    pub fn relations(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .relations
            .iter()
            .flat_map(|(from, to)| to.iter().map(move |t| (from.clone(), t.clone())))
            .collect();
        pairs.sort();
        pairs
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
