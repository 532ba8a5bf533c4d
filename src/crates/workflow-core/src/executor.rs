//! Executors: units of behaviour with typed handlers.
//!
//! An [`Executor`] has a stable ID, one handler per input payload kind and
//! zero or more response handlers keyed by `(request kind, response kind)`.
//! Handlers are registered explicitly through [`ExecutorBuilder`]; a second
//! registration for the same kind or pair is rejected by
//! [`ExecutorBuilder::build`].
//!
//! Executors hold no routing knowledge and no mutable fields. Anything that
//! must survive between invocations belongs in per-executor state.
//!
//! # Example
//!
//! ```rust
//! use workflow_core::{Executor, WorkflowContext};
//!
//! let doubler = Executor::builder("doubler")
//!     .on(|value: i64, ctx: WorkflowContext| async move {
//!         ctx.send_message(value * 2)
//!     })
//!     .sends::<i64>()
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(doubler.input_kinds(), vec!["int"]);
//! ```

use crate::context::WorkflowContext;
use crate::error::{Result, WorkflowError};
use crate::message::{is_reserved_id, ExecutorId};
use crate::payload::{Payload, PayloadKind, PayloadType, TypeRegistry, ANY_KIND};
use crate::request_info::{RequestResponse, REQUEST_RESPONSE_KIND};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by handlers
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Type-erased message handler
pub type HandlerFn = Arc<dyn Fn(Payload, WorkflowContext) -> HandlerFuture + Send + Sync>;

/// Type-erased response handler
pub type ResponseHandlerFn =
    Arc<dyn Fn(RequestResponse, WorkflowContext) -> HandlerFuture + Send + Sync>;

struct Handler {
    kind: PayloadKind,
    handler: HandlerFn,
}

struct ResponseHandler {
    request_kind: PayloadKind,
    response_kind: PayloadKind,
    handler: ResponseHandlerFn,
}

/// A unit of behaviour in a workflow graph.
#[derive(Clone)]
pub struct Executor {
    id: ExecutorId,
    handlers: Arc<Vec<Handler>>,
    response_handlers: Arc<Vec<ResponseHandler>>,
    output_kinds: Vec<PayloadKind>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("id", &self.id)
            .field("input_kinds", &self.input_kinds())
            .field("response_pairs", &self.response_pairs())
            .field("output_kinds", &self.output_kinds)
            .finish()
    }
}

impl Executor {
    /// Start building an executor
    pub fn builder(id: impl Into<ExecutorId>) -> ExecutorBuilder {
        ExecutorBuilder::new(id)
    }

    /// Executor ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Payload kinds with a registered handler, in registration order
    pub fn input_kinds(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.kind.as_str()).collect()
    }

    /// Registered `(request kind, response kind)` pairs
    pub fn response_pairs(&self) -> Vec<(&str, &str)> {
        self.response_handlers
            .iter()
            .map(|h| (h.request_kind.as_str(), h.response_kind.as_str()))
            .collect()
    }

    /// Declared output kinds (empty when undeclared)
    pub fn output_kinds(&self) -> &[PayloadKind] {
        &self.output_kinds
    }

    /// Handler for `kind`: exact match, then a compatible declared kind, then an `any` handler.
    pub fn find_handler(&self, kind: &str, registry: &TypeRegistry) -> Option<&HandlerFn> {
        if let Some(h) = self.handlers.iter().find(|h| h.kind == kind) {
            return Some(&h.handler);
        }
        if let Some(h) = self
            .handlers
            .iter()
            .find(|h| h.kind != ANY_KIND && registry.is_compatible(kind, &h.kind))
        {
            return Some(&h.handler);
        }
        self.handlers
            .iter()
            .find(|h| h.kind == ANY_KIND)
            .map(|h| &h.handler)
    }

    /// Whether a payload of `kind` can be delivered to this executor.
    pub fn can_handle(&self, kind: &str, registry: &TypeRegistry) -> bool {
        if kind == REQUEST_RESPONSE_KIND {
            return !self.response_handlers.is_empty();
        }
        self.find_handler(kind, registry).is_some()
    }

    /// Whether an exact or type-compatible response handler exists for the pair.
    ///
    /// Never fails and has no side effects.
    pub fn is_request_supported(
        &self,
        request_kind: &str,
        response_kind: &str,
        registry: &TypeRegistry,
    ) -> bool {
        self.find_response_handler(request_kind, response_kind, registry)
            .is_some()
    }

    /// Best-match response handler: exact pair first, then the first compatible pair.
    pub fn find_response_handler(
        &self,
        request_kind: &str,
        response_kind: &str,
        registry: &TypeRegistry,
    ) -> Option<&ResponseHandlerFn> {
        if let Some(h) = self
            .response_handlers
            .iter()
            .find(|h| h.request_kind == request_kind && h.response_kind == response_kind)
        {
            return Some(&h.handler);
        }
        self.response_handlers
            .iter()
            .find(|h| {
                registry.is_compatible(request_kind, &h.request_kind)
                    && registry.is_compatible(response_kind, &h.response_kind)
            })
            .map(|h| &h.handler)
    }

    /// Dispatch one payload to the matching handler.
    pub async fn execute(
        &self,
        payload: Payload,
        ctx: WorkflowContext,
        registry: &TypeRegistry,
    ) -> Result<()> {
        if payload.kind == REQUEST_RESPONSE_KIND {
            let response: RequestResponse = payload.decode()?;
            let handler = self
                .find_response_handler(
                    &response.original_request.kind,
                    &response.response.kind,
                    registry,
                )
                .cloned()
                .ok_or_else(|| WorkflowError::UnmatchedResponse {
                    request_id: response.request_id.clone(),
                    request_kind: response.original_request.kind.clone(),
                    response_kind: response.response.kind.clone(),
                })?;
            return handler(response, ctx).await;
        }

        let handler = self
            .find_handler(&payload.kind, registry)
            .cloned()
            .ok_or_else(|| WorkflowError::NoHandler {
                executor: self.id.clone(),
                kind: payload.kind.clone(),
            })?;
        handler(payload, ctx).await
    }
}

/// Builder for [`Executor`].
pub struct ExecutorBuilder {
    id: ExecutorId,
    handlers: Vec<Handler>,
    response_handlers: Vec<ResponseHandler>,
    output_kinds: Vec<PayloadKind>,
}

impl ExecutorBuilder {
    /// New builder for executor `id`
    pub fn new(id: impl Into<ExecutorId>) -> Self {
        Self {
            id: id.into(),
            handlers: Vec::new(),
            response_handlers: Vec::new(),
            output_kinds: Vec::new(),
        }
    }

    /// Register a typed handler for `T::KIND`.
    pub fn on<T, F, Fut>(self, handler: F) -> Self
    where
        T: PayloadType,
        F: Fn(T, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.on_payload(T::KIND, move |payload: Payload, ctx| {
            let handler = handler.clone();
            async move {
                let value: T = payload.decode()?;
                handler(value, ctx).await
            }
        })
    }

    /// Register a handler over raw payloads of `kind`.
    pub fn on_payload<F, Fut>(mut self, kind: impl Into<PayloadKind>, handler: F) -> Self
    where
        F: Fn(Payload, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: HandlerFn =
            Arc::new(move |payload: Payload, ctx: WorkflowContext| -> HandlerFuture {
                Box::pin(handler(payload, ctx))
            });
        self.handlers.push(Handler {
            kind: kind.into(),
            handler,
        });
        self
    }

    /// Register a typed response handler for answers of kind `Resp` to requests of kind `Req`.
    pub fn on_response<Req, Resp, F, Fut>(self, handler: F) -> Self
    where
        Req: PayloadType,
        Resp: PayloadType,
        F: Fn(Req, Resp, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.on_response_payload(Req::KIND, Resp::KIND, move |response: RequestResponse, ctx| {
            let handler = handler.clone();
            async move {
                let request: Req = response.original_request.decode()?;
                let answer: Resp = response.response.decode()?;
                handler(request, answer, ctx).await
            }
        })
    }

    /// Register a response handler over the raw [`RequestResponse`].
    pub fn on_response_payload<F, Fut>(
        mut self,
        request_kind: impl Into<PayloadKind>,
        response_kind: impl Into<PayloadKind>,
        handler: F,
    ) -> Self
    where
        F: Fn(RequestResponse, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: ResponseHandlerFn =
            Arc::new(move |response: RequestResponse, ctx: WorkflowContext| -> HandlerFuture {
                Box::pin(handler(response, ctx))
            });
        self.response_handlers.push(ResponseHandler {
            request_kind: request_kind.into(),
            response_kind: response_kind.into(),
            handler,
        });
        self
    }

    /// Declare that handlers send payloads of kind `T::KIND`.
    pub fn sends<T: PayloadType>(self) -> Self {
        self.sends_kind(T::KIND)
    }

    /// Declare an output kind by name.
    pub fn sends_kind(mut self, kind: impl Into<PayloadKind>) -> Self {
        let kind = kind.into();
        if !self.output_kinds.contains(&kind) {
            self.output_kinds.push(kind);
        }
        self
    }

    /// Validate the registration tables and build the executor.
    pub fn build(self) -> Result<Executor> {
        if self.id.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "executor id must not be empty".to_string(),
            ));
        }
        if is_reserved_id(&self.id) {
            return Err(WorkflowError::Validation(format!(
                "executor id '{}' is reserved",
                self.id
            )));
        }

        let mut kinds = HashSet::new();
        for handler in &self.handlers {
            if !kinds.insert(handler.kind.as_str()) {
                return Err(WorkflowError::DuplicateHandler {
                    executor: self.id.clone(),
                    kind: handler.kind.clone(),
                });
            }
        }

        let mut pairs = HashSet::new();
        for handler in &self.response_handlers {
            if !pairs.insert((handler.request_kind.as_str(), handler.response_kind.as_str())) {
                return Err(WorkflowError::DuplicateResponseHandler {
                    executor: self.id.clone(),
                    request_kind: handler.request_kind.clone(),
                    response_kind: handler.response_kind.clone(),
                });
            }
        }

        Ok(Executor {
            id: self.id,
            handlers: Arc::new(self.handlers),
            response_handlers: Arc::new(self.response_handlers),
            output_kinds: self.output_kinds,
        })
    }
}
