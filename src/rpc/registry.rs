//! Method registry
//!
//! Maps method names to descriptors declaring arity, defaults, notification
//! status and the handler to run. The registry is filled once and then moved
//! into the engine, after which it is only read.

use std::{collections::HashMap, fmt, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::AppError;
use crate::rpc::{context::ExecutionContext, dispatch::Arguments};

/// Names starting with this prefix are internal helpers and never exposed.
pub const RESERVED_PREFIX: &str = "_";

pub type HandlerResult = Result<Value, AppError>;

#[async_trait]
pub trait RpcHandler<C: ExecutionContext>: Send + Sync {
    async fn call(&self, context: &C, args: Arguments) -> HandlerResult;
}

/// Adapts a synchronous closure into an [`RpcHandler`].
pub struct FnHandler<C, F> {
    f: F,
    _context: PhantomData<fn(&C)>,
}

pub fn handler_fn<C, F>(f: F) -> FnHandler<C, F>
where
    C: ExecutionContext,
    F: Fn(&C, Arguments) -> HandlerResult + Send + Sync,
{
    FnHandler {
        f,
        _context: PhantomData,
    }
}

#[async_trait]
impl<C, F> RpcHandler<C> for FnHandler<C, F>
where
    C: ExecutionContext,
    F: Fn(&C, Arguments) -> HandlerResult + Send + Sync,
{
    async fn call(&self, context: &C, args: Arguments) -> HandlerResult {
        (self.f)(context, args)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Standard,
    Notification,
}

pub struct MethodDescriptor<C: ExecutionContext> {
    name: String,
    required: Vec<String>,
    optional: Vec<(String, Value)>,
    kind: MethodKind,
    handler: Arc<dyn RpcHandler<C>>,
}

impl<C: ExecutionContext> MethodDescriptor<C> {
    pub fn standard(name: impl Into<String>, handler: impl RpcHandler<C> + 'static) -> Self {
        Self::with_kind(name, MethodKind::Standard, handler)
    }

    pub fn notification(name: impl Into<String>, handler: impl RpcHandler<C> + 'static) -> Self {
        Self::with_kind(name, MethodKind::Notification, handler)
    }

    fn with_kind(
        name: impl Into<String>,
        kind: MethodKind,
        handler: impl RpcHandler<C> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            required: Vec::new(),
            optional: Vec::new(),
            kind,
            handler: Arc::new(handler),
        }
    }

    /// Appends required parameters. Order is the positional order.
    pub fn required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn optional(mut self, name: impl Into<String>, default: Value) -> Self {
        self.optional.push((name.into(), default));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required_params(&self) -> &[String] {
        &self.required
    }

    pub fn optional_params(&self) -> &[(String, Value)] {
        &self.optional
    }

    /// The parameter a bare positional value binds to.
    pub fn first_param(&self) -> Option<&str> {
        self.required
            .first()
            .map(String::as_str)
            .or_else(|| self.optional.first().map(|(name, _)| name.as_str()))
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    pub fn is_notification(&self) -> bool {
        self.kind == MethodKind::Notification
    }

    pub fn handler(&self) -> &dyn RpcHandler<C> {
        self.handler.as_ref()
    }
}

impl<C: ExecutionContext> Clone for MethodDescriptor<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            required: self.required.clone(),
            optional: self.optional.clone(),
            kind: self.kind,
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<C: ExecutionContext> fmt::Debug for MethodDescriptor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

pub struct MethodRegistry<C: ExecutionContext> {
    methods: HashMap<String, MethodDescriptor<C>>,
}

impl<C: ExecutionContext + 'static> MethodRegistry<C> {
    /// A registry holding only the built-in methods.
    pub fn new() -> Self {
        let mut registry = Self {
            methods: HashMap::new(),
        };
        registry.register_builtin();
        registry
    }

    pub fn register_builtin(&mut self) {
        self.register(MethodDescriptor::standard(
            "ping",
            handler_fn(|_: &C, _| Ok(json!("pong"))),
        ));
    }

    /// Adds `descriptor`, replacing any method of the same name.
    ///
    /// Returns `false` when the name uses the reserved prefix and was skipped.
    pub fn register(&mut self, descriptor: MethodDescriptor<C>) -> bool {
        if descriptor.name.starts_with(RESERVED_PREFIX) {
            debug!(method = %descriptor.name, "skipping method with reserved prefix");
            return false;
        }

        debug!(
            method = %descriptor.name,
            required = ?descriptor.required,
            optional = descriptor.optional.len(),
            kind = ?descriptor.kind,
            "registering jsonrpc method"
        );
        self.methods.insert(descriptor.name.clone(), descriptor);
        true
    }

    pub fn register_all<I>(&mut self, descriptors: I)
    where
        I: IntoIterator<Item = MethodDescriptor<C>>,
    {
        for descriptor in descriptors {
            self.register(descriptor);
        }
    }

    pub fn resolve(&self, name: &str) -> Option<&MethodDescriptor<C>> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl<C: ExecutionContext + 'static> Default for MethodRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
