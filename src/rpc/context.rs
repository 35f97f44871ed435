//! Per-request execution context
//!
//! A context is acquired from a [`ContextFactory`] right before a request is
//! validated and dispatched, handed to the handler by reference, and released
//! exactly once afterwards through [`ContextGuard`].

use std::ops::Deref;

use crate::errors::AppError;

pub trait ExecutionContext: Send + Sync {
    /// Frees whatever the context holds. Called exactly once per context.
    fn release(&mut self);
}

pub trait ContextFactory: Send + Sync + 'static {
    type Context: ExecutionContext + 'static;

    fn acquire(&self) -> Result<Self::Context, AppError>;
}

impl<F, C> ContextFactory for F
where
    F: Fn() -> C + Send + Sync + 'static,
    C: ExecutionContext + 'static,
{
    type Context = C;

    fn acquire(&self) -> Result<C, AppError> {
        Ok(self())
    }
}

/// Scoped ownership of a context. Releases on [`ContextGuard::finish`] or,
/// failing that, on drop.
pub struct ContextGuard<C: ExecutionContext> {
    context: Option<C>,
}

impl<C: ExecutionContext> ContextGuard<C> {
    pub fn new(context: C) -> Self {
        Self {
            context: Some(context),
        }
    }

    pub fn finish(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.release();
        }
    }
}

impl<C: ExecutionContext> Deref for ContextGuard<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.context
            .as_ref()
            .unwrap_or_else(|| unreachable!("context is only taken on release"))
    }
}

impl<C: ExecutionContext> Drop for ContextGuard<C> {
    fn drop(&mut self) {
        self.release_once();
    }
}
