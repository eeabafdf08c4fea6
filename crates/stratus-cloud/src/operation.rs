//! Ambient operation context carried across asynchronous boundaries
//!
//! Provider SDKs complete calls on their own threads. Before a call is
//! issued the gateway captures the [`OperationContext`] of the calling task
//! together with the active `tracing` span, and re-enters both before any
//! completion handler or continuation runs.

use std::future::Future;
use tracing::Instrument;
use uuid::Uuid;

tokio::task_local! {
    static OPERATION: OperationContext;
}

/// Identity of the provisioning request a piece of work belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    pub request_id: Uuid,
    pub workflow: String,
    pub resource: String,
}

impl OperationContext {
    pub fn new(workflow: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            workflow: workflow.into(),
            resource: resource.into(),
        }
    }

    /// Context of the current task, if one is in scope
    pub fn current() -> Option<OperationContext> {
        OPERATION.try_with(|ctx| ctx.clone()).ok()
    }

    /// Run a future with this context in scope
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        OPERATION.scope(self, fut).await
    }

    /// Run a closure with this context in scope
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        OPERATION.sync_scope(self, f)
    }
}

/// Snapshot of the caller's context taken before an async boundary
#[derive(Debug, Clone)]
pub struct CapturedContext {
    operation: Option<OperationContext>,
    span: tracing::Span,
}

impl CapturedContext {
    pub fn capture() -> Self {
        Self {
            operation: OperationContext::current(),
            span: tracing::Span::current(),
        }
    }

    pub fn operation(&self) -> Option<&OperationContext> {
        self.operation.as_ref()
    }

    /// Restore the captured context around a synchronous continuation
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.span.enter();
        match &self.operation {
            Some(op) => op.clone().sync_scope(f),
            None => f(),
        }
    }

    /// Restore the captured context around an asynchronous continuation
    pub async fn run<F: Future>(self, fut: F) -> F::Output {
        let fut = fut.instrument(self.span);
        match self.operation {
            Some(op) => op.scope(fut).await,
            None => fut.await,
        }
    }
}
