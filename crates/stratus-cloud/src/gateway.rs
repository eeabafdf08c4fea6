//! Remote call gateway
//!
//! Every outbound provider call goes through [`RemoteCallGateway`]. Two SDK
//! conventions are adapted into a plain `Future<Output = Result<T>>`:
//!
//! - future-based SDKs, via [`RemoteCallGateway::invoke`]
//! - callback-based SDKs, which are handed a one-shot [`Completion`] and may
//!   complete it from any thread, via [`RemoteCallGateway::invoke_callback`]
//!
//! In both cases the caller's [`OperationContext`](crate::OperationContext)
//! and tracing span are captured before the call is issued and restored
//! around the completion. The `*_recoverable` variants consult the
//! [`ErrorClassifier`] and turn ignorable errors into `Ok(None)`.

use crate::classify::{CallKind, ErrorClass, ErrorClassifier};
use crate::error::{CloudError, Result};
use crate::operation::CapturedContext;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Description of a single outbound provider call
#[derive(Debug, Clone)]
pub struct RemoteCall {
    /// Operation name, e.g. `create_network_interface`
    pub operation: &'static str,
    pub kind: CallKind,
    /// Name or id of the provider resource the call targets
    pub target: String,
}

impl RemoteCall {
    pub fn new(operation: &'static str, kind: CallKind, target: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            target: target.into(),
        }
    }

    pub fn create(operation: &'static str, target: impl Into<String>) -> Self {
        Self::new(operation, CallKind::Create, target)
    }

    pub fn read(operation: &'static str, target: impl Into<String>) -> Self {
        Self::new(operation, CallKind::Read, target)
    }

    pub fn delete(operation: &'static str, target: impl Into<String>) -> Self {
        Self::new(operation, CallKind::Delete, target)
    }

    pub fn action(operation: &'static str, target: impl Into<String>) -> Self {
        Self::new(operation, CallKind::Action, target)
    }
}

/// One-shot completion handle given to callback-style SDKs
///
/// Consuming [`Completion::complete`] signals the awaiting caller exactly
/// once. A handle dropped without completing signals
/// [`CloudError::CallbackDropped`] so the caller never hangs.
pub struct Completion<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
    captured: CapturedContext,
    operation: &'static str,
}

impl<T> Completion<T> {
    fn new(tx: oneshot::Sender<Result<T>>, captured: CapturedContext, operation: &'static str) -> Self {
        Self {
            tx: Some(tx),
            captured,
            operation,
        }
    }

    pub fn complete(mut self, result: Result<T>) {
        let operation = self.operation;
        self.captured.enter(|| match &result {
            Ok(_) => tracing::trace!(operation, "provider callback succeeded"),
            Err(e) => tracing::debug!(operation, error = %e, "provider callback failed"),
        });
        if let Some(tx) = self.tx.take() {
            // Receiver gone means the caller stopped waiting; nothing to signal.
            let _ = tx.send(result);
        }
    }

    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, error: CloudError) {
        self.complete(Err(error));
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let operation = self.operation;
            self.captured
                .enter(|| tracing::warn!(operation, "provider callback dropped without completing"));
            let _ = tx.send(Err(CloudError::CallbackDropped(operation.to_string())));
        }
    }
}

/// Adapts provider SDK calls into awaitable results
#[derive(Debug, Clone)]
pub struct RemoteCallGateway {
    classifier: Arc<ErrorClassifier>,
}

impl RemoteCallGateway {
    pub fn new(classifier: Arc<ErrorClassifier>) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Await a future-based SDK call
    pub async fn invoke<T, F>(&self, call: &RemoteCall, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let captured = CapturedContext::capture();
        tracing::debug!(operation = call.operation, resource = %call.target, "invoking provider call");
        let result = captured.clone().run(fut).await;
        captured.enter(|| self.log_outcome(call, &result));
        result
    }

    /// Await a future-based SDK call, treating classifier-recoverable errors as `None`
    pub async fn invoke_recoverable<T, F>(&self, call: &RemoteCall, fut: F) -> Result<Option<T>>
    where
        F: Future<Output = Result<T>>,
    {
        self.recover(call, self.invoke(call, fut).await)
    }

    /// Issue a callback-based SDK call and await its completion
    ///
    /// `start` receives the [`Completion`] and must hand it to the SDK; the
    /// SDK completes it from whatever thread it likes.
    pub async fn invoke_callback<T, S>(&self, call: &RemoteCall, start: S) -> Result<T>
    where
        S: FnOnce(Completion<T>),
    {
        let captured = CapturedContext::capture();
        let (tx, rx) = oneshot::channel();
        tracing::debug!(operation = call.operation, resource = %call.target, "invoking provider call");
        start(Completion::new(tx, captured.clone(), call.operation));

        let result = match rx.await {
            Ok(result) => result,
            Err(_) => Err(CloudError::CallbackDropped(call.operation.to_string())),
        };
        captured.enter(|| self.log_outcome(call, &result));
        result
    }

    /// Callback-based variant of [`RemoteCallGateway::invoke_recoverable`]
    pub async fn invoke_callback_recoverable<T, S>(
        &self,
        call: &RemoteCall,
        start: S,
    ) -> Result<Option<T>>
    where
        S: FnOnce(Completion<T>),
    {
        self.recover(call, self.invoke_callback(call, start).await)
    }

    fn recover<T>(&self, call: &RemoteCall, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if self.classifier.classify(&e, call.kind) == ErrorClass::Recoverable => {
                tracing::info!(
                    operation = call.operation,
                    resource = %call.target,
                    error = %e,
                    "ignoring recoverable provider error"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn log_outcome<T>(&self, call: &RemoteCall, result: &Result<T>) {
        match result {
            Ok(_) => tracing::debug!(operation = call.operation, resource = %call.target, "provider call completed"),
            Err(e) => tracing::debug!(
                operation = call.operation,
                resource = %call.target,
                error = %e,
                "provider call failed"
            ),
        }
    }
}
