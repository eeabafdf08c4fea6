//! Fan-out of concurrent remote calls with first-failure-wins semantics

use crate::error::Result;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::Instrument;

/// A boxed remote call taking part in a batch
pub type BatchCall<T> = BoxFuture<'static, Result<T>>;

/// Shared bookkeeping for one fan-out
#[derive(Debug)]
pub struct BatchCallContext {
    expected: usize,
    outstanding: AtomicUsize,
    has_failed: AtomicBool,
}

impl BatchCallContext {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            outstanding: AtomicUsize::new(expected),
            has_failed: AtomicBool::new(false),
        }
    }

    pub fn expected_count(&self) -> usize {
        self.expected
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn has_failed(&self) -> bool {
        self.has_failed.load(Ordering::SeqCst)
    }

    /// Record one completion, returning the number still outstanding
    fn complete_one(&self) -> usize {
        self.outstanding.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    /// Claim the single failure slot; `true` only for the first caller
    fn try_fail(&self) -> bool {
        self.has_failed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Run `calls` concurrently and aggregate their outcome
///
/// Succeeds with every result, in submission order, once all calls succeed.
/// Fails as soon as the first failure is observed, returning that failure;
/// the calls still in flight are drained on a background task and their
/// results are only logged.
pub async fn execute_batch<T>(label: &str, calls: Vec<BatchCall<T>>) -> Result<Vec<T>>
where
    T: Send + 'static,
{
    let ctx = Arc::new(BatchCallContext::new(calls.len()));
    if calls.is_empty() {
        return Ok(Vec::new());
    }

    let mut pending: FuturesUnordered<_> = calls
        .into_iter()
        .enumerate()
        .map(|(index, call)| async move { (index, call.await) })
        .collect();

    let mut results: Vec<Option<T>> = (0..ctx.expected_count()).map(|_| None).collect();

    loop {
        let Some((index, result)) = pending.next().await else {
            break;
        };
        let remaining = ctx.complete_one();
        match result {
            Ok(value) => results[index] = Some(value),
            Err(e) => {
                if ctx.try_fail() {
                    tracing::warn!(batch = label, call = index, remaining, error = %e, "batch call failed");
                    if remaining > 0 {
                        let label = label.to_string();
                        let ctx = ctx.clone();
                        tokio::spawn(
                            async move {
                                while let Some((index, result)) = pending.next().await {
                                    ctx.complete_one();
                                    match result {
                                        Ok(_) => tracing::debug!(
                                            batch = %label,
                                            call = index,
                                            "batch call completed after batch failure"
                                        ),
                                        Err(e) => tracing::warn!(
                                            batch = %label,
                                            call = index,
                                            error = %e,
                                            "additional batch call failure"
                                        ),
                                    }
                                }
                            }
                            .in_current_span(),
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    tracing::debug!(batch = label, calls = ctx.expected_count(), "batch completed");
    Ok(results.into_iter().flatten().collect())
}
