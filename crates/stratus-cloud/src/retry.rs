//! Fixed-backoff retry for single remote calls

use crate::classify::{CallKind, ErrorClassifier};
use crate::config::RetryConfig;
use crate::error::{CloudError, Result};
use std::future::Future;
use std::time::Duration;

/// Retries transient failures a fixed number of times with a fixed backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op`, retrying errors the classifier marks transient
    ///
    /// Running out of attempts yields [`CloudError::RetriesExhausted`]
    /// wrapping the last transient error.
    pub async fn execute<T, F, Fut>(
        &self,
        classifier: &ErrorClassifier,
        kind: CallKind,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if classifier.is_transient(&e, kind) => {
                    if attempt >= self.max_attempts {
                        return Err(CloudError::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }
                    tracing::warn!(attempt, error = %e, "transient failure, retrying in {:?}", self.backoff);
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Like [`RetryPolicy::execute`], but an error matching `accept` is an
    /// acceptable terminal response and yields `Ok(None)`
    pub async fn execute_accepting<T, F, Fut, P>(
        &self,
        classifier: &ErrorClassifier,
        kind: CallKind,
        accept: P,
        mut op: F,
    ) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&CloudError) -> bool,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(Some(value)),
                Err(e) if accept(&e) => {
                    tracing::debug!(error = %e, "accepting terminal response");
                    return Ok(None);
                }
                Err(e) if classifier.is_transient(&e, kind) && attempt < self.max_attempts => {
                    tracing::warn!(attempt, error = %e, "transient failure, retrying in {:?}", self.backoff);
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) if classifier.is_transient(&e, kind) => {
                    return Err(CloudError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}
