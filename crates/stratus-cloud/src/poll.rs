//! Poll-until-settled helper
//!
//! Several provider resources keep provisioning server-side after the create
//! call returns (storage accounts, virtual networks, NAT gateways, volumes).
//! [`Poller::await_state`] re-queries such a resource until it reaches the
//! target state, lands in a failure state, or the deadline passes.

use crate::config::PollConfig;
use crate::error::{CloudError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// States that end a polling loop
#[derive(Debug, Clone)]
pub struct SettleTarget {
    /// State that completes the loop successfully
    pub target: String,
    /// States that complete the loop with [`CloudError::ResourceFailed`]
    pub failure_states: Vec<String>,
}

impl SettleTarget {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            failure_states: Vec::new(),
        }
    }

    pub fn failing_on(mut self, state: impl Into<String>) -> Self {
        self.failure_states.push(state.into());
        self
    }

    fn is_target(&self, state: &str) -> bool {
        self.target.eq_ignore_ascii_case(state)
    }

    fn is_failure(&self, state: &str) -> bool {
        self.failure_states
            .iter()
            .any(|s| s.eq_ignore_ascii_case(state))
    }
}

/// Fixed-interval status poller with a hard deadline
#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    default_timeout: Duration,
}

impl Default for Poller {
    fn default() -> Self {
        Self::from(&PollConfig::default())
    }
}

impl From<&PollConfig> for Poller {
    fn from(config: &PollConfig) -> Self {
        Self {
            interval: config.interval(),
            default_timeout: config.timeout(),
        }
    }
}

impl Poller {
    pub fn new(interval: Duration, default_timeout: Duration) -> Self {
        Self {
            interval,
            default_timeout,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Deadline for a loop starting now with the configured timeout
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.default_timeout
    }

    /// Query `resource_id` until it settles
    ///
    /// The deadline is checked before every query, so a loop whose deadline
    /// is `n` intervals away issues at most `n` queries. A query still running
    /// at `timeout_at` is abandoned and the wait between queries never extends
    /// past it, so the loop always ends by `timeout_at`. Query errors end the
    /// loop.
    pub async fn await_state<F, Fut>(
        &self,
        resource_id: &str,
        target: &SettleTarget,
        timeout_at: Instant,
        mut query: F,
    ) -> Result<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let timed_out = |attempts: u32| {
            CloudError::Timeout(format!(
                "{} did not reach state '{}' after {} polls",
                resource_id, target.target, attempts
            ))
        };

        let mut attempts: u32 = 0;
        loop {
            if Instant::now() >= timeout_at {
                return Err(timed_out(attempts));
            }

            attempts += 1;
            let state = tokio::time::timeout_at(timeout_at, query())
                .await
                .map_err(|_| timed_out(attempts))??;

            if target.is_target(&state) {
                tracing::debug!(resource = resource_id, state = %state, attempts, "resource settled");
                return Ok(resource_id.to_string());
            }
            if target.is_failure(&state) {
                return Err(CloudError::ResourceFailed {
                    resource: resource_id.to_string(),
                    state,
                });
            }

            tracing::trace!(resource = resource_id, state = %state, attempts, "resource not settled yet");
            let remaining = timeout_at.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.interval.min(remaining)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_settles_after_pending() {
        let poller = Poller::new(Duration::from_secs(5), Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let id = poller
            .await_state(
                "vnet-1",
                &SettleTarget::new("Succeeded"),
                poller.deadline(),
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Ok("Updating".to_string())
                    } else {
                        Ok("succeeded".to_string())
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(id, "vnet-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_two_attempts() {
        let interval = Duration::from_secs(5);
        let poller = Poller::new(interval, Duration::from_secs(60));
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let timeout_at = start + interval * 2;

        let result = poller
            .await_state(
                "nat-1",
                &SettleTarget::new("available"),
                timeout_at,
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("pending".to_string())
                },
            )
            .await;

        assert!(matches!(result, Err(CloudError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(Instant::now() <= timeout_at + interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_query_is_cut_off_at_deadline() {
        let interval = Duration::from_secs(5);
        let poller = Poller::new(interval, Duration::from_secs(60));
        let start = Instant::now();
        let timeout_at = start + Duration::from_secs(10);

        let result = poller
            .await_state(
                "disk-1",
                &SettleTarget::new("ready"),
                timeout_at,
                || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok("ready".to_string())
                },
            )
            .await;

        assert!(matches!(result, Err(CloudError::Timeout(_))));
        assert!(Instant::now() <= timeout_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_between_queries_stops_at_deadline() {
        let poller = Poller::new(Duration::from_secs(30), Duration::from_secs(60));
        let timeout_at = Instant::now() + Duration::from_secs(7);
        let calls = AtomicU32::new(0);

        let result = poller
            .await_state("subnet-1", &SettleTarget::new("Succeeded"), timeout_at, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("Updating".to_string())
            })
            .await;

        assert!(matches!(result, Err(CloudError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Instant::now() <= timeout_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_state() {
        let poller = Poller::new(Duration::from_secs(1), Duration::from_secs(10));

        let result = poller
            .await_state(
                "storage-1",
                &SettleTarget::new("Succeeded").failing_on("Failed"),
                poller.deadline(),
                || async { Ok("Failed".to_string()) },
            )
            .await;

        assert!(matches!(
            result,
            Err(CloudError::ResourceFailed { ref state, .. }) if state == "Failed"
        ));
    }
}
