//! Terminal outcome reporting

use crate::machine::ProvisioningFailure;
use async_trait::async_trait;
use std::sync::Mutex;

/// Notified exactly once when a workflow reaches a terminal stage
#[async_trait]
pub trait WorkflowTracker: Send + Sync {
    async fn report_success(&self, resource: &str);

    async fn report_failure(&self, resource: &str, failure: &ProvisioningFailure);
}

/// Tracker that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTracker;

#[async_trait]
impl WorkflowTracker for LoggingTracker {
    async fn report_success(&self, resource: &str) {
        tracing::info!(resource, "provisioning finished");
    }

    async fn report_failure(&self, resource: &str, failure: &ProvisioningFailure) {
        tracing::error!(resource, stage = %failure.stage, error = %failure, "provisioning failed");
    }
}

/// A report received by [`RecordingTracker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedOutcome {
    Success {
        resource: String,
    },
    Failure {
        resource: String,
        stage: String,
        /// Provider error code of the original failure, if any
        code: Option<String>,
        message: String,
        rollback_error: Option<String>,
    },
}

/// Tracker that keeps every report for later inspection
#[derive(Debug, Default)]
pub struct RecordingTracker {
    outcomes: Mutex<Vec<TrackedOutcome>>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<TrackedOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn push(&self, outcome: TrackedOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(outcome);
    }
}

#[async_trait]
impl WorkflowTracker for RecordingTracker {
    async fn report_success(&self, resource: &str) {
        self.push(TrackedOutcome::Success {
            resource: resource.to_string(),
        });
    }

    async fn report_failure(&self, resource: &str, failure: &ProvisioningFailure) {
        self.push(TrackedOutcome::Failure {
            resource: resource.to_string(),
            stage: failure.stage.clone(),
            code: failure.error.code().map(str::to_string),
            message: failure.error.to_string(),
            rollback_error: failure.rollback_error.as_ref().map(ToString::to_string),
        });
    }
}
