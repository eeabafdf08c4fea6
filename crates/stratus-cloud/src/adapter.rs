//! Cloud adapter trait definition

use crate::error::Result;
use crate::machine::{ProvisioningFailure, RequestType, SubResource, WorkflowOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider adapter abstraction
///
/// Each cloud provider (Azure, AWS) implements this trait on top of its
/// provisioning workflow so callers can drive any provider the same way.
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    /// Returns the provider name (e.g., "azure", "aws")
    fn name(&self) -> &str;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Check that the credentials behind `auth_link` yield a working client
    async fn check_auth(&self, auth_link: &str) -> Result<AuthStatus>;

    /// Drive one provisioning request to a terminal stage
    ///
    /// Returns `Err` only when the request cannot be started; workflow
    /// failures are carried in [`ProvisionReport::failure`].
    async fn provision(&self, request: ProvisionRequest) -> Result<ProvisionReport>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// A provisioning request for one local compute record
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub request_type: RequestType,
    /// Link of the compute record to provision
    pub resource_reference: String,
    pub is_mock: bool,
}

impl ProvisionRequest {
    pub fn create(resource_reference: impl Into<String>) -> Self {
        Self {
            request_type: RequestType::Create,
            resource_reference: resource_reference.into(),
            is_mock: false,
        }
    }

    pub fn delete(resource_reference: impl Into<String>) -> Self {
        Self {
            request_type: RequestType::Delete,
            ..Self::create(resource_reference)
        }
    }

    pub fn mock(mut self) -> Self {
        self.is_mock = true;
        self
    }
}

/// Provider-neutral summary of a finished workflow
#[derive(Debug)]
pub struct ProvisionReport {
    pub provider: String,
    pub resource_reference: String,
    pub final_stage: String,
    pub stages: Vec<String>,
    pub sub_resources: Vec<SubResource>,
    pub failure: Option<ProvisioningFailure>,
}

impl ProvisionReport {
    pub fn from_outcome<S: fmt::Display>(provider: &str, outcome: WorkflowOutcome<S>) -> Self {
        Self {
            provider: provider.to_string(),
            resource_reference: outcome.resource_reference,
            final_stage: outcome.final_stage.to_string(),
            stages: outcome.history.iter().map(ToString::to_string).collect(),
            sub_resources: outcome.sub_resources,
            failure: outcome.failure,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}
