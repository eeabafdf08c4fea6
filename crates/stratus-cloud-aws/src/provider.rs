//! AWS adapter implementation

use crate::workflow::{AwsServices, AwsWorkflow, EC2_CLIENT_KIND};
use async_trait::async_trait;
use std::sync::Arc;
use stratus_cloud::{
    AuthStatus, CloudAdapter, CloudError, EngineConfig, ProviderClient, ProvisionReport,
    ProvisionRequest, StageMachine, WorkflowTracker,
};

/// AWS adapter driving the EC2 instance workflow
pub struct AwsProvider {
    machine: StageMachine<AwsWorkflow>,
}

impl AwsProvider {
    pub fn new(
        services: AwsServices,
        tracker: Arc<dyn WorkflowTracker>,
        config: &EngineConfig,
    ) -> Self {
        Self::from_workflow(AwsWorkflow::new(services, config), tracker, config)
    }

    pub fn from_workflow(
        workflow: AwsWorkflow,
        tracker: Arc<dyn WorkflowTracker>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            machine: StageMachine::new(Arc::new(workflow), tracker, config.workflow.clone()),
        }
    }

    pub fn workflow(&self) -> &Arc<AwsWorkflow> {
        self.machine.workflow()
    }
}

#[async_trait]
impl CloudAdapter for AwsProvider {
    fn name(&self) -> &str {
        "aws"
    }

    fn display_name(&self) -> &str {
        "Amazon Web Services"
    }

    async fn check_auth(&self, auth_link: &str) -> stratus_cloud::Result<AuthStatus> {
        let workflow = self.workflow();
        let services = workflow.services();
        let credentials = match services.credentials.resolve(auth_link).await {
            Ok(credentials) => credentials.with_region(workflow.default_region()),
            Err(CloudError::AuthenticationFailed(reason)) => return Ok(AuthStatus::failed(reason)),
            Err(e) => return Err(e),
        };

        let factory = services.client_factory.clone();
        match ProviderClient::acquire(&services.registry, EC2_CLIENT_KIND, move || factory, &credentials)
            .await
        {
            Ok(client) => {
                let account_info = format!("access key {}", credentials.private_key_id);
                client.release().await;
                Ok(AuthStatus::ok(account_info))
            }
            Err(e @ (CloudError::AuthenticationFailed(_) | CloudError::ClientInvalidated { .. })) => {
                Ok(AuthStatus::failed(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn provision(&self, request: ProvisionRequest) -> stratus_cloud::Result<ProvisionReport> {
        let ctx = self.workflow().new_context(&request);
        let outcome = self.machine.run(ctx).await;
        Ok(ProvisionReport::from_outcome(self.name(), outcome))
    }
}
