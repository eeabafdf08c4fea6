//! Azure adapter implementation

use crate::workflow::{AZURE_CLIENT_KIND, AzureServices, AzureWorkflow};
use async_trait::async_trait;
use std::sync::Arc;
use stratus_cloud::{
    AuthStatus, CloudAdapter, CloudError, EngineConfig, ProviderClient, ProvisionReport,
    ProvisionRequest, StageMachine, WorkflowTracker,
};

/// Azure adapter driving the instance workflow
pub struct AzureProvider {
    machine: StageMachine<AzureWorkflow>,
}

impl AzureProvider {
    pub fn new(
        services: AzureServices,
        tracker: Arc<dyn WorkflowTracker>,
        config: &EngineConfig,
    ) -> Self {
        Self::from_workflow(AzureWorkflow::new(services, config), tracker, config)
    }

    pub fn from_workflow(
        workflow: AzureWorkflow,
        tracker: Arc<dyn WorkflowTracker>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            machine: StageMachine::new(Arc::new(workflow), tracker, config.workflow.clone()),
        }
    }

    pub fn workflow(&self) -> &Arc<AzureWorkflow> {
        self.machine.workflow()
    }
}

#[async_trait]
impl CloudAdapter for AzureProvider {
    fn name(&self) -> &str {
        "azure"
    }

    fn display_name(&self) -> &str {
        "Microsoft Azure"
    }

    async fn check_auth(&self, auth_link: &str) -> stratus_cloud::Result<AuthStatus> {
        let workflow = self.workflow();
        let services = workflow.services();
        let credentials = match services.credentials.resolve(auth_link).await {
            Ok(credentials) if credentials.region.is_none() => {
                credentials.with_region(workflow.default_location())
            }
            Ok(credentials) => credentials,
            Err(CloudError::AuthenticationFailed(reason)) => {
                return Ok(AuthStatus::failed(reason));
            }
            Err(e) => return Err(e),
        };

        let factory = services.api_factory.clone();
        match ProviderClient::acquire(&services.registry, AZURE_CLIENT_KIND, move || factory, &credentials)
            .await
        {
            Ok(client) => {
                let account_info = format!("client {}", client.key());
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
