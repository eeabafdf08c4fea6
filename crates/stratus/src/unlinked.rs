//! Client factories for a binary built without provider SDK bindings

use async_trait::async_trait;
use std::sync::Arc;
use stratus_cloud::{ClientFactory, CloudError, Credentials, Result};
use stratus_cloud_aws::Ec2AsyncClient;
use stratus_cloud_azure::AzureApi;

/// Refuses to build clients; only mock-mode requests can run
pub struct UnlinkedFactory;

fn unavailable(kind: &str) -> CloudError {
    CloudError::InvalidConfig(format!(
        "no {} SDK bindings are linked into this binary; use mock mode",
        kind
    ))
}

#[async_trait]
impl ClientFactory<dyn AzureApi> for UnlinkedFactory {
    async fn create(&self, _credentials: &Credentials) -> Result<Arc<dyn AzureApi>> {
        Err(unavailable("Azure"))
    }
}

#[async_trait]
impl ClientFactory<dyn Ec2AsyncClient> for UnlinkedFactory {
    async fn create(&self, _credentials: &Credentials) -> Result<Arc<dyn Ec2AsyncClient>> {
        Err(unavailable("EC2"))
    }
}
