//! Azure management API boundary
//!
//! The workflow only talks to Azure through [`AzureApi`]. Each method maps to
//! one management-plane request; long-running resources report their
//! provisioning state through the matching `*_state` query.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stratus_cloud::Result;

/// An OS image resolved from an image reference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureImage {
    pub id: String,
    pub os_disk_size_gb: u64,
    /// Data disks bundled with a custom image
    pub data_disks: Vec<ImageDataDisk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDataDisk {
    pub lun: u32,
    pub size_gb: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualNetworkSpec {
    pub group: String,
    pub name: String,
    pub location: String,
    pub address_prefix: String,
    pub subnet_name: String,
    pub subnet_prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIp {
    pub id: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NicSpec {
    pub group: String,
    pub name: String,
    pub location: String,
    pub subnet_id: String,
    pub public_ip_id: Option<String>,
    pub security_group_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureNic {
    pub id: String,
    pub private_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataDiskSpec {
    pub name: String,
    pub size_gb: u64,
    pub lun: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VmSpec {
    pub group: String,
    pub name: String,
    pub location: String,
    pub size: String,
    pub image_id: String,
    pub nic_id: String,
    pub os_disk_name: String,
    pub availability_set_id: Option<String>,
    pub storage_account: Option<String>,
    pub data_disks: Vec<DataDiskSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureDisk {
    pub name: String,
    pub id: String,
    pub size_gb: u64,
    /// `None` for the OS disk
    pub lun: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureVm {
    pub id: String,
    /// Power state code such as `PowerState/running`
    pub power_state: String,
    pub disks: Vec<AzureDisk>,
}

/// Azure Resource Manager operations used by the instance workflow
#[async_trait]
pub trait AzureApi: Send + Sync {
    async fn create_resource_group(&self, name: &str, location: &str) -> Result<String>;

    async fn delete_resource_group(&self, name: &str) -> Result<()>;

    async fn resource_group_state(&self, name: &str) -> Result<String>;

    async fn create_availability_set(&self, group: &str, name: &str, location: &str)
    -> Result<String>;

    async fn resolve_image(&self, image_ref: &str, location: &str) -> Result<AzureImage>;

    async fn create_storage_account(&self, group: &str, name: &str, location: &str)
    -> Result<String>;

    async fn storage_account_state(&self, group: &str, name: &str) -> Result<String>;

    async fn create_virtual_network(&self, spec: &VirtualNetworkSpec) -> Result<String>;

    async fn virtual_network_state(&self, group: &str, name: &str) -> Result<String>;

    async fn subnet_id(&self, group: &str, network: &str, subnet: &str) -> Result<String>;

    async fn create_public_ip(&self, group: &str, name: &str, location: &str) -> Result<PublicIp>;

    async fn create_security_group(&self, group: &str, name: &str, location: &str)
    -> Result<String>;

    async fn create_network_interface(&self, spec: &NicSpec) -> Result<AzureNic>;

    async fn create_virtual_machine(&self, spec: &VmSpec) -> Result<AzureVm>;

    async fn delete_virtual_machine(&self, group: &str, name: &str) -> Result<()>;

    async fn register_provider(&self, namespace: &str) -> Result<()>;

    async fn provider_registration_state(&self, namespace: &str) -> Result<String>;
}
