//! Local resource documents

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const COMPUTE_FACTORY: &str = "/resources/compute";
pub const DISK_FACTORY: &str = "/resources/disks";
pub const NETWORK_INTERFACE_FACTORY: &str = "/resources/network-interfaces";
pub const RESOURCE_GROUP_FACTORY: &str = "/resources/groups";

/// Power state of a compute instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
    Suspend,
    #[default]
    Unknown,
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
            PowerState::Suspend => write!(f, "suspend"),
            PowerState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Lifecycle of a local disk record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskStatus {
    #[default]
    Available,
    Attached,
    Detached,
}

/// Compute instance record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeState {
    pub self_link: String,
    pub name: String,
    /// Provider-assigned instance id, empty until provisioned
    pub id: String,
    pub region: Option<String>,
    pub instance_type: String,
    pub image_ref: String,
    pub auth_credentials_link: String,
    /// Resource group (or equivalent container) this instance lives in
    pub group_links: Vec<String>,
    pub disk_links: Vec<String>,
    pub network_interface_links: Vec<String>,
    pub power_state: PowerState,
    pub address: Option<String>,
    pub custom_properties: HashMap<String, String>,
}

impl ComputeState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance_type = instance_type.into();
        self
    }

    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = image_ref.into();
        self
    }

    pub fn with_auth(mut self, auth_credentials_link: impl Into<String>) -> Self {
        self.auth_credentials_link = auth_credentials_link.into();
        self
    }

    pub fn with_disk(mut self, disk_link: impl Into<String>) -> Self {
        self.disk_links.push(disk_link.into());
        self
    }

    pub fn with_network_interface(mut self, link: impl Into<String>) -> Self {
        self.network_interface_links.push(link.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.custom_properties.get(key).map(String::as_str)
    }
}

/// Disk record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskState {
    pub self_link: String,
    pub name: String,
    pub id: String,
    pub capacity_gb: u64,
    pub disk_type: String,
    pub status: DiskStatus,
    /// Persistent disks survive instance deletion
    pub persistent: bool,
    /// Boot disks come with the instance and are never created separately
    pub boot: bool,
    pub compute_link: Option<String>,
}

impl DiskState {
    pub fn new(name: impl Into<String>, capacity_gb: u64) -> Self {
        Self {
            name: name.into(),
            capacity_gb,
            ..Self::default()
        }
    }

    pub fn boot(mut self) -> Self {
        self.boot = true;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// Network interface record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkInterfaceState {
    pub self_link: String,
    pub name: String,
    pub id: String,
    pub device_index: u32,
    pub address: Option<String>,
    pub public_address: Option<String>,
    pub subnet_id: Option<String>,
    pub security_group_ids: Vec<String>,
    pub compute_link: Option<String>,
}

impl NetworkInterfaceState {
    pub fn new(name: impl Into<String>, device_index: u32) -> Self {
        Self {
            name: name.into(),
            device_index,
            ..Self::default()
        }
    }
}

/// Resource group record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceGroupState {
    pub self_link: String,
    pub name: String,
    pub id: String,
    pub region: Option<String>,
}
