//! EC2 client boundary
//!
//! The EC2 client is callback based: every request takes a [`Completion`]
//! which the client completes, from any thread, once the response arrives.
//! The workflow adapts these calls through
//! [`RemoteCallGateway::invoke_callback`](stratus_cloud::RemoteCallGateway::invoke_callback).

use serde::{Deserialize, Serialize};
use stratus_cloud::Completion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ec2Image {
    pub image_id: String,
    pub root_device_name: String,
    pub root_volume_size_gb: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ec2Subnet {
    pub subnet_id: String,
    pub vpc_id: String,
    pub availability_zone: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityGroupRequest {
    pub name: String,
    pub description: String,
    pub vpc_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngressRule {
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    pub cidr: String,
}

impl IngressRule {
    pub fn tcp(port: u16, cidr: impl Into<String>) -> Self {
        Self {
            protocol: "tcp".to_string(),
            from_port: port,
            to_port: port,
            cidr: cidr.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunInstanceRequest {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    pub root_volume_size_gb: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ec2Instance {
    pub instance_id: String,
    /// Instance state name such as `pending` or `running`
    pub state: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub root_volume_id: Option<String>,
    pub network_interface_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeRequest {
    pub name: String,
    pub size_gb: u64,
    pub availability_zone: String,
    pub volume_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ec2Volume {
    pub volume_id: String,
    pub state: String,
}

/// EC2 operations used by the instance workflow
pub trait Ec2AsyncClient: Send + Sync {
    fn describe_image(&self, image_id: &str, done: Completion<Ec2Image>);

    /// Describe `subnet_id`, or the default subnet when `None`
    fn describe_subnet(&self, subnet_id: Option<&str>, done: Completion<Ec2Subnet>);

    fn create_security_group(&self, request: SecurityGroupRequest, done: Completion<String>);

    fn authorize_ingress(&self, group_id: &str, rules: Vec<IngressRule>, done: Completion<()>);

    fn run_instance(&self, request: RunInstanceRequest, done: Completion<Ec2Instance>);

    fn describe_instance(&self, instance_id: &str, done: Completion<Ec2Instance>);

    fn terminate_instance(&self, instance_id: &str, done: Completion<()>);

    fn create_volume(&self, request: VolumeRequest, done: Completion<Ec2Volume>);

    fn attach_volume(&self, volume_id: &str, instance_id: &str, device: &str, done: Completion<()>);

    fn detach_volume(&self, volume_id: &str, done: Completion<()>);

    fn delete_volume(&self, volume_id: &str, done: Completion<()>);
}
