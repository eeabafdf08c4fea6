//! AWS provider for Stratus
//!
//! This crate implements the [`CloudAdapter`](stratus_cloud::CloudAdapter)
//! trait for EC2: it launches an instance into a subnet with a managed
//! security group, creates and attaches EBS data volumes for the compute
//! record's data disks, and writes the results back into local records.
//!
//! The EC2 client is callback based ([`Ec2AsyncClient`]); every call is
//! adapted through the engine's remote call gateway.
//!
//! AWS has no container resource, so a failed create is never rolled back.

pub mod api;
pub mod classifier;
pub mod error;
pub mod provider;
pub mod workflow;

pub use api::Ec2AsyncClient;
pub use classifier::aws_classifier;
pub use error::{AwsError, Result};
pub use provider::AwsProvider;
pub use workflow::{AwsData, AwsServices, AwsStage, AwsWorkflow, EC2_CLIENT_KIND};
