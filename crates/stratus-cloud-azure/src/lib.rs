//! Azure provider for Stratus
//!
//! This crate implements the [`CloudAdapter`](stratus_cloud::CloudAdapter)
//! trait for Azure, provisioning a virtual machine together with the
//! resource group, storage and networking it needs.
//!
//! # Features
//!
//! - Resource group ownership with rollback on failed creates
//! - Automatic resource provider registration on `MissingSubscriptionRegistration`
//! - Mock mode that synthesizes every provider id
//!
//! # Example
//!
//! ```ignore
//! use stratus_cloud::{CloudAdapter, EngineConfig, LoggingTracker, ProvisionRequest};
//! use stratus_cloud_azure::{AzureProvider, AzureServices};
//!
//! let provider = AzureProvider::new(services, Arc::new(LoggingTracker), &EngineConfig::default());
//! let report = provider
//!     .provision(ProvisionRequest::create("/resources/compute/web"))
//!     .await?;
//! assert!(report.is_success());
//! ```

pub mod api;
pub mod classifier;
pub mod error;
pub mod naming;
pub mod provider;
pub mod workflow;

pub use api::AzureApi;
pub use classifier::{MISSING_SUBSCRIPTION_REGISTRATION, azure_classifier};
pub use error::{AzureError, Result};
pub use naming::ResourceNames;
pub use provider::AzureProvider;
pub use workflow::{AZURE_CLIENT_KIND, AzureData, AzureServices, AzureStage, AzureWorkflow};
