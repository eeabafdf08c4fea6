//! Stratus Cloud Provisioning Engine
//!
//! This crate provides the provider-neutral engine the Stratus cloud
//! adapters are built on: a stage-based provisioning state machine and the
//! plumbing its stages use to talk to a cloud provider.
//!
//! # Supported Providers
//!
//! - **Azure**: resource group, networking and VM workflow (`stratus-cloud-azure`)
//! - **AWS**: EC2 instance and EBS volume workflow (`stratus-cloud-aws`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  stratus CLI                    │
//! │             (stratus provision ...)             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                stratus-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  StageMachine  ◀── trait Workflow        │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌────────────┐ ┌───────────┐ ┌────────────┐    │
//! │  │  Gateway   │ │  Poller   │ │  Batch /   │    │
//! │  │            │ │           │ │  Retry     │    │
//! │  └────────────┘ └───────────┘ └────────────┘    │
//! │  ┌────────────┐ ┌───────────┐ ┌────────────┐    │
//! │  │ ClientCache│ │ Reconciler│ │  Store     │    │
//! │  │ + Registry │ │           │ │            │    │
//! │  └────────────┘ └───────────┘ └────────────┘    │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │     azure     │ │      aws      │
//! │   workflow    │ │   workflow    │
//! └───────────────┘ └───────────────┘
//! ```

pub mod adapter;
pub mod batch;
pub mod cache;
pub mod classify;
pub mod config;
pub mod credentials;
pub mod documents;
pub mod error;
pub mod gateway;
pub mod machine;
pub mod operation;
pub mod poll;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod store;
pub mod tracker;

// Re-exports
pub use adapter::{AuthStatus, CloudAdapter, ProvisionReport, ProvisionRequest};
pub use batch::{BatchCall, BatchCallContext, execute_batch};
pub use cache::{CacheStats, ClientCache, ClientFactory};
pub use classify::{CallKind, ErrorClass, ErrorClassifier};
pub use config::{ClientCacheConfig, EngineConfig, PollConfig, RetryConfig, WorkflowConfig};
pub use credentials::{CacheKey, CredentialProvider, Credentials, StaticCredentialProvider};
pub use error::{CloudError, Result};
pub use gateway::{Completion, RemoteCall, RemoteCallGateway};
pub use machine::{
    ProviderClient, ProvisioningContext, ProvisioningFailure, ProvisioningPhase, Recovery,
    RequestType, StageKind, StageMachine, SubResource, Workflow, WorkflowContext,
    WorkflowOutcome, mock_resource_id,
};
pub use operation::{CapturedContext, OperationContext};
pub use poll::{Poller, SettleTarget};
pub use reconcile::{
    ProvisionedCompute, ProvisionedDisk, ProvisionedInterface, ReconcileReport, Reconciler,
};
pub use registry::{CacheLease, ClientCacheRegistry};
pub use retry::RetryPolicy;
pub use store::{InMemoryResourceStore, ResourceStore, ResourceStoreExt, merge_patch};
pub use tracker::{LoggingTracker, RecordingTracker, TrackedOutcome, WorkflowTracker};
