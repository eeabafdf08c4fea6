//! Stage-based provisioning state machine
//!
//! A provisioning workflow is an enum of stages plus a [`Workflow`]
//! implementation that runs one stage at a time and names the next one.
//! [`StageMachine`] drives it:
//!
//! ```text
//!   stage ──run_stage──▶ Ok(next) ─────────────────────────▶ next
//!     │
//!     └──▶ Err(e) ──recover──▶ Resume   (bounded) ────────▶ same stage
//!                         ├──▶ Advance(next) ─────────────▶ next
//!                         └──▶ Escalate ──▶ ctx.fail(e) ──▶ ERROR
//!
//!   FINISHED: release client, report success
//!   ERROR:    rollback (CREATE with a container only), release client,
//!             report the original error
//! ```
//!
//! A panic inside a stage is caught and handled like any other stage error.

use crate::cache::ClientFactory;
use crate::classify::{CallKind, ErrorClass, ErrorClassifier};
use crate::config::WorkflowConfig;
use crate::credentials::{CacheKey, Credentials};
use crate::error::{CloudError, Result};
use crate::operation::OperationContext;
use crate::registry::{CacheLease, ClientCacheRegistry};
use crate::tracker::WorkflowTracker;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Provider-neutral phases every workflow stage maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningPhase {
    Init,
    ResolveDependencies,
    AcquirePrerequisiteGroup,
    AcquireNetworkContext,
    CreateNetworkResources,
    CreatePrimaryResource,
    AttachSecondaryResources,
    ReconcileLocalState,
    Finished,
    Error,
    Delete,
}

/// A workflow's stage enum
pub trait StageKind: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    const FINISHED: Self;
    const ERROR: Self;

    fn phase(&self) -> ProvisioningPhase;

    fn is_terminal(&self) -> bool {
        *self == Self::FINISHED || *self == Self::ERROR
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Create,
    Delete,
    Validate,
    Attach,
    Detach,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestType::Create => write!(f, "create"),
            RequestType::Delete => write!(f, "delete"),
            RequestType::Validate => write!(f, "validate"),
            RequestType::Attach => write!(f, "attach"),
            RequestType::Detach => write!(f, "detach"),
        }
    }
}

/// A provider resource created while the workflow ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubResource {
    pub kind: String,
    pub id: String,
    pub name: String,
    /// Deleting a container deletes everything inside it
    pub is_container: bool,
}

impl SubResource {
    pub fn new(kind: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            name: name.into(),
            is_container: false,
        }
    }

    pub fn container(kind: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            is_container: true,
            ..Self::new(kind, id, name)
        }
    }
}

/// A cached provider client leased for the lifetime of one workflow
pub struct ProviderClient<C: ?Sized + Send + Sync + 'static> {
    client: Arc<C>,
    key: CacheKey,
    lease: CacheLease<C>,
}

impl<C: ?Sized + Send + Sync + 'static> ProviderClient<C> {
    /// Lease the cache for `kind` and fetch the client for `credentials`
    pub async fn acquire<F>(
        registry: &Arc<ClientCacheRegistry>,
        kind: &str,
        factory: F,
        credentials: &Credentials,
    ) -> Result<Self>
    where
        F: FnOnce() -> Arc<dyn ClientFactory<C>>,
    {
        let lease = registry.acquire(kind, factory)?;
        match lease.cache().get_or_create(credentials).await {
            Ok(client) => Ok(Self {
                client,
                key: credentials.cache_key(),
                lease,
            }),
            Err(e) => {
                lease.release().await;
                Err(e)
            }
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Drop this client from the cache and negative-cache its key
    pub async fn invalidate(&self) {
        self.lease.cache().invalidate_key(&self.key).await;
    }

    pub async fn release(self) {
        self.lease.release().await;
    }
}

/// Per-request state carried through every stage
pub struct ProvisioningContext<S, C: ?Sized + Send + Sync + 'static, D> {
    pub request_type: RequestType,
    pub stage: S,
    /// Link of the local record being provisioned
    pub resource_reference: String,
    pub provider_client: Option<ProviderClient<C>>,
    /// Provider resources created so far, in creation order
    pub sub_resources: Vec<SubResource>,
    pub is_mock: bool,
    /// Workflow-specific scratch state
    pub data: D,
    pub operation: OperationContext,
    error: Option<CloudError>,
    failed_stage: Option<S>,
    history: Vec<S>,
}

impl<S: StageKind, C: ?Sized + Send + Sync + 'static, D> ProvisioningContext<S, C, D> {
    pub fn new(
        workflow: &str,
        request_type: RequestType,
        initial_stage: S,
        resource_reference: impl Into<String>,
        data: D,
    ) -> Self {
        let resource_reference = resource_reference.into();
        Self {
            request_type,
            stage: initial_stage,
            operation: OperationContext::new(workflow, resource_reference.clone()),
            resource_reference,
            provider_client: None,
            sub_resources: Vec::new(),
            is_mock: false,
            data,
            error: None,
            failed_stage: None,
            history: Vec::new(),
        }
    }

    pub fn mock(mut self, is_mock: bool) -> Self {
        self.is_mock = is_mock;
        self
    }

    /// Record the workflow's failure; only the first call has an effect
    pub fn fail(&mut self, stage: S, error: CloudError) -> bool {
        if self.error.is_some() {
            tracing::debug!(stage = %stage, error = %error, "ignoring error after first failure");
            return false;
        }
        self.failed_stage = Some(stage);
        self.error = Some(error);
        true
    }

    pub fn error(&self) -> Option<&CloudError> {
        self.error.as_ref()
    }

    pub fn history(&self) -> &[S] {
        &self.history
    }

    /// The leased provider client
    pub fn client(&self) -> Result<Arc<C>> {
        self.provider_client
            .as_ref()
            .map(|client| client.client().clone())
            .ok_or_else(|| CloudError::ClientReleased(self.resource_reference.clone()))
    }

    pub fn add_sub_resource(&mut self, resource: SubResource) {
        tracing::debug!(kind = %resource.kind, id = %resource.id, "tracking sub-resource");
        self.sub_resources.push(resource);
    }

    pub fn container(&self) -> Option<&SubResource> {
        self.sub_resources.iter().find(|r| r.is_container)
    }

    async fn release_client(&mut self) {
        if let Some(client) = self.provider_client.take() {
            client.release().await;
        }
    }
}

pub type WorkflowContext<W> = ProvisioningContext<
    <W as Workflow>::Stage,
    <W as Workflow>::Client,
    <W as Workflow>::Data,
>;

/// What to do after a stage failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery<S> {
    /// Run the failed stage again
    Resume,
    /// Treat the failure as handled and continue at the given stage
    Advance(S),
    /// Fail the workflow
    Escalate,
}

/// A provider-specific provisioning workflow
#[async_trait]
pub trait Workflow: Send + Sync {
    type Stage: StageKind;
    type Client: ?Sized + Send + Sync + 'static;
    type Data: Send + Sync;

    fn name(&self) -> &str;

    fn classifier(&self) -> &ErrorClassifier;

    /// Run the current stage and return the next one
    async fn run_stage(&self, ctx: &mut WorkflowContext<Self>) -> Result<Self::Stage>;

    async fn recover(
        &self,
        _ctx: &mut WorkflowContext<Self>,
        _error: &CloudError,
    ) -> Recovery<Self::Stage> {
        Recovery::Escalate
    }

    /// Delete the container resource after a failed CREATE
    async fn rollback(&self, _ctx: &mut WorkflowContext<Self>) -> Result<()> {
        Ok(())
    }
}

/// The error reported for a failed workflow
#[derive(Debug)]
pub struct ProvisioningFailure {
    /// Stage that failed
    pub stage: String,
    /// The original failure
    pub error: CloudError,
    pub rollback_error: Option<CloudError>,
}

impl fmt::Display for ProvisioningFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} failed: {}", self.stage, self.error)?;
        if let Some(rollback) = &self.rollback_error {
            write!(f, " (rollback also failed: {})", rollback)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProvisioningFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Result of driving one workflow to a terminal stage
#[derive(Debug)]
pub struct WorkflowOutcome<S> {
    pub resource_reference: String,
    pub final_stage: S,
    pub history: Vec<S>,
    pub sub_resources: Vec<SubResource>,
    pub failure: Option<ProvisioningFailure>,
}

impl<S> WorkflowOutcome<S> {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Drives a [`Workflow`] from its initial stage to FINISHED or ERROR
pub struct StageMachine<W: Workflow> {
    workflow: Arc<W>,
    tracker: Arc<dyn WorkflowTracker>,
    config: WorkflowConfig,
}

impl<W: Workflow> StageMachine<W> {
    pub fn new(workflow: Arc<W>, tracker: Arc<dyn WorkflowTracker>, config: WorkflowConfig) -> Self {
        Self {
            workflow,
            tracker,
            config,
        }
    }

    pub fn workflow(&self) -> &Arc<W> {
        &self.workflow
    }

    pub async fn run(&self, ctx: WorkflowContext<W>) -> WorkflowOutcome<W::Stage> {
        let span = tracing::info_span!(
            "workflow",
            workflow = self.workflow.name(),
            resource = %ctx.resource_reference,
            request = %ctx.request_type,
            request_id = %ctx.operation.request_id,
        );
        let operation = ctx.operation.clone();
        operation.scope(self.drive(ctx).instrument(span)).await
    }

    async fn drive(&self, mut ctx: WorkflowContext<W>) -> WorkflowOutcome<W::Stage> {
        let mut resumes = 0u32;
        let mut previous: Option<W::Stage> = None;

        loop {
            let stage = ctx.stage;
            ctx.history.push(stage);
            if stage.is_terminal() {
                break;
            }
            if previous != Some(stage) {
                resumes = 0;
            }
            previous = Some(stage);

            tracing::debug!(stage = %stage, phase = ?stage.phase(), mock = ctx.is_mock, "entering stage");
            let result = AssertUnwindSafe(self.workflow.run_stage(&mut ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(CloudError::StagePanicked {
                        stage: stage.to_string(),
                        message: panic_message(&*panic),
                    })
                });

            ctx.stage = match result {
                Ok(next) => next,
                Err(error) => self.handle_error(&mut ctx, stage, error, &mut resumes).await,
            };
        }

        self.finish(ctx).await
    }

    async fn handle_error(
        &self,
        ctx: &mut WorkflowContext<W>,
        stage: W::Stage,
        error: CloudError,
        resumes: &mut u32,
    ) -> W::Stage {
        let class = self.workflow.classifier().classify(&error, CallKind::Action);
        if class == ErrorClass::Connectivity
            && let Some(client) = &ctx.provider_client
        {
            tracing::warn!(stage = %stage, key = %client.key(), "invalidating provider client");
            client.invalidate().await;
        }

        match self.workflow.recover(ctx, &error).await {
            Recovery::Resume if *resumes < self.config.max_stage_resumes => {
                *resumes += 1;
                tracing::info!(stage = %stage, attempt = *resumes, error = %error, "resuming stage after recovery");
                return stage;
            }
            Recovery::Resume => {
                tracing::warn!(stage = %stage, resumes = *resumes, "stage resumed too many times");
            }
            Recovery::Advance(next) => {
                tracing::info!(stage = %stage, next = %next, error = %error, "recovered from stage error");
                return next;
            }
            Recovery::Escalate => {}
        }

        tracing::warn!(stage = %stage, error = %error, "stage failed");
        ctx.fail(stage, error);
        <W::Stage as StageKind>::ERROR
    }

    async fn finish(&self, mut ctx: WorkflowContext<W>) -> WorkflowOutcome<W::Stage> {
        let final_stage = ctx.stage;
        let resource = ctx.resource_reference.clone();

        let failure = if final_stage == <W::Stage as StageKind>::FINISHED {
            ctx.release_client().await;
            self.tracker.report_success(&resource).await;
            None
        } else {
            let error = ctx.error.take().unwrap_or_else(|| {
                CloudError::InvalidTransition(format!("entered {} without an error", final_stage))
            });
            let failed_stage = ctx.failed_stage.unwrap_or(final_stage);

            let container = ctx.container().map(|c| c.id.clone());
            let rollback_error = match container {
                Some(container) if ctx.request_type == RequestType::Create => {
                    tracing::info!(container = %container, "rolling back");
                    self.rollback(&mut ctx).await
                }
                _ => None,
            };

            ctx.release_client().await;
            let failure = ProvisioningFailure {
                stage: failed_stage.to_string(),
                error,
                rollback_error,
            };
            self.tracker.report_failure(&resource, &failure).await;
            Some(failure)
        };

        WorkflowOutcome {
            resource_reference: resource,
            final_stage,
            history: ctx.history,
            sub_resources: ctx.sub_resources,
            failure,
        }
    }

    async fn rollback(&self, ctx: &mut WorkflowContext<W>) -> Option<CloudError> {
        let result = AssertUnwindSafe(self.workflow.rollback(ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(CloudError::StagePanicked {
                    stage: "rollback".to_string(),
                    message: panic_message(&*panic),
                })
            });
        match result {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(error = %e, "rollback failed");
                Some(e)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Synthesized provider id for mock requests
pub fn mock_resource_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}
