//! EC2 instance provisioning workflow

use crate::api::{
    Ec2AsyncClient, Ec2Image, Ec2Instance, Ec2Subnet, Ec2Volume, IngressRule, RunInstanceRequest,
    SecurityGroupRequest, VolumeRequest,
};
use crate::classifier::{INSTANCE_NOT_FOUND, aws_classifier};
use crate::error::AwsError;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::fmt;
use std::sync::Arc;
use stratus_cloud::documents::{ComputeState, DiskState, PowerState};
use stratus_cloud::{
    BatchCall, ClientCacheRegistry, ClientFactory, CloudError, Completion, CredentialProvider,
    EngineConfig, ErrorClassifier, Poller, ProvisionRequest, ProvisionedCompute, ProvisionedDisk,
    ProvisionedInterface, ProviderClient, ProvisioningContext, ProvisioningPhase, Reconciler,
    RemoteCall, RemoteCallGateway, RequestType, ResourceStore, ResourceStoreExt, Result,
    RetryPolicy, SettleTarget, StageKind, SubResource, Workflow, WorkflowContext, execute_batch,
    mock_resource_id,
};

/// Client kind under which EC2 clients are cached
pub const EC2_CLIENT_KIND: &str = "aws-ec2";

/// Compute property naming the subnet to launch into
pub const PROP_SUBNET: &str = "aws.subnet_id";
/// Compute property naming a pre-existing security group
pub const PROP_SECURITY_GROUP: &str = "aws.security_group_id";

const RUNNING: &str = "running";
const TERMINATED: &str = "terminated";
const DEFAULT_VOLUME_TYPE: &str = "gp3";
const DEVICE_LETTERS: &[u8] = b"fghijklmno";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwsStage {
    ClientInit,
    ResolveImage,
    NetworkContext,
    SecurityGroup,
    CreateInstance,
    AwaitRunning,
    CreateVolumes,
    AttachVolumes,
    Records,
    Terminate,
    AwaitTerminated,
    CleanupDisks,
    DeleteRecords,
    Finished,
    Error,
}

impl fmt::Display for AwsStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AwsStage::ClientInit => "CLIENT_INIT",
            AwsStage::ResolveImage => "RESOLVE_IMAGE",
            AwsStage::NetworkContext => "NETWORK_CONTEXT",
            AwsStage::SecurityGroup => "SECURITY_GROUP",
            AwsStage::CreateInstance => "CREATE_INSTANCE",
            AwsStage::AwaitRunning => "AWAIT_RUNNING",
            AwsStage::CreateVolumes => "CREATE_VOLUMES",
            AwsStage::AttachVolumes => "ATTACH_VOLUMES",
            AwsStage::Records => "RECORDS",
            AwsStage::Terminate => "TERMINATE",
            AwsStage::AwaitTerminated => "AWAIT_TERMINATED",
            AwsStage::CleanupDisks => "CLEANUP_DISKS",
            AwsStage::DeleteRecords => "DELETE_RECORDS",
            AwsStage::Finished => "FINISHED",
            AwsStage::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

impl StageKind for AwsStage {
    const FINISHED: Self = AwsStage::Finished;
    const ERROR: Self = AwsStage::Error;

    fn phase(&self) -> ProvisioningPhase {
        match self {
            AwsStage::ClientInit => ProvisioningPhase::Init,
            AwsStage::ResolveImage => ProvisioningPhase::ResolveDependencies,
            AwsStage::NetworkContext => ProvisioningPhase::AcquireNetworkContext,
            AwsStage::SecurityGroup => ProvisioningPhase::CreateNetworkResources,
            AwsStage::CreateInstance | AwsStage::AwaitRunning => {
                ProvisioningPhase::CreatePrimaryResource
            }
            AwsStage::CreateVolumes | AwsStage::AttachVolumes => {
                ProvisioningPhase::AttachSecondaryResources
            }
            AwsStage::Records => ProvisioningPhase::ReconcileLocalState,
            AwsStage::Terminate
            | AwsStage::AwaitTerminated
            | AwsStage::CleanupDisks
            | AwsStage::DeleteRecords => ProvisioningPhase::Delete,
            AwsStage::Finished => ProvisioningPhase::Finished,
            AwsStage::Error => ProvisioningPhase::Error,
        }
    }
}

/// A data volume created for a local disk record
#[derive(Debug, Clone, PartialEq)]
pub struct DataVolume {
    pub disk: DiskState,
    pub volume: Ec2Volume,
    pub device: String,
}

/// Workflow scratch state
#[derive(Debug, Default)]
pub struct AwsData {
    pub compute: ComputeState,
    pub region: String,
    pub image: Option<Ec2Image>,
    pub subnet: Option<Ec2Subnet>,
    pub security_group_id: Option<String>,
    pub instance: Option<Ec2Instance>,
    pub volumes: Vec<DataVolume>,
}

fn missing(what: &str) -> CloudError {
    CloudError::InvalidTransition(format!("{} not available at this stage", what))
}

/// Device name for the `index`th data volume (`/dev/sdf` onwards)
pub fn device_name(index: usize) -> crate::error::Result<String> {
    DEVICE_LETTERS
        .get(index)
        .map(|letter| format!("/dev/sd{}", char::from(*letter)))
        .ok_or(AwsError::DeviceIndexOutOfRange(index))
}

/// Issue one callback-style EC2 call through the gateway, retrying transient failures
async fn ec2_call<T, S>(
    retry: &RetryPolicy,
    gateway: &RemoteCallGateway,
    call: &RemoteCall,
    start: S,
) -> Result<T>
where
    S: Fn(Completion<T>),
{
    retry
        .execute(gateway.classifier(), call.kind, || {
            gateway.invoke_callback(call, &start)
        })
        .await
}

async fn ec2_call_recoverable<T, S>(
    retry: &RetryPolicy,
    gateway: &RemoteCallGateway,
    call: &RemoteCall,
    start: S,
) -> Result<Option<T>>
where
    S: Fn(Completion<T>),
{
    retry
        .execute(gateway.classifier(), call.kind, || {
            gateway.invoke_callback_recoverable(call, &start)
        })
        .await
}

pub type AwsContext = WorkflowContext<AwsWorkflow>;

/// Collaborators the AWS workflow needs
#[derive(Clone)]
pub struct AwsServices {
    pub store: Arc<dyn ResourceStore>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub registry: Arc<ClientCacheRegistry>,
    pub client_factory: Arc<dyn ClientFactory<dyn Ec2AsyncClient>>,
}

pub struct AwsWorkflow {
    services: AwsServices,
    reconciler: Reconciler,
    gateway: RemoteCallGateway,
    retry: RetryPolicy,
    poller: Poller,
    default_region: String,
}

impl AwsWorkflow {
    pub fn new(services: AwsServices, config: &EngineConfig) -> Self {
        Self {
            reconciler: Reconciler::new(services.store.clone()),
            gateway: RemoteCallGateway::new(Arc::new(aws_classifier())),
            retry: RetryPolicy::from(&config.retry),
            poller: Poller::from(&config.poll),
            default_region: "us-east-1".to_string(),
            services,
        }
    }

    pub fn with_default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = region.into();
        self
    }

    pub fn services(&self) -> &AwsServices {
        &self.services
    }

    /// Region used for records that do not name one
    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    pub fn new_context(&self, request: &ProvisionRequest) -> AwsContext {
        ProvisioningContext::new(
            self.name(),
            request.request_type,
            AwsStage::ClientInit,
            request.resource_reference.clone(),
            AwsData::default(),
        )
        .mock(request.is_mock)
    }

    fn ec2(&self, ctx: &AwsContext) -> Result<Option<Arc<dyn Ec2AsyncClient>>> {
        if ctx.is_mock {
            Ok(None)
        } else {
            ctx.client().map(Some)
        }
    }

    async fn call<T, S>(&self, call: &RemoteCall, start: S) -> Result<T>
    where
        S: Fn(Completion<T>),
    {
        ec2_call(&self.retry, &self.gateway, call, start).await
    }

    async fn call_recoverable<T, S>(&self, call: &RemoteCall, start: S) -> Result<Option<T>>
    where
        S: Fn(Completion<T>),
    {
        ec2_call_recoverable(&self.retry, &self.gateway, call, start).await
    }

    /// Poll an instance until it reaches `target`
    ///
    /// A missing instance counts as `terminated`.
    async fn await_instance(
        &self,
        ec2: &Arc<dyn Ec2AsyncClient>,
        instance_id: &str,
        target: SettleTarget,
    ) -> Result<String> {
        let call = &RemoteCall::read("describe_instance", instance_id);
        let query = move || async move {
            match self
                .call(call, move |done| ec2.describe_instance(instance_id, done))
                .await
            {
                Ok(instance) => Ok(instance.state),
                Err(e) if e.code() == Some(INSTANCE_NOT_FOUND) => Ok(TERMINATED.to_string()),
                Err(e) => Err(e),
            }
        };
        self.poller
            .await_state(instance_id, &target, self.poller.deadline(), query)
            .await
    }

    async fn local_disks(&self, compute: &ComputeState) -> Result<Vec<DiskState>> {
        let mut disks = Vec::with_capacity(compute.disk_links.len());
        for link in &compute.disk_links {
            match self.services.store.get_as::<DiskState>(link).await {
                Ok(disk) => disks.push(disk),
                Err(CloudError::ResourceNotFound(_)) => {
                    tracing::warn!(disk = %link, "skipping missing disk record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(disks)
    }

    async fn client_init(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        let compute: ComputeState = self
            .services
            .store
            .get_as(&ctx.resource_reference)
            .await?;
        ctx.data.region = compute
            .region
            .clone()
            .unwrap_or_else(|| self.default_region.clone());

        if ctx.request_type == RequestType::Create {
            let data_disks = self
                .local_disks(&compute)
                .await?
                .iter()
                .filter(|disk| !disk.boot)
                .count();
            if let Some(last) = data_disks.checked_sub(1) {
                device_name(last)?;
            }
        }

        if !ctx.is_mock {
            let credentials = self
                .services
                .credentials
                .resolve(&compute.auth_credentials_link)
                .await?
                .with_region(ctx.data.region.clone());
            let factory = self.services.client_factory.clone();
            let client = ProviderClient::acquire(
                &self.services.registry,
                EC2_CLIENT_KIND,
                move || factory,
                &credentials,
            )
            .await?;
            ctx.provider_client = Some(client);
        }
        ctx.data.compute = compute;

        match ctx.request_type {
            RequestType::Create => Ok(AwsStage::ResolveImage),
            RequestType::Delete => Ok(AwsStage::Terminate),
            other => Err(CloudError::InvalidConfig(format!(
                "aws instance workflow does not handle {} requests",
                other
            ))),
        }
    }

    async fn resolve_image(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        let image_ref = ctx.data.compute.image_ref.clone();
        if image_ref.is_empty() {
            return Err(AwsError::MissingImage(ctx.resource_reference.clone()).into());
        }

        let image = match self.ec2(ctx)? {
            None => Ec2Image {
                image_id: image_ref,
                root_device_name: "/dev/xvda".to_string(),
                root_volume_size_gb: 8,
            },
            Some(ec2) => {
                self.call(&RemoteCall::read("describe_image", &image_ref), |done| {
                    ec2.describe_image(&image_ref, done)
                })
                .await?
            }
        };
        ctx.data.image = Some(image);
        Ok(AwsStage::NetworkContext)
    }

    async fn network_context(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        let requested = ctx.data.compute.property(PROP_SUBNET).map(str::to_string);

        let subnet = match self.ec2(ctx)? {
            None => Ec2Subnet {
                subnet_id: requested.unwrap_or_else(|| mock_resource_id("subnet")),
                vpc_id: mock_resource_id("vpc"),
                availability_zone: format!("{}a", ctx.data.region),
            },
            Some(ec2) => {
                let target = requested.clone().unwrap_or_else(|| "default".to_string());
                self.call(&RemoteCall::read("describe_subnet", target), |done| {
                    ec2.describe_subnet(requested.as_deref(), done)
                })
                .await?
            }
        };
        tracing::debug!(subnet = %subnet.subnet_id, vpc = %subnet.vpc_id, "network context");
        ctx.data.subnet = Some(subnet);
        Ok(AwsStage::SecurityGroup)
    }

    async fn security_group(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        if let Some(existing) = ctx.data.compute.property(PROP_SECURITY_GROUP) {
            ctx.data.security_group_id = Some(existing.to_string());
            return Ok(AwsStage::CreateInstance);
        }

        let vpc_id = ctx.data.subnet.as_ref().ok_or_else(|| missing("subnet"))?.vpc_id.clone();
        let name = format!("{}-sg", ctx.data.compute.name);

        let group_id = match self.ec2(ctx)? {
            None => mock_resource_id("sg"),
            Some(ec2) => {
                let request = SecurityGroupRequest {
                    name: name.clone(),
                    description: format!("stratus managed group for {}", ctx.data.compute.name),
                    vpc_id,
                };
                let group_id = self
                    .call(&RemoteCall::create("create_security_group", &name), |done| {
                        ec2.create_security_group(request.clone(), done)
                    })
                    .await?;

                let rules = vec![IngressRule::tcp(22, "0.0.0.0/0")];
                let authorized = self
                    .call_recoverable(&RemoteCall::action("authorize_ingress", &group_id), |done| {
                        ec2.authorize_ingress(&group_id, rules.clone(), done)
                    })
                    .await?;
                if authorized.is_none() {
                    tracing::debug!(group = %group_id, "ingress rules already present");
                }
                group_id
            }
        };
        ctx.add_sub_resource(SubResource::new("security_group", &group_id, &name));
        ctx.data.security_group_id = Some(group_id);
        Ok(AwsStage::CreateInstance)
    }

    async fn create_instance(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        let image = ctx.data.image.as_ref().ok_or_else(|| missing("image"))?;
        let subnet = ctx.data.subnet.as_ref().ok_or_else(|| missing("subnet"))?;
        let compute = &ctx.data.compute;
        let request = RunInstanceRequest {
            name: compute.name.clone(),
            image_id: image.image_id.clone(),
            instance_type: compute.instance_type.clone(),
            subnet_id: subnet.subnet_id.clone(),
            security_group_ids: ctx.data.security_group_id.iter().cloned().collect(),
            root_volume_size_gb: image.root_volume_size_gb,
        };

        let instance = match self.ec2(ctx)? {
            None => Ec2Instance {
                instance_id: mock_resource_id("i"),
                state: RUNNING.to_string(),
                private_ip: Some("172.31.0.10".to_string()),
                public_ip: Some("198.51.100.10".to_string()),
                root_volume_id: Some(mock_resource_id("vol")),
                network_interface_id: Some(mock_resource_id("eni")),
            },
            Some(ec2) => {
                self.call(&RemoteCall::create("run_instance", &request.name), |done| {
                    ec2.run_instance(request.clone(), done)
                })
                .await?
            }
        };
        tracing::info!(instance = %instance.instance_id, "instance launched");
        ctx.add_sub_resource(SubResource::new("instance", &instance.instance_id, &request.name));
        ctx.data.instance = Some(instance);
        Ok(AwsStage::AwaitRunning)
    }

    async fn await_running(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        let instance_id = ctx
            .data
            .instance
            .as_ref()
            .ok_or_else(|| missing("instance"))?
            .instance_id
            .clone();

        if let Some(ec2) = self.ec2(ctx)? {
            let target = SettleTarget::new(RUNNING)
                .failing_on(TERMINATED)
                .failing_on("shutting-down");
            self.await_instance(&ec2, &instance_id, target).await?;

            // Addresses are only assigned once the instance runs
            let refreshed = self
                .call(&RemoteCall::read("describe_instance", &instance_id), |done| {
                    ec2.describe_instance(&instance_id, done)
                })
                .await?;
            ctx.data.instance = Some(refreshed);
        }
        Ok(AwsStage::CreateVolumes)
    }

    async fn create_volumes(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        let data_disks: Vec<DiskState> = self
            .local_disks(&ctx.data.compute)
            .await?
            .into_iter()
            .filter(|disk| !disk.boot)
            .collect();
        if data_disks.is_empty() {
            return Ok(AwsStage::AttachVolumes);
        }
        let zone = ctx
            .data
            .subnet
            .as_ref()
            .ok_or_else(|| missing("subnet"))?
            .availability_zone
            .clone();
        let devices = (0..data_disks.len())
            .map(device_name)
            .collect::<crate::error::Result<Vec<_>>>()?;

        let volumes = match self.ec2(ctx)? {
            None => data_disks
                .iter()
                .map(|_| Ec2Volume {
                    volume_id: mock_resource_id("vol"),
                    state: "available".to_string(),
                })
                .collect(),
            Some(ec2) => {
                let calls: Vec<BatchCall<Ec2Volume>> = data_disks
                    .iter()
                    .map(|disk| {
                        let ec2 = ec2.clone();
                        let retry = self.retry.clone();
                        let gateway = self.gateway.clone();
                        let request = VolumeRequest {
                            name: disk.name.clone(),
                            size_gb: disk.capacity_gb,
                            availability_zone: zone.clone(),
                            volume_type: if disk.disk_type.is_empty() {
                                DEFAULT_VOLUME_TYPE.to_string()
                            } else {
                                disk.disk_type.clone()
                            },
                        };
                        async move {
                            let call = RemoteCall::create("create_volume", &request.name);
                            ec2_call(&retry, &gateway, &call, |done| {
                                ec2.create_volume(request.clone(), done)
                            })
                            .await
                        }
                        .boxed()
                    })
                    .collect();
                execute_batch("create_volumes", calls).await?
            }
        };

        for ((disk, volume), device) in data_disks.into_iter().zip(volumes).zip(devices) {
            ctx.add_sub_resource(SubResource::new("volume", &volume.volume_id, &disk.name));
            ctx.data.volumes.push(DataVolume {
                device,
                disk,
                volume,
            });
        }
        Ok(AwsStage::AttachVolumes)
    }

    async fn attach_volumes(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        let Some(ec2) = self.ec2(ctx)? else {
            return Ok(AwsStage::Records);
        };
        let instance_id = ctx
            .data
            .instance
            .as_ref()
            .ok_or_else(|| missing("instance"))?
            .instance_id
            .clone();

        for volume in &ctx.data.volumes {
            let volume_id = &volume.volume.volume_id;
            self.call(&RemoteCall::action("attach_volume", volume_id), |done| {
                ec2.attach_volume(volume_id, &instance_id, &volume.device, done)
            })
            .await?;
            tracing::debug!(volume = %volume_id, device = %volume.device, "volume attached");
        }
        Ok(AwsStage::Records)
    }

    async fn records(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        let instance = ctx.data.instance.clone().ok_or_else(|| missing("instance"))?;
        let compute = &ctx.data.compute;

        let boot_disk = self
            .local_disks(compute)
            .await?
            .into_iter()
            .find(|disk| disk.boot);
        let mut disks = vec![ProvisionedDisk {
            name: boot_disk
                .as_ref()
                .map(|disk| disk.name.clone())
                .unwrap_or_else(|| format!("{}-root", compute.name)),
            id: instance.root_volume_id.clone().unwrap_or_default(),
            capacity_gb: ctx.data.image.as_ref().map_or(0, |image| image.root_volume_size_gb),
            disk_type: Some(DEFAULT_VOLUME_TYPE.to_string()),
            boot: true,
        }];
        disks.extend(ctx.data.volumes.iter().map(|volume| ProvisionedDisk {
            name: volume.disk.name.clone(),
            id: volume.volume.volume_id.clone(),
            capacity_gb: volume.disk.capacity_gb,
            disk_type: Some(DEFAULT_VOLUME_TYPE.to_string()),
            boot: false,
        }));

        let provisioned = ProvisionedCompute {
            id: instance.instance_id.clone(),
            power_state: if instance.state == RUNNING {
                PowerState::On
            } else {
                PowerState::Unknown
            },
            address: instance.public_ip.clone().or_else(|| instance.private_ip.clone()),
            disks,
            interfaces: vec![ProvisionedInterface {
                name: format!("{}-eni0", compute.name),
                id: instance.network_interface_id.clone().unwrap_or_default(),
                device_index: 0,
                address: instance.private_ip.clone(),
                public_address: instance.public_ip.clone(),
                subnet_id: ctx.data.subnet.as_ref().map(|s| s.subnet_id.clone()),
                security_group_ids: ctx.data.security_group_id.iter().cloned().collect(),
            }],
        };

        self.reconciler
            .reconcile(&ctx.resource_reference, &provisioned)
            .await?;
        Ok(AwsStage::Finished)
    }

    async fn terminate(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        let instance_id = ctx.data.compute.id.clone();
        if instance_id.is_empty() {
            tracing::info!("no instance recorded, skipping termination");
            return Ok(AwsStage::CleanupDisks);
        }
        let Some(ec2) = self.ec2(ctx)? else {
            return Ok(AwsStage::CleanupDisks);
        };

        let terminated = self
            .call_recoverable(&RemoteCall::delete("terminate_instance", &instance_id), |done| {
                ec2.terminate_instance(&instance_id, done)
            })
            .await?;
        match terminated {
            Some(()) => Ok(AwsStage::AwaitTerminated),
            None => Ok(AwsStage::CleanupDisks),
        }
    }

    async fn await_terminated(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        let ec2 = ctx.client()?;
        let instance_id = ctx.data.compute.id.clone();
        self.await_instance(&ec2, &instance_id, SettleTarget::new(TERMINATED))
            .await?;
        Ok(AwsStage::CleanupDisks)
    }

    async fn cleanup_disks(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        let Some(ec2) = self.ec2(ctx)? else {
            return Ok(AwsStage::DeleteRecords);
        };
        let volumes: Vec<DiskState> = self
            .local_disks(&ctx.data.compute)
            .await?
            .into_iter()
            .filter(|disk| !disk.boot && !disk.id.is_empty())
            .collect();

        let calls: Vec<BatchCall<()>> = volumes
            .into_iter()
            .map(|disk| {
                let ec2 = ec2.clone();
                let retry = self.retry.clone();
                let gateway = self.gateway.clone();
                async move {
                    let volume_id = disk.id.as_str();
                    if disk.persistent {
                        let call = RemoteCall::action("detach_volume", volume_id);
                        ec2_call_recoverable(&retry, &gateway, &call, |done| {
                            ec2.detach_volume(volume_id, done)
                        })
                        .await?;
                    } else {
                        let call = RemoteCall::delete("delete_volume", volume_id);
                        ec2_call_recoverable(&retry, &gateway, &call, |done| {
                            ec2.delete_volume(volume_id, done)
                        })
                        .await?;
                    }
                    Ok::<(), CloudError>(())
                }
                .boxed()
            })
            .collect();
        execute_batch("cleanup_disks", calls).await?;
        Ok(AwsStage::DeleteRecords)
    }

    async fn delete_records(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        self.reconciler
            .reconcile_deleted(&ctx.resource_reference)
            .await?;
        Ok(AwsStage::Finished)
    }
}

#[async_trait]
impl Workflow for AwsWorkflow {
    type Stage = AwsStage;
    type Client = dyn Ec2AsyncClient;
    type Data = AwsData;

    fn name(&self) -> &str {
        "aws-instance"
    }

    fn classifier(&self) -> &ErrorClassifier {
        self.gateway.classifier()
    }

    async fn run_stage(&self, ctx: &mut AwsContext) -> Result<AwsStage> {
        match ctx.stage {
            AwsStage::ClientInit => self.client_init(ctx).await,
            AwsStage::ResolveImage => self.resolve_image(ctx).await,
            AwsStage::NetworkContext => self.network_context(ctx).await,
            AwsStage::SecurityGroup => self.security_group(ctx).await,
            AwsStage::CreateInstance => self.create_instance(ctx).await,
            AwsStage::AwaitRunning => self.await_running(ctx).await,
            AwsStage::CreateVolumes => self.create_volumes(ctx).await,
            AwsStage::AttachVolumes => self.attach_volumes(ctx).await,
            AwsStage::Records => self.records(ctx).await,
            AwsStage::Terminate => self.terminate(ctx).await,
            AwsStage::AwaitTerminated => self.await_terminated(ctx).await,
            AwsStage::CleanupDisks => self.cleanup_disks(ctx).await,
            AwsStage::DeleteRecords => self.delete_records(ctx).await,
            AwsStage::Finished | AwsStage::Error => Err(CloudError::InvalidTransition(format!(
                "{} is terminal",
                ctx.stage
            ))),
        }
    }
}
