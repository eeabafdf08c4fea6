//! Azure VM provisioning workflow

use crate::api::{
    AzureApi, AzureDisk, AzureImage, AzureNic, AzureVm, DataDiskSpec, NicSpec, PublicIp,
    VirtualNetworkSpec, VmSpec,
};
use crate::classifier::{azure_classifier, namespace_from_message};
use crate::error::AzureError;
use crate::naming::ResourceNames;
use async_trait::async_trait;
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use stratus_cloud::documents::{
    ComputeState, DiskState, PowerState, RESOURCE_GROUP_FACTORY, ResourceGroupState,
};
use stratus_cloud::{
    CallKind, ClientCacheRegistry, ClientFactory, CloudError, CredentialProvider, EngineConfig,
    ErrorClass, ErrorClassifier, Poller, ProvisionRequest, ProvisionedCompute, ProvisionedDisk,
    ProvisionedInterface, ProviderClient, ProvisioningContext, ProvisioningPhase, Reconciler,
    Recovery, RemoteCall, RemoteCallGateway, RequestType, ResourceStore, ResourceStoreExt, Result,
    RetryPolicy, SettleTarget, StageKind, SubResource, Workflow, WorkflowContext,
    mock_resource_id,
};

/// Client kind under which Azure clients are cached
pub const AZURE_CLIENT_KIND: &str = "azure-resource-manager";

/// Compute property naming a pre-existing resource group
pub const PROP_RESOURCE_GROUP: &str = "azure.resource_group";
/// Compute properties naming a pre-existing virtual network and subnet
pub const PROP_VIRTUAL_NETWORK: &str = "azure.virtual_network";
pub const PROP_SUBNET: &str = "azure.subnet";
/// Compute property linking the local record of a resource group this workflow created
pub const PROP_RESOURCE_GROUP_LINK: &str = "azure.resource_group_link";

const DEFAULT_ADDRESS_PREFIX: &str = "10.0.0.0/16";
const DEFAULT_SUBNET_PREFIX: &str = "10.0.0.0/24";
const SUCCEEDED: &str = "Succeeded";
const FAILED: &str = "Failed";
const DELETED: &str = "Deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AzureStage {
    ClientInit,
    ResourceGroup,
    AvailabilitySet,
    Image,
    Storage,
    NetworkContext,
    CreateNetwork,
    PublicIp,
    SecurityGroup,
    Nic,
    Vm,
    Records,
    Delete,
    Finished,
    Error,
}

impl AzureStage {
    /// Resource provider namespace the stage's calls belong to
    fn namespace(&self) -> &'static str {
        match self {
            AzureStage::ResourceGroup | AzureStage::Delete => "Microsoft.Resources",
            AzureStage::Storage => "Microsoft.Storage",
            AzureStage::NetworkContext
            | AzureStage::CreateNetwork
            | AzureStage::PublicIp
            | AzureStage::SecurityGroup
            | AzureStage::Nic => "Microsoft.Network",
            _ => "Microsoft.Compute",
        }
    }
}

impl fmt::Display for AzureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AzureStage::ClientInit => "CLIENT_INIT",
            AzureStage::ResourceGroup => "RESOURCE_GROUP",
            AzureStage::AvailabilitySet => "AVAILABILITY_SET",
            AzureStage::Image => "IMAGE",
            AzureStage::Storage => "STORAGE",
            AzureStage::NetworkContext => "NETWORK_CONTEXT",
            AzureStage::CreateNetwork => "CREATE_NETWORK",
            AzureStage::PublicIp => "PUBLIC_IP",
            AzureStage::SecurityGroup => "SECURITY_GROUP",
            AzureStage::Nic => "NIC",
            AzureStage::Vm => "VM",
            AzureStage::Records => "RECORDS",
            AzureStage::Delete => "DELETE",
            AzureStage::Finished => "FINISHED",
            AzureStage::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

impl StageKind for AzureStage {
    const FINISHED: Self = AzureStage::Finished;
    const ERROR: Self = AzureStage::Error;

    fn phase(&self) -> ProvisioningPhase {
        match self {
            AzureStage::ClientInit => ProvisioningPhase::Init,
            AzureStage::ResourceGroup | AzureStage::AvailabilitySet | AzureStage::Storage => {
                ProvisioningPhase::AcquirePrerequisiteGroup
            }
            AzureStage::Image => ProvisioningPhase::ResolveDependencies,
            AzureStage::NetworkContext => ProvisioningPhase::AcquireNetworkContext,
            AzureStage::CreateNetwork
            | AzureStage::PublicIp
            | AzureStage::SecurityGroup
            | AzureStage::Nic => ProvisioningPhase::CreateNetworkResources,
            AzureStage::Vm => ProvisioningPhase::CreatePrimaryResource,
            AzureStage::Records => ProvisioningPhase::ReconcileLocalState,
            AzureStage::Delete => ProvisioningPhase::Delete,
            AzureStage::Finished => ProvisioningPhase::Finished,
            AzureStage::Error => ProvisioningPhase::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPlan {
    pub network: String,
    pub subnet: String,
    /// Whether this workflow creates the network or reuses an existing one
    pub create: bool,
}

/// Workflow scratch state
#[derive(Debug, Default)]
pub struct AzureData {
    pub compute: ComputeState,
    pub names: Option<ResourceNames>,
    pub location: String,
    pub group: String,
    pub availability_set_id: Option<String>,
    pub image: Option<AzureImage>,
    pub storage_account: Option<String>,
    pub network: Option<NetworkPlan>,
    pub subnet_id: Option<String>,
    pub public_ip: Option<PublicIp>,
    pub security_group_id: Option<String>,
    pub nic: Option<AzureNic>,
    pub vm: Option<AzureVm>,
    pub registered_namespaces: Vec<String>,
}

impl AzureData {
    fn names(&self) -> Result<&ResourceNames> {
        self.names
            .as_ref()
            .ok_or_else(|| CloudError::InvalidTransition("resource names not resolved".into()))
    }
}

fn missing(what: &str) -> CloudError {
    CloudError::InvalidTransition(format!("{} not available at this stage", what))
}

pub type AzureContext = WorkflowContext<AzureWorkflow>;

/// Collaborators the Azure workflow needs
#[derive(Clone)]
pub struct AzureServices {
    pub store: Arc<dyn ResourceStore>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub registry: Arc<ClientCacheRegistry>,
    pub api_factory: Arc<dyn ClientFactory<dyn AzureApi>>,
}

pub struct AzureWorkflow {
    services: AzureServices,
    reconciler: Reconciler,
    classifier: Arc<ErrorClassifier>,
    gateway: RemoteCallGateway,
    retry: RetryPolicy,
    poller: Poller,
    default_location: String,
}

impl AzureWorkflow {
    pub fn new(services: AzureServices, config: &EngineConfig) -> Self {
        let classifier = Arc::new(azure_classifier());
        Self {
            reconciler: Reconciler::new(services.store.clone()),
            gateway: RemoteCallGateway::new(classifier.clone()),
            classifier,
            retry: RetryPolicy::from(&config.retry),
            poller: Poller::from(&config.poll),
            default_location: "eastus".to_string(),
            services,
        }
    }

    pub fn with_default_location(mut self, location: impl Into<String>) -> Self {
        self.default_location = location.into();
        self
    }

    pub fn services(&self) -> &AzureServices {
        &self.services
    }

    pub fn default_location(&self) -> &str {
        &self.default_location
    }

    pub fn new_context(&self, request: &ProvisionRequest) -> AzureContext {
        ProvisioningContext::new(
            self.name(),
            request.request_type,
            AzureStage::ClientInit,
            request.resource_reference.clone(),
            AzureData::default(),
        )
        .mock(request.is_mock)
    }

    fn api(&self, ctx: &AzureContext) -> Result<Option<Arc<dyn AzureApi>>> {
        if ctx.is_mock {
            Ok(None)
        } else {
            ctx.client().map(Some)
        }
    }

    async fn call<T, F, Fut>(&self, call: &RemoteCall, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry
            .execute(&self.classifier, call.kind, || self.gateway.invoke(call, op()))
            .await
    }

    async fn call_recoverable<T, F, Fut>(&self, call: &RemoteCall, op: F) -> Result<Option<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry
            .execute(&self.classifier, call.kind, || {
                self.gateway.invoke_recoverable(call, op())
            })
            .await
    }

    /// Poll a long-running resource until its provisioning state is `Succeeded`
    async fn settle<F, Fut>(&self, resource: &str, query: F) -> Result<String>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let call = RemoteCall::read("provisioning_state", resource);
        self.poller
            .await_state(
                resource,
                &SettleTarget::new(SUCCEEDED).failing_on(FAILED),
                self.poller.deadline(),
                || self.call(&call, &query),
            )
            .await
    }

    async fn client_init(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        let compute: ComputeState = self
            .services
            .store
            .get_as(&ctx.resource_reference)
            .await?;
        ctx.data.location = compute
            .region
            .clone()
            .unwrap_or_else(|| self.default_location.clone());
        if ctx.data.location.trim().is_empty() {
            return Err(AzureError::InvalidLocation(format!(
                "{} resolves to an empty location",
                ctx.resource_reference
            ))
            .into());
        }
        ctx.data.names = Some(ResourceNames::for_compute(&compute.name)?);

        if !ctx.is_mock {
            let credentials = self
                .services
                .credentials
                .resolve(&compute.auth_credentials_link)
                .await?;
            let credentials = match credentials.region {
                Some(_) => credentials,
                None => credentials.with_region(ctx.data.location.clone()),
            };
            let factory = self.services.api_factory.clone();
            let client = ProviderClient::acquire(
                &self.services.registry,
                AZURE_CLIENT_KIND,
                move || factory,
                &credentials,
            )
            .await?;
            ctx.provider_client = Some(client);
        }
        ctx.data.compute = compute;

        match ctx.request_type {
            RequestType::Create => Ok(AzureStage::ResourceGroup),
            RequestType::Delete => Ok(AzureStage::Delete),
            other => Err(CloudError::InvalidConfig(format!(
                "azure instance workflow does not handle {} requests",
                other
            ))),
        }
    }

    async fn resource_group(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        if let Some(existing) = ctx.data.compute.property(PROP_RESOURCE_GROUP) {
            tracing::info!(group = existing, "using existing resource group");
            ctx.data.group = existing.to_string();
            return Ok(AzureStage::AvailabilitySet);
        }

        let group = ctx.data.names()?.group.clone();
        let location = ctx.data.location.clone();
        let created = match self.api(ctx)? {
            None => Some(mock_resource_id("rg")),
            Some(api) => {
                self.call_recoverable(
                    &RemoteCall::create("create_resource_group", &group),
                    || api.create_resource_group(&group, &location),
                )
                .await?
            }
        };

        match created {
            Some(id) => ctx.add_sub_resource(SubResource::container("resource_group", id, &group)),
            None => tracing::info!(group = %group, "resource group already exists, not taking ownership"),
        }
        ctx.data.group = group;
        Ok(AzureStage::AvailabilitySet)
    }

    async fn availability_set(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        let name = ctx.data.names()?.availability_set.clone();
        let group = ctx.data.group.clone();
        let location = ctx.data.location.clone();

        let id = match self.api(ctx)? {
            None => Some(mock_resource_id("avset")),
            Some(api) => {
                self.call_recoverable(
                    &RemoteCall::create("create_availability_set", &name),
                    || api.create_availability_set(&group, &name, &location),
                )
                .await?
            }
        };
        if let Some(id) = &id {
            ctx.add_sub_resource(SubResource::new("availability_set", id, &name));
        }
        ctx.data.availability_set_id = id;
        Ok(AzureStage::Image)
    }

    async fn image(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        let image_ref = ctx.data.compute.image_ref.clone();
        if image_ref.is_empty() {
            return Err(CloudError::InvalidConfig(format!(
                "{} has no image reference",
                ctx.resource_reference
            )));
        }
        let location = ctx.data.location.clone();

        let image = match self.api(ctx)? {
            None => AzureImage {
                id: image_ref.clone(),
                os_disk_size_gb: 30,
                data_disks: Vec::new(),
            },
            Some(api) => {
                self.call(&RemoteCall::read("resolve_image", &image_ref), || {
                    api.resolve_image(&image_ref, &location)
                })
                .await?
            }
        };
        tracing::debug!(image = %image.id, data_disks = image.data_disks.len(), "resolved image");
        ctx.data.image = Some(image);
        Ok(AzureStage::Storage)
    }

    async fn storage(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        let name = ctx.data.names()?.storage_account.clone();
        let group = ctx.data.group.clone();
        let location = ctx.data.location.clone();

        if let Some(api) = self.api(ctx)? {
            let created = self
                .call_recoverable(
                    &RemoteCall::create("create_storage_account", &name),
                    || api.create_storage_account(&group, &name, &location),
                )
                .await?;
            if let Some(id) = created {
                ctx.add_sub_resource(SubResource::new("storage_account", id, &name));
            }
            self.settle(&name, || api.storage_account_state(&group, &name))
                .await?;
        }
        ctx.data.storage_account = Some(name);
        Ok(AzureStage::NetworkContext)
    }

    async fn network_context(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        let compute = &ctx.data.compute;
        let plan = match (
            compute.property(PROP_VIRTUAL_NETWORK),
            compute.property(PROP_SUBNET),
        ) {
            (Some(network), Some(subnet)) => NetworkPlan {
                network: network.to_string(),
                subnet: subnet.to_string(),
                create: false,
            },
            _ => {
                let names = ctx.data.names()?;
                NetworkPlan {
                    network: names.network.clone(),
                    subnet: names.subnet.clone(),
                    create: true,
                }
            }
        };
        tracing::debug!(network = %plan.network, subnet = %plan.subnet, create = plan.create, "network context");
        ctx.data.network = Some(plan);
        Ok(AzureStage::CreateNetwork)
    }

    async fn create_network(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        let plan = ctx.data.network.clone().ok_or_else(|| missing("network plan"))?;
        let group = ctx.data.group.clone();

        let subnet_id = match self.api(ctx)? {
            None => mock_resource_id("subnet"),
            Some(api) => {
                if plan.create {
                    let spec = VirtualNetworkSpec {
                        group: group.clone(),
                        name: plan.network.clone(),
                        location: ctx.data.location.clone(),
                        address_prefix: DEFAULT_ADDRESS_PREFIX.to_string(),
                        subnet_name: plan.subnet.clone(),
                        subnet_prefix: DEFAULT_SUBNET_PREFIX.to_string(),
                    };
                    let created = self
                        .call_recoverable(
                            &RemoteCall::create("create_virtual_network", &plan.network),
                            || api.create_virtual_network(&spec),
                        )
                        .await?;
                    if let Some(id) = created {
                        ctx.add_sub_resource(SubResource::new("virtual_network", id, &plan.network));
                    }
                    self.settle(&plan.network, || {
                        api.virtual_network_state(&group, &plan.network)
                    })
                    .await?;
                }
                self.call(&RemoteCall::read("get_subnet", &plan.subnet), || {
                    api.subnet_id(&group, &plan.network, &plan.subnet)
                })
                .await?
            }
        };
        ctx.data.subnet_id = Some(subnet_id);
        Ok(AzureStage::PublicIp)
    }

    async fn public_ip(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        let name = ctx.data.names()?.public_ip.clone();
        let group = ctx.data.group.clone();
        let location = ctx.data.location.clone();

        let ip = match self.api(ctx)? {
            None => PublicIp {
                id: mock_resource_id("pip"),
                address: Some("203.0.113.10".to_string()),
            },
            Some(api) => {
                self.call(&RemoteCall::create("create_public_ip", &name), || {
                    api.create_public_ip(&group, &name, &location)
                })
                .await?
            }
        };
        ctx.add_sub_resource(SubResource::new("public_ip", &ip.id, &name));
        ctx.data.public_ip = Some(ip);
        Ok(AzureStage::SecurityGroup)
    }

    async fn security_group(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        let name = ctx.data.names()?.security_group.clone();
        let group = ctx.data.group.clone();
        let location = ctx.data.location.clone();

        let id = match self.api(ctx)? {
            None => Some(mock_resource_id("nsg")),
            Some(api) => {
                self.call_recoverable(
                    &RemoteCall::create("create_security_group", &name),
                    || api.create_security_group(&group, &name, &location),
                )
                .await?
            }
        };
        if let Some(id) = &id {
            ctx.add_sub_resource(SubResource::new("security_group", id, &name));
        }
        ctx.data.security_group_id = id;
        Ok(AzureStage::Nic)
    }

    async fn nic(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        let spec = NicSpec {
            group: ctx.data.group.clone(),
            name: ctx.data.names()?.nic.clone(),
            location: ctx.data.location.clone(),
            subnet_id: ctx.data.subnet_id.clone().ok_or_else(|| missing("subnet"))?,
            public_ip_id: ctx.data.public_ip.as_ref().map(|ip| ip.id.clone()),
            security_group_id: ctx.data.security_group_id.clone(),
        };

        let nic = match self.api(ctx)? {
            None => AzureNic {
                id: mock_resource_id("nic"),
                private_address: Some("10.0.0.4".to_string()),
            },
            Some(api) => {
                self.call(&RemoteCall::create("create_network_interface", &spec.name), || {
                    api.create_network_interface(&spec)
                })
                .await?
            }
        };
        ctx.add_sub_resource(SubResource::new("network_interface", &nic.id, &spec.name));
        ctx.data.nic = Some(nic);
        Ok(AzureStage::Vm)
    }

    async fn vm(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        let image = ctx.data.image.clone().ok_or_else(|| missing("image"))?;
        let nic = ctx.data.nic.clone().ok_or_else(|| missing("network interface"))?;

        let mut boot_disk = None;
        let mut local_data_disks = Vec::new();
        for link in &ctx.data.compute.disk_links {
            let disk: DiskState = self.services.store.get_as(link).await?;
            if disk.boot {
                boot_disk = Some(disk);
            } else {
                local_data_disks.push(disk);
            }
        }

        let first_free_lun = image
            .data_disks
            .iter()
            .map(|d| d.lun + 1)
            .max()
            .unwrap_or(0);
        let compute = &ctx.data.compute;
        let spec = VmSpec {
            group: ctx.data.group.clone(),
            name: compute.name.clone(),
            location: ctx.data.location.clone(),
            size: compute.instance_type.clone(),
            image_id: image.id.clone(),
            nic_id: nic.id.clone(),
            os_disk_name: boot_disk
                .map(|disk| disk.name)
                .unwrap_or_else(|| format!("{}-osdisk", compute.name)),
            availability_set_id: ctx.data.availability_set_id.clone(),
            storage_account: ctx.data.storage_account.clone(),
            data_disks: local_data_disks
                .iter()
                .zip(first_free_lun..)
                .map(|(disk, lun)| DataDiskSpec {
                    name: disk.name.clone(),
                    size_gb: disk.capacity_gb,
                    lun,
                })
                .collect(),
        };

        let vm = match self.api(ctx)? {
            None => mock_vm(&spec, &image),
            Some(api) => {
                self.call(&RemoteCall::create("create_virtual_machine", &spec.name), || {
                    api.create_virtual_machine(&spec)
                })
                .await?
            }
        };
        tracing::info!(vm = %vm.id, disks = vm.disks.len(), "virtual machine created");
        ctx.add_sub_resource(SubResource::new("virtual_machine", &vm.id, &spec.name));
        ctx.data.vm = Some(vm);
        Ok(AzureStage::Records)
    }

    async fn records(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        let vm = ctx.data.vm.clone().ok_or_else(|| missing("virtual machine"))?;
        let nic = ctx.data.nic.clone().ok_or_else(|| missing("network interface"))?;
        let names = ctx.data.names()?.clone();

        let mut properties = json!({PROP_RESOURCE_GROUP: ctx.data.group});
        if let Some(container) = ctx.container() {
            let record: ResourceGroupState = self
                .services
                .store
                .create_as(
                    RESOURCE_GROUP_FACTORY,
                    &ResourceGroupState {
                        name: container.name.clone(),
                        id: container.id.clone(),
                        region: Some(ctx.data.location.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            properties[PROP_RESOURCE_GROUP_LINK] = json!(record.self_link);
        }
        self.services
            .store
            .patch(
                &ctx.resource_reference,
                json!({"custom_properties": properties}),
            )
            .await?;

        let public_address = ctx.data.public_ip.as_ref().and_then(|ip| ip.address.clone());
        let provisioned = ProvisionedCompute {
            id: vm.id.clone(),
            power_state: power_state(&vm.power_state),
            address: public_address.clone().or_else(|| nic.private_address.clone()),
            disks: vm.disks.iter().map(provisioned_disk).collect(),
            interfaces: vec![ProvisionedInterface {
                name: names.nic.clone(),
                id: nic.id.clone(),
                device_index: 0,
                address: nic.private_address.clone(),
                public_address,
                subnet_id: ctx.data.subnet_id.clone(),
                security_group_ids: ctx.data.security_group_id.iter().cloned().collect(),
            }],
        };

        self.reconciler
            .reconcile(&ctx.resource_reference, &provisioned)
            .await?;
        Ok(AzureStage::Finished)
    }

    async fn delete(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        let group = match ctx.data.compute.property(PROP_RESOURCE_GROUP) {
            Some(group) => group.to_string(),
            None => ctx.data.names()?.group.clone(),
        };
        let owns_group = ctx
            .data
            .compute
            .property(PROP_RESOURCE_GROUP_LINK)
            .is_some();

        if let Some(api) = self.api(ctx)? {
            if owns_group {
                self.delete_group(&api, &group).await?;
            } else {
                let vm = ctx.data.compute.name.clone();
                tracing::info!(group = %group, vm = %vm, "resource group not owned, deleting only the virtual machine");
                self.call_recoverable(&RemoteCall::delete("delete_virtual_machine", &vm), || {
                    api.delete_virtual_machine(&group, &vm)
                })
                .await?;
            }
        }

        if let Some(link) = ctx.data.compute.property(PROP_RESOURCE_GROUP_LINK) {
            match self.services.store.delete(link).await {
                Ok(()) | Err(CloudError::ResourceNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.reconciler
            .reconcile_deleted(&ctx.resource_reference)
            .await?;
        Ok(AzureStage::Finished)
    }

    /// Delete a resource group and wait until Azure no longer reports it
    async fn delete_group(&self, api: &Arc<dyn AzureApi>, group: &str) -> Result<()> {
        let deleted = self
            .call_recoverable(&RemoteCall::delete("delete_resource_group", group), || {
                api.delete_resource_group(group)
            })
            .await?;
        if deleted.is_none() {
            return Ok(());
        }

        let query = move || async move {
            match api.resource_group_state(group).await {
                Err(e) if is_not_found(&e) => Ok(DELETED.to_string()),
                other => other,
            }
        };
        self.poller
            .await_state(group, &SettleTarget::new(DELETED), self.poller.deadline(), query)
            .await?;
        Ok(())
    }

    /// Register a resource provider namespace and wait until Azure reports it registered
    async fn register_namespace(
        &self,
        ctx: &AzureContext,
        namespace: &str,
    ) -> std::result::Result<(), AzureError> {
        let registration_failed = |e: CloudError| AzureError::RegistrationFailed {
            namespace: namespace.to_string(),
            reason: e.to_string(),
        };
        let api = ctx.client()?;
        tracing::info!(namespace, "registering resource provider");
        self.call(&RemoteCall::action("register_provider", namespace), || {
            api.register_provider(namespace)
        })
        .await
        .map_err(registration_failed)?;

        let (api, call) = (&api, &RemoteCall::read("provider_registration_state", namespace));
        self.poller
            .await_state(
                namespace,
                &SettleTarget::new("Registered"),
                self.poller.deadline(),
                move || self.call(call, move || api.provider_registration_state(namespace)),
            )
            .await
            .map_err(registration_failed)?;
        Ok(())
    }
}

fn is_not_found(error: &CloudError) -> bool {
    matches!(error, CloudError::ResourceNotFound(_))
        || matches!(error.code(), Some("ResourceGroupNotFound" | "ResourceNotFound"))
}

fn power_state(code: &str) -> PowerState {
    match code.rsplit('/').next().unwrap_or(code) {
        "running" | "starting" => PowerState::On,
        "stopped" | "deallocated" | "deallocating" | "stopping" => PowerState::Off,
        _ => PowerState::Unknown,
    }
}

fn provisioned_disk(disk: &AzureDisk) -> ProvisionedDisk {
    ProvisionedDisk {
        name: disk.name.clone(),
        id: disk.id.clone(),
        capacity_gb: disk.size_gb,
        disk_type: Some("managed".to_string()),
        boot: disk.lun.is_none(),
    }
}

fn mock_vm(spec: &VmSpec, image: &AzureImage) -> AzureVm {
    let mut disks = vec![AzureDisk {
        name: spec.os_disk_name.clone(),
        id: mock_resource_id("disk"),
        size_gb: image.os_disk_size_gb,
        lun: None,
    }];
    disks.extend(image.data_disks.iter().map(|d| AzureDisk {
        name: format!("{}-image-data-{}", spec.name, d.lun),
        id: mock_resource_id("disk"),
        size_gb: d.size_gb,
        lun: Some(d.lun),
    }));
    disks.extend(spec.data_disks.iter().map(|d| AzureDisk {
        name: d.name.clone(),
        id: mock_resource_id("disk"),
        size_gb: d.size_gb,
        lun: Some(d.lun),
    }));
    AzureVm {
        id: mock_resource_id("vm"),
        power_state: "PowerState/running".to_string(),
        disks,
    }
}

#[async_trait]
impl Workflow for AzureWorkflow {
    type Stage = AzureStage;
    type Client = dyn AzureApi;
    type Data = AzureData;

    fn name(&self) -> &str {
        "azure-instance"
    }

    fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    async fn run_stage(&self, ctx: &mut AzureContext) -> Result<AzureStage> {
        match ctx.stage {
            AzureStage::ClientInit => self.client_init(ctx).await,
            AzureStage::ResourceGroup => self.resource_group(ctx).await,
            AzureStage::AvailabilitySet => self.availability_set(ctx).await,
            AzureStage::Image => self.image(ctx).await,
            AzureStage::Storage => self.storage(ctx).await,
            AzureStage::NetworkContext => self.network_context(ctx).await,
            AzureStage::CreateNetwork => self.create_network(ctx).await,
            AzureStage::PublicIp => self.public_ip(ctx).await,
            AzureStage::SecurityGroup => self.security_group(ctx).await,
            AzureStage::Nic => self.nic(ctx).await,
            AzureStage::Vm => self.vm(ctx).await,
            AzureStage::Records => self.records(ctx).await,
            AzureStage::Delete => self.delete(ctx).await,
            AzureStage::Finished | AzureStage::Error => Err(CloudError::InvalidTransition(
                format!("{} is terminal", ctx.stage),
            )),
        }
    }

    async fn recover(&self, ctx: &mut AzureContext, error: &CloudError) -> Recovery<AzureStage> {
        if self.classifier.classify(error, CallKind::Action) != ErrorClass::RegistrationRequired {
            return Recovery::Escalate;
        }

        let namespace = match error {
            CloudError::Provider { message, .. } => namespace_from_message(message),
            _ => None,
        }
        .unwrap_or_else(|| ctx.stage.namespace())
        .to_string();

        if ctx.data.registered_namespaces.contains(&namespace) {
            tracing::warn!(namespace = %namespace, "namespace already registered by this workflow");
            return Recovery::Escalate;
        }

        match self.register_namespace(ctx, &namespace).await {
            Ok(()) => {
                ctx.data.registered_namespaces.push(namespace);
                Recovery::Resume
            }
            Err(e) => {
                tracing::warn!(namespace = %namespace, error = %e, "resource provider registration failed");
                Recovery::Escalate
            }
        }
    }

    async fn rollback(&self, ctx: &mut AzureContext) -> Result<()> {
        let Some(container) = ctx.container().cloned() else {
            return Ok(());
        };
        let Some(api) = self.api(ctx)? else {
            tracing::info!(group = %container.name, "mock rollback of resource group");
            return Ok(());
        };

        tracing::info!(group = %container.name, "deleting resource group");
        self.call_recoverable(
            &RemoteCall::delete("delete_resource_group", &container.name),
            || api.delete_resource_group(&container.name),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_codes() {
        assert_eq!(power_state("PowerState/running"), PowerState::On);
        assert_eq!(power_state("PowerState/deallocated"), PowerState::Off);
        assert_eq!(power_state("weird"), PowerState::Unknown);
    }

    #[test]
    fn test_every_stage_has_a_phase() {
        assert_eq!(AzureStage::Nic.phase(), ProvisioningPhase::CreateNetworkResources);
        assert_eq!(AzureStage::Vm.phase(), ProvisioningPhase::CreatePrimaryResource);
        assert!(AzureStage::Error.is_terminal());
        assert!(!AzureStage::Delete.is_terminal());
        assert_eq!(AzureStage::CreateNetwork.to_string(), "CREATE_NETWORK");
    }

    #[test]
    fn test_mock_vm_includes_image_disks() {
        let spec = VmSpec {
            group: "web-rg".into(),
            name: "web".into(),
            location: "eastus".into(),
            size: "Standard_B2s".into(),
            image_id: "img".into(),
            nic_id: "nic".into(),
            os_disk_name: "web-osdisk".into(),
            availability_set_id: None,
            storage_account: None,
            data_disks: vec![DataDiskSpec {
                name: "data".into(),
                size_gb: 20,
                lun: 1,
            }],
        };
        let image = AzureImage {
            id: "img".into(),
            os_disk_size_gb: 30,
            data_disks: vec![crate::api::ImageDataDisk { lun: 0, size_gb: 8 }],
        };

        let vm = mock_vm(&spec, &image);
        assert_eq!(vm.disks.len(), 3);
        assert_eq!(vm.disks[0].lun, None);
        assert_eq!(vm.disks[1].name, "web-image-data-0");
    }
}
