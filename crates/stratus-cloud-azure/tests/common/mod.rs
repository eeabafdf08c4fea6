use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use stratus_cloud::documents::{COMPUTE_FACTORY, ComputeState, DISK_FACTORY, DiskState};
use stratus_cloud::{
    ClientCacheRegistry, ClientFactory, CloudError, Credentials, EngineConfig,
    InMemoryResourceStore, RecordingTracker, ResourceStoreExt, Result, StaticCredentialProvider,
};
use stratus_cloud_azure::api::{
    AzureDisk, AzureImage, AzureNic, AzureVm, ImageDataDisk, NicSpec, PublicIp,
    VirtualNetworkSpec, VmSpec,
};
use stratus_cloud_azure::{AzureApi, AzureProvider, AzureServices, MISSING_SUBSCRIPTION_REGISTRATION};

pub const AUTH_LINK: &str = "/auth/azure-sp";

/// In-memory Azure with failure injection
#[derive(Default)]
pub struct FakeAzureApi {
    calls: Mutex<Vec<String>>,
    queued_failures: Mutex<HashMap<&'static str, VecDeque<CloudError>>>,
    sticky_failures: Mutex<HashMap<&'static str, String>>,
    unregistered: Mutex<HashSet<String>>,
    registering: Mutex<HashSet<String>>,
    groups: Mutex<HashSet<String>>,
    storage_states: Mutex<VecDeque<String>>,
    image_data_disks: Mutex<Vec<ImageDataDisk>>,
    last_vm: Mutex<Option<VmSpec>>,
    vms: Mutex<HashSet<String>>,
}

#[allow(dead_code)]
impl FakeAzureApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call to `method` with `error`
    pub fn fail_once(self, method: &'static str, error: CloudError) -> Self {
        self.queued_failures
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(error);
        self
    }

    /// Fail every call to `method` with a provider error carrying `code`
    pub fn fail_always(self, method: &'static str, code: &str) -> Self {
        self.sticky_failures
            .lock()
            .unwrap()
            .insert(method, code.to_string());
        self
    }

    pub fn unregistered(self, namespace: &str) -> Self {
        self.unregistered.lock().unwrap().insert(namespace.to_string());
        self
    }

    pub fn existing_group(self, name: &str) -> Self {
        self.groups.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn storage_states(self, states: &[&str]) -> Self {
        *self.storage_states.lock().unwrap() = states.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn image_data_disk(self, lun: u32, size_gb: u64) -> Self {
        self.image_data_disks
            .lock()
            .unwrap()
            .push(ImageDataDisk { lun, size_gb });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| *c == method).count()
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.lock().unwrap().contains(name)
    }

    pub fn has_vm(&self, name: &str) -> bool {
        self.vms.lock().unwrap().contains(name)
    }

    pub fn last_vm(&self) -> Option<VmSpec> {
        self.last_vm.lock().unwrap().clone()
    }

    fn enter(&self, method: &'static str, namespace: &str) -> Result<()> {
        self.calls.lock().unwrap().push(method.to_string());

        if let Some(error) = self
            .queued_failures
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        if let Some(code) = self.sticky_failures.lock().unwrap().get(method) {
            return Err(CloudError::provider(code.clone(), format!("{} failed", method)));
        }
        if self.unregistered.lock().unwrap().contains(namespace) {
            return Err(CloudError::provider(
                MISSING_SUBSCRIPTION_REGISTRATION,
                format!(
                    "The subscription is not registered to use namespace '{}'.",
                    namespace
                ),
            ));
        }
        Ok(())
    }
}

fn arm_id(kind: &str, name: &str) -> String {
    format!("/subscriptions/0000/providers/{}/{}", kind, name)
}

#[async_trait]
impl AzureApi for FakeAzureApi {
    async fn create_resource_group(&self, name: &str, _location: &str) -> Result<String> {
        self.enter("create_resource_group", "Microsoft.Resources")?;
        if !self.groups.lock().unwrap().insert(name.to_string()) {
            return Err(CloudError::provider("Conflict", format!("{} exists", name)));
        }
        Ok(format!("/subscriptions/0000/resourceGroups/{}", name))
    }

    async fn delete_resource_group(&self, name: &str) -> Result<()> {
        self.enter("delete_resource_group", "Microsoft.Resources")?;
        if !self.groups.lock().unwrap().remove(name) {
            return Err(CloudError::provider(
                "ResourceGroupNotFound",
                format!("{} not found", name),
            ));
        }
        Ok(())
    }

    async fn resource_group_state(&self, name: &str) -> Result<String> {
        self.enter("resource_group_state", "Microsoft.Resources")?;
        if self.groups.lock().unwrap().contains(name) {
            Ok("Succeeded".to_string())
        } else {
            Err(CloudError::provider(
                "ResourceGroupNotFound",
                format!("{} not found", name),
            ))
        }
    }

    async fn create_availability_set(
        &self,
        _group: &str,
        name: &str,
        _location: &str,
    ) -> Result<String> {
        self.enter("create_availability_set", "Microsoft.Compute")?;
        Ok(arm_id("Microsoft.Compute/availabilitySets", name))
    }

    async fn resolve_image(&self, image_ref: &str, _location: &str) -> Result<AzureImage> {
        self.enter("resolve_image", "Microsoft.Compute")?;
        Ok(AzureImage {
            id: arm_id("Microsoft.Compute/images", image_ref),
            os_disk_size_gb: 30,
            data_disks: self.image_data_disks.lock().unwrap().clone(),
        })
    }

    async fn create_storage_account(
        &self,
        _group: &str,
        name: &str,
        _location: &str,
    ) -> Result<String> {
        self.enter("create_storage_account", "Microsoft.Storage")?;
        Ok(arm_id("Microsoft.Storage/storageAccounts", name))
    }

    async fn storage_account_state(&self, _group: &str, _name: &str) -> Result<String> {
        self.enter("storage_account_state", "Microsoft.Storage")?;
        Ok(self
            .storage_states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "Succeeded".to_string()))
    }

    async fn create_virtual_network(&self, spec: &VirtualNetworkSpec) -> Result<String> {
        self.enter("create_virtual_network", "Microsoft.Network")?;
        Ok(arm_id("Microsoft.Network/virtualNetworks", &spec.name))
    }

    async fn virtual_network_state(&self, _group: &str, _name: &str) -> Result<String> {
        self.enter("virtual_network_state", "Microsoft.Network")?;
        Ok("Succeeded".to_string())
    }

    async fn subnet_id(&self, _group: &str, network: &str, subnet: &str) -> Result<String> {
        self.enter("subnet_id", "Microsoft.Network")?;
        Ok(arm_id(
            "Microsoft.Network/virtualNetworks",
            &format!("{}/subnets/{}", network, subnet),
        ))
    }

    async fn create_public_ip(&self, _group: &str, name: &str, _location: &str) -> Result<PublicIp> {
        self.enter("create_public_ip", "Microsoft.Network")?;
        Ok(PublicIp {
            id: arm_id("Microsoft.Network/publicIPAddresses", name),
            address: Some("20.0.0.7".to_string()),
        })
    }

    async fn create_security_group(
        &self,
        _group: &str,
        name: &str,
        _location: &str,
    ) -> Result<String> {
        self.enter("create_security_group", "Microsoft.Network")?;
        Ok(arm_id("Microsoft.Network/networkSecurityGroups", name))
    }

    async fn create_network_interface(&self, spec: &NicSpec) -> Result<AzureNic> {
        self.enter("create_network_interface", "Microsoft.Network")?;
        Ok(AzureNic {
            id: arm_id("Microsoft.Network/networkInterfaces", &spec.name),
            private_address: Some("10.0.0.4".to_string()),
        })
    }

    async fn create_virtual_machine(&self, spec: &VmSpec) -> Result<AzureVm> {
        self.enter("create_virtual_machine", "Microsoft.Compute")?;
        *self.last_vm.lock().unwrap() = Some(spec.clone());
        self.vms.lock().unwrap().insert(spec.name.clone());

        let mut disks = vec![AzureDisk {
            name: spec.os_disk_name.clone(),
            id: arm_id("Microsoft.Compute/disks", &spec.os_disk_name),
            size_gb: 30,
            lun: None,
        }];
        for image_disk in self.image_data_disks.lock().unwrap().iter() {
            let name = format!("{}-lun{}", spec.name, image_disk.lun);
            disks.push(AzureDisk {
                id: arm_id("Microsoft.Compute/disks", &name),
                name,
                size_gb: image_disk.size_gb,
                lun: Some(image_disk.lun),
            });
        }
        for data_disk in &spec.data_disks {
            disks.push(AzureDisk {
                name: data_disk.name.clone(),
                id: arm_id("Microsoft.Compute/disks", &data_disk.name),
                size_gb: data_disk.size_gb,
                lun: Some(data_disk.lun),
            });
        }
        Ok(AzureVm {
            id: arm_id("Microsoft.Compute/virtualMachines", &spec.name),
            power_state: "PowerState/running".to_string(),
            disks,
        })
    }

    async fn delete_virtual_machine(&self, _group: &str, name: &str) -> Result<()> {
        self.enter("delete_virtual_machine", "Microsoft.Compute")?;
        if !self.vms.lock().unwrap().remove(name) {
            return Err(CloudError::provider(
                "ResourceNotFound",
                format!("virtual machine {} not found", name),
            ));
        }
        Ok(())
    }

    async fn register_provider(&self, namespace: &str) -> Result<()> {
        self.enter("register_provider", "")?;
        self.unregistered.lock().unwrap().remove(namespace);
        self.registering.lock().unwrap().insert(namespace.to_string());
        Ok(())
    }

    async fn provider_registration_state(&self, namespace: &str) -> Result<String> {
        self.enter("provider_registration_state", "")?;
        if self.unregistered.lock().unwrap().contains(namespace) {
            return Ok("NotRegistered".to_string());
        }
        // First poll after registering reports progress
        if self.registering.lock().unwrap().remove(namespace) {
            return Ok("Registering".to_string());
        }
        Ok("Registered".to_string())
    }
}

pub struct FakeAzureFactory {
    api: Arc<FakeAzureApi>,
    pub created: AtomicU32,
}

#[async_trait]
impl ClientFactory<dyn AzureApi> for FakeAzureFactory {
    async fn create(&self, _credentials: &Credentials) -> Result<Arc<dyn AzureApi>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let api: Arc<dyn AzureApi> = self.api.clone();
        Ok(api)
    }
}

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.backoff_ms = 10;
    config.poll.interval_ms = 100;
    config.poll.timeout_secs = 5;
    config
}

pub struct Harness {
    pub api: Arc<FakeAzureApi>,
    pub factory: Arc<FakeAzureFactory>,
    pub store: Arc<InMemoryResourceStore>,
    pub registry: Arc<ClientCacheRegistry>,
    pub tracker: Arc<RecordingTracker>,
    pub provider: AzureProvider,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(api: FakeAzureApi) -> Self {
        let config = test_config();
        let api = Arc::new(api);
        let factory = Arc::new(FakeAzureFactory {
            api: api.clone(),
            created: AtomicU32::new(0),
        });
        let store = Arc::new(InMemoryResourceStore::new());
        let registry = ClientCacheRegistry::new(config.client_cache.clone());
        let tracker = Arc::new(RecordingTracker::new());

        let services = AzureServices {
            store: store.clone(),
            credentials: Arc::new(
                StaticCredentialProvider::new()
                    .with(AUTH_LINK, Credentials::new("client-id", "client-secret")),
            ),
            registry: registry.clone(),
            api_factory: factory.clone(),
        };
        let provider = AzureProvider::new(services, tracker.clone(), &config);

        Self {
            api,
            factory,
            store,
            registry,
            tracker,
            provider,
        }
    }

    /// Store a compute record with a boot disk and one data disk
    pub async fn seed_compute(&self, name: &str) -> String {
        self.seed(ComputeState::new(name)).await
    }

    pub async fn seed(&self, compute: ComputeState) -> String {
        let name = compute.name.clone();
        let boot: DiskState = self
            .store
            .create_as(DISK_FACTORY, &DiskState::new(format!("{}-boot", name), 30).boot())
            .await
            .unwrap();
        let data: DiskState = self
            .store
            .create_as(DISK_FACTORY, &DiskState::new(format!("{}-data", name), 64))
            .await
            .unwrap();

        let compute = match compute.region {
            Some(_) => compute,
            None => compute.with_region("westeurope"),
        };
        let compute = compute
            .with_instance_type("Standard_B2s")
            .with_image("ubuntu-22.04")
            .with_auth(AUTH_LINK)
            .with_disk(boot.self_link)
            .with_disk(data.self_link);
        let created: ComputeState = self.store.create_as(COMPUTE_FACTORY, &compute).await.unwrap();
        created.self_link
    }
}
