use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use stratus_cloud::documents::{COMPUTE_FACTORY, ComputeState, DISK_FACTORY, DiskState};
use stratus_cloud::{
    ClientCacheRegistry, ClientFactory, CloudError, Completion, Credentials, EngineConfig,
    InMemoryResourceStore, RecordingTracker, ResourceStoreExt, Result, StaticCredentialProvider,
};
use stratus_cloud_aws::api::{
    Ec2Image, Ec2Instance, Ec2Subnet, Ec2Volume, IngressRule, RunInstanceRequest,
    SecurityGroupRequest, VolumeRequest,
};
use stratus_cloud_aws::{AwsProvider, AwsServices, Ec2AsyncClient};

pub const AUTH_LINK: &str = "/auth/aws-key";

/// In-memory EC2 completing every callback from a spawned task
#[derive(Default)]
pub struct FakeEc2 {
    calls: Mutex<Vec<String>>,
    queued_failures: Mutex<HashMap<&'static str, VecDeque<CloudError>>>,
    dropped: Mutex<HashSet<&'static str>>,
    pending_polls: AtomicU32,
    next_id: AtomicU32,
    instances: Mutex<HashMap<String, String>>,
    volumes: Mutex<HashMap<String, String>>,
    attachments: Mutex<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl FakeEc2 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_once(self, method: &'static str, error: CloudError) -> Self {
        self.queued_failures
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(error);
        self
    }

    /// Drop the completion of every call to `method` without signalling it
    pub fn drop_callbacks(self, method: &'static str) -> Self {
        self.dropped.lock().unwrap().insert(method);
        self
    }

    /// Number of `pending` replies before a new instance reports `running`
    pub fn pending_polls(self, polls: u32) -> Self {
        self.pending_polls.store(polls, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| *c == method).count()
    }

    pub fn attachments(&self) -> Vec<(String, String)> {
        self.attachments.lock().unwrap().clone()
    }

    pub fn volume_state(&self, volume_id: &str) -> Option<String> {
        self.volumes.lock().unwrap().get(volume_id).cloned()
    }

    pub fn forget_instance(&self, instance_id: &str) {
        self.instances.lock().unwrap().remove(instance_id);
    }

    pub fn delete_volume_out_of_band(&self, volume_id: &str) {
        self.volumes.lock().unwrap().remove(volume_id);
    }

    pub fn set_instance_state(&self, instance_id: &str, state: &str) {
        self.instances
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), state.to_string());
    }

    fn id(&self, prefix: &str) -> String {
        format!("{}-{:08x}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Record the call, apply injected failures, and complete `done` asynchronously
    fn respond<T, F>(&self, method: &'static str, done: Completion<T>, handler: F)
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T>,
    {
        self.calls.lock().unwrap().push(method.to_string());
        if self.dropped.lock().unwrap().contains(method) {
            drop(done);
            return;
        }

        let injected = self
            .queued_failures
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        let result = match injected {
            Some(error) => Err(error),
            None => handler(),
        };
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            done.complete(result);
        });
    }

    fn instance(&self, instance_id: &str) -> Result<Ec2Instance> {
        let state = self
            .instances
            .lock()
            .unwrap()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| {
                CloudError::provider(
                    "InvalidInstanceID.NotFound",
                    format!("{} does not exist", instance_id),
                )
            })?;
        let running = state == "running";
        Ok(Ec2Instance {
            instance_id: instance_id.to_string(),
            state,
            private_ip: Some("172.31.5.9".to_string()),
            public_ip: running.then(|| "54.0.0.12".to_string()),
            root_volume_id: Some(format!("{}-root", instance_id)),
            network_interface_id: Some(format!("{}-eni", instance_id)),
        })
    }
}

impl Ec2AsyncClient for FakeEc2 {
    fn describe_image(&self, image_id: &str, done: Completion<Ec2Image>) {
        self.respond("describe_image", done, || {
            Ok(Ec2Image {
                image_id: image_id.to_string(),
                root_device_name: "/dev/xvda".to_string(),
                root_volume_size_gb: 16,
            })
        });
    }

    fn describe_subnet(&self, subnet_id: Option<&str>, done: Completion<Ec2Subnet>) {
        self.respond("describe_subnet", done, || {
            Ok(Ec2Subnet {
                subnet_id: subnet_id.unwrap_or("subnet-default").to_string(),
                vpc_id: "vpc-1".to_string(),
                availability_zone: "us-west-2a".to_string(),
            })
        });
    }

    fn create_security_group(&self, _request: SecurityGroupRequest, done: Completion<String>) {
        let id = self.id("sg");
        self.respond("create_security_group", done, || Ok(id));
    }

    fn authorize_ingress(&self, _group_id: &str, _rules: Vec<IngressRule>, done: Completion<()>) {
        self.respond("authorize_ingress", done, || Ok(()));
    }

    fn run_instance(&self, _request: RunInstanceRequest, done: Completion<Ec2Instance>) {
        let id = self.id("i");
        self.respond("run_instance", done, || {
            self.set_instance_state(&id, "pending");
            self.instance(&id)
        });
    }

    fn describe_instance(&self, instance_id: &str, done: Completion<Ec2Instance>) {
        self.respond("describe_instance", done, || {
            let mut instances = self.instances.lock().unwrap();
            if let Some(state) = instances.get_mut(instance_id) {
                match state.as_str() {
                    "pending" => {
                        let left = self.pending_polls.load(Ordering::SeqCst);
                        if left == 0 {
                            *state = "running".to_string();
                        } else {
                            self.pending_polls.store(left - 1, Ordering::SeqCst);
                        }
                    }
                    "shutting-down" => *state = "terminated".to_string(),
                    _ => {}
                }
            }
            drop(instances);
            self.instance(instance_id)
        });
    }

    fn terminate_instance(&self, instance_id: &str, done: Completion<()>) {
        self.respond("terminate_instance", done, || {
            self.instance(instance_id)?;
            self.set_instance_state(instance_id, "shutting-down");
            Ok(())
        });
    }

    fn create_volume(&self, _request: VolumeRequest, done: Completion<Ec2Volume>) {
        let id = self.id("vol");
        self.respond("create_volume", done, || {
            self.volumes
                .lock()
                .unwrap()
                .insert(id.clone(), "available".to_string());
            Ok(Ec2Volume {
                volume_id: id,
                state: "available".to_string(),
            })
        });
    }

    fn attach_volume(&self, volume_id: &str, _instance_id: &str, device: &str, done: Completion<()>) {
        self.respond("attach_volume", done, || {
            self.volumes
                .lock()
                .unwrap()
                .insert(volume_id.to_string(), "in-use".to_string());
            self.attachments
                .lock()
                .unwrap()
                .push((volume_id.to_string(), device.to_string()));
            Ok(())
        });
    }

    fn detach_volume(&self, volume_id: &str, done: Completion<()>) {
        self.respond("detach_volume", done, || {
            match self.volumes.lock().unwrap().get_mut(volume_id) {
                Some(state) => {
                    *state = "available".to_string();
                    Ok(())
                }
                None => Err(CloudError::provider("InvalidVolume.NotFound", volume_id)),
            }
        });
    }

    fn delete_volume(&self, volume_id: &str, done: Completion<()>) {
        self.respond("delete_volume", done, || {
            match self.volumes.lock().unwrap().remove(volume_id) {
                Some(_) => Ok(()),
                None => Err(CloudError::provider("InvalidVolume.NotFound", volume_id)),
            }
        });
    }
}

pub struct FakeEc2Factory {
    ec2: Arc<FakeEc2>,
    pub created: AtomicU32,
}

#[async_trait]
impl ClientFactory<dyn Ec2AsyncClient> for FakeEc2Factory {
    async fn create(&self, credentials: &Credentials) -> Result<Arc<dyn Ec2AsyncClient>> {
        if credentials.private_key_id.is_empty() {
            return Err(CloudError::AuthenticationFailed("empty access key".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let ec2: Arc<dyn Ec2AsyncClient> = self.ec2.clone();
        Ok(ec2)
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
    pub ec2: Arc<FakeEc2>,
    pub factory: Arc<FakeEc2Factory>,
    pub store: Arc<InMemoryResourceStore>,
    pub registry: Arc<ClientCacheRegistry>,
    pub tracker: Arc<RecordingTracker>,
    pub provider: AwsProvider,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(ec2: FakeEc2) -> Self {
        let config = test_config();
        let ec2 = Arc::new(ec2);
        let factory = Arc::new(FakeEc2Factory {
            ec2: ec2.clone(),
            created: AtomicU32::new(0),
        });
        let store = Arc::new(InMemoryResourceStore::new());
        let registry = ClientCacheRegistry::new(config.client_cache.clone());
        let tracker = Arc::new(RecordingTracker::new());

        let services = AwsServices {
            store: store.clone(),
            credentials: Arc::new(
                StaticCredentialProvider::new()
                    .with(AUTH_LINK, Credentials::new("AKIAEXAMPLE", "secret"))
                    .with("/auth/empty", Credentials::new("", "secret")),
            ),
            registry: registry.clone(),
            client_factory: factory.clone(),
        };
        let provider = AwsProvider::new(services, tracker.clone(), &config);

        Self {
            ec2,
            factory,
            store,
            registry,
            tracker,
            provider,
        }
    }

    /// Store a compute record with a boot disk, a scratch disk and a persistent disk
    pub async fn seed_compute(&self, name: &str) -> String {
        let boot = self
            .store
            .create_as(DISK_FACTORY, &DiskState::new(format!("{}-boot", name), 16).boot())
            .await
            .unwrap();
        let scratch = self
            .store
            .create_as(DISK_FACTORY, &DiskState::new(format!("{}-scratch", name), 20))
            .await
            .unwrap();
        let data = self
            .store
            .create_as(
                DISK_FACTORY,
                &DiskState::new(format!("{}-data", name), 100).persistent(),
            )
            .await
            .unwrap();

        let compute = ComputeState::new(name)
            .with_region("us-west-2")
            .with_instance_type("t3.micro")
            .with_image("ami-0abc")
            .with_auth(AUTH_LINK)
            .with_disk(boot.self_link)
            .with_disk(scratch.self_link)
            .with_disk(data.self_link);
        let created: ComputeState = self.store.create_as(COMPUTE_FACTORY, &compute).await.unwrap();
        created.self_link
    }

    /// Store a compute record with a boot disk and `count` scratch disks
    pub async fn seed_with_data_disks(&self, name: &str, count: usize) -> String {
        self.seed_disks(ComputeState::new(name).with_region("us-west-2"), count)
            .await
    }

    pub async fn seed_disks(&self, compute: ComputeState, count: usize) -> String {
        let name = compute.name.clone();
        let boot = self
            .store
            .create_as(DISK_FACTORY, &DiskState::new(format!("{}-boot", name), 16).boot())
            .await
            .unwrap();
        let mut compute = compute
            .with_instance_type("t3.micro")
            .with_image("ami-0abc")
            .with_auth(AUTH_LINK)
            .with_disk(boot.self_link);
        for index in 0..count {
            let disk = self
                .store
                .create_as(DISK_FACTORY, &DiskState::new(format!("{}-data{}", name, index), 8))
                .await
                .unwrap();
            compute = compute.with_disk(disk.self_link);
        }
        let created: ComputeState = self.store.create_as(COMPUTE_FACTORY, &compute).await.unwrap();
        created.self_link
    }
}
