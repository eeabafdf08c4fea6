use crate::ProviderKind;
use crate::unlinked::UnlinkedFactory;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use stratus_cloud::documents::{COMPUTE_FACTORY, ComputeState, DISK_FACTORY, DiskState};
use stratus_cloud::{
    ClientCacheRegistry, CloudAdapter, Credentials, EngineConfig, InMemoryResourceStore,
    LoggingTracker, ProvisionReport, ProvisionRequest, ResourceStoreExt, StaticCredentialProvider,
};
use stratus_cloud_aws::{AwsProvider, AwsServices};
use stratus_cloud_azure::{AzureProvider, AzureServices};

const AUTH_LINK: &str = "/auth/local";

pub struct ProvisionOptions {
    pub provider: ProviderKind,
    pub name: String,
    pub region: Option<String>,
    pub data_disks: u32,
    pub state_dir: Option<PathBuf>,
}

impl ProviderKind {
    fn default_image(self) -> &'static str {
        match self {
            ProviderKind::Azure => "Canonical:0001-com-ubuntu-server-jammy:22_04-lts:latest",
            ProviderKind::Aws => "ami-0abcdef1234567890",
        }
    }

    fn default_instance_type(self) -> &'static str {
        match self {
            ProviderKind::Azure => "Standard_B2s",
            ProviderKind::Aws => "t3.micro",
        }
    }
}

pub async fn handle(options: ProvisionOptions, config: &EngineConfig) -> anyhow::Result<()> {
    let store = Arc::new(match &options.state_dir {
        Some(dir) => InMemoryResourceStore::load_snapshot(dir)
            .await
            .with_context(|| format!("loading store from {}", dir.display()))?,
        None => InMemoryResourceStore::new(),
    });

    let compute_link = seed_compute(&store, &options).await?;
    tracing::info!(compute = %compute_link, provider = ?options.provider, "Provisioning in mock mode");

    let registry = ClientCacheRegistry::new(config.client_cache.clone());
    let report = run(options.provider, &compute_link, store.clone(), registry.clone(), config).await?;
    registry.shutdown().await;

    if let Some(dir) = &options.state_dir {
        store
            .save_snapshot(dir)
            .await
            .with_context(|| format!("saving store to {}", dir.display()))?;
    }

    print_report(&report);
    if let Some(failure) = report.failure {
        anyhow::bail!("{}", failure);
    }

    let compute: ComputeState = store.get_as(&compute_link).await?;
    println!("{}", serde_json::to_string_pretty(&compute)?);
    Ok(())
}

async fn run(
    provider: ProviderKind,
    compute_link: &str,
    store: Arc<InMemoryResourceStore>,
    registry: Arc<ClientCacheRegistry>,
    config: &EngineConfig,
) -> anyhow::Result<ProvisionReport> {
    let credentials = Arc::new(
        StaticCredentialProvider::new().with(AUTH_LINK, Credentials::new("local", "local")),
    );
    let tracker = Arc::new(LoggingTracker);

    let adapter: Box<dyn CloudAdapter> = match provider {
        ProviderKind::Azure => Box::new(AzureProvider::new(
            AzureServices {
                store,
                credentials,
                registry,
                api_factory: Arc::new(UnlinkedFactory),
            },
            tracker,
            config,
        )),
        ProviderKind::Aws => Box::new(AwsProvider::new(
            AwsServices {
                store,
                credentials,
                registry,
                client_factory: Arc::new(UnlinkedFactory),
            },
            tracker,
            config,
        )),
    };

    let report = adapter
        .provision(ProvisionRequest::create(compute_link).mock())
        .await?;
    Ok(report)
}

async fn seed_compute(
    store: &InMemoryResourceStore,
    options: &ProvisionOptions,
) -> anyhow::Result<String> {
    let boot: DiskState = store
        .create_as(
            DISK_FACTORY,
            &DiskState::new(format!("{}-boot", options.name), 30).boot(),
        )
        .await?;

    let mut compute = ComputeState::new(&options.name)
        .with_instance_type(options.provider.default_instance_type())
        .with_image(options.provider.default_image())
        .with_auth(AUTH_LINK)
        .with_disk(boot.self_link);
    if let Some(region) = &options.region {
        compute = compute.with_region(region);
    }

    for index in 0..options.data_disks {
        let disk: DiskState = store
            .create_as(
                DISK_FACTORY,
                &DiskState::new(format!("{}-data{}", options.name, index), 64),
            )
            .await?;
        compute = compute.with_disk(disk.self_link);
    }

    let created: ComputeState = store.create_as(COMPUTE_FACTORY, &compute).await?;
    Ok(created.self_link)
}

fn print_report(report: &ProvisionReport) {
    println!("provider: {}", report.provider);
    println!("resource: {}", report.resource_reference);
    println!("stages:   {}", report.stages.join(" -> "));
    for sub in &report.sub_resources {
        println!("  {} {} ({})", sub.kind, sub.name, sub.id);
    }
    match &report.failure {
        None => println!("result:   success"),
        Some(failure) => println!("result:   {}", failure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn options(provider: ProviderKind) -> ProvisionOptions {
        ProvisionOptions {
            provider,
            name: "web".to_string(),
            region: None,
            data_disks: 2,
            state_dir: None,
        }
    }

    async fn provision(provider: ProviderKind) -> (Arc<InMemoryResourceStore>, String, ProvisionReport) {
        let config = EngineConfig::default();
        let store = Arc::new(InMemoryResourceStore::new());
        let link = seed_compute(&store, &options(provider)).await.unwrap();
        let registry = ClientCacheRegistry::new(config.client_cache.clone());
        let report = assert_ok!(run(provider, &link, store.clone(), registry, &config).await);
        (store, link, report)
    }

    #[tokio::test]
    async fn test_mock_azure_provisioning_succeeds() {
        let (store, link, report) = provision(ProviderKind::Azure).await;

        assert!(report.is_success(), "{:?}", report.failure);
        assert_eq!(report.stages.last().map(String::as_str), Some("FINISHED"));
        let compute: ComputeState = store.get_as(&link).await.unwrap();
        assert!(!compute.id.is_empty());
        assert_eq!(compute.disk_links.len(), 3);
    }

    #[tokio::test]
    async fn test_mock_aws_provisioning_succeeds() {
        let (store, link, report) = provision(ProviderKind::Aws).await;

        assert!(report.is_success(), "{:?}", report.failure);
        let compute: ComputeState = store.get_as(&link).await.unwrap();
        assert!(compute.id.starts_with("i-"));
    }
}
