//! Reconciliation of provider results into local records
//!
//! Once the provider confirms the primary resource, [`Reconciler::reconcile`]
//! writes provider ids, addresses and status back into the compute, disk and
//! network interface documents. Sub-resources the provider reports without a
//! local record are created; known ones (matched by name) are patched. All
//! sub-resource writes go out as one batch and the step fails on the first
//! failed write.

use crate::batch::{BatchCall, execute_batch};
use crate::documents::{
    ComputeState, DISK_FACTORY, DiskState, DiskStatus, NETWORK_INTERFACE_FACTORY,
    NetworkInterfaceState, PowerState,
};
use crate::error::{CloudError, Result};
use crate::store::{ResourceStore, ResourceStoreExt};
use futures_util::FutureExt;
use serde_json::json;
use std::sync::Arc;

/// A disk as reported by the provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionedDisk {
    pub name: String,
    pub id: String,
    pub capacity_gb: u64,
    pub disk_type: Option<String>,
    pub boot: bool,
}

/// A network interface as reported by the provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionedInterface {
    pub name: String,
    pub id: String,
    pub device_index: u32,
    pub address: Option<String>,
    pub public_address: Option<String>,
    pub subnet_id: Option<String>,
    pub security_group_ids: Vec<String>,
}

/// The primary resource as reported by the provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionedCompute {
    pub id: String,
    pub power_state: PowerState,
    pub address: Option<String>,
    pub disks: Vec<ProvisionedDisk>,
    pub interfaces: Vec<ProvisionedInterface>,
}

/// What a reconciliation pass wrote
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    /// Links on the compute record whose documents no longer exist
    pub dropped: Vec<String>,
    pub deleted: Vec<String>,
    /// Whether the compute record was replaced rather than patched
    pub replaced_compute: bool,
}

#[derive(Debug)]
enum Write {
    Created(String),
    Updated(String),
    Deleted(String),
}

/// Applies provider results to the resource store
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Load the documents behind `links`, splitting off links whose document is gone
    async fn load_linked<T>(&self, links: &[String]) -> Result<(Vec<T>, Vec<String>)>
    where
        T: serde::de::DeserializeOwned + Send,
    {
        let mut found = Vec::new();
        let mut stale = Vec::new();
        for link in links {
            match self.store.get_as::<T>(link).await {
                Ok(doc) => found.push(doc),
                Err(CloudError::ResourceNotFound(_)) => stale.push(link.clone()),
                Err(e) => return Err(e),
            }
        }
        Ok((found, stale))
    }

    pub async fn reconcile(
        &self,
        compute_link: &str,
        provisioned: &ProvisionedCompute,
    ) -> Result<ReconcileReport> {
        let mut compute: ComputeState = self.store.get_as(compute_link).await?;
        let (known_disks, stale_disks) = self.load_linked::<DiskState>(&compute.disk_links).await?;
        let (known_nics, stale_nics) = self
            .load_linked::<NetworkInterfaceState>(&compute.network_interface_links)
            .await?;

        let mut calls: Vec<BatchCall<Write>> = Vec::new();

        for disk in &provisioned.disks {
            let store = self.store.clone();
            let compute_link = compute_link.to_string();
            match known_disks.iter().find(|known| known.name == disk.name) {
                Some(known) => {
                    let link = known.self_link.clone();
                    let patch = json!({
                        "id": disk.id,
                        "status": DiskStatus::Attached,
                        "compute_link": compute_link,
                    });
                    calls.push(
                        async move {
                            store.patch(&link, patch).await?;
                            Ok(Write::Updated(link))
                        }
                        .boxed(),
                    );
                }
                None => {
                    let mut state = DiskState::new(disk.name.clone(), disk.capacity_gb);
                    state.id = disk.id.clone();
                    state.boot = disk.boot;
                    state.status = DiskStatus::Attached;
                    state.disk_type = disk.disk_type.clone().unwrap_or_default();
                    state.compute_link = Some(compute_link);
                    calls.push(
                        async move {
                            let created = store.create_as(DISK_FACTORY, &state).await?;
                            Ok(Write::Created(created.self_link))
                        }
                        .boxed(),
                    );
                }
            }
        }

        for nic in &provisioned.interfaces {
            let store = self.store.clone();
            let compute_link = compute_link.to_string();
            let known = known_nics
                .iter()
                .find(|known| known.name == nic.name || known.device_index == nic.device_index);
            match known {
                Some(known) => {
                    let link = known.self_link.clone();
                    let patch = json!({
                        "id": nic.id,
                        "address": nic.address,
                        "public_address": nic.public_address,
                        "subnet_id": nic.subnet_id,
                        "security_group_ids": nic.security_group_ids,
                        "compute_link": compute_link,
                    });
                    calls.push(
                        async move {
                            store.patch(&link, patch).await?;
                            Ok(Write::Updated(link))
                        }
                        .boxed(),
                    );
                }
                None => {
                    let state = NetworkInterfaceState {
                        id: nic.id.clone(),
                        address: nic.address.clone(),
                        public_address: nic.public_address.clone(),
                        subnet_id: nic.subnet_id.clone(),
                        security_group_ids: nic.security_group_ids.clone(),
                        compute_link: Some(compute_link),
                        ..NetworkInterfaceState::new(nic.name.clone(), nic.device_index)
                    };
                    calls.push(
                        async move {
                            let created =
                                store.create_as(NETWORK_INTERFACE_FACTORY, &state).await?;
                            Ok(Write::Created(created.self_link))
                        }
                        .boxed(),
                    );
                }
            }
        }

        let writes = execute_batch("reconcile", calls).await?;

        let mut report = ReconcileReport {
            dropped: stale_disks.iter().chain(&stale_nics).cloned().collect(),
            ..ReconcileReport::default()
        };
        for write in writes {
            match write {
                Write::Created(link) => {
                    if link.starts_with(DISK_FACTORY) {
                        compute.disk_links.push(link.clone());
                    } else {
                        compute.network_interface_links.push(link.clone());
                    }
                    report.created.push(link);
                }
                Write::Updated(link) => report.updated.push(link),
                Write::Deleted(link) => report.deleted.push(link),
            }
        }

        compute.disk_links.retain(|link| !stale_disks.contains(link));
        compute
            .network_interface_links
            .retain(|link| !stale_nics.contains(link));
        compute.id = provisioned.id.clone();
        compute.power_state = provisioned.power_state;
        compute.address = provisioned.address.clone();

        if report.dropped.is_empty() {
            self.store
                .patch(
                    compute_link,
                    json!({
                        "id": compute.id,
                        "power_state": compute.power_state,
                        "address": compute.address,
                        "disk_links": compute.disk_links,
                        "network_interface_links": compute.network_interface_links,
                    }),
                )
                .await?;
        } else {
            // merge patch cannot shrink an array, so stale links need a full replace
            self.store.put_as(compute_link, &compute).await?;
            report.replaced_compute = true;
        }

        tracing::info!(
            compute = compute_link,
            created = report.created.len(),
            updated = report.updated.len(),
            dropped = report.dropped.len(),
            "reconciled local records"
        );
        Ok(report)
    }

    /// Clean up local records after the primary resource was deleted
    ///
    /// Persistent disks are kept and marked detached; every other disk,
    /// every network interface and the compute record itself are deleted.
    pub async fn reconcile_deleted(&self, compute_link: &str) -> Result<ReconcileReport> {
        let compute: ComputeState = match self.store.get_as(compute_link).await {
            Ok(compute) => compute,
            Err(CloudError::ResourceNotFound(_)) => return Ok(ReconcileReport::default()),
            Err(e) => return Err(e),
        };
        let (disks, stale_disks) = self.load_linked::<DiskState>(&compute.disk_links).await?;

        let mut calls: Vec<BatchCall<Write>> = Vec::new();
        for disk in disks {
            let store = self.store.clone();
            if disk.persistent {
                calls.push(
                    async move {
                        let patch = json!({"status": DiskStatus::Detached, "compute_link": null});
                        store.patch(&disk.self_link, patch).await?;
                        Ok(Write::Updated(disk.self_link))
                    }
                    .boxed(),
                );
            } else {
                calls.push(
                    async move {
                        delete_if_present(store.as_ref(), &disk.self_link).await?;
                        Ok(Write::Deleted(disk.self_link))
                    }
                    .boxed(),
                );
            }
        }
        for link in compute.network_interface_links.iter().cloned() {
            let store = self.store.clone();
            calls.push(
                async move {
                    delete_if_present(store.as_ref(), &link).await?;
                    Ok(Write::Deleted(link))
                }
                .boxed(),
            );
        }

        let writes = execute_batch("reconcile-deleted", calls).await?;
        delete_if_present(self.store.as_ref(), compute_link).await?;

        let mut report = ReconcileReport {
            dropped: stale_disks,
            ..ReconcileReport::default()
        };
        for write in writes {
            match write {
                Write::Created(link) => report.created.push(link),
                Write::Updated(link) => report.updated.push(link),
                Write::Deleted(link) => report.deleted.push(link),
            }
        }
        report.deleted.push(compute_link.to_string());

        tracing::info!(
            compute = compute_link,
            deleted = report.deleted.len(),
            detached = report.updated.len(),
            "removed local records"
        );
        Ok(report)
    }
}

async fn delete_if_present(store: &dyn ResourceStore, link: &str) -> Result<()> {
    match store.delete(link).await {
        Ok(()) | Err(CloudError::ResourceNotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}
