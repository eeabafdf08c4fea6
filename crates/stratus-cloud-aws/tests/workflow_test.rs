//! EC2 instance workflow against a callback-style fake EC2

mod common;

use common::{FakeEc2, Harness};
use std::sync::atomic::Ordering;
use stratus_cloud::documents::{ComputeState, DiskState, DiskStatus, NetworkInterfaceState, PowerState};
use stratus_cloud::{
    CloudAdapter, CloudError, ProvisionRequest, ResourceStore, ResourceStoreExt, TrackedOutcome,
};
use stratus_cloud_aws::EC2_CLIENT_KIND;
use stratus_cloud_aws::classifier::DUPLICATE_PERMISSION;
use tokio_test::assert_ok;

async fn disks_of(harness: &Harness, compute: &ComputeState) -> Vec<DiskState> {
    let mut disks = Vec::new();
    for link in &compute.disk_links {
        disks.push(harness.store.get_as(link).await.unwrap());
    }
    disks
}

#[tokio::test(start_paused = true)]
async fn test_create_launches_instance_and_attaches_volumes() {
    let harness = Harness::new(FakeEc2::new().pending_polls(2));
    let link = harness.seed_compute("api").await;

    let report = assert_ok!(
        harness
            .provider
            .provision(ProvisionRequest::create(&link))
            .await
    );

    assert!(report.is_success(), "{:?}", report.failure);
    assert_eq!(
        report.stages,
        vec![
            "CLIENT_INIT",
            "RESOLVE_IMAGE",
            "NETWORK_CONTEXT",
            "SECURITY_GROUP",
            "CREATE_INSTANCE",
            "AWAIT_RUNNING",
            "CREATE_VOLUMES",
            "ATTACH_VOLUMES",
            "RECORDS",
            "FINISHED",
        ]
    );
    assert_eq!(harness.ec2.call_count("create_volume"), 2);
    let devices: Vec<String> = harness
        .ec2
        .attachments()
        .into_iter()
        .map(|(_, device)| device)
        .collect();
    assert_eq!(devices, vec!["/dev/sdf", "/dev/sdg"]);
    assert_eq!(harness.registry.ref_count(EC2_CLIENT_KIND), Some(0));

    let compute: ComputeState = harness.store.get_as(&link).await.unwrap();
    assert!(compute.id.starts_with("i-"));
    assert_eq!(compute.power_state, PowerState::On);
    assert_eq!(compute.address.as_deref(), Some("54.0.0.12"));

    let disks = disks_of(&harness, &compute).await;
    assert_eq!(disks.len(), 3);
    assert!(disks.iter().all(|d| d.status == DiskStatus::Attached));
    assert_eq!(disks[0].id, format!("{}-root", compute.id));
    assert!(disks[1].id.starts_with("vol-"));

    let nic: NetworkInterfaceState = harness
        .store
        .get_as(&compute.network_interface_links[0])
        .await
        .unwrap();
    assert_eq!(nic.subnet_id.as_deref(), Some("subnet-default"));
    assert_eq!(nic.security_group_ids.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_ingress_rule_counts_as_success() {
    let harness = Harness::new(FakeEc2::new().fail_once(
        "authorize_ingress",
        CloudError::provider(DUPLICATE_PERMISSION, "the rule already exists"),
    ));
    let link = harness.seed_compute("api").await;

    let report = harness
        .provider
        .provision(ProvisionRequest::create(&link))
        .await
        .unwrap();

    assert!(report.is_success(), "{:?}", report.failure);
    assert_eq!(harness.ec2.call_count("authorize_ingress"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_launch_is_retried() {
    let harness = Harness::new(FakeEc2::new().fail_once(
        "run_instance",
        CloudError::provider("RequestLimitExceeded", "slow down"),
    ));
    let link = harness.seed_compute("api").await;

    let report = harness
        .provider
        .provision(ProvisionRequest::create(&link))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(harness.ec2.call_count("run_instance"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_volume_failure_fails_workflow_without_rollback() {
    let harness = Harness::new(FakeEc2::new().fail_once(
        "create_volume",
        CloudError::provider("VolumeLimitExceeded", "too many volumes"),
    ));
    let link = harness.seed_compute("api").await;

    let report = harness
        .provider
        .provision(ProvisionRequest::create(&link))
        .await
        .unwrap();

    let failure = report.failure.unwrap();
    assert_eq!(failure.stage, "CREATE_VOLUMES");
    assert_eq!(failure.error.code(), Some("VolumeLimitExceeded"));
    assert!(failure.rollback_error.is_none());
    assert_eq!(harness.ec2.call_count("terminate_instance"), 0);
    assert_eq!(harness.ec2.call_count("attach_volume"), 0);

    match harness.tracker.outcomes().as_slice() {
        [TrackedOutcome::Failure { stage, code, .. }] => {
            assert_eq!(stage, "CREATE_VOLUMES");
            assert_eq!(code.as_deref(), Some("VolumeLimitExceeded"));
        }
        other => panic!("unexpected outcomes: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_too_many_data_disks_fail_before_any_ec2_call() {
    let harness = Harness::new(FakeEc2::new());
    let link = harness.seed_with_data_disks("api", 11).await;

    let report = harness
        .provider
        .provision(ProvisionRequest::create(&link))
        .await
        .unwrap();

    let failure = report.failure.unwrap();
    assert_eq!(failure.stage, "CLIENT_INIT");
    assert!(matches!(failure.error, CloudError::InvalidConfig(_)));
    assert!(harness.ec2.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ten_data_disks_use_every_device_slot() {
    let harness = Harness::new(FakeEc2::new());
    let link = harness.seed_with_data_disks("api", 10).await;

    let report = harness
        .provider
        .provision(ProvisionRequest::create(&link))
        .await
        .unwrap();

    assert!(report.is_success(), "{:?}", report.failure);
    let devices: Vec<String> = harness
        .ec2
        .attachments()
        .into_iter()
        .map(|(_, device)| device)
        .collect();
    assert_eq!(devices.len(), 10);
    assert_eq!(devices.last().map(String::as_str), Some("/dev/sdo"));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_callback_fails_instead_of_hanging() {
    let harness = Harness::new(FakeEc2::new().drop_callbacks("describe_image"));
    let link = harness.seed_compute("api").await;

    let report = harness
        .provider
        .provision(ProvisionRequest::create(&link))
        .await
        .unwrap();

    let failure = report.failure.unwrap();
    assert_eq!(failure.stage, "RESOLVE_IMAGE");
    assert!(matches!(failure.error, CloudError::CallbackDropped(_)));
}

#[tokio::test(start_paused = true)]
async fn test_instance_terminated_while_starting_fails() {
    let harness = Harness::new(FakeEc2::new().pending_polls(100));
    let link = harness.seed_compute("api").await;

    let provider = &harness.provider;
    let run = provider.provision(ProvisionRequest::create(&link));
    let kill = async {
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        harness.ec2.set_instance_state("i-00000001", "terminated");
    };
    let (report, ()) = tokio::join!(run, kill);

    let failure = report.unwrap().failure.unwrap();
    assert_eq!(failure.stage, "AWAIT_RUNNING");
    assert!(matches!(
        failure.error,
        CloudError::ResourceFailed { ref state, .. } if state == "terminated"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_mock_mode_never_calls_ec2() {
    let harness = Harness::new(FakeEc2::new());
    let link = harness.seed_compute("api").await;

    let report = harness
        .provider
        .provision(ProvisionRequest::create(&link).mock())
        .await
        .unwrap();

    assert!(report.is_success());
    assert!(harness.ec2.calls().is_empty());
    assert_eq!(harness.factory.created.load(Ordering::SeqCst), 0);

    let compute: ComputeState = harness.store.get_as(&link).await.unwrap();
    assert!(compute.id.starts_with("i-"));
    let disks = disks_of(&harness, &compute).await;
    assert!(disks.iter().all(|d| !d.id.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn test_delete_terminates_and_keeps_persistent_disks() {
    let harness = Harness::new(FakeEc2::new());
    let link = harness.seed_compute("api").await;
    assert!(
        harness
            .provider
            .provision(ProvisionRequest::create(&link))
            .await
            .unwrap()
            .is_success()
    );
    let compute: ComputeState = harness.store.get_as(&link).await.unwrap();
    let disks = disks_of(&harness, &compute).await;
    let (scratch, data) = (&disks[1], &disks[2]);

    let report = harness
        .provider
        .provision(ProvisionRequest::delete(&link))
        .await
        .unwrap();

    assert!(report.is_success(), "{:?}", report.failure);
    assert_eq!(
        report.stages,
        vec![
            "CLIENT_INIT",
            "TERMINATE",
            "AWAIT_TERMINATED",
            "CLEANUP_DISKS",
            "DELETE_RECORDS",
            "FINISHED",
        ]
    );
    assert_eq!(harness.ec2.volume_state(&scratch.id), None);
    assert_eq!(harness.ec2.volume_state(&data.id).as_deref(), Some("available"));

    assert!(harness.store.get(&link).await.is_err());
    assert!(harness.store.get(&scratch.self_link).await.is_err());
    assert!(harness.store.get(&disks[0].self_link).await.is_err());
    let kept: DiskState = harness.store.get_as(&data.self_link).await.unwrap();
    assert_eq!(kept.status, DiskStatus::Detached);
    assert_eq!(kept.compute_link, None);
}

#[tokio::test(start_paused = true)]
async fn test_delete_tolerates_missing_instance_and_volumes() {
    let harness = Harness::new(FakeEc2::new());
    let link = harness.seed_compute("api").await;
    harness
        .provider
        .provision(ProvisionRequest::create(&link))
        .await
        .unwrap();
    let compute: ComputeState = harness.store.get_as(&link).await.unwrap();
    let disks = disks_of(&harness, &compute).await;

    harness.ec2.forget_instance(&compute.id);
    harness.ec2.delete_volume_out_of_band(&disks[1].id);

    let report = harness
        .provider
        .provision(ProvisionRequest::delete(&link))
        .await
        .unwrap();

    assert!(report.is_success(), "{:?}", report.failure);
    assert!(!report.stages.iter().any(|s| s == "AWAIT_TERMINATED"));
    assert_eq!(harness.ec2.call_count("delete_volume"), 1);
    assert!(harness.store.get(&link).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_check_auth_shares_the_client_used_in_the_default_region() {
    let harness = Harness::new(FakeEc2::new());
    let link = harness.seed_disks(ComputeState::new("web"), 0).await;

    let status = harness.provider.check_auth(common::AUTH_LINK).await.unwrap();
    assert!(status.authenticated);
    let report = harness
        .provider
        .provision(ProvisionRequest::create(&link))
        .await
        .unwrap();

    assert!(report.is_success(), "{:?}", report.failure);
    assert_eq!(harness.factory.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_check_auth_surfaces_factory_rejection() {
    let harness = Harness::new(FakeEc2::new());

    let ok = harness.provider.check_auth(common::AUTH_LINK).await.unwrap();
    assert!(ok.authenticated);
    assert_eq!(ok.account_info.as_deref(), Some("access key AKIAEXAMPLE"));

    let rejected = harness.provider.check_auth("/auth/empty").await.unwrap();
    assert!(!rejected.authenticated);
}
