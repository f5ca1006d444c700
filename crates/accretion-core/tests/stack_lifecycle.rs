//! Stack lifecycle client behaviour against the in-memory control plane.

use std::sync::Arc;
use std::time::Duration;

use accretion_core::domain::ErrorKind;
use accretion_core::{
    AccretionError, LifecycleConfig, StackLifecycleClient, StackSpec, UpsertAction,
};
use accretion_state::fakes::{ControlPlaneCall, MemoryControlPlane, MemoryObjectStore};
use accretion_state::{RegionDeployment, StackControlPlane, StackParameters, StackSlot};

const REGION: &str = "us-east-1";
const BUCKET_TEMPLATE: &str = r#"{"Resources":{"SourceBucket":{"Type":"AWS::S3::Bucket"}}}"#;
const EMPTY_TEMPLATE: &str = r#"{"Resources":{}}"#;

struct Harness {
    control: Arc<MemoryControlPlane>,
    objects: Arc<MemoryObjectStore>,
    client: StackLifecycleClient,
}

fn harness(config: LifecycleConfig) -> Harness {
    let objects = Arc::new(MemoryObjectStore::new());
    let control = Arc::new(MemoryControlPlane::with_object_store(Arc::clone(&objects)));
    let client = StackLifecycleClient::new(control.clone(), objects.clone(), config);
    Harness {
        control,
        objects,
        client,
    }
}

fn fast_config() -> LifecycleConfig {
    LifecycleConfig {
        max_polls: 5,
        poll_interval: Duration::from_secs(2),
        ..LifecycleConfig::default()
    }
}

fn creates(control: &MemoryControlPlane) -> usize {
    control
        .calls()
        .iter()
        .filter(|c| matches!(c, ControlPlaneCall::Create { .. }))
        .count()
}

// ===========================================================================
// upsert
// ===========================================================================

#[tokio::test]
async fn test_upsert_creates_once_then_updates() {
    let h = harness(fast_config());
    let mut record = RegionDeployment::new();

    let first = h
        .client
        .upsert_slot(REGION, &mut record, StackSlot::Core, &StackSpec::new(EMPTY_TEMPLATE))
        .await
        .unwrap();
    assert_eq!(first.action, UpsertAction::Created);
    assert_eq!(record.get(StackSlot::Core), Some(&first.stack_id));

    let changed = StackSpec::new(BUCKET_TEMPLATE);
    let second = h
        .client
        .upsert_slot(REGION, &mut record, StackSlot::Core, &changed)
        .await
        .unwrap();
    assert_eq!(second.action, UpsertAction::Updated);
    assert_eq!(second.stack_id, first.stack_id, "update never changes the id");

    assert_eq!(creates(&h.control), 1, "never two creates");
    assert_eq!(h.control.live_stacks(REGION), vec![first.stack_id]);
}

#[tokio::test]
async fn test_update_without_changes_is_success() {
    let h = harness(fast_config());
    let spec = StackSpec::new(EMPTY_TEMPLATE)
        .with_parameters(StackParameters::new().with("WorkersS3Key", "k1"));

    let created = h.client.upsert(REGION, None, &spec).await.unwrap();
    let again = h
        .client
        .upsert(REGION, Some(&created.stack_id), &spec)
        .await
        .unwrap();
    assert_eq!(again.action, UpsertAction::Unchanged);

    let new_params = spec
        .clone()
        .with_parameters(StackParameters::new().with("WorkersS3Key", "k2"));
    let updated = h
        .client
        .upsert(REGION, Some(&created.stack_id), &new_params)
        .await
        .unwrap();
    assert_eq!(updated.action, UpsertAction::Updated);
    assert_eq!(
        h.control
            .parameters_of(REGION, &created.stack_id)
            .unwrap()
            .get("WorkersS3Key"),
        Some("k2")
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_stack_is_polled_until_complete() {
    let h = harness(fast_config());
    h.control.set_settle_polls(3);

    let started = tokio::time::Instant::now();
    let outcome = h
        .client
        .upsert(REGION, None, &StackSpec::new(EMPTY_TEMPLATE))
        .await
        .unwrap();
    assert_eq!(outcome.action, UpsertAction::Created);
    assert_eq!(started.elapsed(), Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_stack_times_out_but_stays_tracked() {
    let h = harness(fast_config());
    h.control.stall_region(REGION);
    let mut record = RegionDeployment::new();

    let err = h
        .client
        .upsert_slot(REGION, &mut record, StackSlot::Core, &StackSpec::new(EMPTY_TEMPLATE))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AccretionError::ProvisioningTimeout { polls: 5, .. }
    ));
    assert!(err.is_retryable());
    assert!(
        record.is_set(StackSlot::Core),
        "accepted create is recorded so it can be destroyed later"
    );
}

#[tokio::test]
async fn test_rolled_back_create_is_a_provisioning_error() {
    let h = harness(fast_config());
    h.control.roll_back_region(REGION);

    let err = h
        .client
        .upsert(REGION, None, &StackSpec::new(EMPTY_TEMPLATE))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provisioning);
    assert!(err.to_string().contains("RollbackComplete"));
}

#[tokio::test]
async fn test_unreachable_region_is_a_remote_error() {
    let h = harness(fast_config());
    h.control.fail_region(REGION);

    let err = h
        .client
        .upsert(REGION, None, &StackSpec::new(EMPTY_TEMPLATE))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Remote);
}

// ===========================================================================
// destroy
// ===========================================================================

#[tokio::test]
async fn test_destroy_empties_versioned_buckets_first() {
    let h = harness(fast_config());
    let mut record = RegionDeployment::new();
    let created = h
        .client
        .upsert_slot(REGION, &mut record, StackSlot::Core, &StackSpec::new(BUCKET_TEMPLATE))
        .await
        .unwrap();
    let bucket = h
        .control
        .describe_resource(REGION, &created.stack_id, "SourceBucket")
        .await
        .unwrap();

    h.objects.set_page_size(2);
    for i in 0..5 {
        h.objects.insert(REGION, &bucket, &format!("accretion/workers/{i}.zip"), "zip");
    }
    h.objects.insert(REGION, &bucket, "accretion/workers/0.zip", "zip v2");
    h.objects.insert_delete_marker(REGION, &bucket, "accretion/workers/1.zip");

    let released = h
        .client
        .destroy_slot(REGION, &mut record, StackSlot::Core)
        .await
        .unwrap();

    assert_eq!(released, Some(created.stack_id.clone()));
    assert!(!record.is_set(StackSlot::Core));
    assert_eq!(h.objects.version_count(REGION, &bucket), 0);
    assert!(h.control.live_stacks(REGION).is_empty());
    assert!(h.control.status_of(REGION, &created.stack_id).is_none());
}

#[tokio::test]
async fn test_destroy_of_missing_stack_succeeds() {
    let h = harness(fast_config());
    let created = h
        .client
        .upsert(REGION, None, &StackSpec::new(EMPTY_TEMPLATE))
        .await
        .unwrap();

    h.client.destroy(REGION, &created.stack_id).await.unwrap();
    h.client.destroy(REGION, &created.stack_id).await.unwrap();

    let deletes = h
        .control
        .calls()
        .iter()
        .filter(|c| matches!(c, ControlPlaneCall::Delete { .. }))
        .count();
    assert_eq!(deletes, 1, "second destroy finds the stack gone");
}

#[tokio::test]
async fn test_destroy_slot_on_unset_slot_is_noop() {
    let h = harness(fast_config());
    let mut record = RegionDeployment::new();
    let released = h
        .client
        .destroy_slot(REGION, &mut record, StackSlot::LayerBuilder)
        .await
        .unwrap();
    assert_eq!(released, None);
    assert!(h.control.calls().is_empty());
}

// ===========================================================================
// bucket emptying
// ===========================================================================

#[tokio::test]
async fn test_emptying_needs_two_consecutive_empty_passes() {
    let h = harness(fast_config());
    h.objects.set_page_size(1);
    h.objects.insert(REGION, "bucket", "a", "1");
    h.objects.insert(REGION, "bucket", "b", "2");

    let deleted = h.client.empty_bucket(REGION, "bucket").await.unwrap();

    assert_eq!(deleted, 2);
    // Two non-empty pages, then two empty confirmation passes.
    assert_eq!(h.objects.list_calls(), 4);
    assert_eq!(h.objects.version_count(REGION, "bucket"), 0);
}

#[tokio::test]
async fn test_write_racing_the_first_empty_pass_is_caught() {
    let h = harness(fast_config());
    h.objects.insert(REGION, "bucket", "a", "1");
    h.objects
        .write_after_first_empty_listing(REGION, "bucket", "late-object");

    let deleted = h.client.empty_bucket(REGION, "bucket").await.unwrap();

    assert_eq!(deleted, 2);
    assert_eq!(h.objects.version_count(REGION, "bucket"), 0);
    // found, empty (late write lands), found, empty, empty
    assert_eq!(h.objects.list_calls(), 5);
}

#[tokio::test]
async fn test_emptying_gives_up_after_max_passes() {
    let config = LifecycleConfig {
        empty_confirmations: 3,
        max_empty_passes: 2,
        ..fast_config()
    };
    let h = harness(config);

    let err = h.client.empty_bucket(REGION, "bucket").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provisioning);
    assert_eq!(h.objects.list_calls(), 2);
}
