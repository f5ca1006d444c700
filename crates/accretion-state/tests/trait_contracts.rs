//! Trait contract tests for the service seams.
//!
//! These tests verify the behavioral contracts of the service traits using
//! the in-memory fakes. Any conforming implementation must pass these.

use std::sync::Arc;

use accretion_state::fakes::{
    ControlPlaneCall, MemoryControlPlane, MemoryLayerService, MemoryNotificationSink,
    MemoryObjectStore, MemoryWorkflowService,
};
use accretion_state::service_traits::*;
use accretion_state::{ServiceError, StackId};

const TEMPLATE: &str = r#"{"Resources":{"SourceBucket":{"Type":"AWS::S3::Bucket"}}}"#;

fn create_request(name: &str) -> CreateStackRequest {
    CreateStackRequest {
        stack_name: name.to_string(),
        template_body: TEMPLATE.to_string(),
        parameters: StackParameters::new(),
        allow_iam: false,
    }
}

async fn settle(plane: &MemoryControlPlane, region: &str, id: &StackId) -> StackStatus {
    for _ in 0..10 {
        let status = plane.describe_stack_status(region, id).await.unwrap();
        if !status.is_in_progress() {
            return status;
        }
    }
    panic!("stack never settled");
}

// ===========================================================================
// StackControlPlane contract tests
// ===========================================================================

#[tokio::test]
async fn create_settles_to_complete() {
    let plane = MemoryControlPlane::new();
    plane.set_settle_polls(2);
    let id = plane
        .create_stack("us-east-1", &create_request("Accretion-a"))
        .await
        .unwrap();

    assert_eq!(
        plane.describe_stack_status("us-east-1", &id).await.unwrap(),
        StackStatus::CreateInProgress
    );
    assert_eq!(settle(&plane, "us-east-1", &id).await, StackStatus::CreateComplete);
}

#[tokio::test]
async fn identical_update_reports_no_changes() {
    let plane = MemoryControlPlane::new();
    let id = plane
        .create_stack("us-east-1", &create_request("Accretion-a"))
        .await
        .unwrap();
    settle(&plane, "us-east-1", &id).await;

    let update = UpdateStackRequest {
        stack_id: id.clone(),
        template_body: TEMPLATE.to_string(),
        parameters: StackParameters::new(),
        allow_iam: false,
    };
    let err = plane.update_stack("us-east-1", &update).await.unwrap_err();
    assert!(matches!(err, ServiceError::NoChanges { .. }));

    let changed = UpdateStackRequest {
        parameters: StackParameters::new().with("WorkersS3Key", "k"),
        ..update
    };
    plane.update_stack("us-east-1", &changed).await.unwrap();
    assert_eq!(settle(&plane, "us-east-1", &id).await, StackStatus::UpdateComplete);
    assert_eq!(
        plane.parameters_of("us-east-1", &id).unwrap().get("WorkersS3Key"),
        Some("k")
    );
}

#[tokio::test]
async fn deleted_stack_is_not_found() {
    let plane = MemoryControlPlane::new();
    let id = plane.insert_stack("eu-west-1", "Accretion-b", TEMPLATE);
    plane.delete_stack("eu-west-1", &id).await.unwrap();

    assert_eq!(settle(&plane, "eu-west-1", &id).await, StackStatus::DeleteComplete);
    let err = plane
        .describe_stack_status("eu-west-1", &id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::StackNotFound { .. }));
    assert!(plane.live_stacks("eu-west-1").is_empty());
}

#[tokio::test]
async fn delete_fails_while_bucket_holds_objects() {
    let objects = Arc::new(MemoryObjectStore::new());
    let plane = MemoryControlPlane::with_object_store(Arc::clone(&objects));
    let id = plane.insert_stack("eu-west-1", "Accretion-c", TEMPLATE);
    let bucket = plane
        .describe_resource("eu-west-1", &id, "SourceBucket")
        .await
        .unwrap();
    assert_eq!(bucket, "accretion-c-sourcebucket");
    objects.insert("eu-west-1", &bucket, "leftover", b"x".to_vec());

    plane.delete_stack("eu-west-1", &id).await.unwrap();
    assert_eq!(settle(&plane, "eu-west-1", &id).await, StackStatus::DeleteFailed);
}

#[tokio::test]
async fn failing_region_rejects_every_verb() {
    let plane = MemoryControlPlane::new();
    plane.fail_region("ap-south-1");
    let err = plane
        .create_stack("ap-south-1", &create_request("Accretion-d"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Transport(_)));
    assert!(plane.calls().is_empty());

    // Other regions are unaffected.
    plane
        .create_stack("us-east-2", &create_request("Accretion-d"))
        .await
        .unwrap();
    assert_eq!(
        plane.calls(),
        vec![ControlPlaneCall::Create {
            region: "us-east-2".to_string(),
            stack_name: "Accretion-d".to_string()
        }]
    );
}

#[tokio::test]
async fn stalled_region_never_settles() {
    let plane = MemoryControlPlane::new();
    plane.stall_region("sa-east-1");
    let id = plane
        .create_stack("sa-east-1", &create_request("Accretion-e"))
        .await
        .unwrap();
    for _ in 0..20 {
        assert!(plane
            .describe_stack_status("sa-east-1", &id)
            .await
            .unwrap()
            .is_in_progress());
    }
}

// ===========================================================================
// ObjectStore contract tests
// ===========================================================================

#[tokio::test]
async fn put_then_head_and_get() {
    let store = MemoryObjectStore::new();
    assert!(!store.head_object("us-east-1", "b", "k").await.unwrap());
    store
        .put_object("us-east-1", "b", "k", b"body".to_vec())
        .await
        .unwrap();
    assert!(store.head_object("us-east-1", "b", "k").await.unwrap());
    assert_eq!(store.get_object("us-east-1", "b", "k").await.unwrap(), b"body");

    // Objects are region-scoped.
    assert!(!store.head_object("us-west-2", "b", "k").await.unwrap());
}

#[tokio::test]
async fn delete_marker_hides_object_but_is_listed() {
    let store = MemoryObjectStore::new();
    store.insert("us-east-1", "b", "k", b"v1".to_vec());
    store.insert_delete_marker("us-east-1", "b", "k");

    assert!(!store.head_object("us-east-1", "b", "k").await.unwrap());
    let err = store.get_object("us-east-1", "b", "k").await.unwrap_err();
    assert!(err.is_not_found());

    let page = store
        .list_object_versions("us-east-1", "b", None)
        .await
        .unwrap();
    assert_eq!(page.entries.len(), 2);
    assert!(page.entries.iter().any(|e| e.is_delete_marker));
}

#[tokio::test]
async fn listing_pages_survive_deletes_between_pages() {
    let store = MemoryObjectStore::new();
    store.set_page_size(2);
    for key in ["a", "b", "c", "d", "e"] {
        store.insert("us-east-1", "b", key, key.as_bytes().to_vec());
    }

    let mut seen = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = store
            .list_object_versions("us-east-1", "b", token.as_deref())
            .await
            .unwrap();
        store
            .delete_objects("us-east-1", "b", &page.entries)
            .await
            .unwrap();
        seen.extend(page.entries.into_iter().map(|e| e.key));
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
    assert_eq!(store.version_count("us-east-1", "b"), 0);
}

#[tokio::test]
async fn hidden_object_appears_after_heads() {
    let store = MemoryObjectStore::new();
    store.insert("eu-central-1", "b", "artifact.zip", b"zip".to_vec());
    store.hide_for_heads("eu-central-1", "b", "artifact.zip", 2);

    assert!(!store.head_object("eu-central-1", "b", "artifact.zip").await.unwrap());
    assert!(store.get_object("eu-central-1", "b", "artifact.zip").await.is_err());
    assert!(!store.head_object("eu-central-1", "b", "artifact.zip").await.unwrap());
    assert!(store.head_object("eu-central-1", "b", "artifact.zip").await.unwrap());
}

#[tokio::test]
async fn late_writer_lands_after_first_empty_listing() {
    let store = MemoryObjectStore::new();
    store.write_after_first_empty_listing("us-east-1", "b", "straggler");

    let first = store
        .list_object_versions("us-east-1", "b", None)
        .await
        .unwrap();
    assert!(first.entries.is_empty());
    let second = store
        .list_object_versions("us-east-1", "b", None)
        .await
        .unwrap();
    assert_eq!(second.entries.len(), 1);
    assert_eq!(store.list_calls(), 2);
}

// ===========================================================================
// LayerService / WorkflowService / NotificationSink contract tests
// ===========================================================================

#[tokio::test]
async fn layer_versions_increment_per_region_and_name() {
    let layers = MemoryLayerService::new();
    let request = PublishLayerRequest {
        layer_name: "proj-py37".to_string(),
        description: "proj".to_string(),
        content: ObjectLocation::new("bucket", "accretion/artifacts/proj/abc.zip"),
        compatible_runtimes: vec!["python3.7".to_string()],
    };

    let v1 = layers.publish_layer_version("us-east-1", &request).await.unwrap();
    let v2 = layers.publish_layer_version("us-east-1", &request).await.unwrap();
    let other = layers.publish_layer_version("us-west-2", &request).await.unwrap();

    assert_eq!((v1.version, v2.version, other.version), (1, 2, 1));
    assert_eq!(v1.arn, v2.arn);
    assert_ne!(v1.arn, other.arn);
    assert_eq!(layers.published().len(), 3);
}

#[tokio::test]
async fn duplicate_permission_statement_conflicts() {
    let layers = MemoryLayerService::new();
    let permission = LayerPermission {
        layer_arn: "arn:aws:lambda:us-east-1:000000000000:layer:proj-py37".to_string(),
        version: 1,
        statement_id: "abc".to_string(),
        principal: "*".to_string(),
        action: "lambda:GetLayerVersion".to_string(),
    };
    layers.add_layer_permission("us-east-1", &permission).await.unwrap();
    let err = layers
        .add_layer_permission("us-east-1", &permission)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict { .. }));
    assert_eq!(layers.permissions().len(), 1);
}

#[tokio::test]
async fn workflow_and_notifications_are_recorded() {
    let workflows = MemoryWorkflowService::new();
    workflows.fail_region("ca-central-1");
    let execution = workflows
        .start_workflow("us-east-1", "arn:sm", "Accretion_CLI-1", "{}")
        .await
        .unwrap();
    assert_eq!(execution, "arn:sm:Accretion_CLI-1");
    assert!(workflows
        .start_workflow("ca-central-1", "arn:sm", "Accretion_CLI-2", "{}")
        .await
        .is_err());
    assert_eq!(workflows.started().len(), 1);

    let sink = MemoryNotificationSink::new();
    sink.publish(&serde_json::json!({"Version": 1})).await.unwrap();
    assert_eq!(sink.messages(), vec![serde_json::json!({"Version": 1})]);
}
