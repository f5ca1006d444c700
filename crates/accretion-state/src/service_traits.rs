//! Service contracts consumed by the Accretion core.
//!
//! These traits define the remote collaborators:
//! - `StackControlPlane`: stack create/update/delete and inspection
//! - `ObjectStore`: versioned object storage
//! - `LayerService`: layer publication and permissions
//! - `WorkflowService`: hand a request into the asynchronous pipeline
//! - `NotificationSink`: fire-and-forget completion messages
//!
//! All traits are async, region-addressed and backend-agnostic. In-memory
//! fakes live in the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::ledger::StackId;

/// Result type for service calls
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

// ---------------------------------------------------------------------------
// StackControlPlane
// ---------------------------------------------------------------------------

/// Template parameters for a stack, kept apart from the request envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackParameters(BTreeMap<String, String>);

impl StackParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Request to create a new stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateStackRequest {
    pub stack_name: String,
    pub template_body: String,
    pub parameters: StackParameters,
    /// Template creates IAM resources.
    pub allow_iam: bool,
}

/// Request to update an existing stack in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStackRequest {
    pub stack_id: StackId,
    pub template_body: String,
    pub parameters: StackParameters,
    pub allow_iam: bool,
}

/// Stack status as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    CreateInProgress,
    CreateComplete,
    CreateFailed,
    RollbackInProgress,
    RollbackFailed,
    RollbackComplete,
    UpdateInProgress,
    UpdateCompleteCleanupInProgress,
    UpdateComplete,
    UpdateRollbackInProgress,
    UpdateRollbackFailed,
    UpdateRollbackCompleteCleanupInProgress,
    UpdateRollbackComplete,
    DeleteInProgress,
    DeleteComplete,
    DeleteFailed,
    /// A change set exists but nothing has been executed yet.
    ReviewInProgress,
}

impl StackStatus {
    /// `true` while the control plane is still working on the stack.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            StackStatus::CreateInProgress
                | StackStatus::RollbackInProgress
                | StackStatus::UpdateInProgress
                | StackStatus::UpdateCompleteCleanupInProgress
                | StackStatus::UpdateRollbackInProgress
                | StackStatus::UpdateRollbackCompleteCleanupInProgress
                | StackStatus::DeleteInProgress
                | StackStatus::ReviewInProgress
        )
    }
}

/// A resource provisioned by a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackResource {
    pub logical_id: String,
    pub physical_id: String,
    pub resource_type: String,
}

/// Stack lifecycle verbs against one region's control plane.
///
/// Every call returns once the request is accepted; completion is observed
/// through `describe_stack_status`.
#[async_trait]
pub trait StackControlPlane: Send + Sync {
    /// Start creating a stack, returning its identifier.
    async fn create_stack(
        &self,
        region: &str,
        request: &CreateStackRequest,
    ) -> ServiceResult<StackId>;

    /// Start updating a stack. Returns [`ServiceError::NoChanges`] when the
    /// desired state matches the deployed state.
    async fn update_stack(&self, region: &str, request: &UpdateStackRequest) -> ServiceResult<()>;

    /// Start deleting a stack.
    async fn delete_stack(&self, region: &str, stack_id: &StackId) -> ServiceResult<()>;

    /// Current status. [`ServiceError::StackNotFound`] once a stack is gone.
    async fn describe_stack_status(
        &self,
        region: &str,
        stack_id: &StackId,
    ) -> ServiceResult<StackStatus>;

    /// Physical id of a stack's logical resource.
    async fn describe_resource(
        &self,
        region: &str,
        stack_id: &StackId,
        logical_id: &str,
    ) -> ServiceResult<String>;

    /// All resources provisioned by a stack.
    async fn list_stack_resources(
        &self,
        region: &str,
        stack_id: &StackId,
    ) -> ServiceResult<Vec<StackResource>>;
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// Bucket + key pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// One object version or delete marker in a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub key: String,
    /// `None` for unversioned buckets.
    pub version_id: Option<String>,
    pub is_delete_marker: bool,
}

/// One page of a version listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersionPage {
    pub entries: Vec<ObjectVersion>,
    /// Continuation token for the next page, if any.
    pub next_token: Option<String>,
}

/// Versioned object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of object versions and delete markers.
    async fn list_object_versions(
        &self,
        region: &str,
        bucket: &str,
        continuation: Option<&str>,
    ) -> ServiceResult<ObjectVersionPage>;

    /// Permanently delete the given versions / delete markers.
    async fn delete_objects(
        &self,
        region: &str,
        bucket: &str,
        objects: &[ObjectVersion],
    ) -> ServiceResult<()>;

    /// `true` if the object is currently visible.
    async fn head_object(&self, region: &str, bucket: &str, key: &str) -> ServiceResult<bool>;

    /// Read an object. [`ServiceError::NotFound`] if absent.
    async fn get_object(&self, region: &str, bucket: &str, key: &str) -> ServiceResult<Vec<u8>>;

    /// Write an object.
    async fn put_object(
        &self,
        region: &str,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> ServiceResult<()>;
}

// ---------------------------------------------------------------------------
// LayerService
// ---------------------------------------------------------------------------

/// Request to publish a new layer version from an archive in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishLayerRequest {
    pub layer_name: String,
    pub description: String,
    pub content: ObjectLocation,
    pub compatible_runtimes: Vec<String>,
}

/// Identity of a published layer version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LayerVersion {
    pub arn: String,
    pub version: u64,
}

/// Permission statement attached to a layer version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerPermission {
    pub layer_arn: String,
    pub version: u64,
    pub statement_id: String,
    pub principal: String,
    pub action: String,
}

/// Layer publication.
#[async_trait]
pub trait LayerService: Send + Sync {
    async fn publish_layer_version(
        &self,
        region: &str,
        request: &PublishLayerRequest,
    ) -> ServiceResult<LayerVersion>;

    /// Returns [`ServiceError::Conflict`] if the statement id already exists.
    async fn add_layer_permission(
        &self,
        region: &str,
        permission: &LayerPermission,
    ) -> ServiceResult<()>;
}

// ---------------------------------------------------------------------------
// WorkflowService / NotificationSink
// ---------------------------------------------------------------------------

/// Asynchronous workflow entry point.
#[async_trait]
pub trait WorkflowService: Send + Sync {
    /// Start an execution of `workflow_id`, returning the execution id.
    async fn start_workflow(
        &self,
        region: &str,
        workflow_id: &str,
        execution_name: &str,
        input: &str,
    ) -> ServiceResult<String>;
}

/// Fire-and-forget delivery of completion messages.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, message: &serde_json::Value) -> ServiceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_status_uses_control_plane_spelling() {
        let json = serde_json::to_string(&StackStatus::UpdateCompleteCleanupInProgress).unwrap();
        assert_eq!(json, "\"UPDATE_COMPLETE_CLEANUP_IN_PROGRESS\"");
        let back: StackStatus = serde_json::from_str("\"CREATE_COMPLETE\"").unwrap();
        assert_eq!(back, StackStatus::CreateComplete);
    }

    #[test]
    fn rollback_and_review_states_decode() {
        let cases = [
            ("\"ROLLBACK_FAILED\"", StackStatus::RollbackFailed, false),
            ("\"UPDATE_ROLLBACK_FAILED\"", StackStatus::UpdateRollbackFailed, false),
            (
                "\"UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS\"",
                StackStatus::UpdateRollbackCompleteCleanupInProgress,
                true,
            ),
            ("\"REVIEW_IN_PROGRESS\"", StackStatus::ReviewInProgress, true),
        ];
        for (raw, expected, in_progress) in cases {
            let status: StackStatus = serde_json::from_str(raw).unwrap();
            assert_eq!(status, expected);
            assert_eq!(status.is_in_progress(), in_progress, "{raw}");
        }
    }

    #[test]
    fn parameters_are_ordered_and_independent_of_request() {
        let params = StackParameters::new()
            .with("WorkersS3Key", "accretion/workers/w.zip")
            .with("ArtifactBucketName", "bucket");
        let keys: Vec<_> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["ArtifactBucketName", "WorkersS3Key"]);
        assert_eq!(params.get("ArtifactBucketName"), Some("bucket"));
        assert!(params.get("StackName").is_none());
    }
}
