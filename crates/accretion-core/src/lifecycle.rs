//! Stack Lifecycle Client: idempotent create/update/destroy against one
//! region's control plane.
//!
//! Every verb blocks until the control plane reports a terminal status,
//! polling at most `max_polls` times. Destroy empties the stack's buckets
//! first, because the control plane refuses to delete non-empty buckets.

use std::sync::Arc;

use accretion_state::{
    CreateStackRequest, ObjectStore, ObjectVersion, RegionDeployment, ServiceError,
    StackControlPlane, StackId, StackParameters, StackSlot, StackStatus, UpdateStackRequest,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::LifecycleConfig;
use crate::domain::{AccretionError, Result};
use crate::obs;

/// Resource type whose contents must be removed before stack deletion.
pub const BUCKET_RESOURCE_TYPE: &str = "AWS::S3::Bucket";

/// Prefix of generated stack names.
pub const STACK_NAME_PREFIX: &str = "Accretion";

/// Desired state of one stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSpec {
    pub template_body: String,
    pub parameters: StackParameters,
    /// The template creates IAM resources.
    pub allow_iam: bool,
}

impl StackSpec {
    pub fn new(template_body: impl Into<String>) -> Self {
        Self {
            template_body: template_body.into(),
            parameters: StackParameters::new(),
            allow_iam: false,
        }
    }

    pub fn with_parameters(mut self, parameters: StackParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_iam(mut self) -> Self {
        self.allow_iam = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertAction {
    Created,
    Updated,
    /// The update matched the deployed state.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub stack_id: StackId,
    pub action: UpsertAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitTarget {
    Create,
    Update,
    Delete,
}

impl WaitTarget {
    fn success(self) -> StackStatus {
        match self {
            WaitTarget::Create => StackStatus::CreateComplete,
            WaitTarget::Update => StackStatus::UpdateComplete,
            WaitTarget::Delete => StackStatus::DeleteComplete,
        }
    }
}

/// Generate a globally unique stack name.
pub fn new_stack_name() -> String {
    format!("{STACK_NAME_PREFIX}-{}", Uuid::new_v4())
}

/// Lifecycle verbs for stacks in any region.
#[derive(Clone)]
pub struct StackLifecycleClient {
    control: Arc<dyn StackControlPlane>,
    objects: Arc<dyn ObjectStore>,
    config: LifecycleConfig,
}

impl StackLifecycleClient {
    pub fn new(
        control: Arc<dyn StackControlPlane>,
        objects: Arc<dyn ObjectStore>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            control,
            objects,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn control(&self) -> &Arc<dyn StackControlPlane> {
        &self.control
    }

    /// Create the stack if `current` is `None`, otherwise update it.
    pub async fn upsert(
        &self,
        region: &str,
        current: Option<&StackId>,
        spec: &StackSpec,
    ) -> Result<UpsertOutcome> {
        match current {
            Some(stack_id) => self.update(region, None, stack_id, spec).await,
            None => {
                let stack_id = self.start_create(region, spec).await?;
                self.wait_for(region, &stack_id, WaitTarget::Create).await?;
                obs::emit_stack_created(region, None, &stack_id);
                Ok(UpsertOutcome {
                    stack_id,
                    action: UpsertAction::Created,
                })
            }
        }
    }

    /// [`upsert`](Self::upsert) against a ledger slot.
    ///
    /// A new stack's identifier is assigned to the slot as soon as the
    /// create is accepted, so a stack that later fails to settle is still
    /// tracked and can be destroyed.
    pub async fn upsert_slot(
        &self,
        region: &str,
        record: &mut RegionDeployment,
        slot: StackSlot,
        spec: &StackSpec,
    ) -> Result<UpsertOutcome> {
        if let Some(stack_id) = record.get(slot).cloned() {
            return self.update(region, Some(slot), &stack_id, spec).await;
        }

        let stack_id = self.start_create(region, spec).await?;
        record.assign(region, slot, stack_id.clone())?;
        self.wait_for(region, &stack_id, WaitTarget::Create).await?;
        obs::emit_stack_created(region, Some(slot), &stack_id);
        Ok(UpsertOutcome {
            stack_id,
            action: UpsertAction::Created,
        })
    }

    async fn start_create(&self, region: &str, spec: &StackSpec) -> Result<StackId> {
        let stack_name = new_stack_name();
        let request = CreateStackRequest {
            stack_name: stack_name.clone(),
            template_body: spec.template_body.clone(),
            parameters: spec.parameters.clone(),
            allow_iam: spec.allow_iam,
        };
        debug!(region = %region, stack = %stack_name, "creating stack");
        self.control
            .create_stack(region, &request)
            .await
            .map_err(|e| provisioning_error(region, &stack_name, "CreateStack", e))
    }

    async fn update(
        &self,
        region: &str,
        slot: Option<StackSlot>,
        stack_id: &StackId,
        spec: &StackSpec,
    ) -> Result<UpsertOutcome> {
        let request = UpdateStackRequest {
            stack_id: stack_id.clone(),
            template_body: spec.template_body.clone(),
            parameters: spec.parameters.clone(),
            allow_iam: spec.allow_iam,
        };
        debug!(region = %region, stack_id = %stack_id, "updating stack");
        match self.control.update_stack(region, &request).await {
            Ok(()) => {}
            Err(ServiceError::NoChanges { .. }) => {
                obs::emit_stack_unchanged(region, slot, stack_id);
                return Ok(UpsertOutcome {
                    stack_id: stack_id.clone(),
                    action: UpsertAction::Unchanged,
                });
            }
            Err(e) => {
                return Err(provisioning_error(
                    region,
                    stack_id.as_str(),
                    "UpdateStack",
                    e,
                ))
            }
        }

        self.wait_for(region, stack_id, WaitTarget::Update).await?;
        obs::emit_stack_updated(region, slot, stack_id);
        Ok(UpsertOutcome {
            stack_id: stack_id.clone(),
            action: UpsertAction::Updated,
        })
    }

    /// Empty every bucket the stack owns, then delete the stack and wait.
    ///
    /// A stack that no longer exists counts as destroyed.
    pub async fn destroy(&self, region: &str, stack_id: &StackId) -> Result<()> {
        let resources = match self.control.list_stack_resources(region, stack_id).await {
            Ok(resources) => resources,
            Err(ServiceError::StackNotFound { .. }) => {
                info!(region = %region, stack_id = %stack_id, "stack already gone");
                obs::emit_stack_destroyed(region, stack_id);
                return Ok(());
            }
            Err(e) => {
                return Err(provisioning_error(
                    region,
                    stack_id.as_str(),
                    "ListStackResources",
                    e,
                ))
            }
        };

        for bucket in resources
            .iter()
            .filter(|r| r.resource_type == BUCKET_RESOURCE_TYPE)
        {
            self.empty_bucket(region, &bucket.physical_id).await?;
        }

        match self.control.delete_stack(region, stack_id).await {
            Ok(()) | Err(ServiceError::StackNotFound { .. }) => {}
            Err(e) => {
                return Err(provisioning_error(
                    region,
                    stack_id.as_str(),
                    "DeleteStack",
                    e,
                ))
            }
        }
        self.wait_for(region, stack_id, WaitTarget::Delete).await?;
        obs::emit_stack_destroyed(region, stack_id);
        Ok(())
    }

    /// Destroy the stack in `slot`, then release the slot. Returns the
    /// destroyed identifier, or `None` if the slot was unset.
    pub async fn destroy_slot(
        &self,
        region: &str,
        record: &mut RegionDeployment,
        slot: StackSlot,
    ) -> Result<Option<StackId>> {
        let Some(stack_id) = record.get(slot).cloned() else {
            return Ok(None);
        };
        self.destroy(region, &stack_id).await?;
        Ok(record.release(slot))
    }

    /// Permanently delete every object version and delete marker.
    ///
    /// Runs full listing passes until `empty_confirmations` consecutive
    /// passes find nothing; a single empty page is not proof of an empty
    /// bucket. Returns the number of entries deleted. A bucket that does not
    /// exist counts as empty.
    pub async fn empty_bucket(&self, region: &str, bucket: &str) -> Result<usize> {
        let mut deleted = 0usize;
        let mut passes = 0u32;
        let mut empty_streak = 0u32;

        while empty_streak < self.config.empty_confirmations {
            if passes >= self.config.max_empty_passes {
                return Err(AccretionError::Provisioning {
                    region: region.to_string(),
                    stack: bucket.to_string(),
                    reason: format!(
                        "bucket still not empty after {} listing passes",
                        self.config.max_empty_passes
                    ),
                });
            }
            passes += 1;

            let found = match self.delete_pass(region, bucket).await {
                Ok(found) => found,
                Err(ServiceError::NotFound { .. }) => {
                    debug!(region = %region, bucket = %bucket, "bucket does not exist");
                    return Ok(deleted);
                }
                Err(e) => return Err(AccretionError::service("EmptyBucket", e)),
            };

            if found == 0 {
                empty_streak += 1;
            } else {
                empty_streak = 0;
                deleted += found;
            }
        }

        obs::emit_bucket_emptied(region, bucket, deleted, passes);
        Ok(deleted)
    }

    /// One full listing of the bucket, deleting each page as it arrives.
    async fn delete_pass(&self, region: &str, bucket: &str) -> accretion_state::ServiceResult<usize> {
        let mut found = 0usize;
        let mut token: Option<String> = None;
        loop {
            let page = self
                .objects
                .list_object_versions(region, bucket, token.as_deref())
                .await?;
            if !page.entries.is_empty() {
                found += page.entries.len();
                let batch: Vec<ObjectVersion> = page.entries;
                self.objects.delete_objects(region, bucket, &batch).await?;
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(found),
            }
        }
    }

    async fn wait_for(&self, region: &str, stack_id: &StackId, target: WaitTarget) -> Result<()> {
        for poll in 1..=self.config.max_polls {
            match self.control.describe_stack_status(region, stack_id).await {
                Ok(status) if status.is_in_progress() => {
                    debug!(
                        region = %region,
                        stack_id = %stack_id,
                        status = ?status,
                        poll = poll,
                        "stack still in progress"
                    );
                }
                Ok(status) if status == target.success() => return Ok(()),
                Ok(status) => {
                    return Err(AccretionError::Provisioning {
                        region: region.to_string(),
                        stack: stack_id.to_string(),
                        reason: format!("stack settled in {status:?}"),
                    })
                }
                Err(ServiceError::StackNotFound { .. }) if target == WaitTarget::Delete => {
                    return Ok(())
                }
                Err(e) => {
                    return Err(provisioning_error(
                        region,
                        stack_id.as_str(),
                        "DescribeStacks",
                        e,
                    ))
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        Err(AccretionError::ProvisioningTimeout {
            region: region.to_string(),
            stack: stack_id.to_string(),
            polls: self.config.max_polls,
        })
    }
}

/// Control-plane rejections are provisioning failures; transport trouble
/// stays a service error.
fn provisioning_error(region: &str, stack: &str, operation: &str, err: ServiceError) -> AccretionError {
    match err {
        ServiceError::Transport(_) | ServiceError::InvalidResponse(_) => {
            AccretionError::service(operation, err)
        }
        other => AccretionError::Provisioning {
            region: region.to_string(),
            stack: stack.to_string(),
            reason: other.to_string(),
        },
    }
}
