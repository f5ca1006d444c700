//! In-memory fakes for the service traits (testing only)
//!
//! Every fake is region-aware and supports fault injection:
//! - `MemoryControlPlane`: failing, stalled and rolling-back regions; "no
//!   changes" updates; bucket-aware deletes when linked to an object store
//! - `MemoryObjectStore`: versioned buckets, paged listings, delayed
//!   visibility and late writers
//! - `MemoryLayerService`, `MemoryWorkflowService`, `MemoryNotificationSink`
//! - `MemoryLedgerStore`: byte-level ledger persistence

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{ServiceError, StateError};
use crate::ledger::StackId;
use crate::service_traits::*;
use crate::store::LedgerStore;
use crate::StateResult;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn region_down(region: &str) -> ServiceError {
    ServiceError::Transport(format!("region {region} unavailable"))
}

// ---------------------------------------------------------------------------
// MemoryControlPlane
// ---------------------------------------------------------------------------

/// A control-plane verb as observed by [`MemoryControlPlane`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneCall {
    Create { region: String, stack_name: String },
    Update { region: String, stack_id: StackId },
    Delete { region: String, stack_id: StackId },
}

#[derive(Debug, Clone)]
struct FakeStack {
    template_body: String,
    parameters: StackParameters,
    allow_iam: bool,
    status: StackStatus,
    polls_left: u32,
    resources: Vec<StackResource>,
}

#[derive(Debug, Default)]
struct ControlPlaneState {
    stacks: HashMap<(String, StackId), FakeStack>,
    calls: Vec<ControlPlaneCall>,
    failing_regions: HashSet<String>,
    stalled_regions: HashSet<String>,
    rollback_regions: HashSet<String>,
    settle_polls: u32,
}

/// In-memory control plane.
///
/// Stacks settle after a configurable number of status polls. Resources are
/// derived from the `Resources` map of a JSON template body; bucket
/// resources get the physical id `<stack-name>-<logical-id>` in lowercase.
#[derive(Debug, Default)]
pub struct MemoryControlPlane {
    state: Mutex<ControlPlaneState>,
    objects: Option<Arc<MemoryObjectStore>>,
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deletes end in `DELETE_FAILED` while a stack's buckets still hold
    /// objects in `objects`.
    pub fn with_object_store(objects: Arc<MemoryObjectStore>) -> Self {
        Self {
            state: Mutex::default(),
            objects: Some(objects),
        }
    }

    /// Number of in-progress polls before a stack settles.
    pub fn set_settle_polls(&self, polls: u32) {
        lock(&self.state).settle_polls = polls;
    }

    /// Every call against `region` is rejected at the transport level.
    pub fn fail_region(&self, region: &str) {
        lock(&self.state).failing_regions.insert(region.to_string());
    }

    /// Stacks in `region` never leave their in-progress status.
    pub fn stall_region(&self, region: &str) {
        lock(&self.state).stalled_regions.insert(region.to_string());
    }

    /// Creates and updates in `region` roll back instead of completing.
    pub fn roll_back_region(&self, region: &str) {
        lock(&self.state).rollback_regions.insert(region.to_string());
    }

    /// Seed a completed stack, returning its identifier.
    pub fn insert_stack(&self, region: &str, stack_name: &str, template_body: &str) -> StackId {
        let stack_id = stack_id_for(region, stack_name);
        let stack = FakeStack {
            template_body: template_body.to_string(),
            parameters: StackParameters::new(),
            allow_iam: false,
            status: StackStatus::CreateComplete,
            polls_left: 0,
            resources: derive_resources(stack_name, template_body),
        };
        lock(&self.state)
            .stacks
            .insert((region.to_string(), stack_id.clone()), stack);
        stack_id
    }

    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        lock(&self.state).calls.clone()
    }

    pub fn status_of(&self, region: &str, stack_id: &StackId) -> Option<StackStatus> {
        lock(&self.state)
            .stacks
            .get(&(region.to_string(), stack_id.clone()))
            .map(|s| s.status)
    }

    pub fn parameters_of(&self, region: &str, stack_id: &StackId) -> Option<StackParameters> {
        lock(&self.state)
            .stacks
            .get(&(region.to_string(), stack_id.clone()))
            .map(|s| s.parameters.clone())
    }

    /// Stacks that exist in `region`, including ones still in progress.
    pub fn live_stacks(&self, region: &str) -> Vec<StackId> {
        let mut ids: Vec<StackId> = lock(&self.state)
            .stacks
            .keys()
            .filter(|(r, _)| r == region)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn buckets_hold_objects(&self, region: &str, resources: &[StackResource]) -> bool {
        let Some(objects) = &self.objects else {
            return false;
        };
        resources
            .iter()
            .filter(|r| r.resource_type == BUCKET_RESOURCE_TYPE)
            .any(|r| objects.version_count(region, &r.physical_id) > 0)
    }
}

const BUCKET_RESOURCE_TYPE: &str = "AWS::S3::Bucket";

fn stack_id_for(region: &str, stack_name: &str) -> StackId {
    StackId::new(format!(
        "arn:aws:cloudformation:{region}:000000000000:stack/{stack_name}"
    ))
}

fn derive_resources(stack_name: &str, template_body: &str) -> Vec<StackResource> {
    let Ok(template) = serde_json::from_str::<serde_json::Value>(template_body) else {
        return Vec::new();
    };
    let Some(resources) = template.get("Resources").and_then(|r| r.as_object()) else {
        return Vec::new();
    };
    resources
        .iter()
        .map(|(logical_id, body)| StackResource {
            logical_id: logical_id.clone(),
            physical_id: format!("{stack_name}-{logical_id}").to_lowercase(),
            resource_type: body
                .get("Type")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
        })
        .collect()
}

fn stack_not_found(stack_id: &StackId) -> ServiceError {
    ServiceError::StackNotFound {
        stack_id: stack_id.to_string(),
    }
}

#[async_trait]
impl StackControlPlane for MemoryControlPlane {
    async fn create_stack(
        &self,
        region: &str,
        request: &CreateStackRequest,
    ) -> ServiceResult<StackId> {
        let mut state = lock(&self.state);
        if state.failing_regions.contains(region) {
            return Err(region_down(region));
        }
        state.calls.push(ControlPlaneCall::Create {
            region: region.to_string(),
            stack_name: request.stack_name.clone(),
        });

        let stack_id = stack_id_for(region, &request.stack_name);
        let key = (region.to_string(), stack_id.clone());
        if state.stacks.contains_key(&key) {
            return Err(ServiceError::Conflict {
                operation: "CreateStack".to_string(),
                message: format!("stack {} already exists", request.stack_name),
            });
        }
        let stack = FakeStack {
            template_body: request.template_body.clone(),
            parameters: request.parameters.clone(),
            allow_iam: request.allow_iam,
            status: StackStatus::CreateInProgress,
            polls_left: state.settle_polls,
            resources: derive_resources(&request.stack_name, &request.template_body),
        };
        state.stacks.insert(key, stack);
        Ok(stack_id)
    }

    async fn update_stack(&self, region: &str, request: &UpdateStackRequest) -> ServiceResult<()> {
        let mut state = lock(&self.state);
        if state.failing_regions.contains(region) {
            return Err(region_down(region));
        }
        state.calls.push(ControlPlaneCall::Update {
            region: region.to_string(),
            stack_id: request.stack_id.clone(),
        });

        let settle_polls = state.settle_polls;
        let stack = state
            .stacks
            .get_mut(&(region.to_string(), request.stack_id.clone()))
            .ok_or_else(|| stack_not_found(&request.stack_id))?;
        if stack.status.is_in_progress() {
            return Err(ServiceError::rejected(
                "UpdateStack",
                format!("stack is in {:?} state", stack.status),
            ));
        }
        if stack.template_body == request.template_body
            && stack.parameters == request.parameters
            && stack.allow_iam == request.allow_iam
        {
            return Err(ServiceError::NoChanges {
                stack_id: request.stack_id.to_string(),
            });
        }

        let stack_name = request
            .stack_id
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        stack.template_body = request.template_body.clone();
        stack.parameters = request.parameters.clone();
        stack.allow_iam = request.allow_iam;
        stack.resources = derive_resources(&stack_name, &request.template_body);
        stack.status = StackStatus::UpdateInProgress;
        stack.polls_left = settle_polls;
        Ok(())
    }

    async fn delete_stack(&self, region: &str, stack_id: &StackId) -> ServiceResult<()> {
        let mut state = lock(&self.state);
        if state.failing_regions.contains(region) {
            return Err(region_down(region));
        }
        state.calls.push(ControlPlaneCall::Delete {
            region: region.to_string(),
            stack_id: stack_id.clone(),
        });

        let settle_polls = state.settle_polls;
        let stack = state
            .stacks
            .get_mut(&(region.to_string(), stack_id.clone()))
            .ok_or_else(|| stack_not_found(stack_id))?;
        stack.status = StackStatus::DeleteInProgress;
        stack.polls_left = settle_polls;
        Ok(())
    }

    async fn describe_stack_status(
        &self,
        region: &str,
        stack_id: &StackId,
    ) -> ServiceResult<StackStatus> {
        let (status, polls_left, resources, stalled, rollback) = {
            let state = lock(&self.state);
            if state.failing_regions.contains(region) {
                return Err(region_down(region));
            }
            let stack = state
                .stacks
                .get(&(region.to_string(), stack_id.clone()))
                .ok_or_else(|| stack_not_found(stack_id))?;
            (
                stack.status,
                stack.polls_left,
                stack.resources.clone(),
                state.stalled_regions.contains(region),
                state.rollback_regions.contains(region),
            )
        };

        if !status.is_in_progress() || stalled {
            return Ok(status);
        }

        let key = (region.to_string(), stack_id.clone());
        if polls_left > 0 {
            let mut state = lock(&self.state);
            if let Some(stack) = state.stacks.get_mut(&key) {
                stack.polls_left -= 1;
            }
            return Ok(status);
        }

        let settled = match status {
            StackStatus::CreateInProgress if rollback => StackStatus::RollbackComplete,
            StackStatus::CreateInProgress => StackStatus::CreateComplete,
            StackStatus::UpdateInProgress if rollback => StackStatus::UpdateRollbackComplete,
            StackStatus::UpdateInProgress | StackStatus::UpdateCompleteCleanupInProgress => {
                StackStatus::UpdateComplete
            }
            StackStatus::DeleteInProgress if self.buckets_hold_objects(region, &resources) => {
                StackStatus::DeleteFailed
            }
            StackStatus::DeleteInProgress => StackStatus::DeleteComplete,
            StackStatus::RollbackInProgress => StackStatus::RollbackComplete,
            StackStatus::UpdateRollbackInProgress
            | StackStatus::UpdateRollbackCompleteCleanupInProgress => {
                StackStatus::UpdateRollbackComplete
            }
            other => other,
        };

        let mut state = lock(&self.state);
        if settled == StackStatus::DeleteComplete {
            state.stacks.remove(&key);
        } else if let Some(stack) = state.stacks.get_mut(&key) {
            stack.status = settled;
        }
        Ok(settled)
    }

    async fn describe_resource(
        &self,
        region: &str,
        stack_id: &StackId,
        logical_id: &str,
    ) -> ServiceResult<String> {
        let resources = self.list_stack_resources(region, stack_id).await?;
        resources
            .into_iter()
            .find(|r| r.logical_id == logical_id)
            .map(|r| r.physical_id)
            .ok_or_else(|| ServiceError::NotFound {
                what: format!("resource {logical_id} in stack {stack_id}"),
            })
    }

    async fn list_stack_resources(
        &self,
        region: &str,
        stack_id: &StackId,
    ) -> ServiceResult<Vec<StackResource>> {
        let state = lock(&self.state);
        if state.failing_regions.contains(region) {
            return Err(region_down(region));
        }
        state
            .stacks
            .get(&(region.to_string(), stack_id.clone()))
            .map(|s| s.resources.clone())
            .ok_or_else(|| stack_not_found(stack_id))
    }
}

// ---------------------------------------------------------------------------
// MemoryObjectStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredVersion {
    seq: u64,
    key: String,
    version_id: String,
    /// `None` marks a delete marker.
    body: Option<Vec<u8>>,
}

type BucketKey = (String, String);

#[derive(Debug)]
struct ObjectStoreState {
    buckets: HashMap<BucketKey, Vec<StoredVersion>>,
    next_seq: u64,
    hidden: HashMap<(String, String, String), u32>,
    late_writes: HashMap<BucketKey, Vec<String>>,
    failing_regions: HashSet<String>,
    page_size: usize,
    list_calls: usize,
    put_calls: usize,
}

impl Default for ObjectStoreState {
    fn default() -> Self {
        Self {
            buckets: HashMap::new(),
            next_seq: 0,
            hidden: HashMap::new(),
            late_writes: HashMap::new(),
            failing_regions: HashSet::new(),
            page_size: 1000,
            list_calls: 0,
            put_calls: 0,
        }
    }
}

impl ObjectStoreState {
    fn push(&mut self, region: &str, bucket: &str, key: &str, body: Option<Vec<u8>>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.buckets
            .entry((region.to_string(), bucket.to_string()))
            .or_default()
            .push(StoredVersion {
                seq,
                key: key.to_string(),
                version_id: format!("v{seq}"),
                body,
            });
    }

    fn latest(&self, region: &str, bucket: &str, key: &str) -> Option<&StoredVersion> {
        self.buckets
            .get(&(region.to_string(), bucket.to_string()))?
            .iter()
            .rev()
            .find(|v| v.key == key)
    }

    fn is_hidden(&self, region: &str, bucket: &str, key: &str) -> bool {
        self.hidden
            .get(&(region.to_string(), bucket.to_string(), key.to_string()))
            .is_some_and(|remaining| *remaining > 0)
    }
}

/// In-memory versioned object store, keyed by region and bucket.
///
/// Listing continuation tokens are sequence cursors, so deleting entries
/// between pages never skips anything.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<ObjectStoreState>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum entries per listing page.
    pub fn set_page_size(&self, page_size: usize) {
        lock(&self.state).page_size = page_size.max(1);
    }

    pub fn fail_region(&self, region: &str) {
        lock(&self.state).failing_regions.insert(region.to_string());
    }

    /// Write an object directly, bypassing call accounting.
    pub fn insert(&self, region: &str, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        lock(&self.state).push(region, bucket, key, Some(body.into()));
    }

    /// Add a delete marker on top of `key`.
    pub fn insert_delete_marker(&self, region: &str, bucket: &str, key: &str) {
        lock(&self.state).push(region, bucket, key, None);
    }

    /// `key` stays invisible to `head_object` and `get_object` until it has
    /// been headed `heads` times. Models replication lag.
    pub fn hide_for_heads(&self, region: &str, bucket: &str, key: &str, heads: u32) {
        lock(&self.state).hidden.insert(
            (region.to_string(), bucket.to_string(), key.to_string()),
            heads,
        );
    }

    /// Write `key` right after the first listing that observes the bucket
    /// empty. Models a writer racing the emptying loop.
    pub fn write_after_first_empty_listing(&self, region: &str, bucket: &str, key: &str) {
        lock(&self.state)
            .late_writes
            .entry((region.to_string(), bucket.to_string()))
            .or_default()
            .push(key.to_string());
    }

    /// Versions plus delete markers currently stored in a bucket.
    pub fn version_count(&self, region: &str, bucket: &str) -> usize {
        lock(&self.state)
            .buckets
            .get(&(region.to_string(), bucket.to_string()))
            .map_or(0, Vec::len)
    }

    /// Keys with a visible current version.
    pub fn keys(&self, region: &str, bucket: &str) -> Vec<String> {
        let state = lock(&self.state);
        let mut keys: Vec<String> = state
            .buckets
            .get(&(region.to_string(), bucket.to_string()))
            .into_iter()
            .flatten()
            .map(|v| v.key.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|k| {
                state
                    .latest(region, bucket, k)
                    .is_some_and(|v| v.body.is_some())
            })
            .collect();
        keys.sort();
        keys
    }

    pub fn list_calls(&self) -> usize {
        lock(&self.state).list_calls
    }

    pub fn put_calls(&self) -> usize {
        lock(&self.state).put_calls
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_object_versions(
        &self,
        region: &str,
        bucket: &str,
        continuation: Option<&str>,
    ) -> ServiceResult<ObjectVersionPage> {
        let mut state = lock(&self.state);
        if state.failing_regions.contains(region) {
            return Err(region_down(region));
        }
        state.list_calls += 1;

        let from = match continuation {
            Some(token) => token.parse::<u64>().map_err(|_| {
                ServiceError::rejected("ListObjectVersions", format!("bad token {token}"))
            })?,
            None => 0,
        };
        let bucket_key = (region.to_string(), bucket.to_string());
        let remaining: Vec<StoredVersion> = state
            .buckets
            .get(&bucket_key)
            .into_iter()
            .flatten()
            .filter(|v| v.seq >= from)
            .cloned()
            .collect();

        let page_size = state.page_size;
        let next_token = remaining.get(page_size).map(|v| v.seq.to_string());
        let entries: Vec<ObjectVersion> = remaining
            .into_iter()
            .take(page_size)
            .map(|v| ObjectVersion {
                key: v.key,
                version_id: Some(v.version_id),
                is_delete_marker: v.body.is_none(),
            })
            .collect();

        if entries.is_empty() && continuation.is_none() {
            if let Some(keys) = state.late_writes.remove(&bucket_key) {
                for key in keys {
                    state.push(region, bucket, &key, Some(b"late".to_vec()));
                }
            }
        }

        Ok(ObjectVersionPage {
            entries,
            next_token,
        })
    }

    async fn delete_objects(
        &self,
        region: &str,
        bucket: &str,
        objects: &[ObjectVersion],
    ) -> ServiceResult<()> {
        let mut state = lock(&self.state);
        if state.failing_regions.contains(region) {
            return Err(region_down(region));
        }
        if let Some(versions) = state
            .buckets
            .get_mut(&(region.to_string(), bucket.to_string()))
        {
            versions.retain(|stored| {
                !objects.iter().any(|o| {
                    o.key == stored.key
                        && o.version_id.as_deref().map_or(true, |v| v == stored.version_id)
                })
            });
        }
        Ok(())
    }

    async fn head_object(&self, region: &str, bucket: &str, key: &str) -> ServiceResult<bool> {
        let mut state = lock(&self.state);
        if state.failing_regions.contains(region) {
            return Err(region_down(region));
        }
        let hidden_key = (region.to_string(), bucket.to_string(), key.to_string());
        if let Some(remaining) = state.hidden.get_mut(&hidden_key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(false);
            }
        }
        Ok(state
            .latest(region, bucket, key)
            .is_some_and(|v| v.body.is_some()))
    }

    async fn get_object(&self, region: &str, bucket: &str, key: &str) -> ServiceResult<Vec<u8>> {
        let state = lock(&self.state);
        if state.failing_regions.contains(region) {
            return Err(region_down(region));
        }
        if state.is_hidden(region, bucket, key) {
            return Err(ServiceError::NotFound {
                what: format!("{bucket}/{key}"),
            });
        }
        state
            .latest(region, bucket, key)
            .and_then(|v| v.body.clone())
            .ok_or_else(|| ServiceError::NotFound {
                what: format!("{bucket}/{key}"),
            })
    }

    async fn put_object(
        &self,
        region: &str,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> ServiceResult<()> {
        let mut state = lock(&self.state);
        if state.failing_regions.contains(region) {
            return Err(region_down(region));
        }
        state.put_calls += 1;
        state.push(region, bucket, key, Some(body));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryLayerService
// ---------------------------------------------------------------------------

/// A layer version published through [`MemoryLayerService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedLayer {
    pub region: String,
    pub request: PublishLayerRequest,
    pub version: LayerVersion,
}

#[derive(Debug, Default)]
struct LayerServiceState {
    versions: HashMap<(String, String), u64>,
    published: Vec<PublishedLayer>,
    permissions: Vec<(String, LayerPermission)>,
    failing_regions: HashSet<String>,
}

/// In-memory layer service with per-region, per-name version counters.
#[derive(Debug, Default)]
pub struct MemoryLayerService {
    state: Mutex<LayerServiceState>,
}

impl MemoryLayerService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_region(&self, region: &str) {
        lock(&self.state).failing_regions.insert(region.to_string());
    }

    pub fn published(&self) -> Vec<PublishedLayer> {
        lock(&self.state).published.clone()
    }

    pub fn permissions(&self) -> Vec<LayerPermission> {
        lock(&self.state)
            .permissions
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl LayerService for MemoryLayerService {
    async fn publish_layer_version(
        &self,
        region: &str,
        request: &PublishLayerRequest,
    ) -> ServiceResult<LayerVersion> {
        let mut state = lock(&self.state);
        if state.failing_regions.contains(region) {
            return Err(region_down(region));
        }
        let counter = state
            .versions
            .entry((region.to_string(), request.layer_name.clone()))
            .or_insert(0);
        *counter += 1;
        let version = LayerVersion {
            arn: format!(
                "arn:aws:lambda:{region}:000000000000:layer:{}",
                request.layer_name
            ),
            version: *counter,
        };
        state.published.push(PublishedLayer {
            region: region.to_string(),
            request: request.clone(),
            version: version.clone(),
        });
        Ok(version)
    }

    async fn add_layer_permission(
        &self,
        region: &str,
        permission: &LayerPermission,
    ) -> ServiceResult<()> {
        let mut state = lock(&self.state);
        if state.failing_regions.contains(region) {
            return Err(region_down(region));
        }
        let duplicate = state.permissions.iter().any(|(r, p)| {
            r == region
                && p.layer_arn == permission.layer_arn
                && p.version == permission.version
                && p.statement_id == permission.statement_id
        });
        if duplicate {
            return Err(ServiceError::Conflict {
                operation: "AddLayerVersionPermission".to_string(),
                message: format!("statement {} already exists", permission.statement_id),
            });
        }
        state
            .permissions
            .push((region.to_string(), permission.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryWorkflowService
// ---------------------------------------------------------------------------

/// A workflow execution started through [`MemoryWorkflowService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedWorkflow {
    pub region: String,
    pub workflow_id: String,
    pub execution_name: String,
    pub input: String,
}

#[derive(Debug, Default)]
pub struct MemoryWorkflowService {
    started: Mutex<Vec<StartedWorkflow>>,
    failing_regions: Mutex<HashSet<String>>,
}

impl MemoryWorkflowService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_region(&self, region: &str) {
        lock(&self.failing_regions).insert(region.to_string());
    }

    pub fn started(&self) -> Vec<StartedWorkflow> {
        lock(&self.started).clone()
    }
}

#[async_trait]
impl WorkflowService for MemoryWorkflowService {
    async fn start_workflow(
        &self,
        region: &str,
        workflow_id: &str,
        execution_name: &str,
        input: &str,
    ) -> ServiceResult<String> {
        if lock(&self.failing_regions).contains(region) {
            return Err(region_down(region));
        }
        lock(&self.started).push(StartedWorkflow {
            region: region.to_string(),
            workflow_id: workflow_id.to_string(),
            execution_name: execution_name.to_string(),
            input: input.to_string(),
        });
        Ok(format!("{workflow_id}:{execution_name}"))
    }
}

// ---------------------------------------------------------------------------
// MemoryNotificationSink
// ---------------------------------------------------------------------------

/// Collects published messages.
#[derive(Debug, Default)]
pub struct MemoryNotificationSink {
    messages: Mutex<Vec<serde_json::Value>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<serde_json::Value> {
        lock(&self.messages).clone()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn publish(&self, message: &serde_json::Value) -> ServiceResult<()> {
        lock(&self.messages).push(message.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryLedgerStore
// ---------------------------------------------------------------------------

/// Ledger bytes held in memory.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    bytes: Mutex<Option<Vec<u8>>>,
    writes: Mutex<usize>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes.into())),
            writes: Mutex::new(0),
        }
    }

    pub fn bytes(&self) -> Option<Vec<u8>> {
        lock(&self.bytes).clone()
    }

    pub fn write_count(&self) -> usize {
        *lock(&self.writes)
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn read(&self) -> StateResult<Option<Vec<u8>>> {
        Ok(lock(&self.bytes).clone())
    }

    fn write(&self, bytes: &[u8]) -> StateResult<()> {
        if bytes.is_empty() {
            return Err(StateError::Serialization("refusing empty ledger".to_string()));
        }
        *lock(&self.bytes) = Some(bytes.to_vec());
        *lock(&self.writes) += 1;
        Ok(())
    }

    fn location(&self) -> String {
        "memory://deployment.json".to_string()
    }
}
