//! Deployment commands.
//!
//! Each command loads the ledger once, runs one region fan-out and saves
//! the ledger once. Templates are resolved before any region is touched so
//! a missing template aborts the command without side effects.

use std::sync::Arc;

use accretion_state::{
    DeploymentLedger, LedgerStore, LoadMode, ObjectStore, RegionDeployment, StackControlPlane,
    StackParameters, StackSlot, WorkflowService,
};
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::config::{FanOutConfig, LifecycleConfig};
use crate::domain::{AccretionError, LayerRequest, Result, ValidatedLayerRequest, WORKERS_PREFIX};
use crate::fanout::{FanOutReport, RegionFanOut, RegionOperation, SlotChange};
use crate::lifecycle::{StackLifecycleClient, StackSpec, UpsertAction, UpsertOutcome};
use crate::template::TemplateProvider;

/// Logical id of the bucket in the `Core` stack that builder code is
/// deployed from.
pub const SOURCE_BUCKET_LOGICAL_ID: &str = "SourceBucket";

/// Logical id of the workflow in the `ArtifactBuilder` stack that builds
/// artifacts from layer requests.
pub const ARTIFACT_BUILDER_WORKFLOW_LOGICAL_ID: &str = "ArtifactBuilderStateMachine";

/// Prefix of workflow executions started by operators.
pub const CLI_EXECUTION_PREFIX: &str = "Accretion_CLI";

/// Remote services used by deployment commands.
#[derive(Clone)]
pub struct Services {
    pub control: Arc<dyn StackControlPlane>,
    pub objects: Arc<dyn ObjectStore>,
    pub workflows: Arc<dyn WorkflowService>,
}

/// Packaged builder code uploaded to every region's source bucket.
#[derive(Debug, Clone)]
pub struct WorkersBundle {
    bytes: Arc<Vec<u8>>,
}

impl WorkersBundle {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn upsert_change(slot: StackSlot, outcome: UpsertOutcome) -> SlotChange {
    let stack_id = outcome.stack_id;
    match outcome.action {
        UpsertAction::Created => SlotChange::Created { slot, stack_id },
        UpsertAction::Updated => SlotChange::Updated { slot, stack_id },
        UpsertAction::Unchanged => SlotChange::Unchanged { slot, stack_id },
    }
}

/// Specs for both builder stacks, before the per-region parameters are known.
#[derive(Debug, Clone)]
struct BuilderTemplates {
    artifact: String,
    layer: String,
}

impl BuilderTemplates {
    fn load(templates: &dyn TemplateProvider) -> Result<Self> {
        Ok(Self {
            artifact: templates.template(StackSlot::ArtifactBuilder)?,
            layer: templates.template(StackSlot::LayerBuilder)?,
        })
    }

    /// `(ArtifactBuilder, LayerBuilder)` specs deploying from `bucket`.
    fn specs(&self, bucket: &str, workers_key: &str) -> (StackSpec, StackSpec) {
        let artifact = StackSpec::new(self.artifact.clone())
            .with_parameters(
                StackParameters::new()
                    .with("ArtifactBucketName", bucket)
                    .with("WorkersS3Key", workers_key),
            )
            .with_iam();
        let layer = StackSpec::new(self.layer.clone())
            .with_parameters(
                StackParameters::new()
                    .with("ReplicationBucket", bucket)
                    .with("WorkersS3Key", workers_key),
            )
            .with_iam();
        (artifact, layer)
    }
}

/// State shared by every region worker of one command.
#[derive(Clone)]
struct RegionContext {
    lifecycle: StackLifecycleClient,
    objects: Arc<dyn ObjectStore>,
}

impl RegionContext {
    /// Resolve the source bucket of the region's `Core` stack and upload the
    /// workers bundle into it. Returns the bucket name.
    async fn upload_workers(
        &self,
        region: &str,
        record: &RegionDeployment,
        bundle: &WorkersBundle,
        workers_key: &str,
    ) -> Result<String> {
        let core = record.get(StackSlot::Core).ok_or_else(|| {
            AccretionError::Configuration(format!("no Core stack recorded for {region}"))
        })?;
        let bucket = self
            .lifecycle
            .control()
            .describe_resource(region, core, SOURCE_BUCKET_LOGICAL_ID)
            .await
            .map_err(|e| AccretionError::service("DescribeStackResource", e))?;
        self.objects
            .put_object(region, &bucket, workers_key, bundle.bytes.as_ref().clone())
            .await
            .map_err(|e| AccretionError::service("PutObject", e))?;
        info!(region = %region, bucket = %bucket, key = %workers_key, "workers uploaded");
        Ok(bucket)
    }

    /// Upsert both builder stacks concurrently. With `only_missing`, slots
    /// that are already set are left alone.
    async fn deploy_builders(
        &self,
        region: &str,
        record: &mut RegionDeployment,
        changes: &mut Vec<SlotChange>,
        (artifact_spec, layer_spec): (StackSpec, StackSpec),
        only_missing: bool,
    ) -> Result<()> {
        let mut artifact_record = record.clone();
        let mut layer_record = record.clone();

        let (artifact, layer) = tokio::join!(
            self.upsert_builder(
                region,
                &mut artifact_record,
                StackSlot::ArtifactBuilder,
                &artifact_spec,
                only_missing
            ),
            self.upsert_builder(
                region,
                &mut layer_record,
                StackSlot::LayerBuilder,
                &layer_spec,
                only_missing
            ),
        );

        for (slot, source) in [
            (StackSlot::ArtifactBuilder, &artifact_record),
            (StackSlot::LayerBuilder, &layer_record),
        ] {
            if let Some(stack_id) = source.get(slot) {
                record.assign(region, slot, stack_id.clone())?;
            }
        }

        let mut first_error = None;
        for (slot, result) in [
            (StackSlot::ArtifactBuilder, artifact),
            (StackSlot::LayerBuilder, layer),
        ] {
            match result {
                Ok(Some(outcome)) => changes.push(upsert_change(slot, outcome)),
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn upsert_builder(
        &self,
        region: &str,
        record: &mut RegionDeployment,
        slot: StackSlot,
        spec: &StackSpec,
        only_missing: bool,
    ) -> Result<Option<UpsertOutcome>> {
        if only_missing && record.is_set(slot) {
            info!(region = %region, slot = %slot, "builder already deployed");
            return Ok(None);
        }
        self.lifecycle
            .upsert_slot(region, record, slot, spec)
            .await
            .map(Some)
    }
}

struct InitCore {
    ctx: RegionContext,
    template: String,
}

#[async_trait]
impl RegionOperation for InitCore {
    fn name(&self) -> &str {
        "init"
    }

    async fn apply(
        &self,
        region: &str,
        record: &mut RegionDeployment,
        changes: &mut Vec<SlotChange>,
    ) -> Result<()> {
        if let Some(stack_id) = record.get(StackSlot::Core) {
            info!(region = %region, stack_id = %stack_id, "Core already deployed");
            return Ok(());
        }
        let spec = StackSpec::new(self.template.clone()).with_iam();
        let outcome = self
            .ctx
            .lifecycle
            .upsert_slot(region, record, StackSlot::Core, &spec)
            .await?;
        changes.push(upsert_change(StackSlot::Core, outcome));
        Ok(())
    }
}

struct UpdateAll {
    ctx: RegionContext,
    core_template: String,
    builders: BuilderTemplates,
    bundle: WorkersBundle,
    workers_key: String,
}

#[async_trait]
impl RegionOperation for UpdateAll {
    fn name(&self) -> &str {
        "update"
    }

    async fn apply(
        &self,
        region: &str,
        record: &mut RegionDeployment,
        changes: &mut Vec<SlotChange>,
    ) -> Result<()> {
        let core_spec = StackSpec::new(self.core_template.clone()).with_iam();
        let core = self
            .ctx
            .lifecycle
            .upsert_slot(region, record, StackSlot::Core, &core_spec)
            .await?;
        changes.push(upsert_change(StackSlot::Core, core));

        let bucket = self
            .ctx
            .upload_workers(region, record, &self.bundle, &self.workers_key)
            .await?;
        self.ctx
            .deploy_builders(
                region,
                record,
                changes,
                self.builders.specs(&bucket, &self.workers_key),
                false,
            )
            .await
    }
}

struct DeployBuilders {
    ctx: RegionContext,
    builders: BuilderTemplates,
    bundle: WorkersBundle,
    workers_key: String,
}

#[async_trait]
impl RegionOperation for DeployBuilders {
    fn name(&self) -> &str {
        "add-builders"
    }

    fn prerequisite(&self) -> Option<StackSlot> {
        Some(StackSlot::Core)
    }

    async fn apply(
        &self,
        region: &str,
        record: &mut RegionDeployment,
        changes: &mut Vec<SlotChange>,
    ) -> Result<()> {
        if StackSlot::BUILDERS.iter().all(|slot| record.is_set(*slot)) {
            info!(region = %region, "builders already deployed");
            return Ok(());
        }
        let bucket = self
            .ctx
            .upload_workers(region, record, &self.bundle, &self.workers_key)
            .await?;
        self.ctx
            .deploy_builders(
                region,
                record,
                changes,
                self.builders.specs(&bucket, &self.workers_key),
                true,
            )
            .await
    }
}

struct DestroyAll {
    ctx: RegionContext,
}

#[async_trait]
impl RegionOperation for DestroyAll {
    fn name(&self) -> &str {
        "destroy"
    }

    async fn apply(
        &self,
        region: &str,
        record: &mut RegionDeployment,
        changes: &mut Vec<SlotChange>,
    ) -> Result<()> {
        let lifecycle = &self.ctx.lifecycle;
        let mut artifact_record = record.clone();
        let mut layer_record = record.clone();
        let (artifact, layer) = tokio::join!(
            lifecycle.destroy_slot(region, &mut artifact_record, StackSlot::ArtifactBuilder),
            lifecycle.destroy_slot(region, &mut layer_record, StackSlot::LayerBuilder),
        );

        let mut first_error = None;
        for (slot, result) in [
            (StackSlot::ArtifactBuilder, artifact),
            (StackSlot::LayerBuilder, layer),
        ] {
            match result {
                Ok(Some(stack_id)) => {
                    record.release(slot);
                    changes.push(SlotChange::Destroyed { slot, stack_id });
                }
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        if let Some(stack_id) = lifecycle.destroy_slot(region, record, StackSlot::Core).await? {
            changes.push(SlotChange::Destroyed {
                slot: StackSlot::Core,
                stack_id,
            });
        }
        Ok(())
    }
}

struct StartBuild {
    ctx: RegionContext,
    workflows: Arc<dyn WorkflowService>,
    input: String,
}

#[async_trait]
impl RegionOperation for StartBuild {
    fn name(&self) -> &str {
        "publish"
    }

    fn prerequisite(&self) -> Option<StackSlot> {
        Some(StackSlot::ArtifactBuilder)
    }

    async fn apply(
        &self,
        region: &str,
        record: &mut RegionDeployment,
        changes: &mut Vec<SlotChange>,
    ) -> Result<()> {
        let stack_id = record.get(StackSlot::ArtifactBuilder).ok_or_else(|| {
            AccretionError::Configuration(format!("no ArtifactBuilder stack recorded for {region}"))
        })?;
        let workflow_id = self
            .ctx
            .lifecycle
            .control()
            .describe_resource(region, stack_id, ARTIFACT_BUILDER_WORKFLOW_LOGICAL_ID)
            .await
            .map_err(|e| AccretionError::service("DescribeStackResource", e))?;
        let execution_name = format!("{CLI_EXECUTION_PREFIX}-{}", Uuid::new_v4());
        let execution_id = self
            .workflows
            .start_workflow(region, &workflow_id, &execution_name, &self.input)
            .await
            .map_err(|e| AccretionError::service("StartExecution", e))?;
        info!(region = %region, execution = %execution_id, "artifact build started");
        changes.push(SlotChange::WorkflowStarted {
            slot: StackSlot::ArtifactBuilder,
            execution_id,
        });
        Ok(())
    }
}

/// Runs deployment commands against the ledger in `store`.
pub struct Deployer {
    store: Arc<dyn LedgerStore>,
    services: Services,
    templates: Arc<dyn TemplateProvider>,
    lifecycle: StackLifecycleClient,
    fanout: RegionFanOut,
}

impl Deployer {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        services: Services,
        templates: Arc<dyn TemplateProvider>,
        lifecycle_config: LifecycleConfig,
        fanout_config: FanOutConfig,
    ) -> Self {
        let lifecycle = StackLifecycleClient::new(
            Arc::clone(&services.control),
            Arc::clone(&services.objects),
            lifecycle_config,
        );
        Self {
            store,
            services,
            templates,
            lifecycle,
            fanout: RegionFanOut::new(fanout_config),
        }
    }

    fn context(&self) -> RegionContext {
        RegionContext {
            lifecycle: self.lifecycle.clone(),
            objects: Arc::clone(&self.services.objects),
        }
    }

    fn load(&self, mode: LoadMode) -> Result<DeploymentLedger> {
        Ok(DeploymentLedger::load(self.store.as_ref(), mode)?)
    }

    async fn run(
        &self,
        mut ledger: DeploymentLedger,
        operation: Arc<dyn RegionOperation>,
    ) -> Result<FanOutReport> {
        let report = self
            .fanout
            .apply_to_all_regions(&mut ledger, operation)
            .await?;
        ledger.save(self.store.as_ref())?;
        info!(
            operation = %report.operation,
            completed = report.completed(),
            skipped = report.skipped(),
            failed = report.failed(),
            location = %self.store.location(),
            "ledger saved"
        );
        Ok(report)
    }

    fn workers_key() -> String {
        format!("{WORKERS_PREFIX}{}.zip", Uuid::new_v4())
    }

    /// Create the ledger (or merge into an existing one) and deploy `Core`
    /// wherever it is unset.
    pub async fn init(&self, regions: &[String]) -> Result<FanOutReport> {
        if regions.is_empty() {
            return Err(AccretionError::Configuration(
                "at least one region is required".to_string(),
            ));
        }
        let template = self.templates.template(StackSlot::Core)?;
        let mut ledger = self.load(LoadMode::CreateIfMissing)?;
        let added = ledger.merge(regions)?;
        info!(added = ?added, "regions registered");
        self.run(
            ledger,
            Arc::new(InitCore {
                ctx: self.context(),
                template,
            }),
        )
        .await
    }

    /// Register more regions, then bring every region up to date.
    pub async fn add_regions(
        &self,
        regions: &[String],
        bundle: &WorkersBundle,
    ) -> Result<FanOutReport> {
        if regions.is_empty() {
            return Err(AccretionError::Configuration(
                "at least one region is required".to_string(),
            ));
        }
        let operation = self.update_operation(bundle)?;
        let mut ledger = self.load(LoadMode::Existing)?;
        let added = ledger.merge(regions)?;
        info!(added = ?added, "regions registered");
        self.run(ledger, operation).await
    }

    /// Upsert `Core`, upload the workers bundle, then upsert both builders.
    pub async fn update_all(&self, bundle: &WorkersBundle) -> Result<FanOutReport> {
        let operation = self.update_operation(bundle)?;
        let ledger = self.load(LoadMode::Existing)?;
        self.run(ledger, operation).await
    }

    fn update_operation(&self, bundle: &WorkersBundle) -> Result<Arc<dyn RegionOperation>> {
        Ok(Arc::new(UpdateAll {
            ctx: self.context(),
            core_template: self.templates.template(StackSlot::Core)?,
            builders: BuilderTemplates::load(self.templates.as_ref())?,
            bundle: bundle.clone(),
            workers_key: Self::workers_key(),
        }))
    }

    /// Deploy builder stacks where `Core` exists and they are missing.
    pub async fn add_builders(&self, bundle: &WorkersBundle) -> Result<FanOutReport> {
        let operation = Arc::new(DeployBuilders {
            ctx: self.context(),
            builders: BuilderTemplates::load(self.templates.as_ref())?,
            bundle: bundle.clone(),
            workers_key: Self::workers_key(),
        });
        let ledger = self.load(LoadMode::Existing)?;
        self.run(ledger, operation).await
    }

    /// Destroy builders, then `Core`, in every region.
    pub async fn destroy(&self) -> Result<FanOutReport> {
        let ledger = self.load(LoadMode::Existing)?;
        self.run(
            ledger,
            Arc::new(DestroyAll {
                ctx: self.context(),
            }),
        )
        .await
    }

    /// Validate a layer request and start an artifact build in every region
    /// with an `ArtifactBuilder` stack. The ledger is read, never written.
    pub async fn publish(&self, request: &LayerRequest) -> Result<FanOutReport> {
        let validated: ValidatedLayerRequest = request.validate()?;
        let input = serde_json::to_string(&validated)?;
        let mut ledger = self.load(LoadMode::Existing)?;
        let operation = Arc::new(StartBuild {
            ctx: self.context(),
            workflows: Arc::clone(&self.services.workflows),
            input,
        });
        self.fanout
            .apply_to_all_regions(&mut ledger, operation)
            .await
    }

    /// Current ledger contents.
    pub fn status(&self) -> Result<DeploymentLedger> {
        self.load(LoadMode::Existing)
    }
}
