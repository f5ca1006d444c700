//! The replication watcher state machine.

use std::sync::Arc;

use accretion_state::{
    LayerService, LayerVersion, NotificationSink, ObjectLocation, ObjectStore, ServiceError,
};
use serde_json::json;
use tracing::{debug, warn, Instrument};

use super::state::{ArtifactInfo, ObjectWriteEvent, WatchContext, WatchState};
use crate::config::WatcherConfig;
use crate::domain::{AccretionError, ArtifactManifest, Result};
use crate::obs;
use crate::publisher::{LayerPublisher, PublishInput, PublishOutcome};

/// Terminal result of one watch instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOutcome {
    pub final_state: WatchState,
    pub context: WatchContext,
    /// Every state entered, starting with the initial one.
    pub trace: Vec<WatchState>,
}

impl WatchOutcome {
    /// `TimedOut` becomes [`AccretionError::ReplicationTimeout`].
    pub fn into_result(self) -> Result<Self> {
        if self.final_state == WatchState::TimedOut {
            return Err(AccretionError::ReplicationTimeout {
                key: self.context.resource_key,
                attempts: self.context.read_attempts,
            });
        }
        Ok(self)
    }
}

/// Completion message for a published layer.
pub fn completion_message(
    project_name: &str,
    layer: &LayerVersion,
    manifest: &ObjectLocation,
) -> serde_json::Value {
    json!({
        "Version": 1,
        "ProjectName": project_name,
        "Layer": {"Arn": layer.arn, "Version": layer.version},
        "Manifest": {"Bucket": manifest.bucket, "Key": manifest.key},
    })
}

/// Watches one region's bucket for replicated artifact manifests and
/// republishes their artifacts as layers.
///
/// Instances share nothing mutable: every event gets its own
/// [`WatchContext`], and concurrent events for the same artifact are
/// deduplicated only through the layer manifest check.
pub struct ReplicationWatcher {
    region: String,
    bucket: String,
    objects: Arc<dyn ObjectStore>,
    publisher: LayerPublisher,
    sink: Arc<dyn NotificationSink>,
    config: WatcherConfig,
}

impl ReplicationWatcher {
    pub fn new(
        region: &str,
        bucket: &str,
        objects: Arc<dyn ObjectStore>,
        layers: Arc<dyn LayerService>,
        sink: Arc<dyn NotificationSink>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            region: region.to_string(),
            bucket: bucket.to_string(),
            publisher: LayerPublisher::new(region, layers, Arc::clone(&objects)),
            objects,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Run a new instance for `event` to a terminal state.
    pub async fn run(&self, event: &ObjectWriteEvent) -> Result<WatchOutcome> {
        debug!(bucket = %event.bucket, key = %event.key, "object write received");
        self.resume(WatchState::Filter, WatchContext::new(&event.key))
            .await
    }

    /// Continue an instance from `state` with its saved context.
    pub async fn resume(&self, state: WatchState, context: WatchContext) -> Result<WatchOutcome> {
        let span = obs::watch_span(&self.region, &context.resource_key);
        self.drive(state, context).instrument(span).await
    }

    async fn drive(&self, mut state: WatchState, mut context: WatchContext) -> Result<WatchOutcome> {
        let mut trace = vec![state];
        while !state.is_terminal() {
            let next = self.step(state, &mut context).await?;
            obs::emit_watch_transition(
                &context.resource_key,
                state.as_str(),
                next.as_str(),
                context.read_attempts,
            );
            trace.push(next);
            state = next;
        }
        Ok(WatchOutcome {
            final_state: state,
            context,
            trace,
        })
    }

    /// Execute one state's action and return the next state. Terminal
    /// states return themselves.
    pub async fn step(&self, state: WatchState, context: &mut WatchContext) -> Result<WatchState> {
        match state {
            WatchState::Filter => {
                if context.resource_key.starts_with(&self.config.manifest_prefix) {
                    context.read_attempts = 1;
                    Ok(WatchState::LocateArtifact)
                } else {
                    Ok(WatchState::Ignored)
                }
            }
            WatchState::LocateArtifact => {
                context.artifact = self.locate(&context.resource_key).await?;
                if context.artifact.is_some() {
                    Ok(WatchState::PublishNewVersion)
                } else if context.read_attempts <= self.config.max_read_attempts {
                    Ok(WatchState::WaitForReplication)
                } else {
                    warn!(
                        attempts = context.read_attempts,
                        limit = self.config.max_read_attempts,
                        "artifact never replicated"
                    );
                    Ok(WatchState::TimedOut)
                }
            }
            WatchState::WaitForReplication => {
                context.read_attempts += 1;
                tokio::time::sleep(self.config.wait_interval).await;
                Ok(WatchState::LocateArtifact)
            }
            WatchState::PublishNewVersion => {
                let artifact = context.artifact.clone().ok_or_else(|| {
                    AccretionError::Internal("publish entered without a located artifact".into())
                })?;
                let input = PublishInput {
                    project_name: artifact.project_name,
                    artifact: artifact.location,
                    runtimes: artifact.runtimes,
                    artifact_manifest_key: context.resource_key.clone(),
                };
                let outcome = match self.publisher.find_existing(&input).await? {
                    Some(manifest) => {
                        obs::emit_layer_duplicate_detected(&self.region, &manifest.key, false);
                        PublishOutcome::AlreadyPublished { manifest }
                    }
                    None => self.publisher.publish(&input).await?,
                };
                context.layer = Some(outcome);
                Ok(WatchState::Notify)
            }
            WatchState::Notify => {
                self.notify(context).await;
                Ok(WatchState::Notified)
            }
            WatchState::Ignored | WatchState::TimedOut | WatchState::Notified => Ok(state),
        }
    }

    /// Read the manifest and check whether its artifact is visible here.
    /// Nothing is carried over between attempts.
    async fn locate(&self, manifest_key: &str) -> Result<Option<ArtifactInfo>> {
        let bytes = match self
            .objects
            .get_object(&self.region, &self.bucket, manifest_key)
            .await
        {
            Ok(bytes) => bytes,
            Err(ServiceError::NotFound { .. }) => {
                debug!(key = %manifest_key, "manifest not visible yet");
                return Ok(None);
            }
            Err(e) => return Err(AccretionError::service("GetObject", e)),
        };
        let manifest = ArtifactManifest::from_json_bytes(&bytes, manifest_key)?;

        let exists = self
            .objects
            .head_object(&self.region, &self.bucket, &manifest.artifact_key)
            .await
            .map_err(|e| AccretionError::service("HeadObject", e))?;
        if !exists {
            debug!(artifact = %manifest.artifact_key, "artifact not replicated yet");
            return Ok(None);
        }

        Ok(Some(ArtifactInfo {
            location: ObjectLocation::new(self.bucket.clone(), manifest.artifact_key),
            project_name: manifest.project_name,
            runtimes: manifest.runtimes,
        }))
    }

    /// Only a publish made by this instance is announced. Delivery failures
    /// are logged and do not fail the watch.
    async fn notify(&self, context: &WatchContext) {
        let (Some(outcome), Some(artifact)) = (&context.layer, &context.artifact) else {
            return;
        };
        let Some(layer) = outcome.layer() else {
            debug!("layer already recorded, nothing to announce");
            return;
        };
        let message = completion_message(&artifact.project_name, layer, outcome.manifest());
        if let Err(e) = self.sink.publish(&message).await {
            warn!(error = %e, layer = %layer.arn, "completion notification failed");
        }
    }
}
