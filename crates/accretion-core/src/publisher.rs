//! Layer Publisher: publish a replicated artifact as a layer version and
//! record it in a layer manifest.
//!
//! Publishing itself is not idempotent. Duplicate publishes are prevented
//! one level up: a layer manifest keyed by a digest of the layer name and
//! the source artifact is checked before publishing, checked again just
//! before the publish call, and written last. A concurrent publish that
//! slips between the second check and the write is detected and reported.

use std::sync::Arc;

use accretion_state::{
    LayerPermission, LayerService, LayerVersion, ObjectLocation, ObjectStore,
    PublishLayerRequest, ServiceError,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::{
    key_stem, layer_manifest_key, AccretionError, LayerManifest, Result, S3Location,
};
use crate::obs;

/// Platform limit on layer names.
pub const LAYER_NAME_LIMIT: usize = 140;

pub const LAYER_DESCRIPTION: &str = "Created by Accretion. See layer manifest for details.";

/// Grants every account read access to published versions.
pub const LAYER_PERMISSION_PRINCIPAL: &str = "*";
pub const LAYER_PERMISSION_ACTION: &str = "lambda:GetLayerVersion";

/// Runtime family abbreviations, applied in order.
const RUNTIME_ABBREVIATIONS: [(&str, &str); 7] = [
    ("nodejs", "njs"),
    ("java", "jav"),
    ("python", "py"),
    ("dotnetcore", "dnc"),
    ("go", "go"),
    ("ruby", "rby"),
    ("provided", "pro"),
];

/// Derive the layer name: project name plus the sorted runtimes with dots
/// removed and families abbreviated, e.g. `proj-py36py37`.
///
/// Fails with [`AccretionError::NameTooLong`] instead of truncating.
pub fn layer_name(project_name: &str, runtimes: &[String]) -> Result<String> {
    let mut sorted: Vec<&str> = runtimes.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut squashed = sorted.concat().replace('.', "");
    for (runtime, short) in RUNTIME_ABBREVIATIONS {
        squashed = squashed.replace(runtime, short);
    }

    let name = format!("{project_name}-{squashed}");
    if name.len() > LAYER_NAME_LIMIT {
        return Err(AccretionError::NameTooLong {
            name,
            limit: LAYER_NAME_LIMIT,
        });
    }
    Ok(name)
}

/// Digest identifying the layer version about to be published from
/// `artifact_key`.
pub fn layer_manifest_digest(layer_name: &str, artifact_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"===Layer===");
    hasher.update(layer_name.as_bytes());
    hasher.update(b"===Artifact===");
    hasher.update(artifact_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Everything needed to publish one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublishInput {
    pub project_name: String,
    /// The replicated archive, in the publishing region.
    pub artifact: ObjectLocation,
    pub runtimes: Vec<String>,
    /// Key of the artifact manifest that triggered the publish.
    pub artifact_manifest_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Outcome")]
pub enum PublishOutcome {
    /// A new layer version was published and recorded.
    Published {
        layer: LayerVersion,
        manifest: ObjectLocation,
    },
    /// A layer manifest already existed; nothing was published.
    AlreadyPublished { manifest: ObjectLocation },
    /// A version was published, but a concurrent publish recorded its
    /// manifest first. Ours is left unrecorded.
    RaceDetected {
        layer: LayerVersion,
        manifest: ObjectLocation,
    },
}

impl PublishOutcome {
    /// The layer version this call published, if any.
    pub fn layer(&self) -> Option<&LayerVersion> {
        match self {
            PublishOutcome::Published { layer, .. } | PublishOutcome::RaceDetected { layer, .. } => {
                Some(layer)
            }
            PublishOutcome::AlreadyPublished { .. } => None,
        }
    }

    pub fn manifest(&self) -> &ObjectLocation {
        match self {
            PublishOutcome::Published { manifest, .. }
            | PublishOutcome::AlreadyPublished { manifest }
            | PublishOutcome::RaceDetected { manifest, .. } => manifest,
        }
    }
}

/// Publishes layers in one region.
pub struct LayerPublisher {
    region: String,
    layers: Arc<dyn LayerService>,
    objects: Arc<dyn ObjectStore>,
}

impl LayerPublisher {
    pub fn new(region: &str, layers: Arc<dyn LayerService>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            region: region.to_string(),
            layers,
            objects,
        }
    }

    /// Where the layer manifest for `input` lives.
    pub fn manifest_location(&self, input: &PublishInput) -> Result<ObjectLocation> {
        let name = layer_name(&input.project_name, &input.runtimes)?;
        let digest = layer_manifest_digest(&name, &input.artifact.key);
        Ok(ObjectLocation::new(
            input.artifact.bucket.clone(),
            layer_manifest_key(&input.project_name, &digest),
        ))
    }

    /// The existing layer manifest for `input`, if one was recorded.
    pub async fn find_existing(&self, input: &PublishInput) -> Result<Option<ObjectLocation>> {
        let location = self.manifest_location(input)?;
        Ok(self.exists(&location).await?.then_some(location))
    }

    async fn exists(&self, location: &ObjectLocation) -> Result<bool> {
        self.objects
            .head_object(&self.region, &location.bucket, &location.key)
            .await
            .map_err(|e| AccretionError::service("HeadObject", e))
    }

    /// Publish `input` unless its layer manifest exists, grant public read
    /// access, then record the layer manifest.
    pub async fn publish(&self, input: &PublishInput) -> Result<PublishOutcome> {
        let name = layer_name(&input.project_name, &input.runtimes)?;
        let manifest = self.manifest_location(input)?;

        if self.exists(&manifest).await? {
            obs::emit_layer_duplicate_detected(&self.region, &manifest.key, false);
            return Ok(PublishOutcome::AlreadyPublished { manifest });
        }

        let request = PublishLayerRequest {
            layer_name: name,
            description: LAYER_DESCRIPTION.to_string(),
            content: input.artifact.clone(),
            compatible_runtimes: input.runtimes.clone(),
        };
        let layer = self
            .layers
            .publish_layer_version(&self.region, &request)
            .await
            .map_err(|e| AccretionError::service("PublishLayerVersion", e))?;
        obs::emit_layer_published(&self.region, &layer.arn, layer.version);

        self.grant_access(&layer, &input.artifact_manifest_key).await?;

        if self.exists(&manifest).await? {
            obs::emit_layer_duplicate_detected(&self.region, &manifest.key, true);
            return Ok(PublishOutcome::RaceDetected { layer, manifest });
        }

        let record = LayerManifest {
            layer: layer.clone(),
            artifact_manifest: S3Location {
                s3_bucket: input.artifact.bucket.clone(),
                s3_key: input.artifact_manifest_key.clone(),
            },
        };
        self.objects
            .put_object(
                &self.region,
                &manifest.bucket,
                &manifest.key,
                record.to_json_bytes()?,
            )
            .await
            .map_err(|e| AccretionError::service("PutObject", e))?;
        debug!(manifest = %manifest.key, "layer manifest recorded");

        Ok(PublishOutcome::Published { layer, manifest })
    }

    /// The statement id is derived from the artifact manifest, so replays
    /// hit the existing statement.
    async fn grant_access(&self, layer: &LayerVersion, artifact_manifest_key: &str) -> Result<()> {
        let permission = LayerPermission {
            layer_arn: layer.arn.clone(),
            version: layer.version,
            statement_id: key_stem(artifact_manifest_key).to_string(),
            principal: LAYER_PERMISSION_PRINCIPAL.to_string(),
            action: LAYER_PERMISSION_ACTION.to_string(),
        };
        match self.layers.add_layer_permission(&self.region, &permission).await {
            Ok(()) => Ok(()),
            Err(ServiceError::Conflict { .. }) => {
                debug!(statement = %permission.statement_id, "permission already granted");
                Ok(())
            }
            Err(e) => Err(AccretionError::service("AddLayerVersionPermission", e)),
        }
    }
}
