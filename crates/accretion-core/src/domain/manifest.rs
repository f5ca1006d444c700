//! Artifact and layer manifests, and the object keys they live under.

use accretion_state::LayerVersion;
use serde::{Deserialize, Serialize};

use super::error::{AccretionError, Result};
use super::requirements::Requirement;

/// Built archives: `accretion/artifacts/<project>/<cache-key>.zip`.
pub const ARTIFACTS_PREFIX: &str = "accretion/artifacts/";
/// Artifact manifests: `accretion/manifests/<project>/<cache-key>.manifest`.
pub const ARTIFACT_MANIFESTS_PREFIX: &str = "accretion/manifests/";
/// Layer manifests: `accretion/layers/<project>/<digest>.layer`.
pub const LAYER_MANIFESTS_PREFIX: &str = "accretion/layers/";
/// Worker bundles uploaded by deployment commands.
pub const WORKERS_PREFIX: &str = "accretion/workers/";

/// Package name and resolved version as installed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PackageVersion {
    pub name: String,
    pub version: String,
}

impl PackageVersion {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse an installer log entry such as `boto3-1.9.169`, splitting at
    /// the last `-`.
    pub fn from_install_entry(entry: &str) -> Option<Self> {
        let (name, version) = entry.rsplit_once('-')?;
        if name.is_empty() || version.is_empty() {
            return None;
        }
        Some(Self::new(name, version))
    }
}

/// Immutable record of one successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArtifactManifest {
    pub project_name: String,
    #[serde(rename = "ArtifactS3Key")]
    pub artifact_key: String,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub installed: Vec<PackageVersion>,
    pub runtimes: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cache_key: String,
}

impl ArtifactManifest {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse a stored manifest. `key` is only used in error messages.
    pub fn from_json_bytes(bytes: &[u8], key: &str) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| AccretionError::InvalidRequest(format!("malformed manifest {key}: {e}")))
    }
}

/// Bucket and key of a manifest, in the layer manifest's own spelling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3Location {
    pub s3_bucket: String,
    pub s3_key: String,
}

/// Immutable record of one successful layer publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LayerManifest {
    pub layer: LayerVersion,
    pub artifact_manifest: S3Location,
}

impl LayerManifest {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

pub fn artifact_key(project: &str, cache_key: &str) -> String {
    format!("{ARTIFACTS_PREFIX}{project}/{cache_key}.zip")
}

pub fn artifact_manifest_key(project: &str, cache_key: &str) -> String {
    format!("{ARTIFACT_MANIFESTS_PREFIX}{project}/{cache_key}.manifest")
}

pub fn layer_manifest_key(project: &str, digest: &str) -> String {
    format!("{LAYER_MANIFESTS_PREFIX}{project}/{digest}.layer")
}

/// File stem of an object key: the text between the last `/` and the last
/// `.` after it.
pub fn key_stem(key: &str) -> &str {
    let file = key.rsplit_once('/').map_or(key, |(_, file)| file);
    file.rsplit_once('.').map_or(file, |(stem, _)| stem)
}
