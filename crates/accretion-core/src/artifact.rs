//! Artifact recording: turning a finished dependency install into an
//! immutable, content-addressed artifact and manifest.
//!
//! Packaging itself stays outside: the archive bytes come from a closure
//! that only runs when the archive actually has to be uploaded.

use std::sync::Arc;

use accretion_state::{ObjectStore, ServiceError};
use tracing::{debug, info};

use crate::cache_key::{compute_key, ArtifactCacheKey};
use crate::domain::{
    artifact_key, artifact_manifest_key, AccretionError, ArtifactManifest, PackageVersion,
    Requirement, Result,
};

const INSTALLED_MARKER: &str = "Successfully installed";

/// Extract the installed packages from a package-manager log.
///
/// Reads every `Successfully installed a-1.0 b-2.0` line; entries that do
/// not contain a `-` are skipped.
pub fn parse_install_log(text: &str) -> Vec<PackageVersion> {
    text.lines()
        .filter_map(|line| {
            line.find(INSTALLED_MARKER)
                .map(|idx| &line[idx + INSTALLED_MARKER.len()..])
        })
        .flat_map(str::split_whitespace)
        .filter_map(PackageVersion::from_install_entry)
        .collect()
}

/// One completed dependency install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactBuild {
    pub project_name: String,
    pub requirements: Vec<Requirement>,
    pub installed: Vec<PackageVersion>,
    pub runtime: String,
    /// Salt the cache key so an identical install still yields a new artifact.
    pub force_new: bool,
}

/// What [`ArtifactRecorder::record`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedArtifact {
    pub cache_key: ArtifactCacheKey,
    pub manifest_key: String,
    pub manifest: ArtifactManifest,
    /// The manifest already existed and was returned unchanged.
    pub reused_manifest: bool,
    pub uploaded_archive: bool,
}

/// Writes artifacts and their manifests to one bucket.
pub struct ArtifactRecorder {
    objects: Arc<dyn ObjectStore>,
    region: String,
    bucket: String,
}

impl ArtifactRecorder {
    pub fn new(objects: Arc<dyn ObjectStore>, region: &str, bucket: &str) -> Self {
        Self {
            objects,
            region: region.to_string(),
            bucket: bucket.to_string(),
        }
    }

    /// Record a build.
    ///
    /// An existing manifest under the computed key wins: nothing is
    /// uploaded and it is returned as-is. Otherwise the archive is uploaded
    /// (unless already present) and the manifest is written last, so a
    /// visible manifest always points at an uploaded archive.
    pub async fn record<F>(&self, build: &ArtifactBuild, archive: F) -> Result<RecordedArtifact>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let cache_key = compute_key(&build.installed, &build.runtime, build.force_new);
        let key_hex = cache_key.to_hex();
        let manifest_key = artifact_manifest_key(&build.project_name, &key_hex);

        if let Some(existing) = self.read_manifest(&manifest_key).await? {
            info!(
                project = %build.project_name,
                manifest = %manifest_key,
                "artifact already recorded"
            );
            return Ok(RecordedArtifact {
                cache_key,
                manifest_key,
                manifest: existing,
                reused_manifest: true,
                uploaded_archive: false,
            });
        }

        let archive_key = artifact_key(&build.project_name, &key_hex);
        let archive_exists = self
            .objects
            .head_object(&self.region, &self.bucket, &archive_key)
            .await
            .map_err(|e| AccretionError::service("HeadObject", e))?;
        if archive_exists {
            debug!(key = %archive_key, "archive already uploaded");
        } else {
            let body = archive()?;
            self.objects
                .put_object(&self.region, &self.bucket, &archive_key, body)
                .await
                .map_err(|e| AccretionError::service("PutObject", e))?;
        }

        let mut installed = build.installed.clone();
        installed.sort();
        installed.dedup();
        let manifest = ArtifactManifest {
            project_name: build.project_name.clone(),
            artifact_key: archive_key,
            requirements: build.requirements.clone(),
            installed,
            runtimes: vec![build.runtime.clone()],
            cache_key: key_hex,
        };
        self.objects
            .put_object(
                &self.region,
                &self.bucket,
                &manifest_key,
                manifest.to_json_bytes()?,
            )
            .await
            .map_err(|e| AccretionError::service("PutObject", e))?;
        info!(
            project = %build.project_name,
            manifest = %manifest_key,
            "artifact recorded"
        );

        Ok(RecordedArtifact {
            cache_key,
            manifest_key,
            manifest,
            reused_manifest: false,
            uploaded_archive: !archive_exists,
        })
    }

    async fn read_manifest(&self, key: &str) -> Result<Option<ArtifactManifest>> {
        match self.objects.get_object(&self.region, &self.bucket, key).await {
            Ok(bytes) => Ok(Some(ArtifactManifest::from_json_bytes(&bytes, key)?)),
            Err(ServiceError::NotFound { .. }) => Ok(None),
            Err(e) => Err(AccretionError::service("GetObject", e)),
        }
    }
}
