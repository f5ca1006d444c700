//! Domain types: errors, manifests and layer requests.

pub mod error;
pub mod manifest;
pub mod requirements;

pub use error::{AccretionError, ErrorKind, Result};
pub use manifest::{
    artifact_key, artifact_manifest_key, key_stem, layer_manifest_key, ArtifactManifest,
    LayerManifest, PackageVersion, S3Location, ARTIFACTS_PREFIX, ARTIFACT_MANIFESTS_PREFIX,
    LAYER_MANIFESTS_PREFIX, WORKERS_PREFIX,
};
pub use requirements::{
    parse_requirements_txt, LayerRequest, Requirement, RequirementsInput, ValidatedLayerRequest,
    MAX_PROJECT_NAME_LENGTH,
};
