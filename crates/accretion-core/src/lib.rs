//! Accretion Core Library
//!
//! Multi-region stack orchestration, the replication watcher and the layer
//! publisher, over the service contracts defined in `accretion-state`.

pub mod artifact;
pub mod cache_key;
pub mod config;
pub mod deploy;
pub mod domain;
pub mod fanout;
pub mod lifecycle;
pub mod obs;
pub mod publisher;
pub mod telemetry;
pub mod template;
pub mod watcher;

pub use artifact::{parse_install_log, ArtifactBuild, ArtifactRecorder, RecordedArtifact};
pub use cache_key::{compute_key, ArtifactCacheKey};
pub use config::{FanOutConfig, LifecycleConfig, WatcherConfig};
pub use deploy::{Deployer, Services, WorkersBundle};
pub use domain::{
    AccretionError, ArtifactManifest, ErrorKind, LayerManifest, LayerRequest, PackageVersion,
    Requirement, RequirementsInput, Result, ValidatedLayerRequest,
};
pub use fanout::{
    FanOutReport, RegionFanOut, RegionOperation, RegionOutcome, RegionStatus, SlotChange,
};
pub use lifecycle::{StackLifecycleClient, StackSpec, UpsertAction, UpsertOutcome};
pub use publisher::{layer_name, LayerPublisher, PublishInput, PublishOutcome};
pub use telemetry::{init_tracing, LogFormat};
pub use template::{DirectoryTemplates, StaticTemplates, TemplateProvider};
pub use watcher::{ObjectWriteEvent, ReplicationWatcher, WatchContext, WatchOutcome, WatchState};

pub use accretion_state::{DeploymentLedger, RegionDeployment, StackId, StackSlot};
