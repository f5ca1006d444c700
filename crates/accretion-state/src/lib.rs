//! Accretion-State: deployment ledger and service contracts
//!
//! This crate is the persistence layer of Accretion. It owns the only durable
//! shared resource of the system, the deployment ledger, and defines the
//! contracts of the remote services the core drives.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: all-or-nothing ledger writes and backend-agnostic service seams.
//!
//! ## Key Components
//!
//! - `DeploymentLedger`: region name to per-region stack slots
//! - `LedgerStore`: byte-level persistence (`FsLedgerStore` on disk)
//! - `service_traits`: control plane, object storage, layers, workflows, notifications
//! - `fakes`: in-memory implementations with fault injection

mod error;
pub mod fakes;
pub mod ledger;
pub mod service_traits;
pub mod store;

pub use error::{ServiceError, StateError};
pub use ledger::{DeploymentLedger, RegionDeployment, StackId, StackSlot};
pub use service_traits::{
    CreateStackRequest, LayerPermission, LayerService, LayerVersion, NotificationSink,
    ObjectLocation, ObjectStore, ObjectVersion, ObjectVersionPage, PublishLayerRequest,
    ServiceResult, StackControlPlane, StackParameters, StackResource, StackStatus,
    UpdateStackRequest, WorkflowService,
};
pub use store::{FsLedgerStore, LedgerStore, LoadMode};

/// Result type for ledger operations
pub type StateResult<T> = std::result::Result<T, StateError>;
