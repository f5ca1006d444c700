//! Domain-level error taxonomy for Accretion.

use accretion_state::{ServiceError, StateError};
use serde::{Deserialize, Serialize};

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Ledger missing or corrupt, invalid region set, unreadable templates.
    Configuration,
    /// The control plane rejected a stack operation.
    Provisioning,
    /// A stack did not settle within the poll ceiling.
    ProvisioningTimeout,
    /// An artifact never replicated within the attempt ceiling.
    ReplicationTimeout,
    /// A layer name could not be brought under the platform limit.
    Naming,
    /// A layer request or manifest failed validation.
    InvalidRequest,
    /// A remote service call failed outside stack provisioning.
    Remote,
    /// Worker bookkeeping failed.
    Internal,
}

impl ErrorKind {
    /// Whether re-running the same idempotent command may succeed without
    /// operator changes. Nothing is retried automatically across regions;
    /// this only informs the operator-facing report.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Provisioning
                | ErrorKind::ProvisioningTimeout
                | ErrorKind::ReplicationTimeout
                | ErrorKind::Remote
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Provisioning => "provisioning",
            ErrorKind::ProvisioningTimeout => "provisioning_timeout",
            ErrorKind::ReplicationTimeout => "replication_timeout",
            ErrorKind::Naming => "naming",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Remote => "remote",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accretion domain errors.
#[derive(Debug, thiserror::Error)]
pub enum AccretionError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] StateError),

    #[error("provisioning failed for {stack} in {region}: {reason}")]
    Provisioning {
        region: String,
        stack: String,
        reason: String,
    },

    #[error("stack {stack} in {region} did not settle after {polls} polls")]
    ProvisioningTimeout {
        region: String,
        stack: String,
        polls: u32,
    },

    #[error("artifact for {key} did not replicate after {attempts} read attempts")]
    ReplicationTimeout { key: String, attempts: u32 },

    #[error("layer name {name:?} exceeds {limit} characters")]
    NameTooLong { name: String, limit: usize },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{operation} failed: {source}")]
    Service {
        operation: String,
        #[source]
        source: ServiceError,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AccretionError {
    /// Wrap a service failure with the operation that produced it.
    pub fn service(operation: impl Into<String>, source: ServiceError) -> Self {
        AccretionError::Service {
            operation: operation.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AccretionError::Configuration(_)
            | AccretionError::Ledger(_)
            | AccretionError::Io(_) => ErrorKind::Configuration,
            AccretionError::Provisioning { .. } => ErrorKind::Provisioning,
            AccretionError::ProvisioningTimeout { .. } => ErrorKind::ProvisioningTimeout,
            AccretionError::ReplicationTimeout { .. } => ErrorKind::ReplicationTimeout,
            AccretionError::NameTooLong { .. } => ErrorKind::Naming,
            AccretionError::InvalidRequest(_) | AccretionError::Serialization(_) => {
                ErrorKind::InvalidRequest
            }
            AccretionError::Service { .. } => ErrorKind::Remote,
            AccretionError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Result type for Accretion domain operations.
pub type Result<T> = std::result::Result<T, AccretionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_are_configuration_and_final() {
        let err: AccretionError = StateError::NotFound {
            location: "deployment.json".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.is_retryable());
    }

    #[test]
    fn provisioning_failures_invite_a_rerun() {
        let err = AccretionError::ProvisioningTimeout {
            region: "us-east-1".to_string(),
            stack: "Accretion-1".to_string(),
            polls: 50,
        };
        assert_eq!(err.kind(), ErrorKind::ProvisioningTimeout);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("50 polls"));
    }

    #[test]
    fn naming_is_not_retryable() {
        let err = AccretionError::NameTooLong {
            name: "x".repeat(141),
            limit: 140,
        };
        assert_eq!(err.kind(), ErrorKind::Naming);
        assert!(!err.is_retryable());
    }

    #[test]
    fn service_error_keeps_source() {
        let err = AccretionError::service(
            "PublishLayerVersion",
            ServiceError::Transport("reset".to_string()),
        );
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert!(std::error::Error::source(&err).is_some());
    }
}
