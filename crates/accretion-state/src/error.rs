//! Error types for accretion-state

use thiserror::Error;

/// Errors raised by the deployment ledger and its persistence.
#[derive(Error, Debug)]
pub enum StateError {
    /// No persisted ledger exists and creation was not requested
    #[error("deployment ledger not found at {location}")]
    NotFound { location: String },

    /// The persisted ledger could not be parsed
    #[error("deployment ledger at {location} is corrupt: {reason}")]
    Corrupt { location: String, reason: String },

    /// A set slot was asked to take a different stack identifier
    #[error("slot {slot} in region {region} already holds stack {existing}; refusing {requested}")]
    SlotConflict {
        region: String,
        slot: String,
        existing: String,
        requested: String,
    },

    /// Region not present in the ledger
    #[error("region not registered in ledger: {0}")]
    UnknownRegion(String),

    /// Region name is not a valid region identifier
    #[error("invalid region name: {0:?}")]
    InvalidRegion(String),

    /// Serialization error
    #[error("ledger serialization failed: {0}")]
    Serialization(String),

    /// IO error
    #[error("ledger io failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by the remote service contracts (control plane, object
/// storage, layer service, workflow service, notification sink).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Object or resource not found
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The referenced stack does not exist (or no longer exists)
    #[error("stack not found: {stack_id}")]
    StackNotFound { stack_id: String },

    /// An update carried no difference from the deployed state
    #[error("no changes to apply to stack {stack_id}")]
    NoChanges { stack_id: String },

    /// The request conflicts with existing state (e.g. duplicate statement id)
    #[error("conflict during {operation}: {message}")]
    Conflict { operation: String, message: String },

    /// The service rejected the request
    #[error("{operation} rejected: {message}")]
    Rejected { operation: String, message: String },

    /// Transport-level failure reaching the service
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with something we could not understand
    #[error("invalid service response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    /// Convenience constructor for rejected operations.
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// `true` for the two not-found variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServiceError::NotFound { .. } | ServiceError::StackNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_conflict_names_both_identifiers() {
        let err = StateError::SlotConflict {
            region: "us-west-2".to_string(),
            slot: "Core".to_string(),
            existing: "Accretion-a".to_string(),
            requested: "Accretion-b".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Accretion-a"));
        assert!(msg.contains("Accretion-b"));
        assert!(msg.contains("us-west-2"));
    }

    #[test]
    fn not_found_helper_covers_stack_variant() {
        assert!(ServiceError::StackNotFound {
            stack_id: "s".to_string()
        }
        .is_not_found());
        assert!(!ServiceError::NoChanges {
            stack_id: "s".to_string()
        }
        .is_not_found());
    }
}
