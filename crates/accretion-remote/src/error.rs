//! Error types for accretion-remote

use accretion_state::ServiceError;
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while setting up the gateway client.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Client(err.to_string())
    }
}

/// Error body returned by the gateway.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ErrorBody {
    code: String,
    message: String,
}

const NO_UPDATES: &str = "No updates are to be performed";

/// Map a non-success gateway response to a [`ServiceError`].
///
/// `subject` names what the call was about (a stack id, an object key) and
/// ends up in not-found and no-changes errors.
pub fn map_error(verb: &str, subject: &str, status: u16, body: &str) -> ServiceError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_else(|_| ErrorBody {
        code: String::new(),
        message: body.trim().to_string(),
    });
    let is_stack_call = verb.contains("Stack");

    match (status, parsed.code.as_str()) {
        (404, _) if is_stack_call => ServiceError::StackNotFound {
            stack_id: subject.to_string(),
        },
        (404, _) => ServiceError::NotFound {
            what: subject.to_string(),
        },
        (409, _) => ServiceError::Conflict {
            operation: verb.to_string(),
            message: parsed.message,
        },
        (_, "ValidationError") if parsed.message.contains(NO_UPDATES) => ServiceError::NoChanges {
            stack_id: subject.to_string(),
        },
        (_, "ValidationError") if is_stack_call && parsed.message.contains("does not exist") => {
            ServiceError::StackNotFound {
                stack_id: subject.to_string(),
            }
        }
        (_, "") => ServiceError::rejected(verb, format!("HTTP {status}: {}", parsed.message)),
        (_, code) => ServiceError::rejected(verb, format!("{code}: {}", parsed.message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_updates_validation_error_is_no_changes() {
        let body = r#"{"Code":"ValidationError","Message":"No updates are to be performed."}"#;
        assert_eq!(
            map_error("UpdateStack", "stack-1", 400, body),
            ServiceError::NoChanges {
                stack_id: "stack-1".to_string()
            }
        );
    }

    #[test]
    fn other_validation_errors_are_rejected() {
        let body = r#"{"Code":"ValidationError","Message":"Template format error"}"#;
        match map_error("UpdateStack", "stack-1", 400, body) {
            ServiceError::Rejected { operation, message } => {
                assert_eq!(operation, "UpdateStack");
                assert!(message.contains("Template format error"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn missing_stack_is_stack_not_found() {
        let body = r#"{"Code":"ValidationError","Message":"Stack with id s does not exist"}"#;
        assert!(matches!(
            map_error("DescribeStacks", "s", 400, body),
            ServiceError::StackNotFound { .. }
        ));
        assert!(matches!(
            map_error("DeleteStack", "s", 404, ""),
            ServiceError::StackNotFound { .. }
        ));
    }

    #[test]
    fn not_found_and_conflict_follow_status() {
        assert!(matches!(
            map_error("GetObject", "b/k", 404, "nope"),
            ServiceError::NotFound { what } if what == "b/k"
        ));
        assert!(matches!(
            map_error("AddLayerVersionPermission", "sid", 409, r#"{"Code":"ResourceConflictException","Message":"exists"}"#),
            ServiceError::Conflict { message, .. } if message == "exists"
        ));
    }

    #[test]
    fn unparseable_body_keeps_status() {
        match map_error("PutObject", "b/k", 503, "upstream down") {
            ServiceError::Rejected { message, .. } => assert_eq!(message, "HTTP 503: upstream down"),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }
}
