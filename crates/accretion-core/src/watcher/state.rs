//! Watcher states, triggering events and the per-event watch context.

use std::fmt;

use accretion_state::ObjectLocation;
use serde::{Deserialize, Serialize};

use crate::domain::{AccretionError, Result};
use crate::publisher::PublishOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchState {
    Filter,
    LocateArtifact,
    WaitForReplication,
    PublishNewVersion,
    Notify,
    Ignored,
    TimedOut,
    Notified,
}

impl WatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WatchState::Ignored | WatchState::TimedOut | WatchState::Notified
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WatchState::Filter => "Filter",
            WatchState::LocateArtifact => "LocateArtifact",
            WatchState::WaitForReplication => "WaitForReplication",
            WatchState::PublishNewVersion => "PublishNewVersion",
            WatchState::Notify => "Notify",
            WatchState::Ignored => "Ignored",
            WatchState::TimedOut => "TimedOut",
            WatchState::Notified => "Notified",
        }
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An object was written to a watched bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectWriteEvent {
    pub bucket: String,
    pub key: String,
}

impl ObjectWriteEvent {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse a raw put-object notification
    /// (`detail.requestParameters.{bucketName,key}`).
    pub fn from_notification(raw: &serde_json::Value) -> Result<Self> {
        let params = &raw["detail"]["requestParameters"];
        let field = |name: &str| {
            params[name].as_str().map(str::to_string).ok_or_else(|| {
                AccretionError::InvalidRequest(format!(
                    "notification missing detail.requestParameters.{name}"
                ))
            })
        };
        Ok(Self {
            bucket: field("bucketName")?,
            key: field("key")?,
        })
    }
}

/// Artifact found through its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArtifactInfo {
    pub location: ObjectLocation,
    pub project_name: String,
    pub runtimes: Vec<String>,
}

/// Mutable state of one watch instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WatchContext {
    /// Key of the object that triggered the watch.
    pub resource_key: String,
    /// Number of the current read attempt; zero before the first read.
    pub read_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<PublishOutcome>,
}

impl WatchContext {
    pub fn new(resource_key: impl Into<String>) -> Self {
        Self {
            resource_key: resource_key.into(),
            read_attempts: 0,
            artifact: None,
            layer: None,
        }
    }
}
