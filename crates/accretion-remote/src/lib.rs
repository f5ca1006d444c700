//! Accretion-Remote: control-plane gateway adapter
//!
//! Implements the `accretion-state` service traits by POSTing JSON to a
//! gateway at `<endpoint>/<region>/<service>/<verb>`.
//!
//! ## Layer 2 - Integration
//!
//! Focus: faithful error mapping. "No updates are to be performed" becomes
//! `ServiceError::NoChanges`, 404 becomes a not-found, 409 a conflict.

mod client;
mod config;
mod error;
mod wire;

pub use client::{HttpControlPlane, TopicSink};
pub use config::{RemoteConfig, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT};
pub use error::{map_error, RemoteError};
