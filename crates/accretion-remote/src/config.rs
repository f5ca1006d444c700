//! Gateway configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default gateway endpoint (a local cloud emulator).
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:4566";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Control-plane gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Gateway base URL
    pub endpoint: String,
    /// Bearer token (optional)
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RemoteConfig {
    /// Read `ACCRETION_ENDPOINT`, `ACCRETION_TOKEN` and
    /// `ACCRETION_HTTP_TIMEOUT_SECS`, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(endpoint) = std::env::var("ACCRETION_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                config.endpoint = endpoint;
            }
        }
        config.token = std::env::var("ACCRETION_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        if let Ok(raw) = std::env::var("ACCRETION_HTTP_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => config.timeout = Duration::from_secs(secs),
                _ => warn!(
                    value = %raw,
                    default_secs = DEFAULT_TIMEOUT.as_secs(),
                    "ignoring unparseable ACCRETION_HTTP_TIMEOUT_SECS"
                ),
            }
        }
        config
    }

    /// Config for a specific gateway
    pub fn new(endpoint: &str) -> Self {
        RemoteConfig {
            endpoint: endpoint.to_string(),
            ..Self::default()
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// `<endpoint>/<region>/<service>/<verb>`
    pub fn url_for(&self, region: &str, service: &str, verb: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.endpoint.trim_end_matches('/'),
            region,
            service,
            verb
        )
    }
}
