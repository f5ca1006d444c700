//! Tunables for stack lifecycle polling, region fan-out and replication
//! watching.
//!
//! Every struct has defaults matching production behaviour and a
//! `from_env()` constructor that overrides individual fields. Unparseable
//! values are ignored with a warning.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::ARTIFACT_MANIFESTS_PREFIX;

fn env_parse<T: FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = var, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

fn env_secs(var: &str) -> Option<Duration> {
    env_parse::<u64>(var).map(Duration::from_secs)
}

/// Stack create/update/destroy waiting and bucket emptying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Status polls before a stack operation is declared timed out.
    pub max_polls: u32,
    /// Pause between status polls.
    pub poll_interval: Duration,
    /// Consecutive empty listing passes required before a bucket counts as
    /// empty.
    pub empty_confirmations: u32,
    /// Upper bound on listing passes while emptying one bucket.
    pub max_empty_passes: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            max_polls: 50,
            poll_interval: Duration::from_secs(5),
            empty_confirmations: 2,
            max_empty_passes: 100,
        }
    }
}

impl LifecycleConfig {
    /// `ACCRETION_MAX_POLLS`, `ACCRETION_POLL_INTERVAL_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(polls) = env_parse::<u32>("ACCRETION_MAX_POLLS").filter(|p| *p > 0) {
            config.max_polls = polls;
        }
        if let Some(interval) = env_secs("ACCRETION_POLL_INTERVAL_SECS") {
            config.poll_interval = interval;
        }
        config
    }
}

/// Region fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutConfig {
    /// Regions worked on at the same time.
    pub max_concurrency: usize,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        FanOutConfig { max_concurrency: 8 }
    }
}

impl FanOutConfig {
    /// `ACCRETION_MAX_CONCURRENCY`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_parse::<usize>("ACCRETION_MAX_CONCURRENCY").filter(|n| *n > 0) {
            config.max_concurrency = n;
        }
        config
    }
}

/// Replication watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Only object keys under this prefix start a watch.
    pub manifest_prefix: String,
    /// Read attempts tolerated before the watch times out.
    pub max_read_attempts: u32,
    /// Pause between read attempts.
    pub wait_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            manifest_prefix: ARTIFACT_MANIFESTS_PREFIX.to_string(),
            max_read_attempts: 15,
            wait_interval: Duration::from_secs(60),
        }
    }
}

impl WatcherConfig {
    /// `ACCRETION_WATCH_MAX_ATTEMPTS`, `ACCRETION_WATCH_INTERVAL_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(attempts) = env_parse::<u32>("ACCRETION_WATCH_MAX_ATTEMPTS") {
            config.max_read_attempts = attempts;
        }
        if let Some(interval) = env_secs("ACCRETION_WATCH_INTERVAL_SECS") {
            config.wait_interval = interval;
        }
        config
    }

    /// Worst-case time spent waiting before a timeout.
    pub fn max_wait(&self) -> Duration {
        self.wait_interval * self.max_read_attempts
    }
}
