//! Sync configuration.
//!
//! Defaults can be overridden from the environment:
//! - `RESOURCE_SYNC_MAX_MERGE_ATTEMPTS`
//! - `RESOURCE_SYNC_POLL_INTERVAL_SECS`
//! - `RESOURCE_SYNC_WAIT_TIMEOUT_SECS`
//! - `RESOURCE_SYNC_AUTO_RELOAD_SECS` (`0` disables auto-reload)
//! - `RESOURCE_SYNC_IGNORE_TRANSIENT_ERRORS`

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::handle::{DEFAULT_AUTO_RELOAD_PERIOD, ReloadPolicy};
use crate::merge::{DEFAULT_MAX_ATTEMPTS, MergePolicy};
use crate::poller::{DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT, WaitOptions};

pub const ENV_MAX_MERGE_ATTEMPTS: &str = "RESOURCE_SYNC_MAX_MERGE_ATTEMPTS";
pub const ENV_POLL_INTERVAL_SECS: &str = "RESOURCE_SYNC_POLL_INTERVAL_SECS";
pub const ENV_WAIT_TIMEOUT_SECS: &str = "RESOURCE_SYNC_WAIT_TIMEOUT_SECS";
pub const ENV_AUTO_RELOAD_SECS: &str = "RESOURCE_SYNC_AUTO_RELOAD_SECS";
pub const ENV_IGNORE_TRANSIENT_ERRORS: &str = "RESOURCE_SYNC_IGNORE_TRANSIENT_ERRORS";

/// Policy defaults shared by handles, the merge engine and the poller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub max_merge_attempts: u32,
    pub poll_interval: Duration,
    pub wait_timeout: Duration,
    /// `None` disables auto-reload
    pub auto_reload_period: Option<Duration>,
    pub ignore_transient_errors: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_merge_attempts: DEFAULT_MAX_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            auto_reload_period: Some(DEFAULT_AUTO_RELOAD_PERIOD),
            ignore_transient_errors: false,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `RESOURCE_SYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(attempts) = parse::<u32>(&lookup, ENV_MAX_MERGE_ATTEMPTS)? {
            if attempts == 0 {
                return Err(Error::Config(format!(
                    "{ENV_MAX_MERGE_ATTEMPTS} must be at least 1"
                )));
            }
            config.max_merge_attempts = attempts;
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_POLL_INTERVAL_SECS)? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_WAIT_TIMEOUT_SECS)? {
            config.wait_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_AUTO_RELOAD_SECS)? {
            config.auto_reload_period = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(ignore) = parse::<bool>(&lookup, ENV_IGNORE_TRANSIENT_ERRORS)? {
            config.ignore_transient_errors = ignore;
        }

        Ok(config)
    }

    pub fn merge_policy(&self) -> MergePolicy {
        MergePolicy {
            max_attempts: self.max_merge_attempts,
        }
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions::default()
            .with_timeout(self.wait_timeout)
            .with_poll_interval(self.poll_interval)
            .ignore_transient_errors(self.ignore_transient_errors)
    }

    pub fn reload_policy(&self) -> ReloadPolicy {
        ReloadPolicy {
            period: self.auto_reload_period,
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| Error::Config(format!("invalid {key}={raw:?}: {e}")))
}
