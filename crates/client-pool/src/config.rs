//! Pool settings
//!
//! Deserialized from the `[pool]` table of the service configuration; every
//! field has a default so an empty table is a working configuration.

use std::time::Duration;

use credentials::PartitionSplit;
use serde::Deserialize;

use crate::cache::TtlTable;
use crate::error::{Error, Result};
use crate::rate_limit::RateLimits;
use crate::retry::RetryPolicy;

/// Optional post-create ownership transfer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OwnershipConfig {
    /// Account that receives ownership of every created file.
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Calls allowed per credential within the window.
    pub quota_per_minute: usize,
    pub window_secs: u64,
    pub min_spacing_ms: u64,
    pub wait_margin_ms: u64,
    #[serde(flatten)]
    pub split: PartitionSplit,
    /// Upper bound on one remote call before it counts as a network failure.
    pub call_timeout_secs: u64,
    /// Interval of the expired-entry sweep; 0 disables it.
    pub sweep_interval_secs: u64,
    pub retry: RetryPolicy,
    pub ttl: TtlTable,
    pub ownership: Option<OwnershipConfig>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            quota_per_minute: 60,
            window_secs: 60,
            min_spacing_ms: 1_000,
            wait_margin_ms: 100,
            split: PartitionSplit::default(),
            call_timeout_secs: 30,
            sweep_interval_secs: 60,
            retry: RetryPolicy::default(),
            ttl: TtlTable::default(),
            ownership: None,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.quota_per_minute == 0 {
            return Err(Error::Configuration("pool.quota_per_minute must be positive".into()));
        }
        if self.window_secs == 0 {
            return Err(Error::Configuration("pool.window_secs must be positive".into()));
        }
        if self.call_timeout_secs == 0 {
            return Err(Error::Configuration("pool.call_timeout_secs must be positive".into()));
        }
        if let Some(ownership) = &self.ownership {
            if ownership.owner.trim().is_empty() {
                return Err(Error::Configuration("pool.ownership.owner must not be empty".into()));
            }
        }
        self.split.validate()?;
        self.retry.validate()
    }

    pub fn rate_limits(&self) -> RateLimits {
        RateLimits {
            quota: self.quota_per_minute,
            window: Duration::from_secs(self.window_secs),
            min_spacing: Duration::from_millis(self.min_spacing_ms),
            margin: Duration::from_millis(self.wait_margin_ms),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    pub fn owner(&self) -> Option<String> {
        self.ownership.as_ref().map(|o| o.owner.clone())
    }
}
