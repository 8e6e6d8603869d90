//! Structured retry with exponential backoff
//!
//! One policy (attempt budget, backoff curve, jitter) applied to every routed
//! operation. Which failures are retryable is the caller's predicate; the pool
//! passes `Error::is_retryable`, so only quota rejections and transient network
//! failures are tried again.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};

/// Retry budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Spread each delay uniformly over `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Configuration("retry.max_attempts must be at least 1".into()));
        }
        if !(self.multiplier >= 1.0) {
            return Err(Error::Configuration(format!(
                "retry.multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(Error::Configuration(
                "retry.max_delay_ms must not be below retry.initial_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Backoff before retry number `retry` (0 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = (self.initial_delay_ms as f64 * self.multiplier.powi(retry as i32))
            .min(self.max_delay_ms as f64);
        let ms = if self.jitter && base >= 2.0 {
            rand::rng().random_range(base / 2.0..=base)
        } else {
            base
        };
        Duration::from_millis(ms as u64)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent. Sleeps go through `clock`.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> std::result::Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < max_attempts && is_retryable(&err) => {
                let delay = policy.delay_for(attempt - 1);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable failure, backing off"
                );
                clock.sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
