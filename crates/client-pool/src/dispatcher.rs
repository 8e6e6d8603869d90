//! Routing of operations onto handles
//!
//! `route` answers fresh cached reads without touching a handle. Everything
//! else goes through the retry policy, and each attempt picks the next healthy
//! handle of the caller's partition, waits for that handle's rate permit and
//! runs the call. A retried attempt selects again, so a quota rejection on one
//! handle usually moves the retry to the next one.

use std::sync::Arc;
use std::time::Duration;

use credentials::TrafficClass;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::Cache;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::executor::OperationExecutor;
use crate::operation::{Operation, Outcome};
use crate::pool::ClientPool;
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryPolicy, retry_with_backoff};

pub struct Dispatcher {
    pool: ClientPool,
    limiter: RateLimiter,
    cache: Arc<Cache<Outcome>>,
    executor: OperationExecutor,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        pool: ClientPool,
        limiter: RateLimiter,
        cache: Arc<Cache<Outcome>>,
        executor: OperationExecutor,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            limiter,
            cache,
            executor,
            retry,
            clock,
        }
    }

    pub fn pool(&self) -> &ClientPool {
        &self.pool
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<Cache<Outcome>> {
        &self.cache
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run `op` on behalf of `class`, waiting for rate limits as needed.
    pub async fn route(&self, op: &Operation, class: TrafficClass) -> Result<Outcome> {
        self.route_until(op, class, None).await
    }

    /// Like `route`, but give up with `DeadlineElapsed` if the operation
    /// cannot start within `deadline`. An abandoned wait records nothing.
    /// A deadline too large to represent means no deadline.
    pub async fn route_with_deadline(&self, op: &Operation, class: TrafficClass, deadline: Duration) -> Result<Outcome> {
        let until = self.clock.now().checked_add(deadline).map(|at| (at, deadline));
        self.route_until(op, class, until).await
    }

    async fn route_until(
        &self,
        op: &Operation,
        class: TrafficClass,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<Outcome> {
        if let Some((key, category)) = op.cache_key() {
            if let Some(hit) = self.cache.get(&key, category) {
                return Ok(hit);
            }
        }

        retry_with_backoff(&self.retry, self.clock.as_ref(), op.name(), Error::is_retryable, || {
            self.attempt(op, class, deadline)
        })
        .await
    }

    async fn attempt(&self, op: &Operation, class: TrafficClass, deadline: Option<(Instant, Duration)>) -> Result<Outcome> {
        let handle = self.pool.select(class)?;
        let mut permit = match deadline {
            None => self.limiter.acquire(handle.slot()).await,
            Some((at, budget)) => {
                let remaining = at.saturating_duration_since(self.clock.now());
                if remaining.is_zero() {
                    return Err(Error::DeadlineElapsed(budget));
                }
                self.limiter
                    .acquire_timeout(handle.slot(), remaining)
                    .await
                    .map_err(|_| Error::DeadlineElapsed(budget))?
            }
        };
        debug!(
            operation = op.name(),
            class = class.label(),
            credential = handle.index(),
            waited_ms = permit.waited().as_millis() as u64,
            "dispatching"
        );
        self.executor.run(&handle, &mut permit, op).await
    }
}
