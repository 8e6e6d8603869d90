//! Per-handle sliding-window rate limiting
//!
//! Every handle owns a `RateSlot`: a window of recent call timestamps plus the
//! time of the last call, behind its own async mutex. `RateLimiter::acquire`
//! locks the slot, waits until both the quota window and the minimum spacing
//! allow another call, records the call, and hands back a `RatePermit` that
//! keeps the slot locked until the remote call finishes. Calls on one handle
//! therefore never overlap; calls on different handles never contend.
//!
//! The timestamp is recorded only after the last suspension point, so a caller
//! that is cancelled (or times out) while waiting consumes no quota.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use credentials::TrafficClass;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{Error, Result};

/// Smallest wait used when the window is full but the arithmetic says zero.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Quota settings applied to every handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    /// Calls allowed per handle within `window`.
    pub quota: usize,
    pub window: Duration,
    /// Minimum gap between two calls on the same handle.
    pub min_spacing: Duration,
    /// Slack added to quota waits so the oldest call has surely left the remote's window.
    pub margin: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            quota: 60,
            window: Duration::from_secs(60),
            min_spacing: Duration::from_secs(1),
            margin: Duration::from_millis(100),
        }
    }
}

/// Recent calls on one handle.
#[derive(Debug, Default)]
pub struct RateWindow {
    calls: VecDeque<Instant>,
    last_call_at: Option<Instant>,
}

impl RateWindow {
    /// Drop timestamps older than `window`.
    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.calls.front() {
            if now.saturating_duration_since(oldest) > window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long to wait before another call is allowed, if at all.
    fn wait_needed(&self, now: Instant, limits: &RateLimits) -> Option<Duration> {
        let quota_wait = match self.calls.front() {
            Some(&oldest) if self.calls.len() >= limits.quota => {
                let age = now.saturating_duration_since(oldest);
                (limits.window.saturating_sub(age) + limits.margin).max(MIN_WAIT)
            }
            _ => Duration::ZERO,
        };
        let spacing_wait = match self.last_call_at {
            Some(last) => limits.min_spacing.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        };
        let wait = quota_wait.max(spacing_wait);
        (!wait.is_zero()).then_some(wait)
    }

    fn record(&mut self, now: Instant, quota: usize) {
        self.calls.push_back(now);
        while self.calls.len() > quota {
            self.calls.pop_front();
        }
        self.last_call_at = Some(now);
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn last_call_at(&self) -> Option<Instant> {
        self.last_call_at
    }
}

/// The lockable rate window of one handle.
#[derive(Debug, Clone)]
pub struct RateSlot {
    index: usize,
    partition: TrafficClass,
    window: Arc<Mutex<RateWindow>>,
}

impl RateSlot {
    pub fn new(index: usize, partition: TrafficClass) -> Self {
        Self {
            index,
            partition,
            window: Arc::new(Mutex::new(RateWindow::default())),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Calls recorded within the trailing window, or `None` while a call holds the slot.
    pub fn in_window(&self, now: Instant, window: Duration) -> Option<usize> {
        let guard = self.window.try_lock().ok()?;
        Some(
            guard
                .calls
                .iter()
                .filter(|&&t| now.saturating_duration_since(t) <= window)
                .count(),
        )
    }
}

/// Exclusive right to make calls on one handle.
///
/// Dropping the permit releases the handle for the next caller.
pub struct RatePermit {
    index: usize,
    partition: TrafficClass,
    guard: OwnedMutexGuard<RateWindow>,
    limits: RateLimits,
    clock: Arc<dyn Clock>,
    waited: Duration,
}

impl RatePermit {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Total time spent waiting for this permit, including any `reacquire`.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Account for a follow-up call on the same handle, waiting as needed.
    pub async fn reacquire(&mut self) {
        let waited = wait_for_capacity(&mut self.guard, &self.limits, self.clock.as_ref()).await;
        self.guard.record(self.clock.now(), self.limits.quota);
        self.waited += waited;
        observe_wait(self.index, self.partition, waited, &self.limits);
    }
}

/// Blocks callers until their handle may make another call.
pub struct RateLimiter {
    limits: RateLimits,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits, clock: Arc<dyn Clock>) -> Self {
        Self { limits, clock }
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Wait until `slot` may make a call, record it, and return the permit.
    ///
    /// Never fails. Cancel-safe: dropping the returned future before it
    /// completes leaves the window untouched.
    pub async fn acquire(&self, slot: &RateSlot) -> RatePermit {
        let mut guard = Arc::clone(&slot.window).lock_owned().await;
        let waited = wait_for_capacity(&mut guard, &self.limits, self.clock.as_ref()).await;
        guard.record(self.clock.now(), self.limits.quota);
        observe_wait(slot.index, slot.partition, waited, &self.limits);
        RatePermit {
            index: slot.index,
            partition: slot.partition,
            guard,
            limits: self.limits,
            clock: Arc::clone(&self.clock),
            waited,
        }
    }

    /// Like `acquire`, but give up after `timeout` without recording anything.
    pub async fn acquire_timeout(&self, slot: &RateSlot, timeout: Duration) -> Result<RatePermit> {
        tokio::select! {
            biased;
            permit = self.acquire(slot) => Ok(permit),
            _ = self.clock.sleep(timeout) => {
                debug!(credential = slot.index, timeout_ms = timeout.as_millis() as u64, "gave up waiting for rate limit");
                Err(Error::DeadlineElapsed(timeout))
            }
        }
    }
}

async fn wait_for_capacity(window: &mut RateWindow, limits: &RateLimits, clock: &dyn Clock) -> Duration {
    let mut waited = Duration::ZERO;
    loop {
        let now = clock.now();
        window.evict(now, limits.window);
        match window.wait_needed(now, limits) {
            None => return waited,
            Some(wait) => {
                clock.sleep(wait).await;
                waited += wait;
            }
        }
    }
}

fn observe_wait(index: usize, partition: TrafficClass, waited: Duration, limits: &RateLimits) {
    if waited.is_zero() {
        return;
    }
    metrics::counter!("pool_rate_limit_waits_total", "partition" => partition.label()).increment(1);
    metrics::histogram!("pool_rate_limit_wait_seconds", "partition" => partition.label())
        .record(waited.as_secs_f64());
    if waited > limits.min_spacing {
        info!(
            credential = index,
            partition = partition.label(),
            wait_ms = waited.as_millis() as u64,
            "rate window full, waited for quota"
        );
    } else {
        debug!(credential = index, wait_ms = waited.as_millis() as u64, "spacing wait");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};

    fn limits(quota: usize, spacing_ms: u64) -> RateLimits {
        RateLimits {
            quota,
            window: Duration::from_secs(60),
            min_spacing: Duration::from_millis(spacing_ms),
            margin: Duration::from_millis(100),
        }
    }

    fn slot(index: usize) -> RateSlot {
        RateSlot::new(index, TrafficClass::Interactive)
    }

    #[tokio::test]
    async fn calls_under_quota_without_spacing_do_not_wait() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(limits(5, 0), clock.clone());
        let s = slot(0);

        for _ in 0..5 {
            let permit = limiter.acquire(&s).await;
            assert_eq!(permit.waited(), Duration::ZERO);
        }
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn full_window_waits_for_oldest_call_plus_margin() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(limits(3, 0), clock.clone());
        let s = slot(0);

        for _ in 0..3 {
            drop(limiter.acquire(&s).await);
        }
        clock.advance(Duration::from_secs(10));

        let permit = limiter.acquire(&s).await;
        assert_eq!(permit.waited(), Duration::from_millis(50_100));
        assert_eq!(clock.elapsed(), Duration::from_millis(60_100));
    }

    #[tokio::test]
    async fn minimum_spacing_separates_consecutive_calls() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(limits(60, 1000), clock.clone());
        let s = slot(0);

        let mut stamps = Vec::new();
        for _ in 0..4 {
            drop(limiter.acquire(&s).await);
            stamps.push(clock.now());
        }
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
    }

    #[tokio::test]
    async fn window_never_exceeds_quota() {
        let clock = Arc::new(ManualClock::new());
        let quota = 10;
        let limiter = RateLimiter::new(limits(quota, 200), clock.clone());
        let s = slot(0);

        let mut stamps = Vec::new();
        for _ in 0..45 {
            drop(limiter.acquire(&s).await);
            stamps.push(clock.now());
        }
        for &t in &stamps {
            let within = stamps
                .iter()
                .filter(|&&u| u <= t && t - u <= Duration::from_secs(60))
                .count();
            assert!(within <= quota, "{within} calls within 60s of one another");
        }
    }

    #[tokio::test]
    async fn slots_are_independent() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(limits(1, 0), clock.clone());
        let a = slot(0);
        let b = slot(1);

        drop(limiter.acquire(&a).await);
        let permit = limiter.acquire(&b).await;
        assert_eq!(permit.waited(), Duration::ZERO);
        assert_eq!(permit.index(), 1);
    }

    #[tokio::test]
    async fn reacquire_counts_a_second_call_on_the_same_handle() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(limits(60, 1000), clock.clone());
        let s = slot(0);

        let mut permit = limiter.acquire(&s).await;
        permit.reacquire().await;
        assert_eq!(permit.waited(), Duration::from_secs(1));
        drop(permit);

        assert_eq!(s.in_window(clock.now(), Duration::from_secs(60)), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn permit_serializes_calls_on_one_handle() {
        let limiter = Arc::new(RateLimiter::new(limits(60, 0), Arc::new(SystemClock)));
        let s = slot(0);

        let first = limiter.acquire(&s).await;
        let second = {
            let limiter = limiter.clone();
            let s = s.clone();
            tokio::spawn(async move { limiter.acquire(&s).await.index() })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished(), "second caller must wait for the first permit");
        assert_eq!(s.in_window(Instant::now(), Duration::from_secs(60)), None);

        drop(first);
        assert_eq!(second.await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_waiter_records_nothing() {
        let limiter = RateLimiter::new(limits(1, 0), Arc::new(SystemClock));
        let s = slot(0);
        drop(limiter.acquire(&s).await);

        let err = limiter
            .acquire_timeout(&s, Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::DeadlineElapsed(_)));
        assert_eq!(s.in_window(Instant::now(), Duration::from_secs(60)), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_records_nothing() {
        let limiter = Arc::new(RateLimiter::new(limits(1, 0), Arc::new(SystemClock)));
        let s = slot(0);
        drop(limiter.acquire(&s).await);

        let waiter = {
            let limiter = limiter.clone();
            let s = s.clone();
            tokio::spawn(async move {
                limiter.acquire(&s).await;
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        assert_eq!(s.in_window(Instant::now(), Duration::from_secs(60)), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_timeout_succeeds_when_capacity_frees_in_time() {
        let limiter = RateLimiter::new(limits(1, 0), Arc::new(SystemClock));
        let s = slot(0);
        drop(limiter.acquire(&s).await);

        let permit = limiter
            .acquire_timeout(&s, Duration::from_secs(120))
            .await
            .unwrap();
        assert!(permit.waited() >= Duration::from_secs(60));
    }
}
