//! Rate-limited client pool for a quota-constrained workspace API
//!
//! Spreads file, spreadsheet and document calls across several independent
//! credentials so their quotas add up, without ever letting one credential
//! exceed its own per-minute quota. A TTL cache answers repeated reads.
//!
//! Call flow:
//! 1. `WorkspacePool` method → `Dispatcher::route(op, class)`
//! 2. Fresh cache entry for a read → returned immediately
//! 3. Otherwise the next healthy handle of the class's partition is selected
//!    round-robin, `RateLimiter::acquire` waits until its window allows a call
//! 4. `OperationExecutor::run` performs the call, invalidates dependent cache
//!    keys (or stores the read), and classifies failures
//! 5. Quota rejections and transient network errors are retried with
//!    jittered exponential backoff; authentication failures take the
//!    credential out of routing until it is marked healthy again

pub mod cache;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod operation;
pub mod pool;
pub mod rate_limit;
pub mod retry;
pub mod service;
pub mod sweep;

pub use cache::{Cache, CacheCategory, Invalidation, TtlTable};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{OwnershipConfig, PoolConfig};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use executor::OperationExecutor;
pub use operation::{Created, Operation, Outcome};
pub use pool::{ClientPool, Connector, Handle};
pub use rate_limit::{RateLimiter, RateLimits, RatePermit, RateSlot};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use service::WorkspacePool;
pub use sweep::spawn_sweep_task;
