//! Handle partitions and round-robin selection
//!
//! The pool turns every credential into one live handle and splits the handles
//! into the interactive and background partitions, keeping credential order.
//! Each partition has its own cursor, so heavy background traffic never shifts
//! which interactive handle is picked next.
//!
//! Selection skips handles whose credential is unhealthy. The scan starts at
//! the cursor and visits each member at most once; if none is healthy the
//! partition is exhausted. The cursor then lands just past the picked member,
//! so every healthy member gets one turn per cycle. When the background partition is empty (a single
//! credential, or an explicit split that gives everything to interactive),
//! background traffic shares the interactive partition.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use credentials::{Credential, CredentialStore, TrafficClass};
use remote::{MemoryBackend, RemoteApi};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::rate_limit::RateSlot;

/// Turns one credential into one live remote handle.
pub trait Connector: Send + Sync {
    fn connect(&self, credential: &Credential) -> remote::Result<Arc<dyn RemoteApi>>;
}

impl Connector for Arc<MemoryBackend> {
    fn connect(&self, credential: &Credential) -> remote::Result<Arc<dyn RemoteApi>> {
        Ok(Arc::new(self.handle(credential.index())))
    }
}

/// A live connection bound to exactly one credential, plus its rate window.
pub struct Handle {
    credential: Arc<Credential>,
    remote: Arc<dyn RemoteApi>,
    slot: RateSlot,
}

impl Handle {
    pub fn new(credential: Arc<Credential>, remote: Arc<dyn RemoteApi>) -> Self {
        let slot = RateSlot::new(credential.index(), credential.partition());
        Self {
            credential,
            remote,
            slot,
        }
    }

    pub fn index(&self) -> usize {
        self.credential.index()
    }

    pub fn credential(&self) -> &Arc<Credential> {
        &self.credential
    }

    pub fn remote(&self) -> &dyn RemoteApi {
        self.remote.as_ref()
    }

    pub fn slot(&self) -> &RateSlot {
        &self.slot
    }

    pub fn is_healthy(&self) -> bool {
        self.credential.is_healthy()
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index())
            .field("partition", &self.credential.partition())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

/// The handles serving one traffic class.
struct Partition {
    class: TrafficClass,
    members: Vec<Arc<Handle>>,
    cursor: AtomicUsize,
}

impl Partition {
    fn new(class: TrafficClass, members: Vec<Arc<Handle>>) -> Self {
        Self {
            class,
            members,
            cursor: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> Option<Arc<Handle>> {
        let n = self.members.len();
        if n == 0 {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        Some(Arc::clone(&self.members[i]))
    }

    fn select_healthy(&self) -> Result<Arc<Handle>> {
        let n = self.members.len();
        let exhausted = Error::PoolExhausted {
            partition: self.class,
            total: n,
        };
        if n == 0 {
            return Err(exhausted);
        }

        // The cursor moves just past the picked member, so a skipped member's
        // turn is not handed to its neighbour as an extra one.
        let mut current = self.cursor.load(Ordering::Relaxed);
        loop {
            let healthy_at = |offset: usize| self.members[current.wrapping_add(offset) % n].is_healthy();
            let Some(offset) = (0..n).find(|&offset| healthy_at(offset)) else {
                warn!(partition = self.class.label(), total = n, "every handle in partition is unhealthy");
                return Err(exhausted);
            };
            if offset > 0 {
                debug!(skipped = offset, partition = self.class.label(), "skipping unhealthy handles");
            }
            let next = current.wrapping_add(offset + 1);
            match self
                .cursor
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => {
                    let handle = &self.members[current.wrapping_add(offset) % n];
                    debug!(credential = handle.index(), partition = self.class.label(), "handle selected");
                    return Ok(Arc::clone(handle));
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// Partitioned handle set built once at startup.
pub struct ClientPool {
    store: Arc<CredentialStore>,
    handles: Vec<Arc<Handle>>,
    interactive: Partition,
    background: Partition,
}

impl ClientPool {
    /// Connect every credential and split the handles into partitions.
    ///
    /// A credential whose connection fails is marked unhealthy and left out.
    /// Fails with `Configuration` if no handle could be built.
    pub fn build(store: Arc<CredentialStore>, connector: &dyn Connector) -> Result<Self> {
        let mut handles = Vec::with_capacity(store.len());
        for credential in store.credentials() {
            match connector.connect(credential) {
                Ok(remote) => handles.push(Arc::new(Handle::new(Arc::clone(credential), remote))),
                Err(e) => {
                    warn!(credential = credential.index(), error = %e, "failed to connect credential, leaving it out");
                    credential.mark_unhealthy();
                }
            }
        }
        record_unhealthy(&store);

        if handles.is_empty() {
            return Err(Error::Configuration(
                "no credential could be connected to the remote".into(),
            ));
        }

        let members = |class: TrafficClass| -> Vec<Arc<Handle>> {
            handles
                .iter()
                .filter(|h| h.credential.partition() == class)
                .cloned()
                .collect()
        };
        let interactive = Partition::new(TrafficClass::Interactive, members(TrafficClass::Interactive));
        let background = Partition::new(TrafficClass::Background, members(TrafficClass::Background));

        info!(
            handles = handles.len(),
            interactive = interactive.members.len(),
            background = background.members.len(),
            "client pool built"
        );
        if background.members.is_empty() {
            info!("background partition is empty, background traffic shares interactive handles");
        }

        Ok(Self {
            store,
            handles,
            interactive,
            background,
        })
    }

    /// The partition that actually serves `class`.
    fn partition(&self, class: TrafficClass) -> &Partition {
        let (own, other) = match class {
            TrafficClass::Interactive => (&self.interactive, &self.background),
            TrafficClass::Background => (&self.background, &self.interactive),
        };
        if own.members.is_empty() { other } else { own }
    }

    /// Next interactive handle in strict rotation, healthy or not.
    pub fn next_interactive(&self) -> Option<Arc<Handle>> {
        self.partition(TrafficClass::Interactive).next()
    }

    /// Next background handle in strict rotation, healthy or not.
    pub fn next_background(&self) -> Option<Arc<Handle>> {
        self.partition(TrafficClass::Background).next()
    }

    /// Next healthy handle for `class`.
    pub fn select(&self, class: TrafficClass) -> Result<Arc<Handle>> {
        self.partition(class).select_healthy()
    }

    pub fn handle(&self, index: usize) -> Option<&Arc<Handle>> {
        self.handles.iter().find(|h| h.index() == index)
    }

    pub fn handles(&self) -> &[Arc<Handle>] {
        &self.handles
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Number of handles serving `class`, after any fallback.
    pub fn partition_size(&self, class: TrafficClass) -> usize {
        self.partition(class).members.len()
    }

    /// Health summary for the health endpoint.
    ///
    /// All credentials healthy → healthy, some → degraded, none → unhealthy.
    pub fn health(&self, now: Instant, window: Duration) -> serde_json::Value {
        let mut credentials = Vec::with_capacity(self.store.len());
        let mut healthy = 0usize;

        for credential in self.store.credentials() {
            let is_healthy = credential.is_healthy();
            healthy += usize::from(is_healthy);
            let handle = self.handle(credential.index());
            credentials.push(serde_json::json!({
                "index": credential.index(),
                "name": credential.name(),
                "partition": credential.partition(),
                "status": if is_healthy { "healthy" } else { "unhealthy" },
                "connected": handle.is_some(),
                "calls_in_window": handle.and_then(|h| h.slot().in_window(now, window)),
            }));
        }

        let total = self.store.len();
        let status = if healthy == total && total > 0 {
            "healthy"
        } else if healthy > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": status,
            "credentials_total": total,
            "credentials_healthy": healthy,
            "credentials_unhealthy": total - healthy,
            "partitions": {
                "interactive": self.interactive.members.len(),
                "background": self.background.members.len(),
            },
            "credentials": credentials,
        })
    }
}

/// Publish the current unhealthy-credential count.
pub(crate) fn record_unhealthy(store: &CredentialStore) {
    metrics::gauge!("pool_credentials_unhealthy").set(store.unhealthy_count() as f64);
}
