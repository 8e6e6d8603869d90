//! Periodic eviction of expired cache entries
//!
//! Expired entries are dropped lazily when read, so a key that is never read
//! again would otherwise stay in memory. The sweeper runs independently of the
//! request path and never touches the remote.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::service::WorkspacePool;

/// Spawn a task that purges expired cache entries every `interval`.
///
/// Returns a `JoinHandle` for the spawned task; abort it to stop sweeping.
pub fn spawn_sweep_task(pool: Arc<WorkspacePool>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately and the cache starts empty.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep_cycle(&pool);
        }
    })
}

fn sweep_cycle(pool: &WorkspacePool) -> usize {
    let purged = pool.purge_expired_cache();
    if purged > 0 {
        debug!(purged, remaining = pool.cache().len(), "swept expired cache entries");
    }
    purged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use credentials::{CredentialBundle, TrafficClass};
    use remote::MemoryBackend;
    use remote::memory::ROOT_FOLDER_ID;

    fn pool() -> Arc<WorkspacePool> {
        let bundles = vec![CredentialBundle::new("c0", "svc0@example.iam", "key")];
        Arc::new(WorkspacePool::from_bundles(PoolConfig::default(), bundles, &MemoryBackend::new()).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_cycle_drops_only_expired_entries() {
        let pool = pool();
        pool.list_children(ROOT_FOLDER_ID, TrafficClass::Interactive).await.unwrap();
        assert_eq!(sweep_cycle(&pool), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(sweep_cycle(&pool), 1);
        assert!(pool.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_task_runs_on_its_interval() {
        let pool = pool();
        pool.list_children(ROOT_FOLDER_ID, TrafficClass::Interactive).await.unwrap();

        let task = spawn_sweep_task(pool.clone(), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(pool.cache().is_empty(), "listing outlived its 60s TTL");
        task.abort();
    }
}
