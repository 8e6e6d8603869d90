//! The workspace pool service object
//!
//! `WorkspacePool` owns the credential store, handle pool, rate limiter, cache
//! and dispatcher. Build one at startup and share it by `Arc`; nothing in the
//! crate keeps global state, so tests can run as many independent pools as
//! they like.
//!
//! Every remote operation is a method tagged with the caller's traffic class.
//! The calls look synchronous to the caller but may suspend while a handle's
//! rate window drains.

use std::sync::Arc;
use std::time::Duration;

use credentials::{CredentialBundle, CredentialStore, TrafficClass};
use remote::{CellMatrix, FileMetadata};
use tracing::info;

use crate::cache::{Cache, Invalidation};
use crate::clock::{Clock, SystemClock};
use crate::config::PoolConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::executor::OperationExecutor;
use crate::operation::{Created, Operation, Outcome};
use crate::pool::{ClientPool, Connector, record_unhealthy};
use crate::rate_limit::RateLimiter;

pub struct WorkspacePool {
    dispatcher: Dispatcher,
    store: Arc<CredentialStore>,
    config: PoolConfig,
}

impl WorkspacePool {
    pub fn new(config: PoolConfig, store: Arc<CredentialStore>, connector: &dyn Connector) -> Result<Self> {
        Self::with_clock(config, store, connector, Arc::new(SystemClock))
    }

    /// Load `bundles` with the configured partition split and build the pool.
    pub fn from_bundles(config: PoolConfig, bundles: Vec<CredentialBundle>, connector: &dyn Connector) -> Result<Self> {
        let store = Arc::new(CredentialStore::load(bundles, config.split)?);
        Self::new(config, store, connector)
    }

    /// Build with an explicit clock, for deterministic tests.
    pub fn with_clock(
        config: PoolConfig,
        store: Arc<CredentialStore>,
        connector: &dyn Connector,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = ClientPool::build(Arc::clone(&store), connector)?;
        let cache = Arc::new(Cache::new(config.ttl, Arc::clone(&clock)));
        let executor = OperationExecutor::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            config.owner(),
            config.call_timeout(),
        );
        let limiter = RateLimiter::new(config.rate_limits(), Arc::clone(&clock));
        let dispatcher = Dispatcher::new(pool, limiter, cache, executor, config.retry, clock);

        info!(
            credentials = store.len(),
            quota_per_minute = config.quota_per_minute,
            min_spacing_ms = config.min_spacing_ms,
            max_attempts = config.retry.max_attempts,
            "workspace pool ready"
        );

        Ok(Self {
            dispatcher,
            store,
            config,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn pool(&self) -> &ClientPool {
        self.dispatcher.pool()
    }

    pub fn cache(&self) -> &Arc<Cache<Outcome>> {
        self.dispatcher.cache()
    }

    /// Route an arbitrary operation.
    pub async fn route(&self, op: &Operation, class: TrafficClass) -> Result<Outcome> {
        self.dispatcher.route(op, class).await
    }

    /// Route an operation that must start within `deadline`.
    pub async fn route_with_deadline(&self, op: &Operation, class: TrafficClass, deadline: Duration) -> Result<Outcome> {
        self.dispatcher.route_with_deadline(op, class, deadline).await
    }

    pub async fn create_folder(&self, name: &str, parent_id: &str, class: TrafficClass) -> Result<Created> {
        let op = Operation::CreateFolder {
            name: name.to_string(),
            parent_id: parent_id.to_string(),
        };
        self.route(&op, class).await?.into_created(op.name())
    }

    /// Id of the folder `name` under `parent_id`, creating it if absent.
    ///
    /// The lookup is cached under the folder's key, and a create fills that
    /// same key, so repeated calls stay local for the folder TTL.
    pub async fn get_or_create_folder(&self, name: &str, parent_id: &str, class: TrafficClass) -> Result<String> {
        if let Some(id) = self.find_folder_by_name(name, parent_id, class).await? {
            return Ok(id);
        }
        Ok(self.create_folder(name, parent_id, class).await?.id)
    }

    pub async fn find_folder_by_name(&self, name: &str, parent_id: &str, class: TrafficClass) -> Result<Option<String>> {
        let op = Operation::FindFolderByName {
            name: name.to_string(),
            parent_id: parent_id.to_string(),
        };
        self.route(&op, class).await?.into_maybe_id(op.name())
    }

    pub async fn upload_blob(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
        parent_id: &str,
        class: TrafficClass,
    ) -> Result<Created> {
        let op = Operation::UploadBlob {
            bytes,
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            parent_id: parent_id.to_string(),
        };
        self.route(&op, class).await?.into_created(op.name())
    }

    pub async fn list_children(&self, folder_id: &str, class: TrafficClass) -> Result<Vec<FileMetadata>> {
        let op = Operation::ListChildren {
            folder_id: folder_id.to_string(),
        };
        self.route(&op, class).await?.into_files(op.name())
    }

    pub async fn get_metadata(&self, id: &str, class: TrafficClass) -> Result<Option<FileMetadata>> {
        let op = Operation::GetMetadata { id: id.to_string() };
        self.route(&op, class).await?.into_file(op.name())
    }

    /// Whether the file existed and was deleted.
    pub async fn delete_file(&self, id: &str, class: TrafficClass) -> Result<bool> {
        let op = Operation::DeleteFile { id: id.to_string() };
        self.route(&op, class).await?.into_deleted(op.name())
    }

    pub async fn create_shareable_link(&self, id: &str, class: TrafficClass) -> Result<String> {
        let op = Operation::CreateShareableLink { id: id.to_string() };
        self.route(&op, class).await?.into_link(op.name())
    }

    pub async fn read_range(&self, sheet_id: &str, range: &str, class: TrafficClass) -> Result<CellMatrix> {
        let op = Operation::ReadRange {
            sheet_id: sheet_id.to_string(),
            range: range.to_string(),
        };
        self.route(&op, class).await?.into_values(op.name())
    }

    pub async fn write_range(&self, sheet_id: &str, range: &str, values: CellMatrix, class: TrafficClass) -> Result<()> {
        let op = Operation::WriteRange {
            sheet_id: sheet_id.to_string(),
            range: range.to_string(),
            values,
        };
        self.route(&op, class).await?.into_done(op.name())
    }

    pub async fn append_range(&self, sheet_id: &str, range: &str, values: CellMatrix, class: TrafficClass) -> Result<()> {
        let op = Operation::AppendRange {
            sheet_id: sheet_id.to_string(),
            range: range.to_string(),
            values,
        };
        self.route(&op, class).await?.into_done(op.name())
    }

    pub async fn clear_range(&self, sheet_id: &str, range: &str, class: TrafficClass) -> Result<()> {
        let op = Operation::ClearRange {
            sheet_id: sheet_id.to_string(),
            range: range.to_string(),
        };
        self.route(&op, class).await?.into_done(op.name())
    }

    pub async fn batch_update(&self, sheet_id: &str, requests: Vec<serde_json::Value>, class: TrafficClass) -> Result<()> {
        let op = Operation::BatchUpdate {
            sheet_id: sheet_id.to_string(),
            requests,
        };
        self.route(&op, class).await?.into_done(op.name())
    }

    /// New spreadsheet; `url` is always set on the result.
    pub async fn create_spreadsheet(&self, title: &str, parent_id: &str, class: TrafficClass) -> Result<Created> {
        let op = Operation::CreateSpreadsheet {
            title: title.to_string(),
            parent_id: parent_id.to_string(),
        };
        self.route(&op, class).await?.into_created(op.name())
    }

    pub async fn create_sheet_tab(&self, sheet_id: &str, name: &str, class: TrafficClass) -> Result<i64> {
        let op = Operation::CreateSheetTab {
            sheet_id: sheet_id.to_string(),
            name: name.to_string(),
        };
        self.route(&op, class).await?.into_tab(op.name())
    }

    pub async fn create_document(&self, title: &str, content: &str, parent_id: &str, class: TrafficClass) -> Result<Created> {
        let op = Operation::CreateDocument {
            title: title.to_string(),
            content: content.to_string(),
            parent_id: parent_id.to_string(),
        };
        self.route(&op, class).await?.into_created(op.name())
    }

    /// Drop cache entries for a resource changed outside this pool. `None`
    /// clears the whole cache. Returns the number of entries removed.
    pub fn invalidate_cache(&self, pattern: Option<&str>) -> usize {
        let removed = self.cache().invalidate(&Invalidation::from_pattern(pattern));
        info!(pattern = pattern.unwrap_or("*"), removed, "cache invalidated by request");
        removed
    }

    /// Evict expired cache entries. Returns how many were dropped.
    pub fn purge_expired_cache(&self) -> usize {
        self.cache().purge_expired()
    }

    /// Return credential `index` to routing after an external re-check.
    ///
    /// Returns whether the flag changed. Credentials that never connected stay
    /// out of routing regardless.
    pub fn mark_healthy(&self, index: usize) -> Result<bool> {
        let credential = self
            .store
            .get(index)
            .ok_or_else(|| Error::NotFound(format!("credential {index}")))?;
        let changed = credential.mark_healthy();
        if changed {
            info!(credential = index, partition = credential.partition().label(), "credential marked healthy");
            record_unhealthy(&self.store);
        }
        Ok(changed)
    }

    /// Health summary: credential states, partition sizes, cache size.
    pub fn health(&self) -> serde_json::Value {
        let now = self.dispatcher.clock().now();
        let window = self.dispatcher.limiter().limits().window;
        let mut health = self.pool().health(now, window);
        health["cache_entries"] = serde_json::json!(self.cache().len());
        health
    }
}
