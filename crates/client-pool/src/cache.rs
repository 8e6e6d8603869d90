//! TTL cache in front of read operations
//!
//! Entries live in a sharded `DashMap`, so reads and writes of distinct keys
//! only contend when they hash to the same shard, and a pattern invalidation
//! locks one shard at a time instead of the whole key space.
//!
//! An entry is fresh while its age is strictly below its category's TTL. A
//! `get` that finds an expired entry removes it and reports a miss.
//!
//! Invalidations bump a generation counter and note themselves in a short log
//! before removing anything. A read captures the generation before calling the
//! remote and stores its result with `set_since`, which refuses to store if an
//! invalidation matching its key ran in between. Without that, a slow read
//! could put pre-write data back after the write had already invalidated it.
//! Invalidations of unrelated keys do not cost the read its cache entry; once
//! the log has rolled past the read's generation the result is discarded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::clock::Clock;

/// Cache category, which selects the TTL of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    /// Folder name to id lookups.
    FolderId,
    /// Child listings of a folder.
    Listing,
    /// File metadata.
    Metadata,
    /// Spreadsheet range contents.
    Range,
}

impl CacheCategory {
    pub fn label(&self) -> &'static str {
        match self {
            CacheCategory::FolderId => "folder_id",
            CacheCategory::Listing => "listing",
            CacheCategory::Metadata => "metadata",
            CacheCategory::Range => "range",
        }
    }
}

/// TTL per category, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TtlTable {
    pub folder_id: u64,
    pub listing: u64,
    pub metadata: u64,
    pub range: u64,
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            folder_id: 300,
            listing: 60,
            metadata: 600,
            range: 30,
        }
    }
}

impl TtlTable {
    pub fn ttl(&self, category: CacheCategory) -> Duration {
        let secs = match category {
            CacheCategory::FolderId => self.folder_id,
            CacheCategory::Listing => self.listing,
            CacheCategory::Metadata => self.metadata,
            CacheCategory::Range => self.range,
        };
        Duration::from_secs(secs)
    }
}

/// Which entries an invalidation removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    All,
    /// Exactly this key.
    Exact(String),
    /// Every key containing this substring.
    Pattern(String),
}

impl Invalidation {
    /// `None` clears everything; `Some(p)` removes keys containing `p`.
    pub fn from_pattern(pattern: Option<&str>) -> Self {
        match pattern {
            Some(p) => Invalidation::Pattern(p.to_string()),
            None => Invalidation::All,
        }
    }

    pub fn exact(key: impl Into<String>) -> Self {
        Invalidation::Exact(key.into())
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Invalidation::Pattern(pattern.into())
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Invalidation::All => true,
            Invalidation::Exact(k) => k == key,
            Invalidation::Pattern(p) => key.contains(p.as_str()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Invalidation::All => "all",
            Invalidation::Exact(_) => "exact",
            Invalidation::Pattern(_) => "pattern",
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    category: CacheCategory,
    stored_at: Instant,
}

/// Recent invalidations kept for reads still in flight.
const INVALIDATION_LOG_LEN: usize = 256;

/// Key/value cache with per-category TTLs.
pub struct Cache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    ttls: TtlTable,
    clock: Arc<dyn Clock>,
    generation: AtomicU64,
    recent: Mutex<VecDeque<(u64, Invalidation)>>,
}

impl<V: Clone> Cache<V> {
    pub fn new(ttls: TtlTable, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttls,
            clock,
            generation: AtomicU64::new(0),
            recent: Mutex::new(VecDeque::with_capacity(INVALIDATION_LOG_LEN)),
        }
    }

    pub fn ttls(&self) -> &TtlTable {
        &self.ttls
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, key: &str, category: CacheCategory) -> Option<V> {
        let ttl = self.ttls.ttl(category);
        let now = self.clock.now();

        let stale_since = match self.entries.get(key) {
            None => {
                record_lookup(category, "miss");
                debug!(key, "cache miss");
                return None;
            }
            Some(entry) if now.saturating_duration_since(entry.stored_at) < ttl => {
                record_lookup(category, "hit");
                debug!(key, "cache hit");
                return Some(entry.value.clone());
            }
            Some(entry) => entry.stored_at,
        };

        // Only drop the entry we judged stale; a concurrent set may have replaced it.
        self.entries
            .remove_if(key, |_, entry| entry.stored_at == stale_since);
        record_lookup(category, "expired");
        debug!(key, "cache entry expired");
        None
    }

    pub fn set(&self, key: impl Into<String>, value: V, category: CacheCategory) {
        let key = key.into();
        debug!(key = %key, category = category.label(), "cache set");
        self.entries.insert(
            key,
            CacheEntry {
                value,
                category,
                stored_at: self.clock.now(),
            },
        );
    }

    /// Current invalidation generation, captured before a read goes remote.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Store `value` only if no invalidation matching `key` ran since
    /// `generation` was read.
    ///
    /// Returns whether the value was stored.
    pub fn set_since(&self, key: impl Into<String>, value: V, category: CacheCategory, generation: u64) -> bool {
        let key = key.into();
        let stored_at = self.clock.now();
        // The shard lock is held across the check and the insert, and
        // invalidations are logged before they take shard locks.
        let entry = self.entries.entry(key);
        if self.invalidated_since(entry.key(), generation) {
            debug!(category = category.label(), "discarding read result that raced an invalidation");
            return false;
        }
        let cached = CacheEntry {
            value,
            category,
            stored_at,
        };
        match entry {
            Entry::Occupied(mut occupied) => {
                occupied.insert(cached);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(cached);
            }
        }
        true
    }

    fn invalidated_since(&self, key: &str, generation: u64) -> bool {
        if self.generation.load(Ordering::SeqCst) == generation {
            return false;
        }
        let recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        match recent.front() {
            // The log no longer reaches back to `generation`.
            Some(&(oldest, _)) if oldest > generation + 1 => true,
            None => true,
            Some(_) => recent
                .iter()
                .any(|(seen, request)| *seen > generation && request.matches(key)),
        }
    }

    fn log_invalidation(&self, request: Invalidation) {
        let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if recent.len() == INVALIDATION_LOG_LEN {
            recent.pop_front();
        }
        recent.push_back((generation, request));
    }

    /// Remove matching entries and return how many were removed.
    pub fn invalidate(&self, request: &Invalidation) -> usize {
        self.log_invalidation(request.clone());
        let removed = match request {
            Invalidation::Exact(key) => usize::from(self.entries.remove(key).is_some()),
            other => {
                let mut removed = 0;
                self.entries.retain(|key, _| {
                    let hit = other.matches(key);
                    removed += usize::from(hit);
                    !hit
                });
                removed
            }
        };
        if removed > 0 {
            metrics::counter!("pool_cache_invalidations_total", "kind" => request.kind())
                .increment(removed as u64);
        }
        debug!(?request, removed, "cache invalidated");
        removed
    }

    /// Remove every entry within `scope` whose value satisfies `predicate`.
    pub fn invalidate_where(&self, scope: &Invalidation, predicate: impl Fn(&V) -> bool) -> usize {
        self.log_invalidation(scope.clone());
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            let hit = scope.matches(key) && predicate(&entry.value);
            removed += usize::from(hit);
            !hit
        });
        if removed > 0 {
            metrics::counter!("pool_cache_invalidations_total", "kind" => "dependent")
                .increment(removed as u64);
        }
        removed
    }

    /// Drop every entry past its TTL. Does not count as an invalidation.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            let fresh = now.saturating_duration_since(entry.stored_at) < self.ttls.ttl(entry.category);
            purged += usize::from(!fresh);
            fresh
        });
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

fn record_lookup(category: CacheCategory, result: &'static str) {
    metrics::counter!(
        "pool_cache_lookups_total",
        "category" => category.label(),
        "result" => result
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (Cache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (Cache::new(TtlTable::default(), clock.clone()), clock)
    }

    #[test]
    fn value_is_fresh_strictly_inside_its_ttl() {
        let (cache, clock) = cache();
        cache.set("folder:Gallery:root", "f1".to_string(), CacheCategory::FolderId);

        clock.advance(Duration::from_secs(299));
        assert_eq!(
            cache.get("folder:Gallery:root", CacheCategory::FolderId).as_deref(),
            Some("f1")
        );

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("folder:Gallery:root", CacheCategory::FolderId), None);
        assert!(!cache.contains_key("folder:Gallery:root"), "expired entry is removed on read");
    }

    #[test]
    fn categories_use_their_own_ttls() {
        let (cache, clock) = cache();
        cache.set("children:f1", "listing".to_string(), CacheCategory::Listing);
        cache.set("meta:f1", "meta".to_string(), CacheCategory::Metadata);

        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get("children:f1", CacheCategory::Listing), None);
        assert!(cache.get("meta:f1", CacheCategory::Metadata).is_some());
    }

    #[test]
    fn pattern_invalidation_removes_exactly_matching_keys() {
        let (cache, _) = cache();
        for key in ["range:s1:A1:B2", "range:s1:C1", "range:s2:A1", "meta:s1"] {
            cache.set(key, key.to_string(), CacheCategory::Range);
        }

        assert_eq!(cache.invalidate(&Invalidation::pattern("range:s1:")), 2);
        assert!(!cache.contains_key("range:s1:A1:B2"));
        assert!(!cache.contains_key("range:s1:C1"));
        assert!(cache.contains_key("range:s2:A1"));
        assert!(cache.contains_key("meta:s1"));
    }

    #[test]
    fn exact_invalidation_and_clear_all() {
        let (cache, _) = cache();
        cache.set("meta:a", "a".to_string(), CacheCategory::Metadata);
        cache.set("meta:ab", "ab".to_string(), CacheCategory::Metadata);

        assert_eq!(cache.invalidate(&Invalidation::exact("meta:a")), 1);
        assert!(cache.contains_key("meta:ab"));
        assert_eq!(cache.invalidate(&Invalidation::exact("meta:a")), 0);

        assert_eq!(cache.invalidate(&Invalidation::from_pattern(None)), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn set_since_refuses_results_older_than_an_invalidation() {
        let (cache, _) = cache();
        let before = cache.generation();
        cache.invalidate(&Invalidation::pattern("children:f1"));

        assert!(!cache.set_since("children:f1", "stale".to_string(), CacheCategory::Listing, before));
        assert_eq!(cache.get("children:f1", CacheCategory::Listing), None);

        let now = cache.generation();
        assert!(cache.set_since("children:f1", "fresh".to_string(), CacheCategory::Listing, now));
        assert_eq!(cache.get("children:f1", CacheCategory::Listing).as_deref(), Some("fresh"));
    }

    #[test]
    fn invalidate_where_inspects_values() {
        let (cache, _) = cache();
        cache.set("folder:A:root", "f1".to_string(), CacheCategory::FolderId);
        cache.set("folder:B:root", "f2".to_string(), CacheCategory::FolderId);

        cache.set("meta:f2", "f2".to_string(), CacheCategory::Metadata);

        assert_eq!(cache.invalidate_where(&Invalidation::pattern("folder:"), |id| id == "f2"), 1);
        assert!(cache.contains_key("folder:A:root"));
        assert!(!cache.contains_key("folder:B:root"));
        assert!(cache.contains_key("meta:f2"), "outside the scope");
    }

    #[test]
    fn unrelated_invalidation_does_not_discard_an_in_flight_read() {
        let (cache, _) = cache();
        let before = cache.generation();
        cache.invalidate(&Invalidation::pattern("range:s1:"));
        cache.invalidate(&Invalidation::exact("children:f2"));

        assert!(cache.set_since("children:f1", "listing".to_string(), CacheCategory::Listing, before));
        assert!(!cache.set_since("children:f2", "stale".to_string(), CacheCategory::Listing, before));
    }

    #[test]
    fn read_older_than_the_invalidation_log_is_discarded() {
        let (cache, _) = cache();
        let before = cache.generation();
        for i in 0..=INVALIDATION_LOG_LEN {
            cache.invalidate(&Invalidation::exact(format!("meta:other-{i}")));
        }

        assert!(!cache.set_since("children:f1", "listing".to_string(), CacheCategory::Listing, before));
        let now = cache.generation();
        assert!(cache.set_since("children:f1", "listing".to_string(), CacheCategory::Listing, now));
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let (cache, clock) = cache();
        cache.set("range:s:A1", "r".to_string(), CacheCategory::Range);
        cache.set("folder:A:root", "f".to_string(), CacheCategory::FolderId);

        clock.advance(Duration::from_secs(30));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key("folder:A:root"));
    }

    #[test]
    fn ttl_table_fills_missing_categories_with_defaults() {
        let table: TtlTable = serde_json::from_str(r#"{"listing": 5}"#).unwrap();
        assert_eq!(table.ttl(CacheCategory::Listing), Duration::from_secs(5));
        assert_eq!(table.ttl(CacheCategory::FolderId), Duration::from_secs(300));
    }
}
