use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::error::CacheError;

/// Stable integer identifier of a tracked resource (catalog-oid sized).
pub type ResourceId = u32;

/// Default sizing hint for a session's cache.
pub const DEFAULT_CAPACITY_HINT: usize = 128;

/// Cached per-resource state: whether the downstream consumer already holds
/// this resource's metadata, and whether that knowledge is still trustworthy.
///
/// Entries are created on first lookup with `metadata_sent = false` and
/// `valid = true`. Only the collaborator flips `metadata_sent` to true (after
/// a confirmed full send), and only the invalidation path flips `valid` to
/// false. An invalid entry is logically deleted; it stays in the store until
/// the next sweep so that any handle still held by in-progress export work
/// keeps pointing at live storage.
pub struct MetaCacheEntry {
    resource_id: ResourceId,
    metadata_sent: AtomicBool,
    valid: AtomicBool,
    /// Collaborator-owned derived data; never interpreted here.
    payload: RwLock<Option<Box<dyn Any + Send + Sync>>>,
}

impl MetaCacheEntry {
    fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            metadata_sent: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            payload: RwLock::new(None),
        }
    }

    /// The resource this entry tracks.
    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    /// Whether a complete metadata send has been confirmed for this resource.
    pub fn metadata_sent(&self) -> bool {
        self.metadata_sent.load(Ordering::Relaxed)
    }

    /// Records that the collaborator sent complete metadata and the consumer
    /// is expected to have cached it.
    pub fn mark_sent(&self) {
        self.metadata_sent.store(true, Ordering::Relaxed);
    }

    /// Whether the entry is still trustworthy. False means a change
    /// notification arrived since the last validation.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    /// Flags the entry stale. The single mutation the notification path is
    /// allowed to perform; idempotent and non-structural.
    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::Relaxed);
    }

    /// Resets a stale entry for reuse: trustworthy again, send owed again.
    /// The payload is dropped because it was derived from the resource's
    /// pre-invalidation state.
    pub(crate) fn revalidate(&self) {
        self.metadata_sent.store(false, Ordering::Relaxed);
        self.valid.store(true, Ordering::Relaxed);
        *self.payload.write() = None;
    }

    /// Stores collaborator-owned derived data on the entry, replacing any
    /// previous payload.
    pub fn set_payload<T: Any + Send + Sync>(&self, payload: T) {
        *self.payload.write() = Some(Box::new(payload));
    }

    /// Runs `f` against the stored payload if one exists and is of type `T`.
    pub fn with_payload<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.payload.read();
        guard.as_ref().and_then(|p| p.downcast_ref::<T>()).map(f)
    }

    /// Drops any stored payload.
    pub fn clear_payload(&self) {
        *self.payload.write() = None;
    }
}

impl fmt::Debug for MetaCacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaCacheEntry")
            .field("resource_id", &self.resource_id)
            .field("metadata_sent", &self.metadata_sent())
            .field("valid", &self.is_valid())
            .field("has_payload", &self.payload.read().is_some())
            .finish()
    }
}

/// Counters for cache behavior over one session.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    pruned: AtomicU64,
}

impl CacheStats {
    /// Lookups that found an existing entry.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that had to create an entry.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Notifications that flagged a tracked entry stale.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Stale entries physically removed by sweeps.
    pub fn pruned(&self) -> u64 {
        self.pruned.load(Ordering::Relaxed)
    }

    /// Calculate the cache hit rate (hits / (hits + misses))
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// A point-in-time copy of all counters.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            invalidations: self.invalidations(),
            pruned: self.pruned(),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    fn record_pruned(&self, count: u64) {
        self.pruned.fetch_add(count, Ordering::Relaxed);
    }
}

/// Serializable copy of [`CacheStats`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub pruned: u64,
}

/// The per-session store of metadata-sent state, keyed by resource id.
///
/// The store is the sole owner of its entries; lookups hand out `Arc` clones
/// as borrowed views. No lock is held across calls back into collaborator
/// code, which keeps the store safe to touch from the reentrant notification
/// callback.
#[derive(Debug)]
pub struct MetaCache {
    entries: RwLock<HashMap<ResourceId, Arc<MetaCacheEntry>>>,
    stats: CacheStats,
}

impl MetaCache {
    /// Creates an empty store sized for roughly `capacity_hint` resources.
    pub fn with_capacity(capacity_hint: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(capacity_hint)),
            stats: CacheStats::default(),
        }
    }

    /// Returns the entry for `resource_id`, creating it with defaults if
    /// absent, plus whether the entry already existed. Existence check and
    /// insert happen under one lock so the invalidation path can never
    /// observe a half-created entry.
    pub fn lookup_or_create(&self, resource_id: ResourceId) -> (Arc<MetaCacheEntry>, bool) {
        let mut entries = self.entries.write();
        match entries.entry(resource_id) {
            Entry::Occupied(slot) => {
                self.stats.record_hit();
                (Arc::clone(slot.get()), true)
            }
            Entry::Vacant(slot) => {
                self.stats.record_miss();
                let entry = Arc::new(MetaCacheEntry::new(resource_id));
                slot.insert(Arc::clone(&entry));
                (entry, false)
            }
        }
    }

    /// Returns the entry for `resource_id` without creating one. This is the
    /// lookup the notification path uses; it performs no structural mutation.
    pub fn find(&self, resource_id: ResourceId) -> Option<Arc<MetaCacheEntry>> {
        self.entries.read().get(&resource_id).cloned()
    }

    /// Removes an entry. Reserved for the sweep, which is the sole remover.
    fn remove(&self, resource_id: ResourceId) -> Option<Arc<MetaCacheEntry>> {
        self.entries.write().remove(&resource_id)
    }

    /// Physically removes every entry flagged stale and returns how many were
    /// reclaimed.
    ///
    /// The entry set is snapshotted up front, so each entry present at sweep
    /// start is visited exactly once and removals cannot disturb the walk.
    /// Callers must guarantee quiescence: no live entry handles, and not
    /// inside the notification callback.
    pub fn prune(&self) -> Result<usize, CacheError> {
        let snapshot: Vec<Arc<MetaCacheEntry>> = self.entries.read().values().cloned().collect();

        let mut pruned = 0;
        for entry in snapshot {
            if entry.is_valid() {
                continue;
            }
            if self.remove(entry.resource_id()).is_none() {
                return Err(CacheError::Corrupted(entry.resource_id()));
            }
            pruned += 1;
        }

        self.stats.record_pruned(pruned as u64);
        debug!("pruned {} stale entries from metadata cache", pruned);
        Ok(pruned)
    }

    /// Number of entries currently in the store, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Counters for this store.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl Default for MetaCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_HINT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_defaults() {
        let cache = MetaCache::default();
        let (entry, preexisting) = cache.lookup_or_create(7);
        assert!(!preexisting);
        assert_eq!(entry.resource_id(), 7);
        assert!(entry.is_valid());
        assert!(!entry.metadata_sent());
    }

    #[test]
    fn lookup_returns_the_same_entry() {
        let cache = MetaCache::default();
        let (first, _) = cache.lookup_or_create(7);
        let (second, preexisting) = cache.lookup_or_create(7);
        assert!(preexisting);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn prune_removes_only_stale_entries() {
        let cache = MetaCache::default();
        let (keep, _) = cache.lookup_or_create(1);
        keep.mark_sent();
        let (gone_a, _) = cache.lookup_or_create(2);
        let (gone_b, _) = cache.lookup_or_create(3);
        gone_a.invalidate();
        gone_b.invalidate();

        assert_eq!(cache.prune().unwrap(), 2);
        assert_eq!(cache.len(), 1);

        let survivor = cache.find(1).unwrap();
        assert!(survivor.is_valid());
        assert!(survivor.metadata_sent());
        assert!(cache.find(2).is_none());
        assert!(cache.find(3).is_none());
    }

    #[test]
    fn prune_on_clean_store_is_a_no_op() {
        let cache = MetaCache::default();
        cache.lookup_or_create(1);
        assert_eq!(cache.prune().unwrap(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn revalidate_resets_entry_state() {
        let cache = MetaCache::default();
        let (entry, _) = cache.lookup_or_create(5);
        entry.mark_sent();
        entry.set_payload(vec![1u8, 2, 3]);
        entry.invalidate();

        entry.revalidate();
        assert!(entry.is_valid());
        assert!(!entry.metadata_sent());
        assert!(entry.with_payload(|p: &Vec<u8>| p.len()).is_none());
    }

    #[test]
    fn payload_is_typed_and_replaceable() {
        let cache = MetaCache::default();
        let (entry, _) = cache.lookup_or_create(5);
        assert!(entry.with_payload(|s: &String| s.clone()).is_none());

        entry.set_payload("columns".to_string());
        assert_eq!(
            entry.with_payload(|s: &String| s.clone()).as_deref(),
            Some("columns")
        );
        // Wrong type reads as absent rather than panicking.
        assert!(entry.with_payload(|n: &u64| *n).is_none());

        entry.clear_payload();
        assert!(entry.with_payload(|s: &String| s.clone()).is_none());
    }

    #[test]
    fn stats_track_lookups_and_prunes() {
        let cache = MetaCache::default();
        cache.lookup_or_create(1);
        cache.lookup_or_create(1);
        cache.lookup_or_create(2);
        cache.find(2).unwrap().invalidate();
        cache.stats().record_invalidation();
        cache.prune().unwrap();

        let snapshot = cache.stats().snapshot();
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 2);
        assert_eq!(snapshot.invalidations, 1);
        assert_eq!(snapshot.pruned, 1);
        assert!((cache.stats().hit_rate() - 1.0 / 3.0).abs() < f64::EPSILON);
    }
}
