use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

/// raw domain -> normalized domain, strictly least-recently-used.
///
/// A single lock guards the LRU order so eviction is global rather than per
/// shard. Negative results are stored as empty strings like any other value.
pub struct NormalizationCache {
    inner: Mutex<LruCache<String, String, FxBuildHasher>>,
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

impl NormalizationCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::with_hasher(capacity, FxBuildHasher)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Looks up `raw` and marks it most recently used on a hit.
    pub fn get(&self, raw: &str) -> Option<String> {
        let found = self.inner.lock().get(raw).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Inserts or refreshes `raw`. Returns the entry evicted to make room, if any.
    pub fn insert(&self, raw: String, normalized: String) -> Option<(String, String)> {
        let mut inner = self.inner.lock();
        // push() also hands back the old pair when the key was already present
        // (two sources racing on the same miss); that is a refresh, not an eviction.
        let refresh = inner.contains(raw.as_str());
        let displaced = inner.push(raw, normalized);
        drop(inner);

        self.insertions.fetch_add(1, Ordering::Relaxed);
        let evicted = if refresh { None } else { displaced };
        if evicted.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Membership test that leaves the LRU order untouched.
    #[cfg(test)]
    pub fn contains_key(&self, raw: &str) -> bool {
        self.inner.lock().contains(raw)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
