use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::record::{Record, RecordKey};

/// Thread-safe LRU cache of fetched rows
///
/// Hard references from many rows to the same target (every article pointing
/// at one author) are resolved from here instead of re-querying the store.
/// A capacity of 0 disables caching.
pub struct RecordCache {
    cache: Option<Mutex<LruCache<RecordKey, Record>>>,
}

impl RecordCache {
    /// Create a new row cache with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    /// Get a cached row by its primary-key identity
    pub fn get(&self, key: &RecordKey) -> Option<Record> {
        let cache = self.cache.as_ref()?;
        let mut guard = cache.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(key).cloned()
    }

    /// Store a row in the cache
    pub fn put(&self, key: RecordKey, record: Record) {
        if let Some(cache) = &self.cache {
            let mut guard = cache.lock().unwrap_or_else(|e| e.into_inner());
            guard.put(key, record);
        }
    }

    /// Get the current number of cached entries
    pub fn len(&self) -> usize {
        self.cache
            .as_ref()
            .map(|c| c.lock().unwrap_or_else(|e| e.into_inner()).len())
            .unwrap_or(0)
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
