//! LRU cache of catalog slices keyed by normalized utterance and catalog
//! fingerprint. Any catalog change produces a new fingerprint, so stale
//! slices fall out by eviction rather than by age.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::slice::CatalogSlice;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

struct Entry {
    key: (String, String),
    slice: CatalogSlice,
}

/// Capacity is fixed at construction and clamped to at least one entry.
/// The internal mutex lets the service share the cache across request tasks.
pub struct CatalogSliceCache {
    capacity: usize,
    entries: Mutex<VecDeque<Entry>>,
}

impl CatalogSliceCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// Return the cached slice for `(key, fingerprint)`, invoking `builder`
    /// on a miss. A hit is promoted to most-recently-used; a miss evicts the
    /// least-recently-used entry once capacity is exceeded.
    pub fn get(
        &self,
        key: &str,
        fingerprint: &str,
        builder: impl FnOnce() -> CatalogSlice,
    ) -> CatalogSlice {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let position = entries
            .iter()
            .position(|entry| entry.key.0 == key && entry.key.1 == fingerprint);
        if let Some(entry) = position.and_then(|index| entries.remove(index)) {
            let slice = entry.slice.clone();
            entries.push_back(entry);
            return slice;
        }

        let slice = builder();
        entries.push_back(Entry {
            key: (key.to_string(), fingerprint.to_string()),
            slice: slice.clone(),
        });
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        slice
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

impl Default for CatalogSliceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
