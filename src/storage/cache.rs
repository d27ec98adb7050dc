//! Tiered buffer cache
//!
//! Two instances sit in front of the block files:
//! - decoded cache: `(specification, id)` → rendered data URL
//! - origin cache: `(Origin, id)` → raw payload bytes
//!
//! Both are plain LRUs bounded by entry count.

use crate::storage::types::{ImageId, ImageSpecification};
use lru::LruCache;
use std::num::NonZeroUsize;

/// Cache key: representation plus image
pub type CacheKey = (ImageSpecification, ImageId);

/// Capacity-bounded LRU keyed by `(specification, image id)`
pub struct BufferCache<V> {
    cache: LruCache<CacheKey, V>,
}

impl<V: Clone> BufferCache<V> {
    /// Create a cache holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(cap),
        }
    }

    /// Look up an entry, marking it recently used
    pub fn get(&mut self, spec: ImageSpecification, id: ImageId) -> Option<V> {
        self.cache.get(&(spec, id)).cloned()
    }

    /// Insert or overwrite an entry
    pub fn set(&mut self, spec: ImageSpecification, id: ImageId, value: V) {
        self.cache.put((spec, id), value);
    }

    /// Drop every specification cached for an image
    pub fn remove(&mut self, id: ImageId) -> usize {
        let keys: Vec<CacheKey> = self
            .cache
            .iter()
            .filter(|((_, cached_id), _)| *cached_id == id)
            .map(|(key, _)| *key)
            .collect();

        for key in &keys {
            self.cache.pop(key);
        }
        keys.len()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}

impl<V> std::fmt::Debug for BufferCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferCache")
            .field("len", &self.cache.len())
            .field("capacity", &self.cache.cap())
            .finish()
    }
}
