//! L1: a per-namespace, insertion-ordered, bounded in-memory cache with
//! O(1) LRU eviction.
//!
//! `lru::LruCache` already gives the `popitem(last=false)` eviction
//! semantics the spec calls for on `set` at capacity, so this module is
//! a thin namespace-locking wrapper around it plus the immutable stats
//! record the spec requires (`{hits, misses, evictions}`, replaced as a
//! whole under the lock rather than mutated field-by-field).

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry {
    bytes: Vec<u8>,
    inserted_at: Instant,
    ttl: Option<Duration>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.inserted_at.elapsed() > ttl,
            None => false,
        }
    }
}

/// A single namespace's L1 tier: bounded map plus its stats, guarded by
/// one lock so a mutation and its corresponding stats update are
/// observed atomically by any reader.
pub struct MemoryTier {
    inner: Mutex<(LruCache<String, Entry>, CacheStats)>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity must be nonzero");
        Self {
            inner: Mutex::new((LruCache::new(capacity), CacheStats::default())),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut guard = self.inner.lock();
        let (cache, stats) = &mut *guard;
        match cache.get(key) {
            Some(entry) if !entry.is_expired() => {
                let bytes = entry.bytes.clone();
                *stats = CacheStats {
                    hits: stats.hits + 1,
                    ..*stats
                };
                Some(bytes)
            }
            Some(_) => {
                cache.pop(key);
                *stats = CacheStats {
                    misses: stats.misses + 1,
                    ..*stats
                };
                None
            }
            None => {
                *stats = CacheStats {
                    misses: stats.misses + 1,
                    ..*stats
                };
                None
            }
        }
    }

    /// Insert a value, evicting the least-recently-inserted/-accessed
    /// entry if the tier is at capacity. Returns whether an eviction
    /// occurred.
    pub fn insert(&self, key: String, bytes: Vec<u8>, ttl: Option<Duration>) -> bool {
        let mut guard = self.inner.lock();
        let (cache, stats) = &mut *guard;
        let was_full = cache.len() == cache.cap().get() && !cache.contains(&key);
        cache.put(
            key,
            Entry {
                bytes,
                inserted_at: Instant::now(),
                ttl,
            },
        );
        if was_full {
            *stats = CacheStats {
                evictions: stats.evictions + 1,
                ..*stats
            };
        }
        was_full
    }

    pub fn remove(&self, key: &str) {
        let mut guard = self.inner.lock();
        guard.0.pop(key);
    }

    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        guard.0.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().1
    }

    pub fn len(&self) -> usize {
        self.inner.lock().0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let tier = MemoryTier::new(2);
        tier.insert("a".into(), b"1".to_vec(), None);
        tier.insert("b".into(), b"2".to_vec(), None);
        // touch "a" so "b" becomes the least-recently-used
        tier.get("a");
        tier.insert("c".into(), b"3".to_vec(), None);
        assert!(tier.get("a").is_some());
        assert!(tier.get("b").is_none());
        assert!(tier.get("c").is_some());
        assert_eq!(tier.stats().evictions, 1);
    }

    #[test]
    fn expired_entry_counts_as_miss_not_eviction() {
        let tier = MemoryTier::new(4);
        tier.insert("a".into(), b"1".to_vec(), Some(Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(tier.get("a").is_none());
        let stats = tier.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 0);
    }
}
