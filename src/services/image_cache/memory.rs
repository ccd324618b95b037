//! Bounded in-process cache tier with insertion-order eviction.
//!
//! Backed by `LruCache`, but recency is never refreshed: reads use `peek` and
//! a `put` for a key that is already present is ignored, so the eviction
//! order is exactly the insertion order.

use lru::LruCache;
use serde::Serialize;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, trace};

pub struct MemoryCache<K, V> {
    entries: RwLock<LruCache<K, V>>,
    capacity: NonZeroUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> MemoryCache<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        match entries.peek(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = ?key, "Memory cache hit");
                Some(value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key = ?key, "Memory cache miss");
                None
            }
        }
    }

    /// Insert an entry, evicting the oldest one when full.
    ///
    /// Returns `false` when the key was already present (the stored value and
    /// its position are left untouched).
    pub async fn put(&self, key: K, value: V) -> bool {
        let mut entries = self.entries.write().await;
        if entries.contains(&key) {
            return false;
        }
        if let Some((evicted, _)) = entries.push(key, value) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = ?evicted, "Evicted oldest memory cache entry");
        }
        true
    }

    pub async fn contains(&self, key: &K) -> bool {
        self.entries.read().await.contains(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub async fn stats(&self) -> MemoryCacheStats {
        MemoryCacheStats {
            entries: self.len().await,
            capacity: self.capacity(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryCacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = MemoryCache::new(10);
        assert!(cache.put("a".to_string(), 1).await);
        assert_eq!(cache.get(&"a".to_string()).await, Some(1));
        assert_eq!(cache.get(&"b".to_string()).await, None);
    }

    #[tokio::test]
    async fn test_overflow_evicts_earliest_inserted() {
        let cache = MemoryCache::new(3);
        for key in ["k1", "k2", "k3"] {
            cache.put(key, key.len()).await;
        }
        cache.put("k4", 2).await;

        assert!(cache.get(&"k1").await.is_none());
        assert!(cache.get(&"k2").await.is_some());
        assert!(cache.get(&"k3").await.is_some());
        assert!(cache.get(&"k4").await.is_some());
        assert_eq!(cache.len().await, 3);
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_reads_do_not_refresh_recency() {
        let cache = MemoryCache::new(2);
        cache.put("old", 1).await;
        cache.put("new", 2).await;

        // A true LRU would now evict "new"
        assert_eq!(cache.get(&"old").await, Some(1));
        cache.put("newest", 3).await;

        assert!(cache.get(&"old").await.is_none());
        assert_eq!(cache.get(&"new").await, Some(2));
    }

    #[tokio::test]
    async fn test_reinsert_keeps_original_position_and_value() {
        let cache = MemoryCache::new(2);
        cache.put("first", 1).await;
        cache.put("second", 2).await;

        assert!(!cache.put("first", 100).await);
        assert_eq!(cache.get(&"first").await, Some(1));

        cache.put("third", 3).await;
        assert!(cache.get(&"first").await.is_none());
        assert!(cache.contains(&"second").await);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped_to_one() {
        let cache = MemoryCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put(1, "a").await;
        cache.put(2, "b").await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&2).await, Some("b"));
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let cache = MemoryCache::new(4);
        cache.put(1u32, 1u32).await;
        let _ = cache.get(&1).await;
        let _ = cache.get(&2).await;
        let _ = cache.get(&3).await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.capacity, 4);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_respect_capacity() {
        let cache = Arc::new(MemoryCache::new(16));
        let mut handles = Vec::new();
        for worker in 0..8u32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50u32 {
                    cache.put(worker * 1000 + i, i).await;
                    let _ = cache.get(&(worker * 1000 + i)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len().await, 16);
        assert_eq!(cache.stats().await.evictions, 8 * 50 - 16);
    }
}
