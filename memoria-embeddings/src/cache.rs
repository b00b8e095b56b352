//! Bounded embedding cache: strict LRU eviction with per-entry TTL.
//!
//! `moka` (used elsewhere in this workspace for the coordinator's result
//! cache) is a TinyLFU admission cache with probabilistic, lazily-applied
//! eviction — it cannot report an exact count of entries it dropped, nor
//! does it guarantee the least-recently-used entry is the one evicted at
//! capacity. Both properties are load-bearing here, so this cache is a
//! plain `HashMap` plus an explicit LRU queue instead.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A fixed-capacity LRU cache of content-hash to embedding, with TTL.
pub struct EmbeddingCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<[u8; 32], Entry>,
    /// Back = most recently used. Keys may appear stale here; `touch`
    /// lazily drops a key's old position when it reappears at the back.
    order: VecDeque<[u8; 32]>,
    hits: u64,
    misses: u64,
}

struct Entry {
    value: Vec<f32>,
    inserted_at: Instant,
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the cached vector, or `None` if absent or expired. A hit
    /// promotes the key to most-recently-used.
    pub fn get(&mut self, key: &[u8; 32]) -> Option<Vec<f32>> {
        let expired = match self.entries.get(key) {
            Some(e) => e.inserted_at.elapsed() > self.ttl,
            None => {
                self.misses += 1;
                return None;
            }
        };
        if expired {
            self.entries.remove(key);
            self.misses += 1;
            return None;
        }
        self.touch(*key);
        self.hits += 1;
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Equivalent to a successful `get`, without cloning the value.
    pub fn has(&mut self, key: &[u8; 32]) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or replaces. Evicts the least-recently-used entry if the
    /// cache is at capacity and `key` is new.
    pub fn set(&mut self, key: [u8; 32], value: Vec<f32>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        self.touch(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Drops all expired entries and returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.inserted_at.elapsed() <= ttl);
        let removed = before - self.entries.len();
        self.order.retain(|k| self.entries.contains_key(k));
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            len: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
        }
    }

    fn touch(&mut self, key: [u8; 32]) {
        self.order.retain(|k| *k != key);
        self.order.push_back(key);
    }

    fn evict_lru(&mut self) {
        while let Some(oldest) = self.order.pop_front() {
            if self.entries.remove(&oldest).is_some() {
                break;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> [u8; 32] {
        let mut k = [0u8; 32];
        k[0] = n;
        k
    }

    #[test]
    fn insert_and_get() {
        let mut cache = EmbeddingCache::new(4, Duration::from_secs(60));
        cache.set(key(1), vec![1.0, 2.0]);
        assert_eq!(cache.get(&key(1)), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn miss_returns_none() {
        let mut cache = EmbeddingCache::new(4, Duration::from_secs(60));
        assert_eq!(cache.get(&key(9)), None);
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let mut cache = EmbeddingCache::new(2, Duration::from_secs(60));
        cache.set(key(1), vec![1.0]);
        cache.set(key(2), vec![2.0]);
        // touch key(1) so key(2) becomes the LRU entry
        cache.get(&key(1));
        cache.set(key(3), vec![3.0]);
        assert_eq!(cache.get(&key(2)), None);
        assert!(cache.get(&key(1)).is_some());
        assert!(cache.get(&key(3)).is_some());
    }

    #[test]
    fn expired_entries_report_as_absent_and_prune_counts_them() {
        let mut cache = EmbeddingCache::new(4, Duration::from_millis(1));
        cache.set(key(1), vec![1.0]);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&key(1)), None);
        cache.set(key(2), vec![2.0]);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.prune(), 1);
    }

    #[test]
    fn clear_empties_cache() {
        let mut cache = EmbeddingCache::new(4, Duration::from_secs(60));
        cache.set(key(1), vec![1.0]);
        cache.clear();
        assert!(cache.is_empty());
    }
}
