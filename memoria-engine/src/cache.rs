//! Bounded, TTL'd cache of fused search envelopes.
//!
//! Keyed on the canonicalized `(query, options)` pair. Uses `moka::sync::Cache`
//! rather than the hand-rolled LRU in `memoria-embeddings::cache` — that cache
//! needed exact eviction-count bookkeeping its invariants depend on; this one
//! only needs approximate bounded-size + TTL behavior, which `moka` gives for
//! free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::sync::Cache;

use crate::types::{SearchEnvelope, SearchOptions};

pub struct ResultCache {
    cache: Cache<String, SearchEnvelope>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity as u64)
            .time_to_live(ttl)
            .build();
        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, query: &str, options: &SearchOptions) -> Option<SearchEnvelope> {
        let key = options.cache_key(query);
        let hit = self.cache.get(&key);
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    pub fn put(&self, query: &str, options: &SearchOptions, envelope: SearchEnvelope) {
        self.cache.insert(options.cache_key(query), envelope);
    }

    /// Drops every entry. Called after any mutating operation — staleness
    /// is tolerated only within a single quiescent window between writes.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
