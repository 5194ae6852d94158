//! Answer cache.
//!
//! A bounded, least-recently-used map from a question to the answer the
//! upstream resolver gave for it, with hit/miss accounting. The TTL of a
//! cached answer is kept verbatim but never expires the entry; only capacity
//! pressure or an explicit `clear` removes answers.

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use log::debug;
use lru::LruCache;
use metrics::gauge;

use crate::dns::{Answer, Question};

/// Default number of cached answers.
pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Interval for publishing cache statistics.
pub const CACHE_STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Exact-match lookup key: name bytes are compared as-is, without case folding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    pub type_: u16,
    pub class_: u16,
}

impl From<&Question> for CacheKey {
    fn from(question: &Question) -> Self {
        Self {
            name: question.name.clone(),
            type_: question.type_,
            class_: question.class_,
        }
    }
}

/// Snapshot of the cache counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 before any lookup.
    pub hit_rate: f64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Publish the snapshot as gauges for the metrics exporter.
    pub fn publish(&self) {
        gauge!("dns_cache_hits", self.hits as f64);
        gauge!("dns_cache_misses", self.misses as f64);
        gauge!("dns_cache_hit_rate", self.hit_rate);
        gauge!("dns_cache_size", self.size as f64);
        gauge!("dns_cache_capacity", self.capacity as f64);
    }
}

#[derive(Debug)]
struct Inner {
    entries: LruCache<CacheKey, Answer>,
    hits: u64,
    misses: u64,
}

/// Shared answer cache. Clones share the same entries and counters.
#[derive(Debug, Clone)]
pub struct DnsCache {
    inner: Arc<Mutex<Inner>>,
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl DnsCache {
    /// Create an empty cache holding at most `capacity` answers.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            })),
        }
    }

    // A panic while holding the lock cannot leave the LRU half-updated in a
    // way later lookups would trip over, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up an answer, marking it most recently used on a hit.
    pub fn get(&self, key: &CacheKey) -> Option<Answer> {
        let mut inner = self.lock();
        match inner.entries.get(key).cloned() {
            Some(answer) => {
                inner.hits += 1;
                debug!("Cache hit for {} type {}", key.name, key.type_);
                Some(answer)
            }
            None => {
                inner.misses += 1;
                debug!("Cache miss for {} type {}", key.name, key.type_);
                None
            }
        }
    }

    /// Insert or overwrite an answer as the most recently used entry.
    ///
    /// Inserting a new key into a full cache evicts the least recently used
    /// entry first; overwriting an existing key evicts nothing.
    pub fn put(&self, key: CacheKey, answer: Answer) {
        let mut inner = self.lock();
        if let Some((evicted, _)) = inner.entries.push(key, answer) {
            if !inner.entries.contains(&evicted) {
                debug!("Evicted {} type {} from cache", evicted.name, evicted.type_);
            }
        }
    }

    /// Drop every entry and reset both counters.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            size: inner.entries.len(),
            capacity: inner.entries.cap().get(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().entries.cap().get()
    }
}
