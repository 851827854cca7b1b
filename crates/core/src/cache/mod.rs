//! Bounded LRU caches with TTL expiry.
//!
//! [`Cache`] is the plain variant. [`EnhancedCache`] adds access statistics,
//! a memory ceiling and an eviction callback. Both sit on [`LruStore`], an
//! insertion-ordered map whose front is always the least recently used key.

mod enhanced;
mod lru;

pub use enhanced::{ApproxSize, CacheStats, EnhancedCache, EnhancedCacheOptions, EntryStats, EvictionCallback};
pub use lru::Cache;

use std::borrow::Borrow;
use std::hash::Hash;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// A cached value together with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub approx_size_bytes: usize,
    inserted: Instant,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, approx_size_bytes: usize) -> Self {
        let now = Utc::now();
        Self {
            value,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            approx_size_bytes,
            inserted: Instant::now(),
        }
    }

    /// Monotonic age since insertion
    pub fn age(&self) -> Duration {
        self.inserted.elapsed()
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }

    fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed_at = Utc::now();
    }
}

/// Recency-ordered storage shared by both cache variants.
///
/// Not synchronised; the owning cache wraps it in a lock.
#[derive(Debug)]
pub(crate) struct LruStore<K, V> {
    entries: IndexMap<K, CacheEntry<V>>,
    ttl: Duration,
}

impl<K: Hash + Eq, V> LruStore<K, V> {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            entries: IndexMap::new(),
            ttl,
        }
    }

    pub(crate) fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn peek<Q>(&self, key: &Q) -> Option<&CacheEntry<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    pub(crate) fn is_expired<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(self.ttl))
    }

    /// Moves the entry to the most recently used slot and records the hit.
    pub(crate) fn promote<Q>(&mut self, key: &Q) -> Option<&CacheEntry<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (k, mut entry) = self.entries.shift_remove_entry(key)?;
        entry.touch();
        let (index, _) = self.entries.insert_full(k, entry);
        self.entries.get_index(index).map(|(_, entry)| entry)
    }

    /// Inserts at the most recently used slot, replacing any previous entry.
    pub(crate) fn insert(&mut self, key: K, entry: CacheEntry<V>) -> Option<CacheEntry<V>> {
        let previous = self.entries.shift_remove(&key);
        self.entries.insert(key, entry);
        previous
    }

    pub(crate) fn remove<Q>(&mut self, key: &Q) -> Option<(K, CacheEntry<V>)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.shift_remove_entry(key)
    }

    pub(crate) fn pop_lru(&mut self) -> Option<(K, CacheEntry<V>)> {
        self.entries.shift_remove_index(0)
    }

    pub(crate) fn drain_expired(&mut self) -> Vec<(K, CacheEntry<V>)> {
        let ttl = self.ttl;
        let mut expired = Vec::new();
        let mut kept = IndexMap::with_capacity(self.entries.len());
        for (key, entry) in self.entries.drain(..) {
            if entry.is_expired(ttl) {
                expired.push((key, entry));
            } else {
                kept.insert(key, entry);
            }
        }
        self.entries = kept;
        expired
    }

    pub(crate) fn drain_all(&mut self) -> Vec<(K, CacheEntry<V>)> {
        self.entries.drain(..).collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &CacheEntry<V>)> {
        self.entries.iter()
    }
}
