use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use super::{CacheEntry, LruStore};

/// Fixed-capacity LRU cache with TTL expiry.
///
/// Cloning shares the underlying storage.
#[derive(Clone)]
pub struct Cache<K, V> {
    store: Arc<RwLock<LruStore<K, V>>>,
    max_size: usize,
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// `max_size` is clamped to at least one entry.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            store: Arc::new(RwLock::new(LruStore::new(ttl))),
            max_size: max_size.max(1),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns the value and marks it most recently used. Expired entries are dropped.
    pub async fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut store = self.store.write().await;
        if store.is_expired(key) {
            store.remove(key);
            return None;
        }
        store.promote(key).map(|entry| entry.value.clone())
    }

    pub async fn set(&self, key: K, value: V) {
        let mut store = self.store.write().await;
        if store.peek(&key).is_none() && store.len() >= self.max_size {
            store.pop_lru();
        }
        store.insert(key, CacheEntry::new(value, 0));
    }

    /// Same expiry check as [`get`](Self::get), without touching recency.
    pub async fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut store = self.store.write().await;
        if store.is_expired(key) {
            store.remove(key);
            return false;
        }
        store.peek(key).is_some()
    }

    pub async fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.store.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.store.write().await.drain_all();
    }

    /// Removes every expired entry, returning how many were dropped.
    pub async fn cleanup(&self) -> usize {
        self.store.write().await.drain_expired().len()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
