use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{CacheEntry, LruStore};

/// Rough in-memory footprint of a cached value.
///
/// An estimate for eviction decisions only, not an exact byte count.
pub trait ApproxSize {
    fn approx_size(&self) -> usize;
}

impl ApproxSize for Value {
    fn approx_size(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 4,
            Value::Number(_) => 8,
            Value::String(s) => s.chars().count() * 2,
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(self).map(|s| s.len() * 2).unwrap_or(0)
            }
        }
    }
}

impl ApproxSize for String {
    fn approx_size(&self) -> usize {
        self.chars().count() * 2
    }
}

/// Invoked with the key and entry right after an entry is evicted.
pub type EvictionCallback<K, V> = Arc<dyn Fn(&K, &CacheEntry<V>) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancedCacheOptions {
    pub max_size: usize,
    pub ttl_ms: u64,
    pub max_memory_bytes: usize,
}

impl Default for EnhancedCacheOptions {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_ms: 300_000,
            max_memory_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_ms: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub memory_bytes: usize,
    pub max_memory_bytes: usize,
    pub evictions: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Per-entry statistics without the value itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStats {
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub approx_size_bytes: usize,
}

struct EnhancedState<K, V> {
    store: LruStore<K, V>,
    hits: u64,
    misses: u64,
    evictions: u64,
    memory_bytes: usize,
}

impl<K: Hash + Eq, V> EnhancedState<K, V> {
    fn forget(&mut self, entry: &CacheEntry<V>) {
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.approx_size_bytes);
    }

    fn evicted(&mut self, evicted: &[(K, CacheEntry<V>)]) {
        for (_, entry) in evicted {
            self.forget(entry);
        }
        self.evictions += evicted.len() as u64;
    }
}

/// LRU cache with access statistics, a memory ceiling and eviction notifications.
pub struct EnhancedCache<K, V> {
    state: Arc<RwLock<EnhancedState<K, V>>>,
    options: EnhancedCacheOptions,
    on_evict: Option<EvictionCallback<K, V>>,
}

impl<K, V> Clone for EnhancedCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            options: self.options.clone(),
            on_evict: self.on_evict.clone(),
        }
    }
}

impl<K, V> fmt::Debug for EnhancedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnhancedCache")
            .field("options", &self.options)
            .field("has_eviction_callback", &self.on_evict.is_some())
            .finish()
    }
}

impl<K, V> EnhancedCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone + ApproxSize,
{
    pub fn new(options: EnhancedCacheOptions) -> Self {
        let options = EnhancedCacheOptions {
            max_size: options.max_size.max(1),
            ..options
        };
        Self {
            state: Arc::new(RwLock::new(EnhancedState {
                store: LruStore::new(Duration::from_millis(options.ttl_ms)),
                hits: 0,
                misses: 0,
                evictions: 0,
                memory_bytes: 0,
            })),
            options,
            on_evict: None,
        }
    }

    /// Registers a callback for entries leaving the cache through LRU
    /// pressure, expiry or [`clear`](Self::clear).
    ///
    /// The callback runs after the entry has been removed and after the
    /// internal lock is released, so it may call back into the cache. It
    /// receives the removed entry by reference. Explicit `delete` and
    /// overwriting a key do not trigger it.
    pub fn with_eviction_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&K, &CacheEntry<V>) + Send + Sync + 'static,
    {
        self.on_evict = Some(Arc::new(callback));
        self
    }

    pub fn options(&self) -> &EnhancedCacheOptions {
        &self.options
    }

    // 调用方必须已释放 state 锁
    fn notify(&self, evicted: &[(K, CacheEntry<V>)]) {
        if evicted.is_empty() {
            return;
        }
        metrics::counter!("hotconf_cache_evictions_total").increment(evicted.len() as u64);
        if let Some(callback) = &self.on_evict {
            for (key, entry) in evicted {
                callback(key, entry);
            }
        }
    }

    pub async fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut evicted = Vec::new();
        let found = {
            let mut state = self.state.write().await;
            if state.store.is_expired(key) {
                if let Some(expired) = state.store.remove(key) {
                    evicted.push(expired);
                }
                state.evicted(&evicted);
            }
            match state.store.promote(key).map(|entry| entry.value.clone()) {
                Some(value) => {
                    state.hits += 1;
                    Some(value)
                }
                None => {
                    state.misses += 1;
                    None
                }
            }
        };
        self.notify(&evicted);
        found
    }

    /// Inserts a value, evicting least recently used entries until both the
    /// entry limit and the memory ceiling hold.
    ///
    /// Returns `false` when the value alone exceeds the memory ceiling; the
    /// cache is left unchanged in that case.
    pub async fn set(&self, key: K, value: V) -> bool {
        let size = value.approx_size();
        if size > self.options.max_memory_bytes {
            warn!(
                key = ?key,
                size_bytes = size,
                max_memory_bytes = self.options.max_memory_bytes,
                "值超过缓存内存上限，拒绝写入"
            );
            return false;
        }

        let mut evicted = Vec::new();
        {
            let mut state = self.state.write().await;
            if let Some((_, previous)) = state.store.remove(&key) {
                state.forget(&previous);
            }
            while state.store.len() >= self.options.max_size
                || state.memory_bytes + size > self.options.max_memory_bytes
            {
                match state.store.pop_lru() {
                    Some(lru) => {
                        state.forget(&lru.1);
                        evicted.push(lru);
                    }
                    None => break,
                }
            }
            state.evictions += evicted.len() as u64;
            state.memory_bytes += size;
            state.store.insert(key, CacheEntry::new(value, size));
        }

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "缓存淘汰最久未使用条目");
        }
        self.notify(&evicted);
        true
    }

    /// Expiry-checked presence test; does not count as an access.
    pub async fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut evicted = Vec::new();
        let present = {
            let mut state = self.state.write().await;
            if state.store.is_expired(key) {
                if let Some(expired) = state.store.remove(key) {
                    evicted.push(expired);
                }
                state.evicted(&evicted);
            }
            state.store.peek(key).is_some()
        };
        self.notify(&evicted);
        present
    }

    /// Explicit removal. Not reported as an eviction.
    pub async fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut state = self.state.write().await;
        match state.store.remove(key) {
            Some((_, entry)) => {
                state.forget(&entry);
                true
            }
            None => false,
        }
    }

    /// Empties the cache; every entry goes through the eviction callback.
    pub async fn clear(&self) {
        let evicted = {
            let mut state = self.state.write().await;
            let drained = state.store.drain_all();
            state.evicted(&drained);
            state.memory_bytes = 0;
            drained
        };
        self.notify(&evicted);
    }

    /// Removes every expired entry now and returns how many were dropped.
    pub async fn cleanup(&self) -> usize {
        let evicted = {
            let mut state = self.state.write().await;
            let expired = state.store.drain_expired();
            state.evicted(&expired);
            expired
        };
        self.notify(&evicted);
        evicted.len()
    }

    /// Keys from least to most recently used.
    pub async fn keys(&self) -> Vec<K> {
        let state = self.state.read().await;
        state.store.iter().map(|(key, _)| key.clone()).collect()
    }

    pub async fn entry<Q>(&self, key: &Q) -> Option<EntryStats>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let state = self.state.read().await;
        state.store.peek(key).map(|entry| EntryStats {
            created_at: entry.created_at,
            last_accessed_at: entry.last_accessed_at,
            access_count: entry.access_count,
            approx_size_bytes: entry.approx_size_bytes,
        })
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.store.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        let lookups = state.hits + state.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            state.hits as f64 / lookups as f64
        };

        CacheStats {
            size: state.store.len(),
            max_size: self.options.max_size,
            ttl_ms: state.store.ttl().as_millis() as u64,
            hits: state.hits,
            misses: state.misses,
            hit_rate,
            memory_bytes: state.memory_bytes,
            max_memory_bytes: self.options.max_memory_bytes,
            evictions: state.evictions,
            oldest_entry: state.store.iter().map(|(_, e)| e.created_at).min(),
            newest_entry: state.store.iter().map(|(_, e)| e.created_at).max(),
        }
    }
}
