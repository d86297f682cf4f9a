//! Response cache with lazy expiry and LRU eviction

use crate::cache::{
    config::CacheConfig,
    entry::CacheEntry,
    types::{CacheKey, CacheStats, CacheValue, TtlClass},
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Bounded response cache
///
/// - Thread-safe async access via RwLock; the lock is never held across I/O
/// - Expired entries are dropped when read, there is no background sweep
/// - LRU eviction when `max_entries` is reached
/// - Hit, miss and eviction counters
pub struct ResponseCache {
    /// Cache configuration
    config: CacheConfig,

    /// Internal storage
    store: RwLock<CacheStore>,
}

/// A stored entry plus its position in the recency order
struct Slot {
    entry: Arc<CacheEntry>,
    touched: u64,
}

/// Internal cache storage
struct CacheStore {
    /// Main storage: key -> slot
    entries: HashMap<CacheKey, Slot>,

    /// Recency order: touch sequence -> key, oldest first
    recency: BTreeMap<u64, CacheKey>,

    /// Monotonic touch counter; every get-hit and put takes the next value
    clock: u64,

    /// Current cache statistics
    stats: CacheStats,
}

impl CacheStore {
    fn touch(&mut self, key: &str) {
        self.clock += 1;
        let tick = self.clock;
        if let Some(slot) = self.entries.get_mut(key) {
            self.recency.remove(&slot.touched);
            slot.touched = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove_entry(&mut self, key: &str) -> Option<Arc<CacheEntry>> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.touched);
        Some(slot.entry)
    }

    /// Evict the least recently touched entry
    fn evict_lru(&mut self) -> Option<CacheKey> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        self.stats.evictions_capacity += 1;
        Some(key)
    }
}

impl ResponseCache {
    /// Create a new cache with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        info!("Initializing response cache with config: {:?}", config);

        let store = CacheStore {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
            stats: CacheStats::default(),
        };

        Self {
            config,
            store: RwLock::new(store),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a live entry from the cache
    ///
    /// An expired entry is removed and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let mut store = self.store.write().await;

        let entry = match store.entries.get(key) {
            Some(slot) => slot.entry.clone(),
            None => {
                debug!("Cache miss: {}", key);
                store.stats.misses += 1;
                return None;
            }
        };

        if entry.is_expired() {
            debug!("Cache entry expired: {}", key);
            store.remove_entry(key);
            store.stats.misses += 1;
            store.stats.evictions_ttl += 1;
            return None;
        }

        store.touch(key);
        store.stats.hits += 1;
        debug!("Cache hit: {}", key);
        Some(entry)
    }

    /// Insert a value, replacing any previous entry for the key
    pub async fn put(&self, key: CacheKey, value: CacheValue, ttl_class: TtlClass) {
        let ttl = self.config.ttl_for(ttl_class);
        let entry = Arc::new(CacheEntry::new(key.clone(), value, ttl_class, ttl));

        let mut store = self.store.write().await;

        if store.remove_entry(&key).is_some() {
            debug!("Replacing cache entry: {} ({})", key, ttl_class);
        } else {
            while store.entries.len() >= self.config.max_entries {
                match store.evict_lru() {
                    Some(evicted) => debug!("Evicting entry due to max_entries limit: {}", evicted),
                    None => break,
                }
            }
            debug!("Inserting cache entry: {} ({})", key, ttl_class);
        }

        store.entries.insert(key.clone(), Slot { entry, touched: 0 });
        store.touch(&key);
    }

    /// Check if a live key exists, without touching its recency
    pub async fn contains_key(&self, key: &str) -> bool {
        let store = self.store.read().await;
        store
            .entries
            .get(key)
            .map_or(false, |slot| !slot.entry.is_expired())
    }

    /// Remove a specific entry from the cache
    pub async fn remove(&self, key: &str) -> Option<CacheValue> {
        let mut store = self.store.write().await;

        let entry = store.remove_entry(key)?;
        store.stats.invalidations += 1;
        debug!("Removed cache entry: {}", key);
        Some(entry.value.clone())
    }

    /// Clear all entries from the cache
    pub async fn clear(&self) {
        let mut store = self.store.write().await;

        let count = store.entries.len();
        store.entries.clear();
        store.recency.clear();
        store.stats.invalidations += count as u64;

        info!("Cleared {} entries from cache", count);
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let store = self.store.read().await;
        CacheStats {
            entries: store.entries.len(),
            ..store.stats.clone()
        }
    }

    /// Get number of entries in cache, including expired ones not yet read
    pub async fn len(&self) -> usize {
        let store = self.store.read().await;
        store.entries.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        let store = self.store.read().await;
        store.entries.is_empty()
    }
}
