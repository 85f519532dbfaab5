//! TTL-bounded, usage-aware cache in front of the manifest store.
//!
//! Read-through: the coordinator consults the cache first and falls back
//! to durable storage on a miss. Expired entries are evicted lazily on
//! read and by a periodic sweep; a missed sweep is non-fatal and simply
//! deferred to the next cycle.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::RwLock;

use super::types::Manifest;

/// Cached manifest entry with usage metadata.
#[derive(Debug, Clone)]
struct CachedManifest {
    manifest: Manifest,
    cached_at: Instant,
    access_count: u64,
}

impl CachedManifest {
    fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            cached_at: Instant::now(),
            access_count: 0,
        }
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Configuration for the manifest cache.
#[derive(Debug, Clone)]
pub struct ManifestCacheConfig {
    /// Maximum number of cached manifests
    pub capacity: usize,
    /// Entry time-to-live; stale entries are evicted on read or sweep
    pub entry_ttl: Duration,
    /// Enable the periodic stale-entry sweep task
    pub enable_sweep: bool,
    /// Sweep interval
    pub sweep_interval: Duration,
}

impl Default for ManifestCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            entry_ttl: Duration::from_secs(1800), // 30 minutes
            enable_sweep: true,
            sweep_interval: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone)]
pub struct ManifestCacheStats {
    /// Number of manifests currently cached
    pub entry_count: usize,
    /// Cache capacity
    pub capacity: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    /// Cache hit rate percentage
    pub hit_rate: f64,
}

impl ManifestCacheStats {
    /// Calculate hit rate percentage.
    pub fn calculate_hit_rate(hit_count: u64, miss_count: u64) -> f64 {
        if hit_count + miss_count == 0 {
            0.0
        } else {
            (hit_count as f64) / ((hit_count + miss_count) as f64) * 100.0
        }
    }
}

/// LRU manifest cache with TTL expiry and statistics.
pub struct ManifestCache {
    cache: Arc<RwLock<LruCache<String, CachedManifest>>>,
    config: ManifestCacheConfig,
    hit_count: Arc<RwLock<u64>>,
    miss_count: Arc<RwLock<u64>>,
    eviction_count: Arc<RwLock<u64>>,
    _sweep_handle: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for ManifestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ManifestCache {
    /// Create a manifest cache, starting the sweep task if enabled.
    pub fn new(config: ManifestCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity)
            .unwrap_or_else(|| NonZeroUsize::new(64).unwrap());

        let cache = Arc::new(RwLock::new(LruCache::new(capacity)));
        let eviction_count = Arc::new(RwLock::new(0));

        let sweep_handle = if config.enable_sweep {
            let cache_clone = Arc::clone(&cache);
            let eviction_clone = Arc::clone(&eviction_count);
            let ttl = config.entry_ttl;
            let interval = config.sweep_interval;

            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    Self::sweep_stale_entries(&cache_clone, &eviction_clone, ttl).await;
                }
            }))
        } else {
            None
        };

        Self {
            cache,
            config,
            hit_count: Arc::new(RwLock::new(0)),
            miss_count: Arc::new(RwLock::new(0)),
            eviction_count,
            _sweep_handle: sweep_handle,
        }
    }

    pub fn new_default() -> Self {
        Self::new(ManifestCacheConfig::default())
    }

    /// Get a cached manifest, lazily evicting it if the TTL has expired.
    pub async fn get(&self, id: &str) -> Option<Manifest> {
        let mut cache = self.cache.write().await;

        if let Some(entry) = cache.get_mut(id) {
            if entry.is_stale(self.config.entry_ttl) {
                cache.pop(id);
                *self.eviction_count.write().await += 1;
                *self.miss_count.write().await += 1;
                tracing::debug!("Lazily evicted stale manifest '{id}'");
                return None;
            }

            entry.access_count += 1;
            *self.hit_count.write().await += 1;
            return Some(entry.manifest.clone());
        }

        *self.miss_count.write().await += 1;
        None
    }

    /// Insert or replace a cache entry, resetting its TTL.
    pub async fn put(&self, manifest: Manifest) {
        let mut cache = self.cache.write().await;
        cache.put(manifest.id.clone(), CachedManifest::new(manifest));
    }

    /// Invalidate one entry. Called synchronously by every mutating
    /// coordinator operation before it returns.
    pub async fn invalidate(&self, id: &str) {
        let mut cache = self.cache.write().await;
        if cache.pop(id).is_some() {
            tracing::debug!("Invalidated cached manifest '{id}'");
        }
    }

    /// Populate the cache from a freshly loaded manifest list.
    pub async fn preload(&self, manifests: impl IntoIterator<Item = Manifest>) {
        let mut cache = self.cache.write().await;
        for manifest in manifests {
            cache.put(manifest.id.clone(), CachedManifest::new(manifest));
        }
    }

    /// Drop every cache entry.
    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    /// Current cache statistics.
    pub async fn statistics(&self) -> ManifestCacheStats {
        let cache = self.cache.read().await;
        let hit_count = *self.hit_count.read().await;
        let miss_count = *self.miss_count.read().await;
        let eviction_count = *self.eviction_count.read().await;

        ManifestCacheStats {
            entry_count: cache.len(),
            capacity: cache.cap().get(),
            hit_count,
            miss_count,
            eviction_count,
            hit_rate: ManifestCacheStats::calculate_hit_rate(hit_count, miss_count),
        }
    }

    /// Run one sweep immediately, outside the periodic schedule.
    pub async fn sweep_now(&self) {
        Self::sweep_stale_entries(&self.cache, &self.eviction_count, self.config.entry_ttl)
            .await;
    }

    async fn sweep_stale_entries(
        cache: &Arc<RwLock<LruCache<String, CachedManifest>>>,
        eviction_count: &Arc<RwLock<u64>>,
        ttl: Duration,
    ) {
        let mut cache = cache.write().await;

        let stale_ids: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.is_stale(ttl))
            .map(|(id, _)| id.clone())
            .collect();

        if stale_ids.is_empty() {
            return;
        }

        let mut evictions = eviction_count.write().await;
        for id in stale_ids {
            if cache.pop(&id).is_some() {
                *evictions += 1;
                tracing::debug!("Swept stale manifest '{id}'");
            }
        }
    }
}

impl Drop for ManifestCache {
    fn drop(&mut self) {
        if let Some(handle) = self._sweep_handle.take() {
            handle.abort();
        }
    }
}
