//! Manifest coordinator: the single source of truth for active providers.
//!
//! Facade over the validating store and the TTL cache. All mutations are
//! serialized through one writer lock and synchronously update or
//! invalidate the cache entry before returning, so the cache never serves
//! a manifest staler than the last successful mutation. Reactive consumers
//! subscribe to a watch channel carrying the full manifest list.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use url::Url;

use super::cache::{ManifestCache, ManifestCacheStats};
use super::errors::ManifestError;
use super::parsing;
use super::store::ManifestStore;
use super::transport::ManifestTransport;
use super::types::{Capability, Manifest};

/// Coordinates manifest CRUD, caching, refresh, and change notification.
///
/// Explicitly constructed and injected into consumers; there is no ambient
/// global instance.
#[derive(Debug)]
pub struct ManifestCoordinator {
    store: ManifestStore,
    cache: ManifestCache,
    transport: Arc<dyn ManifestTransport>,
    write_guard: Mutex<()>,
    manifests_tx: watch::Sender<Vec<Manifest>>,
}

impl ManifestCoordinator {
    /// Create a coordinator, preloading the cache and the observable list
    /// from durable storage.
    ///
    /// # Errors
    /// - `ManifestError::Storage` - Initial load from persistence failed
    pub async fn new(
        store: ManifestStore,
        cache: ManifestCache,
        transport: Arc<dyn ManifestTransport>,
    ) -> Result<Self, ManifestError> {
        let manifests = store.load_all().await?;
        cache.preload(manifests.iter().cloned()).await;

        let (manifests_tx, _) = watch::channel(sorted(manifests));

        Ok(Self {
            store,
            cache,
            transport,
            write_guard: Mutex::new(()),
            manifests_tx,
        })
    }

    /// Fetch one manifest, read-through: cache hit returns immediately,
    /// a miss reads from the store and populates the cache.
    ///
    /// # Errors
    /// - `ManifestError::NotFound` - No manifest with this id
    pub async fn get(&self, id: &str) -> Result<Manifest, ManifestError> {
        if let Some(manifest) = self.cache.get(id).await {
            return Ok(manifest);
        }

        let manifest = self.store.get(id).await?;
        self.cache.put(manifest.clone()).await;
        Ok(manifest)
    }

    /// Import a manifest from a URL.
    ///
    /// Fetches and parses the document, then validates. A manifest that
    /// fails validation is persisted as Invalid (visible for correction)
    /// and the error is returned.
    ///
    /// # Errors
    /// - `ManifestError::Network` - Document fetch failed
    /// - `ManifestError::Parse` - Document is not a recognizable manifest
    /// - `ManifestError::Validation` - Manifest persisted as Invalid
    pub async fn add(&self, url: &Url) -> Result<Manifest, ManifestError> {
        let _guard = self.write_guard.lock().await;

        let document = self.transport.fetch(url).await?;
        let manifest = parsing::parse_manifest(&document)?;
        let id = manifest.id.clone();

        tracing::info!("Importing manifest '{id}' from {url}");
        let result = self.store.save_validated(manifest).await;

        match &result {
            Ok(saved) => self.cache.put(saved.clone()).await,
            Err(_) => self.cache.invalidate(&id).await,
        }
        self.publish().await;
        result
    }

    /// Re-validate and persist an edited manifest.
    ///
    /// # Errors
    /// - `ManifestError::Validation` - Manifest persisted as Invalid
    pub async fn update(&self, manifest: Manifest) -> Result<Manifest, ManifestError> {
        let _guard = self.write_guard.lock().await;
        let id = manifest.id.clone();

        let result = self.store.save_validated(manifest).await;
        match &result {
            Ok(saved) => self.cache.put(saved.clone()).await,
            Err(_) => self.cache.invalidate(&id).await,
        }
        self.publish().await;
        result
    }

    /// Remove a manifest.
    ///
    /// # Errors
    /// - `ManifestError::NotFound` - No manifest with this id
    pub async fn remove(&self, id: &str) -> Result<(), ManifestError> {
        let _guard = self.write_guard.lock().await;

        self.store.remove(id).await?;
        self.cache.invalidate(id).await;
        self.publish().await;
        tracing::info!("Removed manifest '{id}'");
        Ok(())
    }

    /// Re-fetch a manifest from its base URL and re-validate it, preserving
    /// the local overrides: `enabled`, `priority`, and reliability history.
    ///
    /// # Errors
    /// - `ManifestError::NotFound` - No manifest with this id
    /// - `ManifestError::Network` - Re-fetch failed; nothing is mutated
    /// - `ManifestError::Validation` - Refreshed manifest persisted as Invalid
    pub async fn refresh(&self, id: &str) -> Result<Manifest, ManifestError> {
        let _guard = self.write_guard.lock().await;

        let current = self.store.get(id).await?;
        let manifest_url = manifest_document_url(&current.base_url)?;
        let document = self.transport.fetch(&manifest_url).await?;

        let mut refreshed = parsing::parse_manifest(&document)?;
        refreshed.id = current.id;
        refreshed.enabled = current.enabled;
        refreshed.priority = current.priority;
        refreshed.reliability = current.reliability;
        refreshed.consecutive_failures = current.consecutive_failures;

        let result = self.store.save_validated(refreshed).await;
        match &result {
            Ok(saved) => self.cache.put(saved.clone()).await,
            Err(_) => self.cache.invalidate(id).await,
        }
        self.publish().await;
        result
    }

    /// Every stored manifest, invalid ones included, sorted by priority.
    pub async fn list_all(&self) -> Result<Vec<Manifest>, ManifestError> {
        Ok(sorted(self.store.load_all().await?))
    }

    /// Enabled manifests, sorted by priority. The fan-out layer narrows
    /// this further to valid, stream-capable providers.
    pub async fn list_enabled(&self) -> Result<Vec<Manifest>, ManifestError> {
        Ok(sorted(
            self.store
                .load_all()
                .await?
                .into_iter()
                .filter(|m| m.enabled)
                .collect(),
        ))
    }

    /// Search stored manifests by name/id substring and optional capability.
    pub async fn search(
        &self,
        query: &str,
        capability: Option<Capability>,
    ) -> Result<Vec<Manifest>, ManifestError> {
        let needle = query.to_lowercase();
        Ok(sorted(
            self.store
                .load_all()
                .await?
                .into_iter()
                .filter(|m| {
                    m.name.to_lowercase().contains(&needle)
                        || m.id.to_lowercase().contains(&needle)
                })
                .filter(|m| capability.is_none_or(|c| m.capabilities.contains(&c)))
                .collect(),
        ))
    }

    /// Toggle the local enable override.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<Manifest, ManifestError> {
        self.mutate_unchecked(id, |m| m.enabled = enabled).await
    }

    /// Update the local priority override.
    pub async fn set_priority(&self, id: &str, priority: i32) -> Result<Manifest, ManifestError> {
        self.mutate_unchecked(id, |m| m.priority = priority).await
    }

    /// Record a provider query outcome from the fan-out layer.
    ///
    /// Updates the reliability tier; a manifest removed mid-query is
    /// silently ignored.
    pub async fn record_query_outcome(
        &self,
        id: &str,
        success: bool,
    ) -> Result<(), ManifestError> {
        match self.mutate_unchecked(id, |m| m.record_query_outcome(success)).await {
            Ok(_) => Ok(()),
            Err(ManifestError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Subscribe to the observable manifest list.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Manifest>> {
        self.manifests_tx.subscribe()
    }

    /// Cache statistics for monitoring.
    pub async fn cache_statistics(&self) -> ManifestCacheStats {
        self.cache.statistics().await
    }

    /// Bookkeeping mutation that cannot affect validation-relevant fields.
    async fn mutate_unchecked(
        &self,
        id: &str,
        apply: impl FnOnce(&mut Manifest),
    ) -> Result<Manifest, ManifestError> {
        let _guard = self.write_guard.lock().await;

        let mut manifest = self.store.get(id).await?;
        apply(&mut manifest);
        self.store.save_unchecked(&manifest).await?;
        self.cache.put(manifest.clone()).await;
        self.publish().await;
        Ok(manifest)
    }

    async fn publish(&self) {
        match self.store.load_all().await {
            Ok(manifests) => {
                self.manifests_tx.send_replace(sorted(manifests));
            }
            Err(e) => tracing::warn!("Could not refresh observable manifest list: {e}"),
        }
    }
}

/// Priority order: higher priority first, ties broken by id.
fn sorted(mut manifests: Vec<Manifest>) -> Vec<Manifest> {
    manifests.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
    manifests
}

/// Conventional manifest document location under a provider base URL.
fn manifest_document_url(base_url: &Url) -> Result<Url, ManifestError> {
    let mut url = base_url.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|_| ManifestError::Network {
            url: base_url.to_string(),
            reason: "base URL cannot carry a path".to_string(),
        })?;
        segments.pop_if_empty().push("manifest.json");
    }
    Ok(url)
}
