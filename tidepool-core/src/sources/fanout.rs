//! Concurrent provider query fan-out.
//!
//! One user query fans out to every queryable provider at once. Slow
//! providers are bounded by a per-attempt timeout, failing providers are
//! retried a fixed number of times and then silently dropped from the
//! batch, and a newer query for the same content supersedes the results
//! of an older one via a per-content generation counter. Provider
//! failures degrade the batch, never fail it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

use super::errors::SourceError;
use super::providers::{SourceProvider, SourceProviderFactory};
use super::types::{ContentRequest, SourceCandidate};
use crate::config::FanoutConfig;
use crate::manifest::{Manifest, ManifestCoordinator};

/// Fans a content query out across all queryable providers.
#[derive(Debug)]
pub struct SourceQueryFanout {
    coordinator: Arc<ManifestCoordinator>,
    factory: Arc<dyn SourceProviderFactory>,
    config: FanoutConfig,
    semaphore: Arc<Semaphore>,
    /// Latest query generation per content key; an in-flight query whose
    /// generation falls behind has been superseded for that content
    generations: Mutex<HashMap<String, u64>>,
}

/// Supersede scope: one key per distinct content item, episode-precise.
fn content_key(request: &ContentRequest) -> String {
    match (request.season, request.episode) {
        (Some(season), Some(episode)) => {
            format!("{}:{season}:{episode}", request.content_id)
        }
        _ => request.content_id.clone(),
    }
}

impl SourceQueryFanout {
    pub fn new(
        coordinator: Arc<ManifestCoordinator>,
        factory: Arc<dyn SourceProviderFactory>,
        config: FanoutConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_queries.max(1)));
        Self {
            coordinator,
            factory,
            config,
            semaphore,
            generations: Mutex::new(HashMap::new()),
        }
    }

    /// Query every queryable provider and merge the surviving results.
    ///
    /// Returns an empty batch when a newer query for the same content
    /// started while this one was in flight; stale results must never
    /// reach the caller. Queries for different content never supersede
    /// each other.
    pub async fn query(&self, request: &ContentRequest) -> Vec<SourceCandidate> {
        let key = content_key(request);
        let generation = {
            let mut generations = self.generations.lock();
            let current = generations.entry(key.clone()).or_insert(0);
            *current += 1;
            *current
        };

        let enabled = match self.coordinator.list_enabled().await {
            Ok(manifests) => manifests,
            Err(error) => {
                tracing::warn!("Failed to list providers for fan-out: {error}");
                return Vec::new();
            }
        };
        let manifests: Vec<Manifest> = enabled
            .into_iter()
            .filter(Manifest::is_queryable)
            .collect();

        if manifests.is_empty() {
            tracing::debug!("No queryable providers for '{}'", request.content_id);
            return Vec::new();
        }

        tracing::debug!(
            providers = manifests.len(),
            content_id = %request.content_id,
            "Fanning out source query"
        );

        let mut tasks = JoinSet::new();
        for manifest in manifests {
            let provider = self.factory.provider_for(&manifest);
            let request = request.clone();
            let semaphore = Arc::clone(&self.semaphore);
            let config = self.config.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    let error = SourceError::Provider {
                        provider_id: manifest.id.clone(),
                        reason: "query pool shut down".to_string(),
                    };
                    return (manifest, Err(error));
                };
                let outcome = query_with_retry(provider.as_ref(), &request, &config).await;
                (manifest, outcome)
            });
        }

        let mut merged = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((manifest, outcome)) = joined else {
                continue;
            };

            let succeeded = outcome.is_ok();
            match outcome {
                Ok(candidates) => {
                    merged.extend(candidates.into_iter().map(|mut candidate| {
                        candidate.provider_priority = manifest.priority;
                        candidate.provider_reliability = manifest.reliability;
                        candidate
                    }));
                }
                Err(error) => {
                    // Logged at the failing attempt; the provider is
                    // simply absent from this batch
                    tracing::debug!(
                        provider_id = error.provider_id(),
                        "Provider dropped from batch: {error}"
                    );
                }
            }

            if let Err(error) = self
                .coordinator
                .record_query_outcome(&manifest.id, succeeded)
                .await
            {
                tracing::warn!(
                    provider_id = %manifest.id,
                    "Failed to record query outcome: {error}"
                );
            }
        }

        let superseded = self
            .generations
            .lock()
            .get(&key)
            .is_some_and(|current| *current != generation);
        if superseded {
            tracing::debug!(
                content_id = %request.content_id,
                "Discarding superseded query results"
            );
            return Vec::new();
        }

        merged
    }
}

/// Run one provider query with the configured timeout and retry policy.
/// Returns the last attempt's error once the retry budget is spent.
async fn query_with_retry(
    provider: &dyn SourceProvider,
    request: &ContentRequest,
    config: &FanoutConfig,
) -> Result<Vec<SourceCandidate>, SourceError> {
    let attempts = config.retry_attempts.max(1);

    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = match timeout(config.provider_timeout, provider.query(request)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                provider_id: provider.provider_id().to_string(),
                timeout_secs: config.provider_timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(candidates) => {
                tracing::debug!(
                    provider_id = provider.provider_id(),
                    count = candidates.len(),
                    "Provider returned candidates"
                );
                return Ok(candidates);
            }
            Err(error) => {
                tracing::warn!(
                    provider_id = provider.provider_id(),
                    attempt,
                    "Provider query failed: {error}"
                );
                if attempt >= attempts {
                    return Err(error);
                }
            }
        }

        tokio::time::sleep(config.retry_backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use url::Url;

    use super::*;
    use crate::manifest::{
        Capability, InMemoryManifestPersistence, ManifestCache, ManifestCacheConfig,
        ManifestStore, ProviderReliability, StaticManifestTransport, ValidationStatus,
    };
    use crate::sources::providers::mock::{MockSourceProvider, p2p_candidate};
    use crate::sources::types::Resolution;

    #[derive(Debug, Default)]
    struct MockProviderFactory {
        providers: HashMap<String, Arc<dyn SourceProvider>>,
    }

    impl MockProviderFactory {
        fn with_provider(mut self, id: &str, provider: MockSourceProvider) -> Self {
            self.providers.insert(id.to_string(), Arc::new(provider));
            self
        }
    }

    impl SourceProviderFactory for MockProviderFactory {
        fn provider_for(&self, manifest: &Manifest) -> Arc<dyn SourceProvider> {
            Arc::clone(
                self.providers
                    .get(&manifest.id)
                    .unwrap_or_else(|| panic!("no mock provider for '{}'", manifest.id)),
            )
        }
    }

    fn queryable_manifest(id: &str) -> Manifest {
        Manifest {
            id: id.to_string(),
            name: id.to_string(),
            base_url: Url::parse("https://provider.example.com").unwrap(),
            capabilities: std::collections::HashSet::from([Capability::Stream]),
            enabled: true,
            priority: 0,
            validation_status: ValidationStatus::Valid,
            last_error: None,
            last_refreshed_at: None,
            reliability: ProviderReliability::Unknown,
            consecutive_failures: 0,
        }
    }

    async fn coordinator_with(manifests: Vec<Manifest>) -> Arc<ManifestCoordinator> {
        let persistence = Arc::new(InMemoryManifestPersistence::with_manifests(manifests));
        let store = ManifestStore::new(persistence);
        let cache = ManifestCache::new(ManifestCacheConfig {
            enable_sweep: false,
            ..Default::default()
        });
        let transport = Arc::new(StaticManifestTransport::new());
        Arc::new(
            ManifestCoordinator::new(store, cache, transport)
                .await
                .unwrap(),
        )
    }

    fn test_config() -> FanoutConfig {
        FanoutConfig {
            provider_timeout: Duration::from_millis(50),
            retry_attempts: 2,
            retry_backoff: Duration::from_millis(5),
            max_concurrent_queries: 8,
        }
    }

    #[tokio::test]
    async fn test_merges_candidates_across_providers() {
        let coordinator =
            coordinator_with(vec![queryable_manifest("org.one"), queryable_manifest("org.two")])
                .await;
        let factory = MockProviderFactory::default()
            .with_provider(
                "org.one",
                MockSourceProvider::new(
                    "org.one",
                    vec![p2p_candidate("a", "org.one", Resolution::Hd1080p, 10)],
                ),
            )
            .with_provider(
                "org.two",
                MockSourceProvider::new(
                    "org.two",
                    vec![p2p_candidate("b", "org.two", Resolution::Uhd4k, 99)],
                ),
            );

        let fanout = SourceQueryFanout::new(coordinator, Arc::new(factory), test_config());
        let batch = fanout.query(&ContentRequest::new("movie-1")).await;

        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_failing_provider_is_dropped_not_fatal() {
        let coordinator =
            coordinator_with(vec![queryable_manifest("org.ok"), queryable_manifest("org.bad")])
                .await;
        let factory = MockProviderFactory::default()
            .with_provider(
                "org.ok",
                MockSourceProvider::new(
                    "org.ok",
                    vec![p2p_candidate("a", "org.ok", Resolution::Hd1080p, 10)],
                ),
            )
            .with_provider(
                "org.bad",
                MockSourceProvider::new("org.bad", vec![]).with_failure("boom"),
            );

        let fanout =
            SourceQueryFanout::new(Arc::clone(&coordinator), Arc::new(factory), test_config());
        let batch = fanout.query(&ContentRequest::new("movie-1")).await;

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].provider_id, "org.ok");

        // One failed batch was recorded against the provider
        let bad = coordinator.get("org.bad").await.unwrap();
        assert_eq!(bad.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let coordinator = coordinator_with(vec![queryable_manifest("org.slow")]).await;
        let factory = MockProviderFactory::default().with_provider(
            "org.slow",
            MockSourceProvider::new(
                "org.slow",
                vec![p2p_candidate("a", "org.slow", Resolution::Hd1080p, 10)],
            )
            .with_delay(Duration::from_millis(200)),
        );

        let fanout = SourceQueryFanout::new(coordinator, Arc::new(factory), test_config());
        let batch = fanout.query(&ContentRequest::new("movie-1")).await;

        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_via_retry() {
        let coordinator = coordinator_with(vec![queryable_manifest("org.flaky")]).await;
        let factory = MockProviderFactory::default().with_provider(
            "org.flaky",
            MockSourceProvider::new(
                "org.flaky",
                vec![p2p_candidate("a", "org.flaky", Resolution::Hd1080p, 10)],
            )
            .with_transient_failures(1),
        );

        let fanout =
            SourceQueryFanout::new(Arc::clone(&coordinator), Arc::new(factory), test_config());
        let batch = fanout.query(&ContentRequest::new("movie-1")).await;

        assert_eq!(batch.len(), 1);
        // Success resets the failure streak
        let flaky = coordinator.get("org.flaky").await.unwrap();
        assert_eq!(flaky.consecutive_failures, 0);
        assert_eq!(flaky.reliability, ProviderReliability::High);
    }

    #[tokio::test]
    async fn test_batch_stamps_provider_priority_and_reliability() {
        let mut manifest = queryable_manifest("org.one");
        manifest.priority = 7;
        manifest.reliability = ProviderReliability::High;

        let coordinator = coordinator_with(vec![manifest]).await;
        let factory = MockProviderFactory::default().with_provider(
            "org.one",
            MockSourceProvider::new(
                "org.one",
                vec![p2p_candidate("a", "org.one", Resolution::Hd1080p, 10)],
            ),
        );

        let fanout = SourceQueryFanout::new(coordinator, Arc::new(factory), test_config());
        let batch = fanout.query(&ContentRequest::new("movie-1")).await;

        assert_eq!(batch[0].provider_priority, 7);
        assert_eq!(batch[0].provider_reliability, ProviderReliability::High);
    }

    #[tokio::test]
    async fn test_disabled_provider_is_not_queried() {
        let mut disabled = queryable_manifest("org.off");
        disabled.enabled = false;

        let coordinator =
            coordinator_with(vec![queryable_manifest("org.on"), disabled]).await;
        let on_provider = MockSourceProvider::new(
            "org.on",
            vec![p2p_candidate("a", "org.on", Resolution::Hd1080p, 10)],
        );
        // No provider registered for org.off; the factory would panic if
        // the fan-out tried to query it
        let factory = MockProviderFactory::default().with_provider("org.on", on_provider);

        let fanout = SourceQueryFanout::new(coordinator, Arc::new(factory), test_config());
        let batch = fanout.query(&ContentRequest::new("movie-1")).await;
        assert_eq!(batch.len(), 1);
    }

    fn slow_config() -> FanoutConfig {
        FanoutConfig {
            provider_timeout: Duration::from_millis(500),
            retry_attempts: 1,
            retry_backoff: Duration::from_millis(5),
            max_concurrent_queries: 8,
        }
    }

    #[tokio::test]
    async fn test_requery_for_same_content_supersedes_in_flight_query() {
        let coordinator = coordinator_with(vec![queryable_manifest("org.one")]).await;
        let factory = MockProviderFactory::default().with_provider(
            "org.one",
            MockSourceProvider::new(
                "org.one",
                vec![p2p_candidate("a", "org.one", Resolution::Hd1080p, 10)],
            )
            .with_delay(Duration::from_millis(80)),
        );
        let fanout = Arc::new(SourceQueryFanout::new(
            coordinator,
            Arc::new(factory),
            slow_config(),
        ));

        let stale = tokio::spawn({
            let fanout = Arc::clone(&fanout);
            async move { fanout.query(&ContentRequest::new("movie-a")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fresh = fanout.query(&ContentRequest::new("movie-a")).await;
        assert_eq!(fresh.len(), 1);
        // The older query's results are discarded, not merged
        assert!(stale.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requery_for_different_content_does_not_supersede() {
        let coordinator = coordinator_with(vec![queryable_manifest("org.one")]).await;
        let factory = MockProviderFactory::default().with_provider(
            "org.one",
            MockSourceProvider::new(
                "org.one",
                vec![p2p_candidate("a", "org.one", Resolution::Hd1080p, 10)],
            )
            .with_delay(Duration::from_millis(80)),
        );
        let fanout = Arc::new(SourceQueryFanout::new(
            coordinator,
            Arc::new(factory),
            slow_config(),
        ));

        let first = tokio::spawn({
            let fanout = Arc::clone(&fanout);
            async move { fanout.query(&ContentRequest::new("movie-a")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A concurrent query for other content leaves the first one alone
        let second = fanout.query(&ContentRequest::new("movie-b")).await;
        assert_eq!(second.len(), 1);
        assert_eq!(first.await.unwrap().len(), 1);
    }

    #[test]
    fn test_supersede_keys_are_episode_precise() {
        let request = ContentRequest::episode_of("show-1", 2, 5);
        assert_eq!(content_key(&request), "show-1:2:5");
        assert_ne!(
            content_key(&request),
            content_key(&ContentRequest::episode_of("show-1", 2, 6))
        );
        assert_ne!(content_key(&request), content_key(&ContentRequest::new("show-1")));
    }

    #[tokio::test]
    async fn test_exhausted_timeout_budget_surfaces_timeout_error() {
        let provider = MockSourceProvider::new(
            "org.slow",
            vec![p2p_candidate("a", "org.slow", Resolution::Hd1080p, 10)],
        )
        .with_delay(Duration::from_millis(200));

        let error = query_with_retry(&provider, &ContentRequest::new("movie-1"), &test_config())
            .await
            .unwrap_err();

        assert!(matches!(error, SourceError::Timeout { .. }));
        assert_eq!(error.provider_id(), "org.slow");
    }
}
