//! Scripted provider for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::SourceProvider;
use crate::manifest::ProviderReliability;
use crate::sources::errors::SourceError;
use crate::sources::types::{
    AudioInfo, AvailabilityInfo, CodecInfo, ContentRequest, FileInfo, HealthInfo, QualityInfo,
    ReleaseInfo, Resolution, SourceCandidate, SourceKind,
};

/// Provider returning canned candidates, optionally after a delay or
/// with a scripted failure. Call counts are observable for assertions.
#[derive(Debug)]
pub struct MockSourceProvider {
    provider_id: String,
    candidates: Vec<SourceCandidate>,
    delay: Option<Duration>,
    fail_with: Option<String>,
    /// Fail this many leading calls before succeeding
    failures_before_success: AtomicU64,
    call_count: Arc<AtomicU64>,
}

impl MockSourceProvider {
    pub fn new(provider_id: &str, candidates: Vec<SourceCandidate>) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            candidates,
            delay: None,
            fail_with: None,
            failures_before_success: AtomicU64::new(0),
            call_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Delay every response, for timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every call with a provider error.
    pub fn with_failure(mut self, reason: &str) -> Self {
        self.fail_with = Some(reason.to_string());
        self
    }

    /// Fail the first `n` calls, then succeed. Exercises retry paths.
    pub fn with_transient_failures(self, n: u64) -> Self {
        self.failures_before_success.store(n, Ordering::SeqCst);
        self
    }

    /// Shared counter of calls made to this provider.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.call_count)
    }
}

#[async_trait]
impl SourceProvider for MockSourceProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn query(
        &self,
        _request: &ContentRequest,
    ) -> Result<Vec<SourceCandidate>, SourceError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = &self.fail_with {
            return Err(SourceError::Provider {
                provider_id: self.provider_id.clone(),
                reason: reason.clone(),
            });
        }

        let remaining = self.failures_before_success.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_before_success
                .store(remaining - 1, Ordering::SeqCst);
            return Err(SourceError::Network {
                provider_id: self.provider_id.clone(),
                reason: "transient failure".to_string(),
            });
        }

        Ok(self.candidates.clone())
    }
}

/// Build a minimal P2P candidate fixture.
pub fn p2p_candidate(id: &str, provider_id: &str, resolution: Resolution, seeders: u32) -> SourceCandidate {
    SourceCandidate {
        id: id.to_string(),
        provider_id: provider_id.to_string(),
        provider_priority: 0,
        provider_reliability: ProviderReliability::Unknown,
        kind: SourceKind::P2p,
        quality: QualityInfo {
            resolution,
            ..Default::default()
        },
        codec: CodecInfo::default(),
        audio: AudioInfo::default(),
        release: ReleaseInfo::default(),
        file: FileInfo {
            name: format!("{id}.mkv"),
            size_bytes: 4 * 1024 * 1024 * 1024,
            extension: Some("mkv".to_string()),
            hash: None,
        },
        health: HealthInfo {
            seeders,
            ..Default::default()
        },
        availability: AvailabilityInfo::default(),
        url: format!("magnet:?xt=urn:btih:{id}"),
        season_pack_id: None,
        episode_mapping: None,
    }
}

/// Build a debrid candidate fixture.
pub fn debrid_candidate(id: &str, provider_id: &str, resolution: Resolution, cached: bool) -> SourceCandidate {
    SourceCandidate {
        kind: SourceKind::Debrid,
        availability: AvailabilityInfo {
            is_available: true,
            cached,
            debrid_service_name: Some("RD".to_string()),
        },
        url: format!("https://debrid.example.com/dl/{id}"),
        ..p2p_candidate(id, provider_id, resolution, 0)
    }
}
