//! Data types for provider manifests.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Capability advertised by a provider manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Provider can return streamable source candidates
    Stream,
    /// Provider can return content metadata
    Meta,
    /// Provider returns peer-to-peer sources (seeders/leechers apply)
    P2p,
    /// Provider can return subtitle tracks
    Subtitles,
    /// Provider exposes a browsable catalog
    Catalog,
}

impl Capability {
    /// Parse a capability from its manifest resource name.
    pub fn from_resource(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "stream" => Some(Capability::Stream),
            "meta" => Some(Capability::Meta),
            "p2p" => Some(Capability::P2p),
            "subtitles" => Some(Capability::Subtitles),
            "catalog" => Some(Capability::Catalog),
            _ => None,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Stream => write!(f, "stream"),
            Capability::Meta => write!(f, "meta"),
            Capability::P2p => write!(f, "p2p"),
            Capability::Subtitles => write!(f, "subtitles"),
            Capability::Catalog => write!(f, "catalog"),
        }
    }
}

/// Validation state of a stored manifest.
///
/// Invalid manifests are retained for diagnostics but never queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValidationStatus {
    #[default]
    Unvalidated,
    Valid,
    Invalid,
}

/// Observed reliability of a provider, maintained by the query fan-out.
///
/// Feeds the ranking engine's reliability bonus. Repeated query failures
/// degrade a provider silently instead of blocking aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProviderReliability {
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl ProviderReliability {
    /// Ranking bonus contributed by this reliability tier.
    pub fn ranking_bonus(self) -> i64 {
        match self {
            ProviderReliability::High => 20,
            ProviderReliability::Medium => 10,
            ProviderReliability::Low | ProviderReliability::Unknown => 0,
        }
    }
}

/// A provider's declared configuration for sourcing streams and metadata.
///
/// Created on import-from-URL, mutated on refresh/enable/priority updates,
/// deleted explicitly. `enabled` and `priority` are local overrides that
/// survive a refresh from `base_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Unique manifest identifier (from the manifest document)
    pub id: String,
    /// Human-readable provider name
    pub name: String,
    /// Absolute base URL the manifest was imported from
    pub base_url: Url,
    /// Declared capabilities; must be non-empty with Stream or Meta present
    pub capabilities: HashSet<Capability>,
    /// Local enable override; disabled manifests are never queried
    pub enabled: bool,
    /// Local priority override; ties broken by id ordering
    pub priority: i32,
    pub validation_status: ValidationStatus,
    /// Human-readable reason for the last validation failure
    pub last_error: Option<String>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    /// Reliability tier derived from query outcomes
    pub reliability: ProviderReliability,
    /// Consecutive failed queries since the last success
    pub consecutive_failures: u32,
}

impl Manifest {
    /// Whether this manifest participates in source query fan-out.
    pub fn is_queryable(&self) -> bool {
        self.enabled
            && self.validation_status == ValidationStatus::Valid
            && self.capabilities.contains(&Capability::Stream)
    }

    /// Whether this provider returns peer-to-peer sources.
    pub fn is_p2p(&self) -> bool {
        self.capabilities.contains(&Capability::P2p)
    }

    /// Record a query outcome, updating the reliability tier.
    ///
    /// A success resets the failure streak and marks the provider High.
    /// Failures only ever degrade: 3 consecutive failures cap the tier at
    /// Medium, 6 drop it to Low.
    pub fn record_query_outcome(&mut self, success: bool) {
        if success {
            self.consecutive_failures = 0;
            self.reliability = ProviderReliability::High;
            return;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= 6 {
            self.reliability = ProviderReliability::Low;
        } else if self.consecutive_failures >= 3
            && self.reliability == ProviderReliability::High
        {
            self.reliability = ProviderReliability::Medium;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_fixture() -> Manifest {
        Manifest {
            id: "org.example.provider".to_string(),
            name: "Example".to_string(),
            base_url: Url::parse("https://provider.example.com").unwrap(),
            capabilities: HashSet::from([Capability::Stream, Capability::P2p]),
            enabled: true,
            priority: 0,
            validation_status: ValidationStatus::Valid,
            last_error: None,
            last_refreshed_at: None,
            reliability: ProviderReliability::Unknown,
            consecutive_failures: 0,
        }
    }

    #[test]
    fn test_queryable_requires_enabled_valid_and_stream() {
        let mut manifest = manifest_fixture();
        assert!(manifest.is_queryable());

        manifest.enabled = false;
        assert!(!manifest.is_queryable());

        manifest.enabled = true;
        manifest.validation_status = ValidationStatus::Invalid;
        assert!(!manifest.is_queryable());

        manifest.validation_status = ValidationStatus::Valid;
        manifest.capabilities = HashSet::from([Capability::Meta]);
        assert!(!manifest.is_queryable());
    }

    #[test]
    fn test_reliability_degrades_on_consecutive_failures() {
        let mut manifest = manifest_fixture();
        manifest.record_query_outcome(true);
        assert_eq!(manifest.reliability, ProviderReliability::High);

        for _ in 0..3 {
            manifest.record_query_outcome(false);
        }
        assert_eq!(manifest.reliability, ProviderReliability::Medium);

        for _ in 0..3 {
            manifest.record_query_outcome(false);
        }
        assert_eq!(manifest.reliability, ProviderReliability::Low);

        // A single success restores the provider
        manifest.record_query_outcome(true);
        assert_eq!(manifest.reliability, ProviderReliability::High);
        assert_eq!(manifest.consecutive_failures, 0);
    }

    #[test]
    fn test_capability_from_resource() {
        assert_eq!(Capability::from_resource("stream"), Some(Capability::Stream));
        assert_eq!(Capability::from_resource("Meta"), Some(Capability::Meta));
        assert_eq!(Capability::from_resource("addon_catalog"), None);
    }
}
