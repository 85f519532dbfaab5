//! Manifest document parsing and validation.
//!
//! Third-party providers publish loosely structured manifest documents.
//! A format-detection step selects a tagged parser variant; every variant
//! produces the same normalized [`Manifest`] shape so the caching and
//! ranking core stays format-agnostic.

use std::collections::HashSet;

use serde::Deserialize;
use url::Url;

use super::errors::ManifestError;
use super::types::{Capability, Manifest, ProviderReliability, ValidationStatus};

/// Raw manifest document as returned by a [`ManifestTransport`](super::transport::ManifestTransport).
#[derive(Debug, Clone)]
pub struct RawManifestDocument {
    /// URL the document was fetched from
    pub url: Url,
    /// Unparsed document body
    pub body: String,
}

/// Known manifest schema variants.
///
/// Torrentio and Knightcrawler are torrent-indexer addons with implicit
/// P2P semantics; everything else goes through the generic parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Torrentio,
    Knightcrawler,
    Generic,
}

impl ManifestFormat {
    /// Detect the schema variant from a parsed manifest document.
    pub fn detect(document: &serde_json::Value) -> Self {
        let id = document
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_lowercase();

        if id.contains("torrentio") {
            ManifestFormat::Torrentio
        } else if id.contains("knightcrawler") {
            ManifestFormat::Knightcrawler
        } else {
            ManifestFormat::Generic
        }
    }

    /// Detect the schema variant for an already-normalized manifest.
    pub fn for_manifest(manifest: &Manifest) -> Self {
        let id = manifest.id.to_lowercase();
        if id.contains("torrentio") {
            ManifestFormat::Torrentio
        } else if id.contains("knightcrawler") {
            ManifestFormat::Knightcrawler
        } else {
            ManifestFormat::Generic
        }
    }
}

/// Common fields shared by all supported manifest schemas.
#[derive(Debug, Deserialize)]
struct ManifestDocument {
    id: String,
    name: Option<String>,
    #[serde(default)]
    resources: Vec<ResourceEntry>,
    #[serde(default, rename = "behaviorHints")]
    behavior_hints: BehaviorHints,
}

/// Resources appear either as plain strings or as objects with a name.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResourceEntry {
    Name(String),
    Described {
        name: String,
    },
}

impl ResourceEntry {
    fn name(&self) -> &str {
        match self {
            ResourceEntry::Name(name) => name,
            ResourceEntry::Described { name } => name,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct BehaviorHints {
    #[serde(default)]
    p2p: bool,
}

/// Parse a raw manifest document into the normalized [`Manifest`] shape.
///
/// The returned manifest is `Unvalidated`; callers run [`validate`] and
/// persist the result either way so broken manifests stay visible for
/// user correction.
///
/// # Errors
/// - `ManifestError::Parse` - Document is not valid JSON or lacks an id
pub fn parse_manifest(document: &RawManifestDocument) -> Result<Manifest, ManifestError> {
    let value: serde_json::Value =
        serde_json::from_str(&document.body).map_err(|e| ManifestError::Parse {
            reason: format!("invalid JSON: {e}"),
        })?;

    let format = ManifestFormat::detect(&value);
    let doc: ManifestDocument =
        serde_json::from_value(value).map_err(|e| ManifestError::Parse {
            reason: format!("unrecognized manifest shape: {e}"),
        })?;

    if doc.id.trim().is_empty() {
        return Err(ManifestError::Parse {
            reason: "manifest id is empty".to_string(),
        });
    }

    let mut capabilities: HashSet<Capability> = doc
        .resources
        .iter()
        .filter_map(|r| Capability::from_resource(r.name()))
        .collect();

    // Torrent indexer addons serve P2P sources whether or not they say so.
    match format {
        ManifestFormat::Torrentio | ManifestFormat::Knightcrawler => {
            capabilities.insert(Capability::P2p);
        }
        ManifestFormat::Generic => {
            if doc.behavior_hints.p2p {
                capabilities.insert(Capability::P2p);
            }
        }
    }

    let name = doc.name.unwrap_or_else(|| doc.id.clone());

    Ok(Manifest {
        id: doc.id,
        name,
        base_url: base_url_of(&document.url),
        capabilities,
        enabled: true,
        priority: 0,
        validation_status: ValidationStatus::Unvalidated,
        last_error: None,
        last_refreshed_at: Some(chrono::Utc::now()),
        reliability: ProviderReliability::Unknown,
        consecutive_failures: 0,
    })
}

/// Validate a normalized manifest.
///
/// Returns the human-readable failure reason so callers can both store it
/// as `last_error` and surface a typed `ManifestError::Validation`.
pub fn validate(manifest: &Manifest) -> Result<(), String> {
    if manifest.base_url.cannot_be_a_base() {
        return Err(format!(
            "base URL '{}' is not an absolute URL",
            manifest.base_url
        ));
    }

    if manifest.capabilities.is_empty() {
        return Err("manifest declares no capabilities".to_string());
    }

    if !manifest.capabilities.contains(&Capability::Stream)
        && !manifest.capabilities.contains(&Capability::Meta)
    {
        return Err("manifest must declare at least one of stream/meta".to_string());
    }

    Ok(())
}

/// Derive the provider base URL from the manifest document URL.
///
/// Strips a trailing `manifest.json` segment so stream queries can be
/// joined onto the provider root.
fn base_url_of(document_url: &Url) -> Url {
    let mut base = document_url.clone();
    if base
        .path_segments()
        .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
        .is_some_and(|last| last == "manifest.json")
    {
        if let Ok(mut segments) = base.path_segments_mut() {
            segments.pop();
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(url: &str, body: &str) -> RawManifestDocument {
        RawManifestDocument {
            url: Url::parse(url).unwrap(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_detects_torrentio_format() {
        let doc = document(
            "https://torrentio.example.com/manifest.json",
            r#"{"id": "com.stremio.torrentio.addon", "name": "Torrentio",
                "resources": ["stream"]}"#,
        );
        let manifest = parse_manifest(&doc).unwrap();

        // P2P is implied for torrent indexers
        assert!(manifest.capabilities.contains(&Capability::P2p));
        assert!(manifest.capabilities.contains(&Capability::Stream));
        assert_eq!(ManifestFormat::for_manifest(&manifest), ManifestFormat::Torrentio);
    }

    #[test]
    fn test_parses_described_resources() {
        let doc = document(
            "https://provider.example.com/manifest.json",
            r#"{"id": "org.example", "name": "Example",
                "resources": [{"name": "stream"}, {"name": "meta"}]}"#,
        );
        let manifest = parse_manifest(&doc).unwrap();
        assert!(manifest.capabilities.contains(&Capability::Stream));
        assert!(manifest.capabilities.contains(&Capability::Meta));
        assert!(!manifest.capabilities.contains(&Capability::P2p));
    }

    #[test]
    fn test_base_url_strips_manifest_segment() {
        let doc = document(
            "https://provider.example.com/v1/manifest.json",
            r#"{"id": "org.example", "resources": ["stream"]}"#,
        );
        let manifest = parse_manifest(&doc).unwrap();
        assert_eq!(manifest.base_url.as_str(), "https://provider.example.com/v1");
    }

    #[test]
    fn test_rejects_invalid_json() {
        let doc = document("https://provider.example.com/manifest.json", "not json");
        assert!(matches!(
            parse_manifest(&doc),
            Err(ManifestError::Parse { .. })
        ));
    }

    #[test]
    fn test_validation_requires_capabilities() {
        let doc = document(
            "https://provider.example.com/manifest.json",
            r#"{"id": "org.example", "resources": []}"#,
        );
        let manifest = parse_manifest(&doc).unwrap();
        let reason = validate(&manifest).unwrap_err();
        assert!(reason.contains("no capabilities"));
    }

    #[test]
    fn test_validation_requires_stream_or_meta() {
        let doc = document(
            "https://provider.example.com/manifest.json",
            r#"{"id": "org.example", "resources": ["subtitles"]}"#,
        );
        let manifest = parse_manifest(&doc).unwrap();
        assert!(validate(&manifest).is_err());
    }
}
