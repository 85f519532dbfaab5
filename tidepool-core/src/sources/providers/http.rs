//! HTTP source provider speaking the addon stream protocol.
//!
//! Queries `{base}/stream/{type}/{id}.json` and normalizes the response
//! into source candidates. Provider dialects (Torrentio, Knightcrawler,
//! generic) differ in how they annotate seeder counts, file sizes, and
//! debrid caching; the stamped [`ManifestFormat`] picks the parse rules.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use super::SourceProvider;
use crate::manifest::{Manifest, ManifestFormat};
use crate::sources::errors::SourceError;
use crate::sources::types::{
    AudioInfo, AvailabilityInfo, CodecInfo, ContentRequest, FileInfo, HealthInfo, QualityInfo,
    ReleaseInfo, ReleaseType, Resolution, SourceCandidate, SourceKind, VideoCodec,
};

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    streams: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamEntry {
    /// Provider label, e.g. "[RD+] Torrentio\n4k"
    name: Option<String>,
    /// Release title plus dialect-specific stat lines
    title: Option<String>,
    description: Option<String>,
    info_hash: Option<String>,
    file_idx: Option<u32>,
    url: Option<String>,
    #[serde(default)]
    behavior_hints: BehaviorHints,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BehaviorHints {
    binge_group: Option<String>,
    video_size: Option<u64>,
    filename: Option<String>,
}

fn seeders_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"👤\s*(\d+)").unwrap())
}

fn size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"💾\s*([\d.]+)\s*(GB|MB)").unwrap())
}

fn debrid_marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // "[RD+]" means cached on RealDebrid, "[RD download]" means uncached
    PATTERN.get_or_init(|| Regex::new(r"\[(\w+)(\+| download)\]").unwrap())
}

/// Source provider backed by an HTTP stream endpoint.
#[derive(Debug)]
pub struct HttpSourceProvider {
    provider_id: String,
    base_url: Url,
    format: ManifestFormat,
    client: reqwest::Client,
}

impl HttpSourceProvider {
    pub fn new(manifest: &Manifest, client: reqwest::Client) -> Self {
        Self {
            provider_id: manifest.id.clone(),
            base_url: manifest.base_url.clone(),
            format: ManifestFormat::for_manifest(manifest),
            client,
        }
    }

    fn stream_url(&self, request: &ContentRequest) -> Result<Url, SourceError> {
        let (media_type, id) = if let (Some(season), Some(episode)) =
            (request.season, request.episode)
        {
            (
                "series",
                format!("{}:{season}:{episode}", request.provider_query_id()),
            )
        } else {
            ("movie", request.provider_query_id().to_string())
        };

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SourceError::Provider {
                provider_id: self.provider_id.clone(),
                reason: "base URL cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(["stream", media_type, &format!("{id}.json")]);
        Ok(url)
    }

    fn parse_body(
        &self,
        body: &str,
        request: &ContentRequest,
    ) -> Result<Vec<SourceCandidate>, SourceError> {
        let response: StreamResponse =
            serde_json::from_str(body).map_err(|e| SourceError::Parse {
                provider_id: self.provider_id.clone(),
                reason: format!("invalid stream response: {e}"),
            })?;

        Ok(response
            .streams
            .into_iter()
            .filter_map(|entry| self.candidate_from_entry(entry, request))
            .collect())
    }

    fn candidate_from_entry(
        &self,
        entry: StreamEntry,
        request: &ContentRequest,
    ) -> Option<SourceCandidate> {
        let label = entry.name.unwrap_or_default();
        let detail = entry
            .title
            .or(entry.description)
            .unwrap_or_default();

        let file_name = entry
            .behavior_hints
            .filename
            .clone()
            .or_else(|| detail.lines().next().map(str::to_string))
            .unwrap_or_default();

        let haystack = format!("{label}\n{detail}\n{file_name}");

        let (kind, url, availability) = self.classify_entry(
            &label,
            entry.info_hash.as_deref(),
            entry.url.as_deref(),
            &file_name,
        )?;

        let seeders = match self.format {
            ManifestFormat::Torrentio | ManifestFormat::Knightcrawler => {
                parse_seeders(&detail)
            }
            ManifestFormat::Generic => 0,
        };

        let size_bytes = entry
            .behavior_hints
            .video_size
            .or_else(|| parse_size_bytes(&detail))
            .unwrap_or(0);

        let season_pack_id = if request.is_episode() {
            entry
                .behavior_hints
                .binge_group
                .filter(|_| entry.file_idx.is_some())
        } else {
            None
        };

        Some(SourceCandidate {
            id: Uuid::new_v4().to_string(),
            provider_id: self.provider_id.clone(),
            // Stamped by the fan-out from the owning manifest
            provider_priority: 0,
            provider_reliability: Default::default(),
            kind,
            quality: parse_quality(&haystack),
            codec: CodecInfo {
                codec: parse_codec(&haystack),
                profile: None,
                level: None,
            },
            audio: parse_audio(&haystack),
            release: ReleaseInfo {
                release_type: parse_release_type(&haystack),
                group: parse_release_group(&file_name),
                edition: None,
                year: None,
            },
            file: FileInfo {
                name: file_name.clone(),
                size_bytes,
                extension: file_name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()),
                hash: entry.info_hash,
            },
            health: HealthInfo {
                seeders,
                leechers: 0,
                download_speed: None,
                availability: None,
            },
            availability,
            url,
            season_pack_id,
            episode_mapping: None,
        })
    }

    fn classify_entry(
        &self,
        label: &str,
        info_hash: Option<&str>,
        direct_url: Option<&str>,
        file_name: &str,
    ) -> Option<(SourceKind, String, AvailabilityInfo)> {
        if let Some(url) = direct_url {
            if let Some(captures) = debrid_marker_pattern().captures(label) {
                let cached = captures.get(2).is_some_and(|m| m.as_str() == "+");
                return Some((
                    SourceKind::Debrid,
                    url.to_string(),
                    AvailabilityInfo {
                        is_available: true,
                        cached,
                        debrid_service_name: captures.get(1).map(|m| m.as_str().to_string()),
                    },
                ));
            }
            return Some((
                SourceKind::Direct,
                url.to_string(),
                AvailabilityInfo::default(),
            ));
        }

        let hash = info_hash?;
        let magnet = format!(
            "magnet:?xt=urn:btih:{hash}&dn={}",
            urlencoding::encode(file_name)
        );
        Some((SourceKind::P2p, magnet, AvailabilityInfo::default()))
    }
}

#[async_trait]
impl SourceProvider for HttpSourceProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn query(
        &self,
        request: &ContentRequest,
    ) -> Result<Vec<SourceCandidate>, SourceError> {
        let url = self.stream_url(request)?;

        let response =
            self.client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| SourceError::Network {
                    provider_id: self.provider_id.clone(),
                    reason: format!("request to {url} failed: {e}"),
                })?;

        if !response.status().is_success() {
            return Err(SourceError::Provider {
                provider_id: self.provider_id.clone(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body = response.text().await.map_err(|e| SourceError::Network {
            provider_id: self.provider_id.clone(),
            reason: format!("body read failed: {e}"),
        })?;

        self.parse_body(&body, request)
    }
}

fn parse_seeders(text: &str) -> u32 {
    seeders_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn parse_size_bytes(text: &str) -> Option<u64> {
    let captures = size_pattern().captures(text)?;
    let value: f64 = captures.get(1)?.as_str().parse().ok()?;
    let multiplier = match captures.get(2)?.as_str() {
        "GB" => 1024.0 * 1024.0 * 1024.0,
        _ => 1024.0 * 1024.0,
    };
    Some((value * multiplier) as u64)
}

fn parse_quality(text: &str) -> QualityInfo {
    let lower = text.to_lowercase();
    QualityInfo {
        resolution: parse_resolution(&lower),
        hdr10: lower.contains("hdr"),
        hdr10_plus: lower.contains("hdr10+"),
        dolby_vision: lower.contains("dolby vision")
            || lower.contains("dovi")
            || lower.contains(" dv ")
            || lower.contains(".dv."),
        frame_rate: None,
        bitrate: None,
    }
}

fn parse_resolution(lower: &str) -> Resolution {
    if lower.contains("4320p") || lower.contains("8k") {
        Resolution::Uhd8k
    } else if lower.contains("2160p") || lower.contains("4k") || lower.contains("uhd") {
        Resolution::Uhd4k
    } else if lower.contains("1080p") {
        Resolution::Hd1080p
    } else if lower.contains("720p") {
        Resolution::Hd720p
    } else if lower.contains("480p") || lower.contains("dvd") {
        Resolution::Sd
    } else {
        Resolution::Unknown
    }
}

fn parse_codec(text: &str) -> VideoCodec {
    let lower = text.to_lowercase();
    if lower.contains("x265") || lower.contains("h265") || lower.contains("h.265")
        || lower.contains("hevc")
    {
        VideoCodec::H265
    } else if lower.contains("av1") {
        VideoCodec::Av1
    } else if lower.contains("vp9") {
        VideoCodec::Vp9
    } else if lower.contains("x264") || lower.contains("h264") || lower.contains("h.264")
        || lower.contains("avc")
    {
        VideoCodec::H264
    } else {
        VideoCodec::Unknown
    }
}

fn parse_release_type(text: &str) -> ReleaseType {
    let lower = text.to_lowercase();
    if lower.contains("remux") {
        ReleaseType::Remux
    } else if lower.contains("bluray") || lower.contains("blu-ray") || lower.contains("bdrip")
        || lower.contains("brrip")
    {
        ReleaseType::BluRay
    } else if lower.contains("web-dl") || lower.contains("webdl") || lower.contains("web dl") {
        ReleaseType::WebDl
    } else if lower.contains("webrip") || lower.contains("web-rip") {
        ReleaseType::WebRip
    } else if lower.contains("hdtv") {
        ReleaseType::Hdtv
    } else if lower.contains("dvdrip") || lower.contains("dvd") {
        ReleaseType::Dvd
    } else if lower.contains("telesync") || lower.contains("hdts") {
        ReleaseType::Telesync
    } else if lower.contains("cam") && !lower.contains("camera") {
        ReleaseType::Cam
    } else {
        ReleaseType::Unknown
    }
}

fn parse_audio(text: &str) -> AudioInfo {
    let lower = text.to_lowercase();
    AudioInfo {
        format: None,
        channels: None,
        bitrate: None,
        language: None,
        dolby_atmos: lower.contains("atmos"),
        dts_x: lower.contains("dts-x") || lower.contains("dts:x"),
    }
}

/// Release group is conventionally the suffix after the last hyphen of
/// the file stem: "Title.2020.1080p.x264-GROUP.mkv".
fn parse_release_group(file_name: &str) -> Option<String> {
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    let (_, group) = stem.rsplit_once('-')?;
    if group.is_empty() || group.chars().any(|c| c.is_whitespace()) {
        None
    } else {
        Some(group.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::manifest::{Capability, Manifest, ProviderReliability, ValidationStatus};

    fn torrentio_manifest() -> Manifest {
        Manifest {
            id: "com.stremio.torrentio.addon".to_string(),
            name: "Torrentio".to_string(),
            base_url: Url::parse("https://torrentio.example.com").unwrap(),
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

    fn provider() -> HttpSourceProvider {
        HttpSourceProvider::new(&torrentio_manifest(), reqwest::Client::new())
    }

    #[test]
    fn test_stream_url_for_movie_and_episode() {
        let provider = provider();

        let movie = ContentRequest {
            imdb_id: Some("tt0133093".to_string()),
            ..ContentRequest::new("movie-1")
        };
        assert_eq!(
            provider.stream_url(&movie).unwrap().as_str(),
            "https://torrentio.example.com/stream/movie/tt0133093.json"
        );

        let episode = ContentRequest {
            imdb_id: Some("tt0903747".to_string()),
            ..ContentRequest::episode_of("show-1", 2, 5)
        };
        assert_eq!(
            provider.stream_url(&episode).unwrap().as_str(),
            "https://torrentio.example.com/stream/series/tt0903747%3A2%3A5.json"
        );
    }

    #[test]
    fn test_parse_torrentio_p2p_entry() {
        let body = r#"{
            "streams": [{
                "name": "Torrentio\n4k",
                "title": "Some.Movie.2020.2160p.WEB-DL.HDR.x265-GROUP.mkv\n👤 142 💾 12.4 GB ⚙️ ThePirateBay",
                "infoHash": "abcdef0123456789abcdef0123456789abcdef01"
            }]
        }"#;

        let candidates = provider()
            .parse_body(body, &ContentRequest::new("movie-1"))
            .unwrap();
        assert_eq!(candidates.len(), 1);

        let c = &candidates[0];
        assert_eq!(c.kind, SourceKind::P2p);
        assert_eq!(c.health.seeders, 142);
        assert_eq!(c.quality.resolution, Resolution::Uhd4k);
        assert!(c.quality.hdr10);
        assert_eq!(c.codec.codec, VideoCodec::H265);
        assert_eq!(c.release.release_type, ReleaseType::WebDl);
        assert_eq!(c.release.group.as_deref(), Some("GROUP"));
        assert!(c.url.starts_with("magnet:?xt=urn:btih:abcdef"));
        assert!(c.file.size_bytes > 13_000_000_000);
    }

    #[test]
    fn test_parse_cached_debrid_entry() {
        let body = r#"{
            "streams": [{
                "name": "[RD+] Torrentio\n1080p",
                "title": "Some.Movie.2020.1080p.BluRay.x264-GROUP.mkv\n👤 64 💾 8.1 GB",
                "url": "https://debrid.example.com/dl/xyz"
            }]
        }"#;

        let candidates = provider()
            .parse_body(body, &ContentRequest::new("movie-1"))
            .unwrap();
        let c = &candidates[0];

        assert_eq!(c.kind, SourceKind::Debrid);
        assert!(c.availability.cached);
        assert_eq!(c.availability.debrid_service_name.as_deref(), Some("RD"));
        assert_eq!(c.url, "https://debrid.example.com/dl/xyz");
    }

    #[test]
    fn test_uncached_debrid_entry_is_not_cached() {
        let body = r#"{
            "streams": [{
                "name": "[RD download] Torrentio\n1080p",
                "title": "Some.Movie.2020.1080p.WEBRip.x264.mkv\n👤 12 💾 2.0 GB",
                "url": "https://debrid.example.com/dl/abc"
            }]
        }"#;

        let candidates = provider()
            .parse_body(body, &ContentRequest::new("movie-1"))
            .unwrap();
        assert!(!candidates[0].availability.cached);
    }

    #[test]
    fn test_season_pack_id_only_for_episode_requests() {
        let body = r#"{
            "streams": [{
                "name": "Torrentio\n1080p",
                "title": "Some.Show.S02.1080p.WEB-DL.x265-GROUP\n👤 80 💾 24.0 GB",
                "infoHash": "abcdef0123456789abcdef0123456789abcdef01",
                "fileIdx": 4,
                "behaviorHints": { "bingeGroup": "torrentio|1080p|S02" }
            }]
        }"#;

        let episode = ContentRequest::episode_of("show-1", 2, 5);
        let candidates = provider().parse_body(body, &episode).unwrap();
        assert_eq!(
            candidates[0].season_pack_id.as_deref(),
            Some("torrentio|1080p|S02")
        );

        let movie = ContentRequest::new("movie-1");
        let candidates = provider().parse_body(body, &movie).unwrap();
        assert!(candidates[0].season_pack_id.is_none());
    }

    #[test]
    fn test_malformed_body_is_parse_error() {
        let result = provider().parse_body("not json", &ContentRequest::new("movie-1"));
        assert!(matches!(result, Err(SourceError::Parse { .. })));
    }

    #[test]
    fn test_entry_without_hash_or_url_is_dropped() {
        let body = r#"{"streams": [{"name": "Torrentio", "title": "broken entry"}]}"#;
        let candidates = provider()
            .parse_body(body, &ContentRequest::new("movie-1"))
            .unwrap();
        assert!(candidates.is_empty());
    }
}
