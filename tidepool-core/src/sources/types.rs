//! Data types for source candidates and query requests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::manifest::ProviderReliability;

/// Content identifier carried through a query fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRequest {
    /// Internal content identifier
    pub content_id: String,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl ContentRequest {
    pub fn new(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            imdb_id: None,
            tmdb_id: None,
            season: None,
            episode: None,
        }
    }

    pub fn episode_of(content_id: impl Into<String>, season: u32, episode: u32) -> Self {
        Self {
            content_id: content_id.into(),
            imdb_id: None,
            tmdb_id: None,
            season: Some(season),
            episode: Some(episode),
        }
    }

    /// Identifier providers are queried with: IMDb id when known, since
    /// most third-party providers key on it.
    pub fn provider_query_id(&self) -> &str {
        self.imdb_id.as_deref().unwrap_or(&self.content_id)
    }

    pub fn is_episode(&self) -> bool {
        self.season.is_some() && self.episode.is_some()
    }
}

/// Video resolution tiers, ordered lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Resolution {
    #[default]
    Unknown,
    Sd,
    Hd720p,
    Hd1080p,
    Uhd4k,
    Uhd8k,
}

impl Resolution {
    /// Static ordinal used by the quality-tier component score.
    pub fn tier(self) -> i64 {
        match self {
            Resolution::Unknown => 0,
            Resolution::Sd => 1,
            Resolution::Hd720p => 2,
            Resolution::Hd1080p => 3,
            Resolution::Uhd4k => 4,
            Resolution::Uhd8k => 5,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Unknown => write!(f, "unknown"),
            Resolution::Sd => write!(f, "SD"),
            Resolution::Hd720p => write!(f, "720p"),
            Resolution::Hd1080p => write!(f, "1080p"),
            Resolution::Uhd4k => write!(f, "4K"),
            Resolution::Uhd8k => write!(f, "8K"),
        }
    }
}

/// Video codec families relevant to ranking and filtering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum VideoCodec {
    #[default]
    Unknown,
    H264,
    H265,
    Av1,
    Vp9,
}

/// Release source tiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum ReleaseType {
    #[default]
    Unknown,
    Cam,
    Telesync,
    Dvd,
    Hdtv,
    WebRip,
    WebDl,
    BluRay,
    Remux,
}

/// How a source reaches the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Peer-to-peer swarm; seeder health applies
    P2p,
    /// Debrid service link, possibly pre-cached
    Debrid,
    /// Plain HTTP(S) stream
    Direct,
}

/// Video quality attributes of a candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityInfo {
    pub resolution: Resolution,
    pub hdr10: bool,
    pub hdr10_plus: bool,
    pub dolby_vision: bool,
    pub frame_rate: Option<f32>,
    /// Video bitrate in bits per second, when the provider reports it
    pub bitrate: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodecInfo {
    pub codec: VideoCodec,
    pub profile: Option<String>,
    pub level: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    /// Audio format name as reported ("DDP", "TrueHD", "AAC", ...)
    pub format: Option<String>,
    /// Channel layout as reported ("5.1", "7.1", ...)
    pub channels: Option<String>,
    pub bitrate: Option<u64>,
    pub language: Option<String>,
    pub dolby_atmos: bool,
    pub dts_x: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub release_type: ReleaseType,
    /// Release group name, when parseable from the file name
    pub group: Option<String>,
    pub edition: Option<String>,
    pub year: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size_bytes: u64,
    pub extension: Option<String>,
    pub hash: Option<String>,
}

impl FileInfo {
    /// Format file size in human-readable form.
    pub fn format_size(&self) -> String {
        const GB: u64 = 1024 * 1024 * 1024;
        const MB: u64 = 1024 * 1024;

        if self.size_bytes >= GB {
            format!("{:.1} GB", self.size_bytes as f64 / GB as f64)
        } else if self.size_bytes >= MB {
            format!("{:.1} MB", self.size_bytes as f64 / MB as f64)
        } else {
            format!("{:.1} KB", self.size_bytes as f64 / 1024.0)
        }
    }

    /// File size in gibibytes, for comparisons against size preferences.
    pub fn size_gb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Swarm health for P2P sources; zeroed for debrid/direct sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthInfo {
    pub seeders: u32,
    pub leechers: u32,
    /// Observed download speed in bytes per second, when reported
    pub download_speed: Option<u64>,
    /// Fraction of the content available in the swarm (0.0 to 1.0)
    pub availability: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityInfo {
    /// Whether the source can actually be played right now
    pub is_available: bool,
    /// Whether a debrid service already has the content cached
    pub cached: bool,
    pub debrid_service_name: Option<String>,
}

impl Default for AvailabilityInfo {
    fn default() -> Self {
        Self {
            is_available: true,
            cached: false,
            debrid_service_name: None,
        }
    }
}

/// One streamable option returned by a provider for a content item.
///
/// Candidates live only for the lifetime of a selection session. The
/// `provider_priority` and `provider_reliability` fields are stamped on by
/// the fan-out from the owning manifest so the ranking engine stays a pure
/// function of candidates and preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCandidate {
    /// Unique within one query batch
    pub id: String,
    pub provider_id: String,
    /// Manifest priority of the owning provider
    pub provider_priority: i32,
    /// Observed reliability of the owning provider
    pub provider_reliability: ProviderReliability,
    pub kind: SourceKind,
    pub quality: QualityInfo,
    pub codec: CodecInfo,
    pub audio: AudioInfo,
    pub release: ReleaseInfo,
    pub file: FileInfo,
    pub health: HealthInfo,
    pub availability: AvailabilityInfo,
    pub url: String,
    /// Identifier shared by candidates originating from one season pack
    pub season_pack_id: Option<String>,
    /// Episode number to in-pack file mapping, when the provider exposes it
    pub episode_mapping: Option<BTreeMap<u32, String>>,
}

impl SourceCandidate {
    pub fn is_p2p(&self) -> bool {
        self.kind == SourceKind::P2p
    }
}

/// User-applied filter over an already-fetched candidate set.
///
/// Filters are pure, synchronous transformations; they never re-query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFilter {
    pub min_resolution: Option<Resolution>,
    pub codecs: Option<Vec<VideoCodec>>,
    pub release_types: Option<Vec<ReleaseType>>,
    pub max_size_gb: Option<f64>,
    pub cached_only: bool,
    pub hide_unavailable: bool,
}

impl SourceFilter {
    /// Whether a candidate passes this filter.
    pub fn matches(&self, candidate: &SourceCandidate) -> bool {
        if let Some(min) = self.min_resolution
            && candidate.quality.resolution < min
        {
            return false;
        }
        if let Some(codecs) = &self.codecs
            && !codecs.contains(&candidate.codec.codec)
        {
            return false;
        }
        if let Some(types) = &self.release_types
            && !types.contains(&candidate.release.release_type)
        {
            return false;
        }
        if let Some(max) = self.max_size_gb
            && candidate.file.size_gb() > max
        {
            return false;
        }
        if self.cached_only && !candidate.availability.cached {
            return false;
        }
        if self.hide_unavailable && !candidate.availability.is_available {
            return false;
        }
        true
    }
}

/// User-selectable sort orders over the candidate view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOption {
    /// Composite ranking order (the default)
    #[default]
    Rank,
    /// Most seeders first
    Seeders,
    /// Largest file first
    FileSizeDesc,
    /// Smallest file first
    FileSizeAsc,
    /// Highest quality tier first
    QualityTier,
}
