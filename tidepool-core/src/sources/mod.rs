//! Source discovery, ranking, and selection.
//!
//! One query fans out across every queryable provider, the merged batch
//! is ranked against learned preferences, and a selection session walks
//! the ranked order with automatic fallback when playback fails.

pub mod errors;
pub mod fanout;
pub mod playback;
pub mod preferences;
pub mod providers;
pub mod ranking;
pub mod selection;
pub mod types;

pub use errors::SourceError;
pub use fanout::SourceQueryFanout;
pub use playback::{PlaybackEngine, PlaybackError, ScriptedPlaybackEngine};
pub use preferences::{FileSizeMode, PreferenceLearner, PreferenceVector};
pub use providers::{
    HttpProviderFactory, HttpSourceProvider, MockSourceProvider, SourceProvider,
    SourceProviderFactory,
};
pub use ranking::{compare, group, priority_score, rank, release_group_key};
pub use selection::{SelectionSession, SelectionState};
pub use types::{
    AudioInfo, AvailabilityInfo, CodecInfo, ContentRequest, FileInfo, HealthInfo, QualityInfo,
    ReleaseInfo, ReleaseType, Resolution, SortOption, SourceCandidate, SourceFilter, SourceKind,
    VideoCodec,
};
