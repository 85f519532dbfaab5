//! Preference tracking from observed user behavior.
//!
//! The learner turns interaction signals (filters applied, sorts chosen,
//! successful plays, downloads, playlist additions) into a preference
//! vector the ranking engine scores against. Updates are monotonic
//! widenings: a signal can raise a preference ceiling or add to a
//! preferred set, never shrink one. Readers take cheap copy-on-write
//! snapshots, so a ranking pass never observes a half-applied update.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::types::{
    ReleaseType, Resolution, SortOption, SourceCandidate, SourceFilter, SourceKind, VideoCodec,
};

/// How file size biases the ranking tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FileSizeMode {
    /// Prefer the smallest candidate
    Minimal,
    /// Prefer the size closest to `preferred_file_size_gb`, when one is set
    #[default]
    Optimal,
    /// Prefer the largest candidate
    Maximal,
}

/// Learned user preferences the ranking engine scores against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceVector {
    pub preferred_resolution: Resolution,
    pub preferred_codecs: HashSet<VideoCodec>,
    pub preferred_release_types: HashSet<ReleaseType>,
    pub prefer_hdr: bool,
    pub prefer_high_quality_audio: bool,
    pub prefer_debrid: bool,
    pub prefer_direct: bool,
    pub prefer_p2p: bool,
    /// Weight cached debrid sources heavily when set
    pub prioritize_cached: bool,
    pub file_size_mode: FileSizeMode,
    /// Target size for `Optimal` mode, in gibibytes
    pub preferred_file_size_gb: Option<f64>,
}

impl Default for PreferenceVector {
    fn default() -> Self {
        Self {
            preferred_resolution: Resolution::Hd1080p,
            preferred_codecs: HashSet::new(),
            preferred_release_types: HashSet::new(),
            prefer_hdr: false,
            prefer_high_quality_audio: false,
            prefer_debrid: true,
            prefer_direct: false,
            prefer_p2p: false,
            prioritize_cached: false,
            file_size_mode: FileSizeMode::Optimal,
            preferred_file_size_gb: None,
        }
    }
}

impl PreferenceVector {
    /// Whether a source kind matches one of the preferred kinds.
    pub fn prefers_kind(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Debrid => self.prefer_debrid,
            SourceKind::Direct => self.prefer_direct,
            SourceKind::P2p => self.prefer_p2p,
        }
    }
}

/// Accumulates interaction signals into preference snapshots.
///
/// Writers clone the current vector, apply the widening, and swap the
/// `Arc` in place. `snapshot()` is lock-held only for the pointer clone.
#[derive(Debug)]
pub struct PreferenceLearner {
    current: RwLock<Arc<PreferenceVector>>,
}

impl Default for PreferenceLearner {
    fn default() -> Self {
        Self::new(PreferenceVector::default())
    }
}

impl PreferenceLearner {
    pub fn new(initial: PreferenceVector) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Immutable snapshot of the current preferences.
    pub fn snapshot(&self) -> Arc<PreferenceVector> {
        Arc::clone(&self.current.read())
    }

    fn update(&self, apply: impl FnOnce(&mut PreferenceVector)) -> Arc<PreferenceVector> {
        let mut guard = self.current.write();
        let mut next = (**guard).clone();
        apply(&mut next);
        *guard = Arc::new(next);
        Arc::clone(&guard)
    }

    /// A filter the user applied expresses intent directly.
    pub fn on_filter_applied(&self, filter: &SourceFilter) -> Arc<PreferenceVector> {
        self.update(|prefs| {
            if let Some(min) = filter.min_resolution
                && min > prefs.preferred_resolution
            {
                prefs.preferred_resolution = min;
            }
            if let Some(codecs) = &filter.codecs {
                prefs.preferred_codecs.extend(codecs.iter().copied());
            }
            if let Some(types) = &filter.release_types {
                prefs.preferred_release_types.extend(types.iter().copied());
            }
            if filter.cached_only {
                prefs.prioritize_cached = true;
            }
        })
    }

    /// An explicit sort choice hints at what the user optimizes for.
    pub fn on_sort_chosen(&self, sort: SortOption) -> Arc<PreferenceVector> {
        match sort {
            SortOption::Seeders => self.update(|prefs| prefs.prefer_p2p = true),
            SortOption::QualityTier => self.update(|prefs| {
                if prefs.preferred_resolution < Resolution::Uhd4k {
                    prefs.preferred_resolution = Resolution::Uhd4k;
                }
            }),
            SortOption::FileSizeAsc => {
                self.update(|prefs| prefs.file_size_mode = FileSizeMode::Minimal)
            }
            SortOption::FileSizeDesc => {
                self.update(|prefs| prefs.file_size_mode = FileSizeMode::Maximal)
            }
            SortOption::Rank => self.snapshot(),
        }
    }

    /// A play that reached stable playback is the strongest signal.
    pub fn on_play_success(&self, candidate: &SourceCandidate) -> Arc<PreferenceVector> {
        self.update(|prefs| Self::widen_from_candidate(prefs, candidate))
    }

    /// Downloads indicate a deliberate quality/size choice.
    pub fn on_download(&self, candidate: &SourceCandidate) -> Arc<PreferenceVector> {
        self.update(|prefs| {
            Self::widen_from_candidate(prefs, candidate);
            prefs.preferred_file_size_gb = Some(candidate.file.size_gb());
        })
    }

    /// Playlist additions are weaker intent but still widen sets.
    pub fn on_playlist_add(&self, candidate: &SourceCandidate) -> Arc<PreferenceVector> {
        self.update(|prefs| {
            if candidate.codec.codec != VideoCodec::Unknown {
                prefs.preferred_codecs.insert(candidate.codec.codec);
            }
            if candidate.release.release_type != ReleaseType::Unknown {
                prefs
                    .preferred_release_types
                    .insert(candidate.release.release_type);
            }
        })
    }

    fn widen_from_candidate(prefs: &mut PreferenceVector, candidate: &SourceCandidate) {
        if candidate.quality.resolution > prefs.preferred_resolution {
            prefs.preferred_resolution = candidate.quality.resolution;
        }
        if candidate.codec.codec != VideoCodec::Unknown {
            prefs.preferred_codecs.insert(candidate.codec.codec);
        }
        if candidate.release.release_type != ReleaseType::Unknown {
            prefs
                .preferred_release_types
                .insert(candidate.release.release_type);
        }
        if candidate.quality.hdr10 || candidate.quality.hdr10_plus || candidate.quality.dolby_vision
        {
            prefs.prefer_hdr = true;
        }
        if candidate.audio.dolby_atmos || candidate.audio.dts_x {
            prefs.prefer_high_quality_audio = true;
        }
        match candidate.kind {
            SourceKind::Debrid => prefs.prefer_debrid = true,
            SourceKind::Direct => prefs.prefer_direct = true,
            SourceKind::P2p => prefs.prefer_p2p = true,
        }
        if candidate.availability.cached {
            prefs.prioritize_cached = true;
        }
    }
}
