//! Preference-adaptive candidate ranking.
//!
//! Ranking is a pure function of a candidate batch and a preference
//! snapshot: no I/O, no clock, no hidden state. The same inputs always
//! produce the same order, and unavailable candidates always sort after
//! available ones regardless of score.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use super::preferences::{FileSizeMode, PreferenceVector};
use super::types::{SourceCandidate, SourceKind};

/// Score contribution of intrinsic video quality.
fn quality_score(candidate: &SourceCandidate) -> i64 {
    let mut score = candidate.quality.resolution.tier() * 10;

    if candidate.quality.hdr10_plus {
        score += 3;
    } else if candidate.quality.hdr10 {
        score += 2;
    }
    if candidate.quality.dolby_vision {
        score += 10;
    }
    if candidate.audio.dolby_atmos {
        score += 5;
    }

    score
}

/// Score contribution of swarm health. Zero for non-P2P sources.
fn health_score(candidate: &SourceCandidate) -> i64 {
    if candidate.kind != SourceKind::P2p {
        return 0;
    }

    match candidate.health.seeders {
        s if s > 100 => 15,
        s if s > 50 => 10,
        s if s > 10 => 5,
        _ => 0,
    }
}

/// Score contribution of the owning provider's observed reliability.
fn reliability_score(candidate: &SourceCandidate) -> i64 {
    candidate.provider_reliability.ranking_bonus()
}

/// Score contribution of the learned preference vector.
fn preference_score(candidate: &SourceCandidate, prefs: &PreferenceVector) -> i64 {
    let mut score = 0;

    if candidate.quality.resolution == prefs.preferred_resolution {
        score += 10;
    }
    if prefs.preferred_codecs.contains(&candidate.codec.codec) {
        score += 5;
    }
    if prefs
        .preferred_release_types
        .contains(&candidate.release.release_type)
    {
        score += 5;
    }
    if prefs.prefer_hdr
        && (candidate.quality.hdr10 || candidate.quality.hdr10_plus || candidate.quality.dolby_vision)
    {
        score += 5;
    }
    if prefs.prefer_high_quality_audio && (candidate.audio.dolby_atmos || candidate.audio.dts_x) {
        score += 5;
    }
    if prefs.prefers_kind(candidate.kind) {
        score += 5;
    }
    if prefs.prioritize_cached && candidate.availability.cached {
        score += 25;
    }

    score
}

/// Composite ranking score for one candidate under one preference snapshot.
pub fn priority_score(candidate: &SourceCandidate, prefs: &PreferenceVector) -> i64 {
    i64::from(candidate.provider_priority)
        + quality_score(candidate)
        + health_score(candidate)
        + reliability_score(candidate)
        + preference_score(candidate, prefs)
}

/// Total order over candidates: available before unavailable, then score
/// descending, then deterministic tie-breaks down to the candidate id.
pub fn compare(a: &SourceCandidate, b: &SourceCandidate, prefs: &PreferenceVector) -> Ordering {
    // Unavailable candidates sort to the tail no matter their score
    match (a.availability.is_available, b.availability.is_available) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    let score_order = priority_score(b, prefs).cmp(&priority_score(a, prefs));
    if score_order != Ordering::Equal {
        return score_order;
    }

    let seeder_order = b.health.seeders.cmp(&a.health.seeders);
    if seeder_order != Ordering::Equal {
        return seeder_order;
    }

    let size_order = match prefs.file_size_mode {
        FileSizeMode::Minimal => a.file.size_bytes.cmp(&b.file.size_bytes),
        FileSizeMode::Maximal => b.file.size_bytes.cmp(&a.file.size_bytes),
        FileSizeMode::Optimal => match prefs.preferred_file_size_gb {
            Some(target) => {
                let da = (a.file.size_gb() - target).abs();
                let db = (b.file.size_gb() - target).abs();
                da.partial_cmp(&db).unwrap_or(Ordering::Equal)
            }
            None => Ordering::Equal,
        },
    };
    if size_order != Ordering::Equal {
        return size_order;
    }

    a.provider_id
        .cmp(&b.provider_id)
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort a candidate batch into ranked order.
pub fn rank(mut candidates: Vec<SourceCandidate>, prefs: &PreferenceVector) -> Vec<SourceCandidate> {
    candidates.sort_by(|a, b| compare(a, b, prefs));
    candidates
}

fn noise_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(2160p|1080p|720p|480p|4k|8k|uhd|hdr10\+?|hdr|dv|dovi|x264|x265|h[\s.]?264|h[\s.]?265|hevc|avc|av1|vp9|aac|ac3|eac3|dts(?:[\s-]?hd)?|truehd|atmos|blu[\s-]?ray|bdrip|brrip|webrip|web[\s-]?dl|hdtv|dvdrip|remux|cam|telesync|proper|repack|extended|remastered|multi|10bit|8bit)\b",
        )
        .unwrap()
    })
}

fn separator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[._\-\[\]()+]+").unwrap())
}

/// Normalized grouping key for a candidate: the release title with
/// quality, codec, and container tokens stripped.
pub fn release_group_key(candidate: &SourceCandidate) -> String {
    let name = candidate
        .file
        .name
        .rsplit_once('.')
        .map_or(candidate.file.name.as_str(), |(stem, _ext)| stem);

    let spaced = separator_pattern().replace_all(name, " ");
    let stripped = noise_token_pattern().replace_all(&spaced, " ");

    let key = stripped
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");

    if key.is_empty() {
        candidate.file.name.to_lowercase()
    } else {
        key
    }
}

/// Group ranked candidates by normalized release title.
///
/// Within each group candidates keep their ranked order; the map itself
/// iterates in stable key order.
pub fn group(
    candidates: &[SourceCandidate],
) -> BTreeMap<String, Vec<SourceCandidate>> {
    let mut groups: BTreeMap<String, Vec<SourceCandidate>> = BTreeMap::new();
    for candidate in candidates {
        groups
            .entry(release_group_key(candidate))
            .or_default()
            .push(candidate.clone());
    }
    groups
}
