//! Playback engine seam.
//!
//! The selection session drives playback through this trait; the actual
//! player (external process, cast target, browser handoff) lives behind
//! it. Only the outcome matters to selection: stable playback or a
//! failure that triggers fallback to the next candidate.

use async_trait::async_trait;
use thiserror::Error;

use super::types::SourceCandidate;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Playback of '{candidate_id}' failed: {reason}")]
    Failed { candidate_id: String, reason: String },

    #[error("All {attempted} candidates failed to play")]
    CandidatesExhausted { attempted: usize },

    #[error("No candidate is selected")]
    NothingSelected,
}

/// Starts playback of one candidate and reports whether it stabilized.
#[async_trait]
pub trait PlaybackEngine: Send + Sync + std::fmt::Debug {
    /// Attempt playback of `candidate`.
    ///
    /// Returning `Ok(())` means playback reached a stable state; an error
    /// means the session should fall back to the next candidate.
    ///
    /// # Errors
    /// - `PlaybackError::Failed` - The candidate could not be played
    async fn play(&self, candidate: &SourceCandidate) -> Result<(), PlaybackError>;
}

/// Scripted engine for tests: fails the candidate ids it is told to.
#[derive(Debug, Default)]
pub struct ScriptedPlaybackEngine {
    failing_ids: Vec<String>,
}

impl ScriptedPlaybackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a candidate id as unplayable.
    pub fn failing(mut self, candidate_id: &str) -> Self {
        self.failing_ids.push(candidate_id.to_string());
        self
    }
}

#[async_trait]
impl PlaybackEngine for ScriptedPlaybackEngine {
    async fn play(&self, candidate: &SourceCandidate) -> Result<(), PlaybackError> {
        if self.failing_ids.contains(&candidate.id) {
            return Err(PlaybackError::Failed {
                candidate_id: candidate.id.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}
