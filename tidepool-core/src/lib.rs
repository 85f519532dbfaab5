//! Tidepool core: streaming-source aggregation.
//!
//! Tidepool manages a set of third-party stream providers declared by
//! manifests, fans content queries out across them concurrently, ranks
//! the merged candidates against learned user preferences, and drives
//! playback with automatic fallback when a candidate fails.
//!
//! The crate is organized around three subsystems:
//! - [`manifest`] - provider manifest lifecycle: import, validation,
//!   persistence, caching, refresh, change notification
//! - [`sources`] - query fan-out, ranking, preference learning, and the
//!   selection/playback session
//! - [`config`] - runtime tunables with environment overrides

use thiserror::Error;

pub mod config;
pub mod manifest;
pub mod sources;
pub mod tracing_setup;

pub use config::{FanoutConfig, ManifestConfig, TidepoolConfig};
pub use manifest::{Manifest, ManifestCoordinator, ManifestError};
pub use sources::{
    ContentRequest, PlaybackError, PreferenceLearner, SelectionSession, SourceCandidate,
    SourceError, SourceQueryFanout,
};

/// Umbrella error for the crate's public surface.
#[derive(Debug, Error)]
pub enum TidepoolError {
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TidepoolError {
    /// Short message suitable for direct display to a user.
    pub fn user_message(&self) -> String {
        match self {
            TidepoolError::Manifest(ManifestError::NotFound { id }) => {
                format!("No provider named '{id}' is configured")
            }
            TidepoolError::Manifest(ManifestError::Validation { reason }) => {
                format!("Provider manifest is invalid: {reason}")
            }
            TidepoolError::Manifest(ManifestError::Network { url, .. }) => {
                format!("Could not reach provider at {url}")
            }
            TidepoolError::Playback(PlaybackError::CandidatesExhausted { attempted }) => {
                format!("Tried {attempted} sources, none could be played")
            }
            TidepoolError::Playback(PlaybackError::NothingSelected) => {
                "Select a source first".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether the error stems from user input rather than a fault.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TidepoolError::Manifest(
                ManifestError::NotFound { .. } | ManifestError::Validation { .. }
            ) | TidepoolError::Playback(PlaybackError::NothingSelected)
                | TidepoolError::Configuration { .. }
        )
    }
}

/// Result alias for the crate's public surface.
pub type Result<T> = std::result::Result<T, TidepoolError>;
