//! Error types for manifest management.

use thiserror::Error;

/// Errors that can occur while importing, validating, or storing manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Manifest failed validation and was persisted as Invalid.
    #[error("Manifest validation failed: {reason}")]
    Validation {
        /// Human-readable reason, also stored on the manifest as `last_error`
        reason: String,
    },

    /// Network communication failed while fetching a manifest document.
    #[error("Network error for '{url}': {reason}")]
    Network {
        /// URL that was being fetched
        url: String,
        /// The reason for the network error
        reason: String,
    },

    /// Manifest document could not be parsed into the normalized shape.
    #[error("Manifest parse error: {reason}")]
    Parse {
        /// The reason for the parse error
        reason: String,
    },

    /// Persistence layer failure. Never silently swallowed.
    #[error("Storage error: {reason}")]
    Storage {
        /// The reason for the storage error
        reason: String,
    },

    /// No manifest with the requested id exists.
    #[error("Manifest '{id}' not found")]
    NotFound {
        /// The manifest id that was requested
        id: String,
    },
}
