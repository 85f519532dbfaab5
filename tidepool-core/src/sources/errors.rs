//! Error types for source providers and the query fan-out.

use thiserror::Error;

/// Errors surfaced by a single provider query.
///
/// The fan-out logs these and drops the failing provider from the batch;
/// they never abort a query across providers.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Provider error from '{provider_id}': {reason}")]
    Provider { provider_id: String, reason: String },

    #[error("Network error querying '{provider_id}': {reason}")]
    Network { provider_id: String, reason: String },

    #[error("Failed to parse response from '{provider_id}': {reason}")]
    Parse { provider_id: String, reason: String },

    #[error("Provider '{provider_id}' timed out after {timeout_secs}s")]
    Timeout {
        provider_id: String,
        timeout_secs: u64,
    },
}

impl SourceError {
    /// Provider the error originated from.
    pub fn provider_id(&self) -> &str {
        match self {
            SourceError::Provider { provider_id, .. }
            | SourceError::Network { provider_id, .. }
            | SourceError::Parse { provider_id, .. }
            | SourceError::Timeout { provider_id, .. } => provider_id,
        }
    }
}
