//! Source provider abstraction.
//!
//! A provider is one queryable upstream, addressed by its manifest. The
//! fan-out holds providers behind `Arc<dyn SourceProvider>` and builds
//! them through a factory so tests can substitute scripted providers.

use std::sync::Arc;

use async_trait::async_trait;

use super::errors::SourceError;
use super::types::{ContentRequest, SourceCandidate};
use crate::manifest::Manifest;

pub mod http;
pub mod mock;

pub use http::HttpSourceProvider;
pub use mock::MockSourceProvider;

/// One queryable streaming-source provider.
#[async_trait]
pub trait SourceProvider: Send + Sync + std::fmt::Debug {
    /// Manifest id of the provider this instance queries.
    fn provider_id(&self) -> &str;

    /// Query the provider for candidates for one content item.
    ///
    /// # Errors
    /// - `SourceError::Network` - Request failed to reach the provider
    /// - `SourceError::Provider` - Provider returned a non-success status
    /// - `SourceError::Parse` - Response body could not be interpreted
    async fn query(&self, request: &ContentRequest)
    -> Result<Vec<SourceCandidate>, SourceError>;
}

/// Builds providers from manifests.
pub trait SourceProviderFactory: Send + Sync + std::fmt::Debug {
    fn provider_for(&self, manifest: &Manifest) -> Arc<dyn SourceProvider>;
}

/// Factory producing HTTP providers that speak the manifest's dialect.
#[derive(Debug)]
pub struct HttpProviderFactory {
    client: reqwest::Client,
}

impl HttpProviderFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl SourceProviderFactory for HttpProviderFactory {
    fn provider_for(&self, manifest: &Manifest) -> Arc<dyn SourceProvider> {
        Arc::new(HttpSourceProvider::new(manifest, self.client.clone()))
    }
}
