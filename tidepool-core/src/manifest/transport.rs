//! Manifest document transport.
//!
//! Abstracts HTTP away from the coordinator so tests can feed canned
//! documents and so authenticated providers can be queried once a bearer
//! credential is available.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::errors::ManifestError;
use super::parsing::RawManifestDocument;

/// Supplies the current bearer credential, when one exists.
///
/// Token acquisition and storage live elsewhere; this core only consumes
/// "a valid bearer credential is available".
pub trait CredentialProvider: Send + Sync + std::fmt::Debug {
    fn current_bearer_token(&self) -> Option<String>;
}

/// Credential provider for unauthenticated setups.
#[derive(Debug, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn current_bearer_token(&self) -> Option<String> {
        None
    }
}

/// Fetches raw manifest documents.
#[async_trait]
pub trait ManifestTransport: Send + Sync + std::fmt::Debug {
    /// Fetch the document at `url`.
    ///
    /// # Errors
    /// - `ManifestError::Network` - Request failed or returned a non-success status
    async fn fetch(&self, url: &Url) -> Result<RawManifestDocument, ManifestError>;
}

/// HTTP manifest transport backed by reqwest.
#[derive(Debug)]
pub struct HttpManifestTransport {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpManifestTransport {
    /// Create a transport with the given request timeout and user agent.
    pub fn new(
        timeout: Duration,
        user_agent: &str,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()
            .unwrap_or_default();

        Self {
            client,
            credentials,
        }
    }
}

#[async_trait]
impl ManifestTransport for HttpManifestTransport {
    async fn fetch(&self, url: &Url) -> Result<RawManifestDocument, ManifestError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = self.credentials.current_bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| ManifestError::Network {
            url: url.to_string(),
            reason: format!("request failed: {e}"),
        })?;

        if !response.status().is_success() {
            return Err(ManifestError::Network {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body = response.text().await.map_err(|e| ManifestError::Network {
            url: url.to_string(),
            reason: format!("body read failed: {e}"),
        })?;

        Ok(RawManifestDocument {
            url: url.clone(),
            body,
        })
    }
}

/// Canned-response transport for tests and development.
#[derive(Debug, Default)]
pub struct StaticManifestTransport {
    documents: HashMap<String, String>,
}

impl StaticManifestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a canned document body for a URL.
    pub fn with_document(mut self, url: &str, body: &str) -> Self {
        self.documents.insert(url.to_string(), body.to_string());
        self
    }
}

#[async_trait]
impl ManifestTransport for StaticManifestTransport {
    async fn fetch(&self, url: &Url) -> Result<RawManifestDocument, ManifestError> {
        match self.documents.get(url.as_str()) {
            Some(body) => Ok(RawManifestDocument {
                url: url.clone(),
                body: body.clone(),
            }),
            None => Err(ManifestError::Network {
                url: url.to_string(),
                reason: "no canned document registered".to_string(),
            }),
        }
    }
}
