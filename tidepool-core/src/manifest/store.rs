//! Validating manifest store over the persistence trait.

use std::sync::Arc;

use super::errors::ManifestError;
use super::parsing;
use super::persistence::ManifestPersistence;
use super::types::{Manifest, ValidationStatus};

/// Parses, validates, and persists provider manifests.
///
/// Validation failures do not drop the manifest: it is persisted with
/// `Invalid` status and a human-readable `last_error` so it stays visible
/// for user correction, and the caller gets a typed error.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    persistence: Arc<dyn ManifestPersistence>,
}

impl ManifestStore {
    pub fn new(persistence: Arc<dyn ManifestPersistence>) -> Self {
        Self { persistence }
    }

    /// Load every persisted manifest, valid or not.
    pub async fn load_all(&self) -> Result<Vec<Manifest>, ManifestError> {
        self.persistence.load_manifests().await
    }

    /// Fetch one manifest by id.
    ///
    /// # Errors
    /// - `ManifestError::NotFound` - No manifest with this id
    /// - `ManifestError::Storage` - Persistence failure
    pub async fn get(&self, id: &str) -> Result<Manifest, ManifestError> {
        self.load_all()
            .await?
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| ManifestError::NotFound { id: id.to_string() })
    }

    /// Validate and persist a manifest.
    ///
    /// On success the manifest is stored as `Valid` and returned. On
    /// validation failure it is stored as `Invalid` with `last_error` set,
    /// and `ManifestError::Validation` is returned.
    ///
    /// # Errors
    /// - `ManifestError::Validation` - Manifest failed validation (still persisted)
    /// - `ManifestError::Storage` - Persistence failure
    pub async fn save_validated(&self, mut manifest: Manifest) -> Result<Manifest, ManifestError> {
        match parsing::validate(&manifest) {
            Ok(()) => {
                manifest.validation_status = ValidationStatus::Valid;
                manifest.last_error = None;
                self.persistence.save_manifest(&manifest).await?;
                Ok(manifest)
            }
            Err(reason) => {
                manifest.validation_status = ValidationStatus::Invalid;
                manifest.last_error = Some(reason.clone());
                self.persistence.save_manifest(&manifest).await?;
                tracing::warn!("Manifest '{}' failed validation: {reason}", manifest.id);
                Err(ManifestError::Validation { reason })
            }
        }
    }

    /// Persist a manifest without re-running validation.
    ///
    /// Used for bookkeeping updates (reliability, failure counters) that
    /// cannot change validation-relevant fields.
    pub async fn save_unchecked(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        self.persistence.save_manifest(manifest).await
    }

    /// Remove a manifest.
    ///
    /// # Errors
    /// - `ManifestError::NotFound` - No manifest with this id
    pub async fn remove(&self, id: &str) -> Result<(), ManifestError> {
        self.persistence.delete_manifest(id).await
    }
}
