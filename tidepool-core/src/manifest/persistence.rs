//! Durable manifest persistence behind a narrow trait.
//!
//! The store and coordinator only see [`ManifestPersistence`]; the default
//! implementation keeps one JSON file per manifest, but any durable
//! key-value or relational store can be substituted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs;

use super::errors::ManifestError;
use super::types::Manifest;

/// Persistence contract for provider manifests.
#[async_trait]
pub trait ManifestPersistence: Send + Sync + std::fmt::Debug {
    /// Load every persisted manifest.
    async fn load_manifests(&self) -> Result<Vec<Manifest>, ManifestError>;

    /// Persist a manifest, replacing any existing entry with the same id.
    async fn save_manifest(&self, manifest: &Manifest) -> Result<(), ManifestError>;

    /// Delete a persisted manifest.
    ///
    /// # Errors
    /// - `ManifestError::NotFound` - No manifest with this id is persisted
    async fn delete_manifest(&self, id: &str) -> Result<(), ManifestError>;
}

/// File-backed manifest persistence, one JSON document per manifest.
///
/// Writes go through a temporary file plus rename so a crash mid-write
/// never corrupts an existing manifest.
#[derive(Debug)]
pub struct FileManifestPersistence {
    directory: PathBuf,
}

impl FileManifestPersistence {
    /// Create file persistence rooted at `directory`, creating it if needed.
    ///
    /// # Errors
    /// - `ManifestError::Storage` - Directory cannot be created
    pub async fn new(directory: impl Into<PathBuf>) -> Result<Self, ManifestError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)
            .await
            .map_err(|e| storage_error("create manifest directory", &directory, e))?;
        Ok(Self { directory })
    }

    fn manifest_path(&self, id: &str) -> PathBuf {
        // Manifest ids are reverse-domain strings; keep the file name safe
        let safe: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.directory.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl ManifestPersistence for FileManifestPersistence {
    async fn load_manifests(&self) -> Result<Vec<Manifest>, ManifestError> {
        let mut entries = fs::read_dir(&self.directory)
            .await
            .map_err(|e| storage_error("read manifest directory", &self.directory, e))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("read manifest directory", &self.directory, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }

        let bodies = futures::future::join_all(paths.iter().map(|path| async move {
            let body = fs::read_to_string(path)
                .await
                .map_err(|e| storage_error("read manifest", path, e))?;
            Ok::<_, ManifestError>((path, body))
        }))
        .await;

        let mut manifests = Vec::new();
        for result in bodies {
            let (path, body) = result?;
            match serde_json::from_str::<Manifest>(&body) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => {
                    // A corrupt file should not take down the whole store
                    tracing::warn!("Skipping unreadable manifest {}: {e}", path.display());
                }
            }
        }

        Ok(manifests)
    }

    async fn save_manifest(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        let path = self.manifest_path(&manifest.id);
        let body =
            serde_json::to_string_pretty(manifest).map_err(|e| ManifestError::Storage {
                reason: format!("serialize manifest '{}': {e}", manifest.id),
            })?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, body)
            .await
            .map_err(|e| storage_error("write manifest", &tmp_path, e))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| storage_error("commit manifest", &path, e))?;

        Ok(())
    }

    async fn delete_manifest(&self, id: &str) -> Result<(), ManifestError> {
        let path = self.manifest_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ManifestError::NotFound { id: id.to_string() })
            }
            Err(e) => Err(storage_error("delete manifest", &path, e)),
        }
    }
}

fn storage_error(action: &str, path: &Path, error: std::io::Error) -> ManifestError {
    ManifestError::Storage {
        reason: format!("{action} '{}': {error}", path.display()),
    }
}

/// In-memory persistence for tests and ephemeral setups.
#[derive(Debug, Default)]
pub struct InMemoryManifestPersistence {
    entries: RwLock<HashMap<String, Manifest>>,
}

impl InMemoryManifestPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing manifests.
    pub fn with_manifests(manifests: impl IntoIterator<Item = Manifest>) -> Self {
        let entries = manifests
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[async_trait]
impl ManifestPersistence for InMemoryManifestPersistence {
    async fn load_manifests(&self) -> Result<Vec<Manifest>, ManifestError> {
        Ok(self.entries.read().values().cloned().collect())
    }

    async fn save_manifest(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        self.entries
            .write()
            .insert(manifest.id.clone(), manifest.clone());
        Ok(())
    }

    async fn delete_manifest(&self, id: &str) -> Result<(), ManifestError> {
        self.entries
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ManifestError::NotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tempfile::tempdir;
    use url::Url;

    use super::*;
    use crate::manifest::types::{Capability, ProviderReliability, ValidationStatus};

    fn manifest_fixture(id: &str) -> Manifest {
        Manifest {
            id: id.to_string(),
            name: "Fixture".to_string(),
            base_url: Url::parse("https://provider.example.com").unwrap(),
            capabilities: HashSet::from([Capability::Stream]),
            enabled: true,
            priority: 0,
            validation_status: ValidationStatus::Valid,
            last_error: None,
            last_refreshed_at: None,
            reliability: ProviderReliability::Unknown,
            consecutive_failures: 0,
        }
    }

    #[tokio::test]
    async fn test_file_persistence_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileManifestPersistence::new(dir.path()).await.unwrap();

        store.save_manifest(&manifest_fixture("org.example.one")).await.unwrap();
        store.save_manifest(&manifest_fixture("org.example.two")).await.unwrap();

        let mut loaded = store.load_manifests().await.unwrap();
        loaded.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "org.example.one");

        store.delete_manifest("org.example.one").await.unwrap();
        assert_eq!(store.load_manifests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_persistence_overwrites_same_id() {
        let dir = tempdir().unwrap();
        let store = FileManifestPersistence::new(dir.path()).await.unwrap();

        let mut manifest = manifest_fixture("org.example");
        store.save_manifest(&manifest).await.unwrap();

        manifest.priority = 7;
        store.save_manifest(&manifest).await.unwrap();

        let loaded = store.load_manifests().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].priority, 7);
    }

    #[tokio::test]
    async fn test_delete_missing_manifest_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FileManifestPersistence::new(dir.path()).await.unwrap();

        assert!(matches!(
            store.delete_manifest("org.missing").await,
            Err(ManifestError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_skipped() {
        let dir = tempdir().unwrap();
        let store = FileManifestPersistence::new(dir.path()).await.unwrap();
        store.save_manifest(&manifest_fixture("org.example")).await.unwrap();

        tokio::fs::write(dir.path().join("broken.json"), "{ not json")
            .await
            .unwrap();

        let loaded = store.load_manifests().await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_in_memory_persistence() {
        let store = InMemoryManifestPersistence::new();
        tokio_test::block_on(async {
            store.save_manifest(&manifest_fixture("org.example")).await.unwrap();
            assert_eq!(store.load_manifests().await.unwrap().len(), 1);
            store.delete_manifest("org.example").await.unwrap();
            assert!(store.load_manifests().await.unwrap().is_empty());
        });
    }
}
