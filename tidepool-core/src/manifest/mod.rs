//! Provider manifest management.
//!
//! Manifests declare what a third-party provider can do (stream sources,
//! metadata, subtitles, catalogs) and where to reach it. This module owns
//! their full lifecycle: import-from-URL, validation, durable persistence,
//! TTL caching, refresh, and change notification.

pub mod cache;
pub mod coordinator;
pub mod errors;
pub mod parsing;
pub mod persistence;
pub mod store;
pub mod transport;
pub mod types;

pub use cache::{ManifestCache, ManifestCacheConfig, ManifestCacheStats};
pub use coordinator::ManifestCoordinator;
pub use errors::ManifestError;
pub use parsing::{ManifestFormat, RawManifestDocument};
pub use persistence::{FileManifestPersistence, InMemoryManifestPersistence, ManifestPersistence};
pub use store::ManifestStore;
pub use transport::{
    CredentialProvider, HttpManifestTransport, ManifestTransport, NoCredentials,
    StaticManifestTransport,
};
pub use types::{Capability, Manifest, ProviderReliability, ValidationStatus};
