//! Runtime configuration.
//!
//! Defaults suit a desktop deployment; every tunable can be overridden
//! through `TIDEPOOL_*` environment variables. Invalid override values
//! are logged and ignored rather than aborting startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::manifest::ManifestCacheConfig;

/// Manifest subsystem configuration.
#[derive(Debug, Clone)]
pub struct ManifestConfig {
    /// Directory manifest JSON files are persisted in
    pub storage_dir: PathBuf,
    /// Timeout for manifest document fetches
    pub fetch_timeout: Duration,
    pub user_agent: String,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub enable_sweep: bool,
    pub sweep_interval: Duration,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            fetch_timeout: Duration::from_secs(15),
            user_agent: concat!("tidepool/", env!("CARGO_PKG_VERSION")).to_string(),
            cache_capacity: 64,
            cache_ttl: Duration::from_secs(1800),
            enable_sweep: true,
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl ManifestConfig {
    /// Cache configuration derived from these settings.
    pub fn cache_config(&self) -> ManifestCacheConfig {
        ManifestCacheConfig {
            capacity: self.cache_capacity,
            entry_ttl: self.cache_ttl,
            enable_sweep: self.enable_sweep,
            sweep_interval: self.sweep_interval,
        }
    }
}

/// Query fan-out configuration.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Per-attempt provider query timeout
    pub provider_timeout: Duration,
    /// Total attempts per provider, including the first
    pub retry_attempts: u32,
    /// Fixed delay between attempts
    pub retry_backoff: Duration,
    /// Upper bound on concurrently running provider queries
    pub max_concurrent_queries: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(10),
            retry_attempts: 2,
            retry_backoff: Duration::from_secs(1),
            max_concurrent_queries: 8,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct TidepoolConfig {
    pub manifest: ManifestConfig,
    pub fanout: FanoutConfig,
}

impl TidepoolConfig {
    /// Defaults with environment variable overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("TIDEPOOL_STORAGE_DIR") {
            config.manifest.storage_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_u64("TIDEPOOL_FETCH_TIMEOUT_SECS") {
            config.manifest.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = env_u64("TIDEPOOL_CACHE_CAPACITY") {
            config.manifest.cache_capacity = capacity as usize;
        }
        if let Some(secs) = env_u64("TIDEPOOL_CACHE_TTL_SECS") {
            config.manifest.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("TIDEPOOL_PROVIDER_TIMEOUT_SECS") {
            config.fanout.provider_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_u64("TIDEPOOL_RETRY_ATTEMPTS") {
            config.fanout.retry_attempts = attempts as u32;
        }
        if let Some(limit) = env_u64("TIDEPOOL_MAX_CONCURRENT_QUERIES") {
            config.fanout.max_concurrent_queries = limit as usize;
        }

        config
    }

    /// Configuration for tests: tight timeouts, isolated storage, no
    /// background sweep.
    pub fn for_testing(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest: ManifestConfig {
                storage_dir: storage_dir.into(),
                fetch_timeout: Duration::from_millis(500),
                cache_ttl: Duration::from_secs(60),
                enable_sweep: false,
                ..Default::default()
            },
            fanout: FanoutConfig {
                provider_timeout: Duration::from_millis(200),
                retry_attempts: 1,
                retry_backoff: Duration::from_millis(10),
                max_concurrent_queries: 4,
            },
        }
    }

    /// Reject configurations that cannot work at runtime.
    ///
    /// # Errors
    /// - `TidepoolError::Configuration` - A tunable holds an unusable value
    pub fn validate(&self) -> crate::Result<()> {
        if self.fanout.retry_attempts == 0 {
            return Err(crate::TidepoolError::Configuration {
                reason: "retry_attempts must be at least 1".to_string(),
            });
        }
        if self.fanout.max_concurrent_queries == 0 {
            return Err(crate::TidepoolError::Configuration {
                reason: "max_concurrent_queries must be at least 1".to_string(),
            });
        }
        if self.manifest.cache_capacity == 0 {
            return Err(crate::TidepoolError::Configuration {
                reason: "cache_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn default_storage_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tidepool")
        .join("manifests")
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {name}='{raw}'");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(TidepoolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut config = TidepoolConfig::default();
        config.fanout.retry_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_testing_config_disables_sweep() {
        let config = TidepoolConfig::for_testing("/tmp/tidepool-test");
        assert!(!config.manifest.enable_sweep);
        assert!(config.validate().is_ok());
    }
}
