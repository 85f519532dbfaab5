//! CLI command implementations

use std::sync::Arc;

use async_trait::async_trait;
use clap::Subcommand;
use tidepool_core::config::TidepoolConfig;
use tidepool_core::manifest::{
    Capability, FileManifestPersistence, HttpManifestTransport, Manifest, ManifestCache,
    ManifestCoordinator, ManifestStore, NoCredentials,
};
use tidepool_core::sources::playback::{PlaybackEngine, PlaybackError};
use tidepool_core::sources::{
    ContentRequest, HttpProviderFactory, PreferenceLearner, SelectionSession, SourceCandidate,
    SourceQueryFanout,
};
use tidepool_core::{Result, TidepoolError};
use url::Url;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Add a provider from its manifest URL
    Add {
        /// Manifest URL, e.g. https://provider.example.com/manifest.json
        url: String,
    },
    /// List configured providers
    List,
    /// Remove a provider
    Remove {
        /// Provider manifest id
        id: String,
    },
    /// Re-fetch a provider's manifest
    Refresh {
        /// Provider manifest id
        id: String,
    },
    /// Search providers by name or id
    Search {
        query: String,
        /// Only providers with this capability (stream, meta, p2p, subtitles, catalog)
        #[arg(short, long)]
        capability: Option<String>,
    },
    /// Enable or disable a provider
    Enable {
        /// Provider manifest id
        id: String,
        /// Disable instead of enable
        #[arg(long)]
        off: bool,
    },
    /// Set a provider's ranking priority
    Priority {
        /// Provider manifest id
        id: String,
        /// Priority value; higher ranks the provider's sources earlier
        value: i32,
    },
    /// Query all providers for sources and print the ranked results
    Query {
        /// Content identifier (IMDb ids are passed to providers directly)
        content_id: String,
        /// Season number, for episode queries
        #[arg(short, long)]
        season: Option<u32>,
        /// Episode number, for episode queries
        #[arg(short, long)]
        episode: Option<u32>,
        /// Maximum number of results to print
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Query, rank, and play the best source with automatic fallback
    Play {
        /// Content identifier
        content_id: String,
        #[arg(short, long)]
        season: Option<u32>,
        #[arg(short, long)]
        episode: Option<u32>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    let config = TidepoolConfig::from_env();
    config.validate()?;

    match command {
        Commands::Add { url } => add_provider(&config, &url).await,
        Commands::List => list_providers(&config).await,
        Commands::Remove { id } => remove_provider(&config, &id).await,
        Commands::Refresh { id } => refresh_provider(&config, &id).await,
        Commands::Search { query, capability } => {
            search_providers(&config, &query, capability.as_deref()).await
        }
        Commands::Enable { id, off } => set_provider_enabled(&config, &id, !off).await,
        Commands::Priority { id, value } => set_provider_priority(&config, &id, value).await,
        Commands::Query {
            content_id,
            season,
            episode,
            limit,
        } => query_sources(&config, content_request(content_id, season, episode), limit).await,
        Commands::Play {
            content_id,
            season,
            episode,
        } => play_content(&config, content_request(content_id, season, episode)).await,
    }
}

fn content_request(content_id: String, season: Option<u32>, episode: Option<u32>) -> ContentRequest {
    let mut request = ContentRequest::new(content_id.clone());
    if content_id.starts_with("tt") {
        request.imdb_id = Some(content_id);
    }
    request.season = season;
    request.episode = episode;
    request
}

async fn build_coordinator(config: &TidepoolConfig) -> Result<Arc<ManifestCoordinator>> {
    let persistence = Arc::new(
        FileManifestPersistence::new(config.manifest.storage_dir.clone()).await?,
    );
    let store = ManifestStore::new(persistence);
    let cache = ManifestCache::new(config.manifest.cache_config());
    let transport = Arc::new(HttpManifestTransport::new(
        config.manifest.fetch_timeout,
        &config.manifest.user_agent,
        Arc::new(NoCredentials),
    ));

    Ok(Arc::new(
        ManifestCoordinator::new(store, cache, transport).await?,
    ))
}

fn build_fanout(
    config: &TidepoolConfig,
    coordinator: Arc<ManifestCoordinator>,
) -> Result<Arc<SourceQueryFanout>> {
    let client = reqwest::Client::builder()
        .timeout(config.fanout.provider_timeout)
        .user_agent(config.manifest.user_agent.clone())
        .build()
        .map_err(|e| TidepoolError::Configuration {
            reason: format!("could not build HTTP client: {e}"),
        })?;

    Ok(Arc::new(SourceQueryFanout::new(
        coordinator,
        Arc::new(HttpProviderFactory::new(client)),
        config.fanout.clone(),
    )))
}

/// Add a provider from its manifest URL
///
/// # Errors
/// - `TidepoolError::Manifest` - Fetch, parse, or validation failed
pub async fn add_provider(config: &TidepoolConfig, url: &str) -> Result<()> {
    let url = Url::parse(url).map_err(|e| TidepoolError::Configuration {
        reason: format!("invalid manifest URL '{url}': {e}"),
    })?;

    let coordinator = build_coordinator(config).await?;
    let manifest = coordinator.add(&url).await?;

    println!("Added provider: {} ({})", manifest.name, manifest.id);
    println!("  Capabilities: {}", capability_list(&manifest));
    Ok(())
}

/// List configured providers
///
/// # Errors
/// - `TidepoolError::Manifest` - Provider storage could not be read
pub async fn list_providers(config: &TidepoolConfig) -> Result<()> {
    let coordinator = build_coordinator(config).await?;
    let manifests = coordinator.list_all().await?;

    if manifests.is_empty() {
        println!("No providers configured.");
        println!("Use 'tidepool add <manifest-url>' to add one.");
        return Ok(());
    }

    println!("Providers");
    println!("{:-<72}", "");
    for manifest in manifests {
        println!("{}", provider_line(&manifest));
    }
    Ok(())
}

/// Remove a provider
///
/// # Errors
/// - `TidepoolError::Manifest` - Provider not found or storage failed
pub async fn remove_provider(config: &TidepoolConfig, id: &str) -> Result<()> {
    let coordinator = build_coordinator(config).await?;
    coordinator.remove(id).await?;
    println!("Removed provider: {id}");
    Ok(())
}

/// Re-fetch a provider's manifest
///
/// # Errors
/// - `TidepoolError::Manifest` - Provider not found or refresh failed
pub async fn refresh_provider(config: &TidepoolConfig, id: &str) -> Result<()> {
    let coordinator = build_coordinator(config).await?;
    let manifest = coordinator.refresh(id).await?;
    println!("Refreshed provider: {} ({})", manifest.name, manifest.id);
    println!("  Capabilities: {}", capability_list(&manifest));
    Ok(())
}

/// Search providers by name or id
///
/// # Errors
/// - `TidepoolError::Manifest` - Provider storage could not be read
pub async fn search_providers(
    config: &TidepoolConfig,
    query: &str,
    capability: Option<&str>,
) -> Result<()> {
    let capability = capability
        .map(|c| {
            Capability::from_resource(c).ok_or_else(|| TidepoolError::Configuration {
                reason: format!("unknown capability '{c}'"),
            })
        })
        .transpose()?;

    let coordinator = build_coordinator(config).await?;
    let matches = coordinator.search(query, capability).await?;

    if matches.is_empty() {
        println!("No providers match '{query}'.");
        return Ok(());
    }

    for manifest in matches {
        println!("{}", provider_line(&manifest));
    }
    Ok(())
}

/// Enable or disable a provider
///
/// # Errors
/// - `TidepoolError::Manifest` - Provider not found or storage failed
pub async fn set_provider_enabled(
    config: &TidepoolConfig,
    id: &str,
    enabled: bool,
) -> Result<()> {
    let coordinator = build_coordinator(config).await?;
    let manifest = coordinator.set_enabled(id, enabled).await?;
    println!(
        "Provider {} is now {}",
        manifest.id,
        if manifest.enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

/// Set a provider's ranking priority
///
/// # Errors
/// - `TidepoolError::Manifest` - Provider not found or storage failed
pub async fn set_provider_priority(
    config: &TidepoolConfig,
    id: &str,
    priority: i32,
) -> Result<()> {
    let coordinator = build_coordinator(config).await?;
    let manifest = coordinator.set_priority(id, priority).await?;
    println!("Provider {} priority set to {}", manifest.id, manifest.priority);
    Ok(())
}

/// Query all providers and print the ranked candidate list
///
/// # Errors
/// - `TidepoolError::Manifest` - Provider storage could not be read
pub async fn query_sources(
    config: &TidepoolConfig,
    request: ContentRequest,
    limit: usize,
) -> Result<()> {
    let coordinator = build_coordinator(config).await?;
    let fanout = build_fanout(config, coordinator)?;

    let learner = PreferenceLearner::default();
    let batch = fanout.query(&request).await;
    let ranked = tidepool_core::sources::rank(batch, &learner.snapshot());

    if ranked.is_empty() {
        println!("No sources found for '{}'.", request.content_id);
        return Ok(());
    }

    println!("Sources for '{}'", request.content_id);
    println!("{:-<72}", "");
    for candidate in ranked.iter().take(limit) {
        println!("{}", candidate_line(candidate));
    }
    if ranked.len() > limit {
        println!("... and {} more", ranked.len() - limit);
    }
    Ok(())
}

/// Query, rank, and play the best source with automatic fallback
///
/// # Errors
/// - `TidepoolError::Playback` - No source could be played
pub async fn play_content(config: &TidepoolConfig, request: ContentRequest) -> Result<()> {
    let coordinator = build_coordinator(config).await?;
    let fanout = build_fanout(config, coordinator)?;

    let mut session = SelectionSession::new(
        fanout,
        Arc::new(PreferenceLearner::default()),
        Arc::new(HandoffPlaybackEngine),
    );

    tracing::info!("Querying providers for '{}'", request.content_id);
    let count = session.load(request.clone(), false).await;
    if count == 0 {
        println!("No sources found for '{}'.", request.content_id);
        return Ok(());
    }
    println!("Found {count} sources, playing best match...");

    let played = session.play_best().await?;
    println!("Playing: {}", played.file.name);
    println!("  Provider: {}", played.provider_id);
    println!("  Quality: {}", played.quality.resolution);
    println!("  Size: {}", played.file.format_size());
    Ok(())
}

/// Playback engine that hands the stream URL to the terminal; an external
/// player picks it up from there.
#[derive(Debug)]
struct HandoffPlaybackEngine;

#[async_trait]
impl PlaybackEngine for HandoffPlaybackEngine {
    async fn play(&self, candidate: &SourceCandidate) -> std::result::Result<(), PlaybackError> {
        if candidate.url.is_empty() {
            return Err(PlaybackError::Failed {
                candidate_id: candidate.id.clone(),
                reason: "candidate has no stream URL".to_string(),
            });
        }
        println!("  URL: {}", candidate.url);
        Ok(())
    }
}

fn capability_list(manifest: &Manifest) -> String {
    let mut names: Vec<String> = manifest
        .capabilities
        .iter()
        .map(|c| c.to_string())
        .collect();
    names.sort();
    names.join(", ")
}

fn provider_line(manifest: &Manifest) -> String {
    let status = if !manifest.enabled {
        "disabled"
    } else {
        match manifest.validation_status {
            tidepool_core::manifest::ValidationStatus::Valid => "ok",
            tidepool_core::manifest::ValidationStatus::Invalid => "invalid",
            tidepool_core::manifest::ValidationStatus::Unvalidated => "unvalidated",
        }
    };
    format!(
        "{:<40} [{}] priority={} {}",
        manifest.id, status, manifest.priority, manifest.name
    )
}

fn candidate_line(candidate: &SourceCandidate) -> String {
    let seeders = if candidate.is_p2p() {
        format!(" seeders={}", candidate.health.seeders)
    } else {
        String::new()
    };
    let cached = if candidate.availability.cached {
        " [cached]"
    } else {
        ""
    };
    format!(
        "{:<8} {:<6} {}{}{} {}",
        format!("{:?}", candidate.kind).to_lowercase(),
        candidate.quality.resolution,
        candidate.file.format_size(),
        seeders,
        cached,
        candidate.file.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_request_detects_imdb_id() {
        let request = content_request("tt0133093".to_string(), None, None);
        assert_eq!(request.imdb_id.as_deref(), Some("tt0133093"));

        let request = content_request("movie-42".to_string(), None, None);
        assert!(request.imdb_id.is_none());
    }

    #[test]
    fn test_content_request_carries_episode() {
        let request = content_request("tt0903747".to_string(), Some(2), Some(5));
        assert!(request.is_episode());
    }

    #[tokio::test]
    async fn test_handoff_engine_rejects_empty_url() {
        use tidepool_core::manifest::ProviderReliability;
        use tidepool_core::sources::{
            AudioInfo, AvailabilityInfo, CodecInfo, FileInfo, HealthInfo, QualityInfo,
            ReleaseInfo, SourceKind,
        };

        let candidate = SourceCandidate {
            id: "c1".to_string(),
            provider_id: "p1".to_string(),
            provider_priority: 0,
            provider_reliability: ProviderReliability::Unknown,
            kind: SourceKind::Direct,
            quality: QualityInfo::default(),
            codec: CodecInfo::default(),
            audio: AudioInfo::default(),
            release: ReleaseInfo::default(),
            file: FileInfo::default(),
            health: HealthInfo::default(),
            availability: AvailabilityInfo::default(),
            url: String::new(),
            season_pack_id: None,
            episode_mapping: None,
        };

        let result = HandoffPlaybackEngine.play(&candidate).await;
        assert!(matches!(result, Err(PlaybackError::Failed { .. })));
    }
}
