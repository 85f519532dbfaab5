//! Selection session: one user's journey from "play this content" to
//! stable playback.
//!
//! The session owns a ranked candidate batch, the user's current filter
//! and sort view over it, and the fallback chain that walks ranked order
//! when playback attempts fail. State transitions are observable through
//! a watch channel so a UI can follow along.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;

use super::fanout::SourceQueryFanout;
use super::playback::{PlaybackEngine, PlaybackError};
use super::preferences::PreferenceLearner;
use super::ranking;
use super::types::{ContentRequest, SortOption, SourceCandidate, SourceFilter};

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionState {
    Idle,
    /// Fan-out in flight
    Loading,
    /// Ranked batch available for browsing
    Ranked,
    /// Browsing with a filter applied
    Filtering,
    /// Browsing with an explicit sort applied
    Sorting,
    /// Browsing with release groups expanded or collapsed
    Grouping,
    Selected { candidate_id: String },
    Playing { candidate_id: String },
    PlaybackOk { candidate_id: String },
    PlaybackFailed { candidate_id: String },
    /// Every candidate in the current view has been attempted
    Exhausted,
}

/// Drives candidate loading, browsing, and failure-tolerant playback for
/// one content item at a time.
#[derive(Debug)]
pub struct SelectionSession {
    fanout: Arc<SourceQueryFanout>,
    learner: Arc<PreferenceLearner>,
    engine: Arc<dyn PlaybackEngine>,
    state_tx: watch::Sender<SelectionState>,
    content: Option<ContentRequest>,
    candidates: Vec<SourceCandidate>,
    filter: Option<SourceFilter>,
    sort: SortOption,
    expanded_groups: HashSet<String>,
    selected_id: Option<String>,
    attempted_ids: HashSet<String>,
}

impl SelectionSession {
    pub fn new(
        fanout: Arc<SourceQueryFanout>,
        learner: Arc<PreferenceLearner>,
        engine: Arc<dyn PlaybackEngine>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SelectionState::Idle);
        Self {
            fanout,
            learner,
            engine,
            state_tx,
            content: None,
            candidates: Vec::new(),
            filter: None,
            sort: SortOption::Rank,
            expanded_groups: HashSet::new(),
            selected_id: None,
            attempted_ids: HashSet::new(),
        }
    }

    /// Load and rank candidates for a content item.
    ///
    /// Loading the same content again is a no-op unless `refresh` forces
    /// a new fan-out; a different content item always re-queries and
    /// resets the view, selection, and fallback history.
    pub async fn load(&mut self, request: ContentRequest, refresh: bool) -> usize {
        if !refresh && self.content.as_ref() == Some(&request) && !self.candidates.is_empty() {
            return self.candidates.len();
        }

        self.set_state(SelectionState::Loading);
        let batch = self.fanout.query(&request).await;

        let prefs = self.learner.snapshot();
        self.candidates = ranking::rank(batch, &prefs);
        self.content = Some(request);
        self.filter = None;
        self.sort = SortOption::Rank;
        self.expanded_groups.clear();
        self.selected_id = None;
        self.attempted_ids.clear();

        self.set_state(SelectionState::Ranked);
        self.candidates.len()
    }

    /// Candidates under the current filter and sort.
    pub fn visible_candidates(&self) -> Vec<SourceCandidate> {
        let mut visible: Vec<SourceCandidate> = self
            .candidates
            .iter()
            .filter(|c| self.filter.as_ref().is_none_or(|f| f.matches(c)))
            .cloned()
            .collect();

        match self.sort {
            SortOption::Rank => {}
            SortOption::Seeders => {
                visible.sort_by(|a, b| b.health.seeders.cmp(&a.health.seeders));
            }
            SortOption::FileSizeDesc => {
                visible.sort_by(|a, b| b.file.size_bytes.cmp(&a.file.size_bytes));
            }
            SortOption::FileSizeAsc => {
                visible.sort_by(|a, b| a.file.size_bytes.cmp(&b.file.size_bytes));
            }
            SortOption::QualityTier => {
                visible.sort_by(|a, b| {
                    b.quality
                        .resolution
                        .tier()
                        .cmp(&a.quality.resolution.tier())
                });
            }
        }

        visible
    }

    /// Apply a filter to the view. Feeds the preference learner.
    pub fn apply_filter(&mut self, filter: SourceFilter) {
        self.learner.on_filter_applied(&filter);
        self.filter = Some(filter);
        self.set_state(SelectionState::Filtering);
    }

    /// Drop the active filter, restoring the full ranked view.
    pub fn clear_filter(&mut self) {
        self.filter = None;
        self.set_state(SelectionState::Ranked);
    }

    /// Apply an explicit sort to the view. Feeds the preference learner.
    pub fn apply_sort(&mut self, sort: SortOption) {
        self.learner.on_sort_chosen(sort);
        self.sort = sort;
        self.set_state(SelectionState::Sorting);
    }

    /// Visible candidates grouped by normalized release title.
    pub fn groups(&self) -> BTreeMap<String, Vec<SourceCandidate>> {
        ranking::group(&self.visible_candidates())
    }

    /// Toggle a release group open or closed in the browsing view.
    /// Returns whether the group is now expanded.
    pub fn toggle_group(&mut self, group_key: &str) -> bool {
        self.set_state(SelectionState::Grouping);
        if self.expanded_groups.remove(group_key) {
            false
        } else {
            self.expanded_groups.insert(group_key.to_string());
            true
        }
    }

    pub fn is_group_expanded(&self, group_key: &str) -> bool {
        self.expanded_groups.contains(group_key)
    }

    /// Select a specific candidate from the current view.
    ///
    /// # Errors
    /// - `PlaybackError::NothingSelected` - Id is not in the visible view
    pub fn select(&mut self, candidate_id: &str) -> Result<(), PlaybackError> {
        if !self
            .visible_candidates()
            .iter()
            .any(|c| c.id == candidate_id)
        {
            return Err(PlaybackError::NothingSelected);
        }

        self.selected_id = Some(candidate_id.to_string());
        self.set_state(SelectionState::Selected {
            candidate_id: candidate_id.to_string(),
        });
        Ok(())
    }

    /// Play the selected candidate, falling back through the remaining
    /// view in ranked order until one plays or the view is exhausted.
    ///
    /// # Errors
    /// - `PlaybackError::NothingSelected` - No candidate is selected
    /// - `PlaybackError::CandidatesExhausted` - Every candidate failed
    pub async fn play(&mut self) -> Result<SourceCandidate, PlaybackError> {
        let selected_id = self
            .selected_id
            .clone()
            .ok_or(PlaybackError::NothingSelected)?;

        let visible = self.visible_candidates();
        let start = visible
            .iter()
            .position(|c| c.id == selected_id)
            .ok_or(PlaybackError::NothingSelected)?;

        // Attempt the selection first, then the rest of the view in
        // ranked order, skipping anything already attempted
        let chain: Vec<SourceCandidate> = visible[start..]
            .iter()
            .chain(visible[..start].iter())
            .filter(|c| !self.attempted_ids.contains(&c.id))
            .cloned()
            .collect();

        for candidate in chain {
            self.attempted_ids.insert(candidate.id.clone());
            self.set_state(SelectionState::Playing {
                candidate_id: candidate.id.clone(),
            });

            match self.engine.play(&candidate).await {
                Ok(()) => {
                    tracing::info!(
                        candidate_id = %candidate.id,
                        provider_id = %candidate.provider_id,
                        "Playback started"
                    );
                    self.learner.on_play_success(&candidate);
                    self.selected_id = Some(candidate.id.clone());
                    // Stable playback is terminal; the fallback history
                    // resets for the next play
                    self.attempted_ids.clear();
                    self.set_state(SelectionState::PlaybackOk {
                        candidate_id: candidate.id.clone(),
                    });
                    return Ok(candidate);
                }
                Err(error) => {
                    tracing::warn!(
                        candidate_id = %candidate.id,
                        "Playback failed, falling back: {error}"
                    );
                    self.set_state(SelectionState::PlaybackFailed {
                        candidate_id: candidate.id.clone(),
                    });
                }
            }
        }

        self.set_state(SelectionState::Exhausted);
        Err(PlaybackError::CandidatesExhausted {
            attempted: self.attempted_ids.len(),
        })
    }

    /// Select the top-ranked visible candidate and play with fallback.
    ///
    /// # Errors
    /// - `PlaybackError::NothingSelected` - The view is empty
    /// - `PlaybackError::CandidatesExhausted` - Every candidate failed
    pub async fn play_best(&mut self) -> Result<SourceCandidate, PlaybackError> {
        let first = self
            .visible_candidates()
            .first()
            .map(|c| c.id.clone())
            .ok_or(PlaybackError::NothingSelected)?;

        self.select(&first)?;
        self.play().await
    }

    /// Resume the fallback chain after an earlier exhaustion or failure,
    /// re-attempting nothing that already failed.
    ///
    /// # Errors
    /// - `PlaybackError::NothingSelected` - No unattempted candidate remains
    /// - `PlaybackError::CandidatesExhausted` - Every candidate failed
    pub async fn retry_with_fallback(&mut self) -> Result<SourceCandidate, PlaybackError> {
        let next = self
            .visible_candidates()
            .iter()
            .find(|c| !self.attempted_ids.contains(&c.id))
            .map(|c| c.id.clone())
            .ok_or(PlaybackError::CandidatesExhausted {
                attempted: self.attempted_ids.len(),
            })?;

        self.select(&next)?;
        self.play().await
    }

    /// Record that the user downloaded a candidate from this session.
    pub fn record_download(&self, candidate_id: &str) {
        if let Some(candidate) = self.candidates.iter().find(|c| c.id == candidate_id) {
            self.learner.on_download(candidate);
        }
    }

    /// Record that the user added a candidate to a playlist.
    pub fn record_playlist_add(&self, candidate_id: &str) {
        if let Some(candidate) = self.candidates.iter().find(|c| c.id == candidate_id) {
            self.learner.on_playlist_add(candidate);
        }
    }

    pub fn state(&self) -> SelectionState {
        self.state_tx.borrow().clone()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SelectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SelectionState) {
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use url::Url;

    use super::*;
    use crate::config::FanoutConfig;
    use crate::manifest::{
        Capability, InMemoryManifestPersistence, Manifest, ManifestCache, ManifestCacheConfig,
        ManifestCoordinator, ManifestStore, ProviderReliability, StaticManifestTransport,
        ValidationStatus,
    };
    use crate::sources::providers::mock::{MockSourceProvider, p2p_candidate};
    use crate::sources::providers::{SourceProvider, SourceProviderFactory};
    use crate::sources::types::Resolution;

    #[derive(Debug, Default)]
    struct MockProviderFactory {
        providers: HashMap<String, Arc<dyn SourceProvider>>,
    }

    impl SourceProviderFactory for MockProviderFactory {
        fn provider_for(&self, manifest: &Manifest) -> Arc<dyn SourceProvider> {
            Arc::clone(&self.providers[&manifest.id])
        }
    }

    fn queryable_manifest(id: &str) -> Manifest {
        Manifest {
            id: id.to_string(),
            name: id.to_string(),
            base_url: Url::parse("https://provider.example.com").unwrap(),
            capabilities: std::collections::HashSet::from([Capability::Stream]),
            enabled: true,
            priority: 0,
            validation_status: ValidationStatus::Valid,
            last_error: None,
            last_refreshed_at: None,
            reliability: ProviderReliability::Unknown,
            consecutive_failures: 0,
        }
    }

    async fn fanout_with(
        provider_id: &str,
        provider: MockSourceProvider,
    ) -> Arc<SourceQueryFanout> {
        let persistence = Arc::new(InMemoryManifestPersistence::with_manifests(vec![
            queryable_manifest(provider_id),
        ]));
        let store = ManifestStore::new(persistence);
        let cache = ManifestCache::new(ManifestCacheConfig {
            enable_sweep: false,
            ..Default::default()
        });
        let coordinator = Arc::new(
            ManifestCoordinator::new(store, cache, Arc::new(StaticManifestTransport::new()))
                .await
                .unwrap(),
        );

        let mut providers: HashMap<String, Arc<dyn SourceProvider>> = HashMap::new();
        providers.insert(provider_id.to_string(), Arc::new(provider));

        Arc::new(SourceQueryFanout::new(
            coordinator,
            Arc::new(MockProviderFactory { providers }),
            FanoutConfig {
                provider_timeout: Duration::from_millis(100),
                retry_attempts: 1,
                retry_backoff: Duration::from_millis(1),
                max_concurrent_queries: 4,
            },
        ))
    }

    fn ranked_fixtures(provider_id: &str) -> Vec<SourceCandidate> {
        vec![
            p2p_candidate("best", provider_id, Resolution::Uhd4k, 200),
            p2p_candidate("good", provider_id, Resolution::Hd1080p, 80),
            p2p_candidate("poor", provider_id, Resolution::Hd720p, 5),
        ]
    }

    #[tokio::test]
    async fn test_load_ranks_candidates() {
        let fanout = fanout_with(
            "org.one",
            MockSourceProvider::new("org.one", ranked_fixtures("org.one")),
        )
        .await;
        let mut session = SelectionSession::new(
            fanout,
            Arc::new(PreferenceLearner::default()),
            Arc::new(crate::sources::playback::ScriptedPlaybackEngine::new()),
        );

        let count = session.load(ContentRequest::new("movie-1"), false).await;
        assert_eq!(count, 3);
        assert_eq!(session.state(), SelectionState::Ranked);
        assert_eq!(session.visible_candidates()[0].id, "best");
    }

    #[tokio::test]
    async fn test_same_content_load_skips_requery() {
        let provider = MockSourceProvider::new("org.one", ranked_fixtures("org.one"));
        let calls = provider.call_counter();
        let fanout = fanout_with("org.one", provider).await;
        let mut session = SelectionSession::new(
            fanout,
            Arc::new(PreferenceLearner::default()),
            Arc::new(crate::sources::playback::ScriptedPlaybackEngine::new()),
        );

        session.load(ContentRequest::new("movie-1"), false).await;
        session.load(ContentRequest::new("movie-1"), false).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        session.load(ContentRequest::new("movie-1"), true).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_play_best_falls_back_until_success() {
        let fanout = fanout_with(
            "org.one",
            MockSourceProvider::new("org.one", ranked_fixtures("org.one")),
        )
        .await;
        let engine = crate::sources::playback::ScriptedPlaybackEngine::new()
            .failing("best")
            .failing("good");
        let mut session = SelectionSession::new(
            fanout,
            Arc::new(PreferenceLearner::default()),
            Arc::new(engine),
        );

        session.load(ContentRequest::new("movie-1"), false).await;
        let played = session.play_best().await.unwrap();

        assert_eq!(played.id, "poor");
        assert_eq!(
            session.state(),
            SelectionState::PlaybackOk {
                candidate_id: "poor".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_exhaustion_when_every_candidate_fails() {
        let fanout = fanout_with(
            "org.one",
            MockSourceProvider::new("org.one", ranked_fixtures("org.one")),
        )
        .await;
        let engine = crate::sources::playback::ScriptedPlaybackEngine::new()
            .failing("best")
            .failing("good")
            .failing("poor");
        let mut session = SelectionSession::new(
            fanout,
            Arc::new(PreferenceLearner::default()),
            Arc::new(engine),
        );

        session.load(ContentRequest::new("movie-1"), false).await;
        let result = session.play_best().await;

        assert!(matches!(
            result,
            Err(PlaybackError::CandidatesExhausted { attempted: 3 })
        ));
        assert_eq!(session.state(), SelectionState::Exhausted);

        // Nothing left to retry either
        assert!(matches!(
            session.retry_with_fallback().await,
            Err(PlaybackError::CandidatesExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_filter_narrows_view_and_feeds_learner() {
        let fanout = fanout_with(
            "org.one",
            MockSourceProvider::new("org.one", ranked_fixtures("org.one")),
        )
        .await;
        let learner = Arc::new(PreferenceLearner::default());
        let mut session = SelectionSession::new(
            fanout,
            Arc::clone(&learner),
            Arc::new(crate::sources::playback::ScriptedPlaybackEngine::new()),
        );

        session.load(ContentRequest::new("movie-1"), false).await;
        session.apply_filter(SourceFilter {
            min_resolution: Some(Resolution::Uhd4k),
            ..Default::default()
        });

        assert_eq!(session.visible_candidates().len(), 1);
        assert_eq!(learner.snapshot().preferred_resolution, Resolution::Uhd4k);

        session.clear_filter();
        assert_eq!(session.visible_candidates().len(), 3);
    }

    #[tokio::test]
    async fn test_successful_play_widens_preferences() {
        let fanout = fanout_with(
            "org.one",
            MockSourceProvider::new("org.one", ranked_fixtures("org.one")),
        )
        .await;
        let learner = Arc::new(PreferenceLearner::default());
        let mut session = SelectionSession::new(
            fanout,
            Arc::clone(&learner),
            Arc::new(crate::sources::playback::ScriptedPlaybackEngine::new()),
        );

        session.load(ContentRequest::new("movie-1"), false).await;
        session.play_best().await.unwrap();

        let prefs = learner.snapshot();
        assert_eq!(prefs.preferred_resolution, Resolution::Uhd4k);
        assert!(prefs.prefer_p2p);
    }

    #[tokio::test]
    async fn test_select_rejects_hidden_candidate() {
        let fanout = fanout_with(
            "org.one",
            MockSourceProvider::new("org.one", ranked_fixtures("org.one")),
        )
        .await;
        let mut session = SelectionSession::new(
            fanout,
            Arc::new(PreferenceLearner::default()),
            Arc::new(crate::sources::playback::ScriptedPlaybackEngine::new()),
        );

        session.load(ContentRequest::new("movie-1"), false).await;
        session.apply_filter(SourceFilter {
            min_resolution: Some(Resolution::Uhd4k),
            ..Default::default()
        });

        assert!(matches!(
            session.select("poor"),
            Err(PlaybackError::NothingSelected)
        ));
        assert!(session.select("best").is_ok());
    }

    #[tokio::test]
    async fn test_group_expansion_toggles() {
        let fanout = fanout_with(
            "org.one",
            MockSourceProvider::new("org.one", ranked_fixtures("org.one")),
        )
        .await;
        let mut session = SelectionSession::new(
            fanout,
            Arc::new(PreferenceLearner::default()),
            Arc::new(crate::sources::playback::ScriptedPlaybackEngine::new()),
        );

        session.load(ContentRequest::new("movie-1"), false).await;
        let key = session.groups().keys().next().cloned().unwrap();

        assert!(!session.is_group_expanded(&key));
        assert!(session.toggle_group(&key));
        assert_eq!(session.state(), SelectionState::Grouping);
        assert!(session.is_group_expanded(&key));
        assert!(!session.toggle_group(&key));
    }

    #[tokio::test]
    async fn test_state_transitions_are_observable() {
        let fanout = fanout_with(
            "org.one",
            MockSourceProvider::new("org.one", ranked_fixtures("org.one")),
        )
        .await;
        let mut session = SelectionSession::new(
            fanout,
            Arc::new(PreferenceLearner::default()),
            Arc::new(crate::sources::playback::ScriptedPlaybackEngine::new()),
        );
        let mut states = session.subscribe_state();
        assert_eq!(*states.borrow_and_update(), SelectionState::Idle);

        session.load(ContentRequest::new("movie-1"), false).await;
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SelectionState::Ranked);
    }
}
