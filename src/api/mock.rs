use super::{Provider, TokenEndpoint};
use crate::error::{ApiError, AuthError};
use crate::models::{CreatedPlaylist, Page, PlaylistDraft, PlaylistSummary, TimeRange, TrackSummary};
use crate::token::{AccessToken, TokenResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// In-memory provider used in tests and by the CLI demo mode.
/// It logs operations, serves deterministic fake collections and records writes.
#[derive(Default)]
pub struct MockProvider {
    user_id: String,
    playlists: Vec<PlaylistSummary>,
    top_tracks: Vec<TrackSummary>,
    latency: Option<Duration>,
    fail_list_at: Option<(u32, ApiError)>,
    fail_create: Option<ApiError>,
    fail_add: Option<ApiError>,
    page_requests: Mutex<Vec<u32>>,
    created: Mutex<Vec<PlaylistDraft>>,
    added: Mutex<HashMap<String, Vec<String>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            user_id: "mock_user".into(),
            ..Default::default()
        }
    }

    /// `n` playlists named "Playlist 0".."Playlist n-1".
    pub fn with_playlists(mut self, n: usize) -> Self {
        self.playlists = (0..n)
            .map(|i| PlaylistSummary {
                id: format!("pl{}", i),
                name: format!("Playlist {}", i),
                owner_id: self.user_id.clone(),
                track_count: (i % 40) as u32,
                url: format!("https://open.spotify.com/playlist/pl{}", i),
            })
            .collect();
        self
    }

    pub fn with_top_tracks(mut self, n: usize) -> Self {
        self.top_tracks = (0..n)
            .map(|i| TrackSummary {
                id: format!("t{}", i),
                uri: format!("spotify:track:t{}", i),
                name: format!("Track {}", i),
                artists: vec![format!("Artist {}", i % 7)],
                album: format!("Album {}", i % 11),
            })
            .collect();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn failing_list_at(mut self, offset: u32, err: ApiError) -> Self {
        self.fail_list_at = Some((offset, err));
        self
    }

    pub fn failing_create(mut self, err: ApiError) -> Self {
        self.fail_create = Some(err);
        self
    }

    pub fn failing_add(mut self, err: ApiError) -> Self {
        self.fail_add = Some(err);
        self
    }

    /// Offsets of every page request, in order.
    pub fn page_requests(&self) -> Vec<u32> {
        lock(&self.page_requests).clone()
    }

    pub fn created(&self) -> Vec<PlaylistDraft> {
        lock(&self.created).clone()
    }

    pub fn tracks_of(&self, playlist_id: &str) -> Vec<String> {
        lock(&self.added).get(playlist_id).cloned().unwrap_or_default()
    }

    async fn simulate_latency(&self) {
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
    }

    fn page_of<T: Clone>(&self, all: &[T], offset: u32, limit: u32) -> Result<Page<T>, ApiError> {
        lock(&self.page_requests).push(offset);
        if let Some((at, err)) = &self.fail_list_at {
            if *at == offset {
                return Err(err.clone());
            }
        }
        let start = (offset as usize).min(all.len());
        let end = (start + limit as usize).min(all.len());
        Ok(Page::new(all[start..end].to_vec()))
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn current_user_id(&self, _token: &AccessToken) -> Result<String, ApiError> {
        self.simulate_latency().await;
        Ok(self.user_id.clone())
    }

    async fn list_playlists_page(
        &self,
        _token: &AccessToken,
        offset: u32,
        limit: u32,
    ) -> Result<Page<PlaylistSummary>, ApiError> {
        self.simulate_latency().await;
        info!("MockProvider: list playlists offset={} limit={}", offset, limit);
        self.page_of(&self.playlists, offset, limit)
    }

    async fn top_tracks_page(
        &self,
        _token: &AccessToken,
        range: TimeRange,
        offset: u32,
        limit: u32,
    ) -> Result<Page<TrackSummary>, ApiError> {
        self.simulate_latency().await;
        info!("MockProvider: top tracks {} offset={}", range.as_str(), offset);
        self.page_of(&self.top_tracks, offset, limit)
    }

    async fn create_playlist(
        &self,
        _token: &AccessToken,
        user_id: &str,
        draft: &PlaylistDraft,
    ) -> Result<CreatedPlaylist, ApiError> {
        self.simulate_latency().await;
        info!("MockProvider: create_playlist {} for {}", draft.name, user_id);
        if let Some(err) = &self.fail_create {
            return Err(err.clone());
        }
        let mut created = lock(&self.created);
        created.push(draft.clone());
        let id = format!("mock-playlist-{}", created.len());
        Ok(CreatedPlaylist {
            url: format!("https://open.spotify.com/playlist/{}", id),
            id,
        })
    }

    async fn add_tracks(
        &self,
        _token: &AccessToken,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<(), ApiError> {
        self.simulate_latency().await;
        info!("MockProvider: add_tracks {} -> {} tracks", playlist_id, uris.len());
        if let Some(err) = &self.fail_add {
            return Err(err.clone());
        }
        lock(&self.added)
            .entry(playlist_id.to_string())
            .or_default()
            .extend_from_slice(uris);
        Ok(())
    }
}

/// In-memory token endpoint. Counts grants so tests can assert single-flight
/// refresh behaviour.
pub struct MockTokenEndpoint {
    expires_in: i64,
    refresh_expires_in: i64,
    latency: Option<Duration>,
    reject_refresh: bool,
    rotate_refresh_token: bool,
    exchanges: AtomicUsize,
    refreshes: AtomicUsize,
}

impl Default for MockTokenEndpoint {
    fn default() -> Self {
        Self {
            expires_in: 3600,
            refresh_expires_in: 3600,
            latency: None,
            reject_refresh: false,
            rotate_refresh_token: false,
            exchanges: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        }
    }
}

impl MockTokenEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifetime of tokens issued by the code exchange.
    pub fn with_expires_in(mut self, secs: i64) -> Self {
        self.expires_in = secs;
        self
    }

    /// Lifetime of tokens issued by refreshes.
    pub fn with_refresh_expires_in(mut self, secs: i64) -> Self {
        self.refresh_expires_in = secs;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn rejecting_refresh(mut self) -> Self {
        self.reject_refresh = true;
        self
    }

    /// Issue a new refresh token on every refresh instead of omitting it.
    pub fn rotating_refresh_token(mut self) -> Self {
        self.rotate_refresh_token = true;
        self
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenEndpoint for MockTokenEndpoint {
    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> Result<TokenResponse, AuthError> {
        let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
        if code.is_empty() {
            return Err(AuthError::CodeRejected("invalid_grant".into()));
        }
        Ok(TokenResponse {
            access_token: format!("mock-access-{}", n),
            token_type: "Bearer".into(),
            expires_in: self.expires_in,
            refresh_token: Some("mock-refresh-0".into()),
            scope: Some("playlist-read-private user-top-read".into()),
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
        if self.reject_refresh {
            return Err(AuthError::RefreshRejected("invalid_grant".into()));
        }
        Ok(TokenResponse {
            access_token: format!("mock-refreshed-{}", n),
            token_type: "Bearer".into(),
            expires_in: self.refresh_expires_in,
            refresh_token: self
                .rotate_refresh_token
                .then(|| format!("mock-refresh-{}", n)),
            scope: None,
        })
    }
}
