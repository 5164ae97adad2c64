//! Per-user session context.
//!
//! A [`Session`] owns everything that carries state for one user: the token
//! lifecycle, the pending OAuth authorization, the cached user id and the
//! fetch engines. Nothing here is global; two sessions share no state.

use crate::api::mock::{MockProvider, MockTokenEndpoint};
use crate::api::pkce::PkceChallenge;
use crate::api::spotify::SpotifyProvider;
use crate::api::spotify_auth::{self, SpotifyAuth};
use crate::api::{http, Provider, TokenEndpoint};
use crate::config::Config;
use crate::error::{ApiError, AuthError, FetchError, NotAuthenticated};
use crate::fetch::{PageSource, PaginatedFetchEngine};
use crate::models::{
    FailureReason, Page, PlaylistCreationResult, PlaylistSource, PlaylistSummary, TimeRange,
    TrackSelection, TrackSummary,
};
use crate::pipeline::{PlaylistCreationPipeline, PlaylistRequest};
use crate::token::{AccessToken, AuthState, TokenLifecycleManager};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

/// Authorization started by [`Session::begin_authorization`] and not yet
/// completed.
struct PendingAuthorization {
    state: String,
    pkce: PkceChallenge,
}

pub struct Session {
    id: Uuid,
    client_id: String,
    auth_base: String,
    redirect_uri: String,
    scopes: Vec<String>,
    page_size: u32,
    provider: Arc<dyn Provider>,
    tokens: Arc<TokenLifecycleManager>,
    pipeline: PlaylistCreationPipeline,
    pending: Mutex<Option<PendingAuthorization>>,
    user_id: tokio::sync::Mutex<Option<String>>,
    playlists: PaginatedFetchEngine<PlaylistSummary>,
    top_tracks: PaginatedFetchEngine<TrackSummary>,
}

impl Session {
    pub fn new(cfg: &Config, provider: Arc<dyn Provider>, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        let tokens = Arc::new(TokenLifecycleManager::new(
            endpoint,
            chrono::Duration::seconds(cfg.refresh_skew_secs),
        ));
        let pipeline = PlaylistCreationPipeline::new(provider.clone(), tokens.clone())
            .with_description(cfg.playlist_description.clone())
            .with_batch_size(cfg.max_batch_size_spotify);
        let page_delay = Duration::from_millis(cfg.page_delay_ms);
        let id = Uuid::new_v4();
        info!(session = %id, provider = provider.name(), "session created");
        Self {
            id,
            client_id: cfg.client_id.clone(),
            auth_base: cfg.auth_base.clone(),
            redirect_uri: cfg.redirect_uri.clone(),
            scopes: cfg.scopes.clone(),
            page_size: cfg.page_size,
            provider,
            tokens,
            pipeline,
            pending: Mutex::new(None),
            user_id: tokio::sync::Mutex::new(None),
            playlists: PaginatedFetchEngine::with_page_delay(page_delay),
            top_tracks: PaginatedFetchEngine::with_page_delay(page_delay),
        }
    }

    /// Session backed by the Spotify Web API.
    pub fn spotify(cfg: &Config) -> Result<Self, ApiError> {
        let client = http::build_client(Duration::from_secs(cfg.request_timeout_secs))?;
        let provider = Arc::new(SpotifyProvider::new(client.clone(), cfg.api_base.clone()));
        let endpoint = Arc::new(SpotifyAuth::new(
            client,
            cfg.auth_base.clone(),
            cfg.client_id.clone(),
            cfg.client_secret.clone(),
        ));
        Ok(Self::new(cfg, provider, endpoint))
    }

    /// Session backed by in-memory fakes; no network access.
    pub fn demo(cfg: &Config) -> Self {
        let provider = Arc::new(
            MockProvider::new()
                .with_playlists(127)
                .with_top_tracks(60)
                .with_latency(Duration::from_millis(50)),
        );
        Self::new(cfg, provider, Arc::new(MockTokenEndpoint::new()))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tokens(&self) -> &Arc<TokenLifecycleManager> {
        &self.tokens
    }

    /// Start an authorization: returns the URL the user must open. A new call
    /// replaces any authorization still pending.
    pub fn begin_authorization(&self) -> Result<Url, url::ParseError> {
        let pending = PendingAuthorization {
            state: Uuid::new_v4().simple().to_string(),
            pkce: PkceChallenge::generate(),
        };
        let url = spotify_auth::authorize_url(
            &self.auth_base,
            &self.client_id,
            &self.redirect_uri,
            &self.scopes,
            &pending.state,
            &pending.pkce,
        )?;
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(pending);
        info!(session = %self.id, "authorization started");
        Ok(url)
    }

    /// Finish an authorization from the fields of the OAuth redirect query
    /// (`code` and `state`, or `error`). The pending authorization is consumed
    /// whatever the outcome.
    pub async fn complete_authorization(
        &self,
        fields: &HashMap<String, String>,
    ) -> Result<AuthState, AuthError> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(err) = fields.get("error") {
            warn!(session = %self.id, error = %err, "authorization denied by user or remote");
            return Err(AuthError::Denied(err.clone()));
        }
        let code = fields
            .get("code")
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingField("code"))?;
        let state = fields.get("state").ok_or(AuthError::StateMismatch)?;
        let pending = pending.ok_or(AuthError::StateMismatch)?;
        if pending.state != *state {
            warn!(session = %self.id, "redirect state does not match pending authorization");
            return Err(AuthError::StateMismatch);
        }
        self.tokens
            .exchange_code(code, &self.redirect_uri, Some(&pending.pkce.verifier))
            .await?;
        // the new grant may belong to another account
        *self.user_id.lock().await = None;
        info!(session = %self.id, "authorization completed");
        Ok(self.tokens.state())
    }

    pub async fn access_token(&self) -> Result<AccessToken, NotAuthenticated> {
        self.tokens.get_token().await
    }

    pub fn auth_state(&self) -> AuthState {
        self.tokens.state()
    }

    pub fn subscribe_auth(&self) -> watch::Receiver<AuthState> {
        self.tokens.subscribe()
    }

    pub async fn logout(&self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        *self.user_id.lock().await = None;
        self.tokens.logout().await;
    }

    /// Remote id of the logged-in user, fetched once per login.
    pub async fn user_id(&self) -> Result<String, FetchError> {
        let mut cached = self.user_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }
        let provider = self.provider.clone();
        let id = authorized(&self.tokens, |token| async move {
            provider.current_user_id(&token).await
        })
        .await?;
        *cached = Some(id.clone());
        Ok(id)
    }

    /// Restart the playlists listing; returns the run generation.
    pub fn refresh_playlists(&self) -> u64 {
        let source = Arc::new(PlaylistPages {
            provider: self.provider.clone(),
            tokens: self.tokens.clone(),
        });
        self.playlists.start_run(source, self.page_size)
    }

    pub fn playlists(&self) -> &PaginatedFetchEngine<PlaylistSummary> {
        &self.playlists
    }

    /// Restart the top-tracks listing for `range`; returns the run generation.
    pub fn load_top_tracks(&self, range: TimeRange) -> u64 {
        let source = Arc::new(TopTrackPages {
            provider: self.provider.clone(),
            tokens: self.tokens.clone(),
            range,
        });
        self.top_tracks.start_run(source, self.page_size)
    }

    pub fn top_tracks(&self) -> &PaginatedFetchEngine<TrackSummary> {
        &self.top_tracks
    }

    /// Create a playlist from `selection` named after `name` or the source's
    /// default label, stamped with `date`.
    pub async fn create_playlist(
        &self,
        selection: &TrackSelection,
        name: Option<&str>,
        source: PlaylistSource,
        date: NaiveDate,
    ) -> PlaylistCreationResult {
        // the user id lookup is a network call; skip it when the pipeline is
        // going to reject the selection anyway
        let user_id = if selection.is_empty() {
            String::new()
        } else {
            match self.user_id().await {
                Ok(id) => id,
                Err(FetchError::NotAuthenticated(_)) => {
                    return PlaylistCreationResult::Failed {
                        reason: FailureReason::NotAuthenticated,
                    }
                }
                Err(e) => {
                    warn!(session = %self.id, error = %e, "could not resolve user id");
                    return PlaylistCreationResult::Failed {
                        reason: FailureReason::Rejected(e.to_string()),
                    };
                }
            }
        };
        let result = self
            .pipeline
            .run(PlaylistRequest {
                user_id: &user_id,
                selection,
                name,
                source,
                date,
            })
            .await;
        info!(session = %self.id, ?result, "playlist creation finished");
        result
    }

    /// [`Session::create_playlist`] stamped with today's local date.
    pub async fn create_playlist_today(
        &self,
        selection: &TrackSelection,
        name: Option<&str>,
        source: PlaylistSource,
    ) -> PlaylistCreationResult {
        let today = chrono::Local::now().date_naive();
        self.create_playlist(selection, name, source, today).await
    }
}

/// Run a data call with a fresh token; a 401 ends the session's login.
async fn authorized<T, F, Fut>(tokens: &TokenLifecycleManager, call: F) -> Result<T, FetchError>
where
    F: FnOnce(AccessToken) -> Fut,
    Fut: std::future::Future<Output = Result<T, ApiError>>,
{
    let token = tokens.get_token().await?;
    match call(token).await {
        Ok(v) => Ok(v),
        Err(e @ ApiError::Unauthorized(_)) => {
            tokens.invalidate().await;
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

struct PlaylistPages {
    provider: Arc<dyn Provider>,
    tokens: Arc<TokenLifecycleManager>,
}

#[async_trait]
impl PageSource for PlaylistPages {
    type Item = PlaylistSummary;

    fn label(&self) -> &str {
        "playlists"
    }

    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Page<PlaylistSummary>, FetchError> {
        authorized(&self.tokens, |token| async move {
            self.provider.list_playlists_page(&token, offset, limit).await
        })
        .await
    }
}

struct TopTrackPages {
    provider: Arc<dyn Provider>,
    tokens: Arc<TokenLifecycleManager>,
    range: TimeRange,
}

#[async_trait]
impl PageSource for TopTrackPages {
    type Item = TrackSummary;

    fn label(&self) -> &str {
        "top_tracks"
    }

    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Page<TrackSummary>, FetchError> {
        authorized(&self.tokens, |token| async move {
            self.provider
                .top_tracks_page(&token, self.range, offset, limit)
                .await
        })
        .await
    }
}
