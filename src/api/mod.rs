pub mod http;
pub mod mock;
pub mod pkce;
pub mod spotify;
pub mod spotify_auth;

use crate::error::{ApiError, AuthError};
use crate::models::{CreatedPlaylist, Page, PlaylistDraft, PlaylistSummary, TimeRange, TrackSummary};
use crate::token::{AccessToken, TokenResponse};

/// Data endpoints of the remote music service.
/// Implementations: spotify::SpotifyProvider and mock::MockProvider.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Return the provider's name (for logging)
    fn name(&self) -> &str;

    /// Id of the user the token belongs to.
    async fn current_user_id(&self, token: &AccessToken) -> Result<String, ApiError>;

    /// One page of the current user's playlists, in server order.
    async fn list_playlists_page(
        &self,
        token: &AccessToken,
        offset: u32,
        limit: u32,
    ) -> Result<Page<PlaylistSummary>, ApiError>;

    /// One page of the current user's top tracks for a time window.
    async fn top_tracks_page(
        &self,
        token: &AccessToken,
        range: TimeRange,
        offset: u32,
        limit: u32,
    ) -> Result<Page<TrackSummary>, ApiError>;

    /// Create an empty playlist owned by `user_id`.
    async fn create_playlist(
        &self,
        token: &AccessToken,
        user_id: &str,
        draft: &PlaylistDraft,
    ) -> Result<CreatedPlaylist, ApiError>;

    /// Append tracks (URIs) to a playlist (batching done by caller)
    async fn add_tracks(
        &self,
        token: &AccessToken,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<(), ApiError>;
}

/// OAuth token endpoint: authorization-code and refresh-token grants.
#[async_trait::async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError>;
}
