use crate::api::Provider;
use crate::error::ApiError;
use crate::models::{FailureReason, PlaylistCreationResult, PlaylistDraft, PlaylistSource, TrackSelection};
use crate::token::TokenLifecycleManager;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, warn};

/// Attribution written into every generated playlist's description.
pub const DEFAULT_DESCRIPTION: &str = "Generated by music-dashboard";
/// Spotify accepts at most 100 URIs per add-tracks request.
pub const MAX_TRACKS_PER_REQUEST: usize = 100;

/// Display name for a generated playlist: the user's name when non-blank,
/// else the source label, followed by the date as `(YYYY-MM-DD)`.
pub fn playlist_display_name(user_name: Option<&str>, source: &PlaylistSource, date: NaiveDate) -> String {
    let base = match user_name.map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => source.default_label(),
    };
    format!("{} ({})", base, date.format("%Y-%m-%d"))
}

/// Input of one playlist creation.
#[derive(Debug, Clone)]
pub struct PlaylistRequest<'a> {
    pub user_id: &'a str,
    pub selection: &'a TrackSelection,
    pub name: Option<&'a str>,
    pub source: PlaylistSource,
    pub date: NaiveDate,
}

/// Create-then-populate write. The remote has no atomic "create with tracks"
/// call, so the outcome distinguishes a playlist that was never created from
/// one that exists but did not receive its tracks.
pub struct PlaylistCreationPipeline {
    provider: Arc<dyn Provider>,
    tokens: Arc<TokenLifecycleManager>,
    description: String,
    batch_size: usize,
}

impl PlaylistCreationPipeline {
    pub fn new(provider: Arc<dyn Provider>, tokens: Arc<TokenLifecycleManager>) -> Self {
        Self {
            provider,
            tokens,
            description: DEFAULT_DESCRIPTION.to_string(),
            batch_size: MAX_TRACKS_PER_REQUEST,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// URIs per add-tracks request; clamped to 1..=100.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_TRACKS_PER_REQUEST);
        self
    }

    pub async fn run(&self, req: PlaylistRequest<'_>) -> PlaylistCreationResult {
        let token = match self.tokens.get_token().await {
            Ok(t) => t,
            Err(_) => return failed(FailureReason::NotAuthenticated),
        };
        if req.selection.is_empty() {
            return failed(FailureReason::NoTracks);
        }
        if req.user_id.trim().is_empty() {
            return failed(FailureReason::MissingUserId);
        }

        let draft = PlaylistDraft {
            name: playlist_display_name(req.name, &req.source, req.date),
            description: self.description.clone(),
            public: true,
        };

        let created = match self.provider.create_playlist(&token, req.user_id, &draft).await {
            Ok(c) => c,
            Err(ApiError::Unauthorized(_)) => {
                self.tokens.invalidate().await;
                return failed(FailureReason::NotAuthenticated);
            }
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "create playlist failed");
                return failed(FailureReason::Rejected(e.to_string()));
            }
        };
        info!(playlist_id = %created.id, name = %draft.name, "playlist created");

        let uris = req.selection.uris();
        for (i, chunk) in uris.chunks(self.batch_size).enumerate() {
            if let Err(e) = self.provider.add_tracks(&token, &created.id, chunk).await {
                warn!(
                    playlist_id = %created.id,
                    batch = i,
                    error = %e,
                    "adding tracks failed after playlist was created"
                );
                if matches!(e, ApiError::Unauthorized(_)) {
                    self.tokens.invalidate().await;
                }
                return PlaylistCreationResult::CreatedTracksFailed {
                    playlist_id: created.id,
                    url: created.url,
                    reason: e.to_string(),
                };
            }
        }
        info!(playlist_id = %created.id, tracks = uris.len(), "playlist populated");

        PlaylistCreationResult::Created {
            playlist_id: created.id,
            url: created.url,
        }
    }
}

fn failed(reason: FailureReason) -> PlaylistCreationResult {
    PlaylistCreationResult::Failed { reason }
}
