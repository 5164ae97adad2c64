use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub track_count: u32,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: String,
    pub uri: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album: String,
}

/// One page of a remote collection. `returned` is the number of entries the
/// server sent, which can exceed `records.len()` when unusable entries (such
/// as `null` placeholders) were skipped; pagination decisions use `returned`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub returned: usize,
}

impl<T> Page<T> {
    pub fn new(records: Vec<T>) -> Self {
        let returned = records.len();
        Self { records, returned }
    }
}

/// Window used by the top-tracks endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    ShortTerm,
    #[default]
    MediumTerm,
    LongTerm,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::ShortTerm => "short_term",
            TimeRange::MediumTerm => "medium_term",
            TimeRange::LongTerm => "long_term",
        }
    }
}

impl std::str::FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short_term" | "short" => Ok(TimeRange::ShortTerm),
            "medium_term" | "medium" => Ok(TimeRange::MediumTerm),
            "long_term" | "long" => Ok(TimeRange::LongTerm),
            other => Err(format!("unknown time range: {}", other)),
        }
    }
}

/// Ordered track identifiers chosen for a new playlist. Entries may be bare
/// ids or full `spotify:track:` URIs. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackSelection {
    ids: Vec<String>,
}

impl TrackSelection {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }

    /// Drop repeated ids, keeping the first occurrence of each.
    pub fn deduplicated<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let ids = ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &String| seen.insert(id.clone()))
            .collect();
        Self { ids }
    }

    pub fn from_tracks(tracks: &[TrackSummary]) -> Self {
        Self::deduplicated(tracks.iter().map(|t| t.id.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Track URIs in selection order.
    pub fn uris(&self) -> Vec<String> {
        self.ids
            .iter()
            .map(|id| {
                if id.starts_with("spotify:") {
                    id.clone()
                } else {
                    format!("spotify:track:{}", id)
                }
            })
            .collect()
    }
}

/// Where a selection came from; supplies the fallback playlist name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistSource {
    TopTracks,
    Custom(String),
}

impl PlaylistSource {
    pub fn default_label(&self) -> &str {
        match self {
            PlaylistSource::TopTracks => "My Top Tracks",
            PlaylistSource::Custom(label) => label,
        }
    }
}

/// Body of the "create playlist" write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistDraft {
    pub name: String,
    pub description: String,
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPlaylist {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    NotAuthenticated,
    NoTracks,
    MissingUserId,
    Rejected(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotAuthenticated => f.write_str("not authenticated"),
            FailureReason::NoTracks => f.write_str("no tracks"),
            FailureReason::MissingUserId => f.write_str("missing user id"),
            FailureReason::Rejected(msg) => write!(f, "{}", msg),
        }
    }
}

/// Outcome of the two-phase playlist write. `CreatedTracksFailed` means the
/// playlist exists remotely (possibly empty) and must be shown with its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistCreationResult {
    Created {
        playlist_id: String,
        url: String,
    },
    CreatedTracksFailed {
        playlist_id: String,
        url: String,
        reason: String,
    },
    Failed {
        reason: FailureReason,
    },
}

impl PlaylistCreationResult {
    /// Id of the remote playlist, if one was created.
    pub fn playlist_id(&self) -> Option<&str> {
        match self {
            PlaylistCreationResult::Created { playlist_id, .. }
            | PlaylistCreationResult::CreatedTracksFailed { playlist_id, .. } => Some(playlist_id),
            PlaylistCreationResult::Failed { .. } => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, PlaylistCreationResult::Created { .. })
    }
}
