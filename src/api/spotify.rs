use super::http::{check_status, json_body, transport_error};
use super::Provider;
use crate::error::ApiError;
use crate::models::{CreatedPlaylist, Page, PlaylistDraft, PlaylistSummary, TimeRange, TrackSummary};
use crate::token::AccessToken;
use async_trait::async_trait;
use log::debug;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::json;

/// Spotify Web API data endpoints. The base URL (including `/v1`) comes from
/// configuration so tests can point it at a mock server.
pub struct SpotifyProvider {
    client: Client,
    api_base: String,
}

impl SpotifyProvider {
    pub fn new(client: Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn get_json(&self, token: &AccessToken, url: &str) -> Result<serde_json::Value, ApiError> {
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, token.bearer())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;
        json_body(check_status(resp).await?).await
    }
}

fn playlist_url(id: &str) -> String {
    format!("https://open.spotify.com/playlist/{}", id)
}

fn parse_playlist(pl: &serde_json::Value) -> Option<PlaylistSummary> {
    let id = pl["id"].as_str()?.to_string();
    Some(PlaylistSummary {
        name: pl["name"].as_str().unwrap_or("").to_string(),
        owner_id: pl["owner"]["id"].as_str().unwrap_or("").to_string(),
        track_count: pl["tracks"]["total"].as_u64().unwrap_or(0) as u32,
        url: pl["external_urls"]["spotify"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| playlist_url(&id)),
        id,
    })
}

fn parse_track(t: &serde_json::Value) -> Option<TrackSummary> {
    let id = t["id"].as_str()?.to_string();
    let artists = t["artists"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|x| x["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    Some(TrackSummary {
        uri: t["uri"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("spotify:track:{}", id)),
        name: t["name"].as_str().unwrap_or("").to_string(),
        album: t["album"]["name"].as_str().unwrap_or("").to_string(),
        artists,
        id,
    })
}

#[async_trait]
impl Provider for SpotifyProvider {
    fn name(&self) -> &str {
        "spotify"
    }

    async fn current_user_id(&self, token: &AccessToken) -> Result<String, ApiError> {
        let j = self.get_json(token, &self.url("/me")).await?;
        j["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Decode("no id in /me response".into()))
    }

    async fn list_playlists_page(
        &self,
        token: &AccessToken,
        offset: u32,
        limit: u32,
    ) -> Result<Page<PlaylistSummary>, ApiError> {
        let url = self.url(&format!("/me/playlists?limit={}&offset={}", limit, offset));
        let j = self.get_json(token, &url).await?;
        let items = j["items"]
            .as_array()
            .ok_or_else(|| ApiError::Decode("no items in playlists page".into()))?;
        // null entries show up for playlists the user can no longer see
        let records: Vec<PlaylistSummary> = items.iter().filter_map(parse_playlist).collect();
        debug!("playlists page offset={} kept {} of {} items", offset, records.len(), items.len());
        Ok(Page {
            records,
            returned: items.len(),
        })
    }

    async fn top_tracks_page(
        &self,
        token: &AccessToken,
        range: TimeRange,
        offset: u32,
        limit: u32,
    ) -> Result<Page<TrackSummary>, ApiError> {
        let url = self.url(&format!(
            "/me/top/tracks?time_range={}&limit={}&offset={}",
            range.as_str(),
            limit,
            offset
        ));
        let j = self.get_json(token, &url).await?;
        let items = j["items"]
            .as_array()
            .ok_or_else(|| ApiError::Decode("no items in top tracks page".into()))?;
        Ok(Page {
            records: items.iter().filter_map(parse_track).collect(),
            returned: items.len(),
        })
    }

    async fn create_playlist(
        &self,
        token: &AccessToken,
        user_id: &str,
        draft: &PlaylistDraft,
    ) -> Result<CreatedPlaylist, ApiError> {
        let url = self.url(&format!("/users/{}/playlists", urlencoding::encode(user_id)));
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, token.bearer())
            .header(CONTENT_TYPE, "application/json")
            .json(draft)
            .send()
            .await
            .map_err(transport_error)?;
        let j = json_body(check_status(resp).await?).await?;
        let id = j["id"]
            .as_str()
            .ok_or_else(|| ApiError::Decode("no id in create playlist response".into()))?
            .to_string();
        let url = j["external_urls"]["spotify"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| playlist_url(&id));
        debug!("created spotify playlist {}", id);
        Ok(CreatedPlaylist { id, url })
    }

    async fn add_tracks(
        &self,
        token: &AccessToken,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("/playlists/{}/tracks", urlencoding::encode(playlist_id)));
        let body = json!({ "uris": uris });
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, token.bearer())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(resp).await?;
        Ok(())
    }
}
