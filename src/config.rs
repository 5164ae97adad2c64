use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // OAuth client registration
    #[serde(default)]
    pub client_id: String,
    /// Empty for a public client (PKCE only).
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    // Remote endpoints
    #[serde(default = "default_auth_base")]
    pub auth_base: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,

    // Request and session timing
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_refresh_skew")]
    pub refresh_skew_secs: i64,

    // Paginated fetches
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Pause between pages of one run; 0 only yields to the scheduler.
    #[serde(default)]
    pub page_delay_ms: u64,

    // Playlist writes
    #[serde(default = "default_max_batch_spotify")]
    pub max_batch_size_spotify: usize,
    #[serde(default = "default_playlist_description")]
    pub playlist_description: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_redirect_uri() -> String { "http://127.0.0.1:8888/callback".into() }
fn default_scopes() -> Vec<String> {
    crate::api::spotify_auth::DEFAULT_SCOPES
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_auth_base() -> String { "https://accounts.spotify.com".into() }
fn default_api_base() -> String { "https://api.spotify.com/v1".into() }
fn default_request_timeout() -> u64 { crate::api::http::DEFAULT_TIMEOUT_SECS }
fn default_refresh_skew() -> i64 { crate::token::DEFAULT_REFRESH_SKEW_SECS }
fn default_page_size() -> u32 { crate::fetch::DEFAULT_PAGE_SIZE }
fn default_max_batch_spotify() -> usize { crate::pipeline::MAX_TRACKS_PER_REQUEST }
fn default_playlist_description() -> String { crate::pipeline::DEFAULT_DESCRIPTION.into() }
fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("music-dashboard").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            auth_base: default_auth_base(),
            api_base: default_api_base(),
            request_timeout_secs: default_request_timeout(),
            refresh_skew_secs: default_refresh_skew(),
            page_size: default_page_size(),
            page_delay_ms: 0,
            max_batch_size_spotify: default_max_batch_spotify(),
            playlist_description: default_playlist_description(),
            log_dir: default_log_dir(),
        }
    }
}

impl Config {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// `~/.config/music-dashboard/config.toml` (platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("music-dashboard").join("config.toml"))
    }

    /// Apply `SPOTIFY_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|k| std::env::var(k).ok())
    }

    /// Apply overrides from an arbitrary lookup; empty values are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("SPOTIFY_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = get("SPOTIFY_CLIENT_SECRET") {
            self.client_secret = v;
        }
        if let Some(v) = get("SPOTIFY_REDIRECT_URI") {
            self.redirect_uri = v;
        }
        if let Some(v) = get("SPOTIFY_AUTH_BASE") {
            self.auth_base = v;
        }
        if let Some(v) = get("SPOTIFY_API_BASE") {
            self.api_base = v;
        }
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(anyhow!("client_id is required"));
        }
        url::Url::parse(&self.redirect_uri)
            .with_context(|| format!("invalid redirect_uri {:?}", self.redirect_uri))?;
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be positive"));
        }
        if self.refresh_skew_secs < 0 {
            return Err(anyhow!("refresh_skew_secs must not be negative"));
        }
        if self.page_size == 0 || self.page_size > 50 {
            return Err(anyhow!("page_size must be between 1 and 50"));
        }
        if self.max_batch_size_spotify == 0 || self.max_batch_size_spotify > 100 {
            return Err(anyhow!("max_batch_size_spotify must be between 1 and 100"));
        }
        Ok(())
    }
}
