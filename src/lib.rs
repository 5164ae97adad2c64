//! Session core for a listening-data dashboard: OAuth token lifecycle,
//! paginated fetches and playlist writes against the Spotify Web API.
pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod session;
pub mod token;
