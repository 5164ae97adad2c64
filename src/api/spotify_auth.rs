use super::http::{retry_after, transport_error};
use super::pkce::PkceChallenge;
use super::TokenEndpoint;
use crate::error::{ApiError, AuthError};
use crate::token::TokenResponse;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

pub const DEFAULT_SCOPES: &[&str] = &[
    "playlist-read-private",
    "playlist-read-collaborative",
    "playlist-modify-public",
    "user-top-read",
    "user-read-private",
];

/// Build the user-facing authorization URL for the code flow with PKCE.
pub fn authorize_url(
    auth_base: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
    pkce: &PkceChallenge,
) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!("{}/authorize", auth_base.trim_end_matches('/')))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("scope", &scopes.join(" "))
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", state)
        .append_pair("code_challenge_method", "S256")
        .append_pair("code_challenge", &pkce.challenge);
    Ok(url)
}

/// Token endpoint of the Spotify accounts service (`/api/token`).
///
/// With a client secret the token requests use HTTP Basic client auth; without
/// one the client is treated as public and sends `client_id` in the form body,
/// relying on PKCE.
pub struct SpotifyAuth {
    client: Client,
    auth_base: String,
    client_id: String,
    client_secret: String,
}

enum Grant {
    Code,
    Refresh,
}

impl SpotifyAuth {
    pub fn new(
        client: Client,
        auth_base: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            auth_base: auth_base.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    async fn token_request(
        &self,
        grant: Grant,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, AuthError> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        let url = format!("{}/api/token", self.auth_base);
        let mut req = self.client.post(&url);
        if self.client_secret.is_empty() {
            form.push(("client_id", &self.client_id));
        } else {
            let auth_header = format!(
                "Basic {}",
                general_purpose::STANDARD
                    .encode(format!("{}:{}", self.client_id, self.client_secret))
            );
            req = req.header(AUTHORIZATION, auth_header);
        }
        let resp = req.form(&form).send().await.map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(ApiError::RateLimited {
                    retry_after: retry_after(&resp),
                }
                .into());
            }
            let body = resp.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(ApiError::Rejected {
                    status: status.as_u16(),
                    body,
                }
                .into());
            }
            // 400/401: invalid_grant, invalid_client, redirect mismatch
            let msg = format!("{} => {}", status, body);
            return Err(match grant {
                Grant::Code => AuthError::CodeRejected(msg),
                Grant::Refresh => AuthError::RefreshRejected(msg),
            });
        }
        let tr: TokenResponse = resp.json().await.map_err(transport_error)?;
        debug!(expires_in = tr.expires_in, "token endpoint answered");
        Ok(tr)
    }
}

#[async_trait]
impl TokenEndpoint for SpotifyAuth {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, AuthError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(v) = code_verifier {
            params.push(("code_verifier", v));
        }
        self.token_request(Grant::Code, &params).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.token_request(Grant::Refresh, &params).await
    }
}
