//! OAuth token lifecycle for one user session.
//!
//! [`TokenLifecycleManager`] is the only way callers obtain a bearer token.
//! It refreshes lazily when the held token enters the skew window, coalesces
//! concurrent refreshes into one request, and drops the bundle for good when a
//! refresh fails.

use crate::api::TokenEndpoint;
use crate::error::{AuthError, NotAuthenticated};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

pub const DEFAULT_REFRESH_SKEW_SECS: i64 = 300;

/// Token endpoint payload, shared by the code and refresh grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub scope: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
}

impl TokenBundle {
    /// Build a bundle from a token response received at `issued_at`.
    /// `previous` supplies the refresh token and scope when the remote omits
    /// them (refresh grants usually do).
    pub fn issue(
        resp: TokenResponse,
        issued_at: DateTime<Utc>,
        previous: Option<&TokenBundle>,
    ) -> Result<Self, AuthError> {
        let refresh_token = resp
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous.map(|p| p.refresh_token.clone()))
            .ok_or_else(|| AuthError::CodeRejected("no refresh_token in response".into()))?;
        let scope = match resp.scope {
            Some(s) => parse_scope(&s),
            None => previous.map(|p| p.scope.clone()).unwrap_or_default(),
        };
        Ok(Self {
            access_token: resp.access_token,
            refresh_token,
            token_type: resp.token_type,
            scope,
            expires_at: issued_at + Duration::seconds(resp.expires_in.max(0)),
        })
    }

    /// True while `now` is before the refresh point `expires_at - skew`.
    pub fn is_fresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now < self.expires_at - skew
    }

    pub fn access(&self) -> AccessToken {
        AccessToken(self.access_token.clone())
    }
}

impl fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBundle")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

pub fn parse_scope(s: &str) -> BTreeSet<String> {
    s.split_whitespace().map(str::to_string).collect()
}

/// Bearer credential handed to API callers.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Authentication state as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated { expires_at: DateTime<Utc> },
    Refreshing,
    /// Unauthenticated because the grant stopped working; "please log in again".
    Expired,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated { .. } | AuthState::Refreshing)
    }
}

/// Holds the token bundle for one session.
#[derive(Debug, Default)]
pub struct TokenStore {
    bundle: Option<TokenBundle>,
}

impl TokenStore {
    pub fn get(&self) -> Option<&TokenBundle> {
        self.bundle.as_ref()
    }

    pub fn set(&mut self, bundle: TokenBundle) {
        self.bundle = Some(bundle);
    }

    pub fn clear(&mut self) {
        self.bundle = None;
    }
}

struct Guarded {
    store: TokenStore,
    // codes already submitted in this session; a code is single-use remotely
    submitted_codes: HashSet<String>,
}

pub struct TokenLifecycleManager {
    endpoint: Arc<dyn TokenEndpoint>,
    // Held across the refresh round-trip: concurrent get_token calls queue here
    // and observe the single refresh outcome.
    inner: Mutex<Guarded>,
    skew: Duration,
    state: watch::Sender<AuthState>,
}

impl TokenLifecycleManager {
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, refresh_skew: Duration) -> Self {
        let (state, _) = watch::channel(AuthState::Unauthenticated);
        Self {
            endpoint,
            inner: Mutex::new(Guarded {
                store: TokenStore::default(),
                submitted_codes: HashSet::new(),
            }),
            skew: refresh_skew,
            state,
        }
    }

    pub fn refresh_skew(&self) -> Duration {
        self.skew
    }

    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    fn publish(&self, next: AuthState) {
        debug!(?next, "auth state transition");
        self.state.send_replace(next);
    }

    /// Exchange an authorization code for a token bundle.
    ///
    /// Runs under the store lock, so duplicate deliveries of the same redirect
    /// are serialized: the second one sees either the submitted code or the
    /// stored bundle and fails without contacting the remote.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenBundle, AuthError> {
        let mut guard = self.inner.lock().await;
        if guard.submitted_codes.contains(code) {
            warn!("authorization code submitted twice; ignoring");
            return Err(AuthError::CodeAlreadyUsed);
        }
        if guard.store.get().is_some() {
            warn!("code exchange attempted while a token is held");
            return Err(AuthError::AlreadyAuthenticated);
        }
        guard.submitted_codes.insert(code.to_string());

        let resp = self
            .endpoint
            .exchange_code(code, redirect_uri, code_verifier)
            .await?;
        let bundle = TokenBundle::issue(resp, Utc::now(), None)?;
        guard.store.set(bundle.clone());
        info!(expires_at = %bundle.expires_at, "authorization code exchanged");
        self.publish(AuthState::Authenticated {
            expires_at: bundle.expires_at,
        });
        Ok(bundle)
    }

    /// Return a token with at least the refresh skew of lifetime left,
    /// refreshing first if needed.
    pub async fn get_token(&self) -> Result<AccessToken, NotAuthenticated> {
        let mut guard = self.inner.lock().await;
        let current = guard.store.get().cloned().ok_or(NotAuthenticated)?;
        if current.is_fresh(Utc::now(), self.skew) {
            return Ok(current.access());
        }

        debug!(expires_at = %current.expires_at, "token inside refresh window, refreshing");
        self.publish(AuthState::Refreshing);
        let refreshed = match self.endpoint.refresh(&current.refresh_token).await {
            Ok(resp) => TokenBundle::issue(resp, Utc::now(), Some(&current)),
            Err(e) => Err(e),
        };
        match refreshed {
            Ok(bundle) => {
                if !bundle.is_fresh(Utc::now(), self.skew) {
                    warn!(expires_at = %bundle.expires_at, "refreshed token is shorter-lived than the refresh skew");
                }
                let token = bundle.access();
                let expires_at = bundle.expires_at;
                guard.store.set(bundle);
                info!(%expires_at, "access token refreshed");
                self.publish(AuthState::Authenticated { expires_at });
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed; session requires a new login");
                guard.store.clear();
                self.publish(AuthState::Expired);
                Err(NotAuthenticated)
            }
        }
    }

    /// Drop the bundle after the remote rejected it on a data call.
    pub async fn invalidate(&self) {
        let mut guard = self.inner.lock().await;
        if guard.store.get().is_some() {
            warn!("remote rejected access token; clearing session token");
            guard.store.clear();
            self.publish(AuthState::Expired);
        }
    }

    pub async fn logout(&self) {
        let mut guard = self.inner.lock().await;
        guard.store.clear();
        info!("logged out");
        self.publish(AuthState::Unauthenticated);
    }
}
