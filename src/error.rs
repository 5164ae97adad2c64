use thiserror::Error;

/// Failure of a single request against the remote API, after status and
/// transport classification. Cloneable so one failure can be handed to every
/// waiter and kept in observable state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate_limited: retry_after={retry_after:?}")]
    RateLimited { retry_after: Option<u64> },
    #[error("remote rejected request: {status} => {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Timeouts and connection failures. Never retried automatically; the
    /// user re-triggers the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Timeout | ApiError::Network(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authorization code rejected: {0}")]
    CodeRejected(String),
    #[error("refresh rejected: {0}")]
    RefreshRejected(String),
    #[error("a token is already held for this session")]
    AlreadyAuthenticated,
    #[error("authorization code was already submitted")]
    CodeAlreadyUsed,
    #[error("authorization denied: {0}")]
    Denied(String),
    #[error("oauth state mismatch")]
    StateMismatch,
    #[error("missing field in redirect: {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Transport(#[from] ApiError),
}

/// The "re-login required" signal. Not a transient error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("not authenticated; please log in again")]
pub struct NotAuthenticated;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error(transparent)]
    NotAuthenticated(#[from] NotAuthenticated),
    #[error("temporary network problem: {0}")]
    Transient(ApiError),
    #[error("remote error: {0}")]
    Remote(ApiError),
}

impl From<ApiError> for FetchError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Unauthorized(_) => FetchError::NotAuthenticated(NotAuthenticated),
            e if e.is_transient() => FetchError::Transient(e),
            e => FetchError::Remote(e),
        }
    }
}
