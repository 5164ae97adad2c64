//! Shared HTTP plumbing: client construction with a bounded timeout and
//! classification of responses and transport failures into [`ApiError`].

use crate::error::ApiError;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Every request issued through this client is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> Result<Client, ApiError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| ApiError::Network(format!("building http client: {}", e)))
}

pub fn transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else if e.is_decode() {
        ApiError::Decode(e.to_string())
    } else {
        ApiError::Network(e.to_string())
    }
}

/// Seconds from a `retry-after` header, when present and numeric.
pub fn retry_after(resp: &Response) -> Option<u64> {
    resp.headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

/// Pass 2xx responses through; turn everything else into an [`ApiError`].
pub async fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ApiError::RateLimited {
            retry_after: retry_after(&resp),
        });
    }
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized(body));
    }
    Err(ApiError::Rejected {
        status: status.as_u16(),
        body,
    })
}

pub async fn json_body(resp: Response) -> Result<serde_json::Value, ApiError> {
    resp.json::<serde_json::Value>().await.map_err(transport_error)
}
