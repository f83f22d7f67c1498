//! Error types for the screening client
//!
//! [`ApiError`] covers every failure of a single backend call. Admission
//! rejections and poller terminal failures have their own types
//! ([`crate::admission::AdmissionRejection`], [`crate::poller::PollFailure`])
//! because they are reported as values, not as call errors.

use serde::Deserialize;
use thiserror::Error;

/// Backend call error
///
/// Messages are stored as strings so the error is `Clone` and can travel
/// inside poller snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// 401: token missing, expired or revoked
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// 403: authenticated but not allowed
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// 402: server-side credit re-check failed
    #[error("Insufficient credits: {0}")]
    InsufficientCredits(String),

    /// 404: unknown or expired prediction/batch
    #[error("Not found: {0}")]
    NotFound(String),

    /// 413: upload exceeds the backend size limit
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// 422: image format not accepted
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// 429: rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// 5xx
    #[error("Server error {0}: {1}")]
    Server(u16, String),

    /// Any other non-success status
    #[error("API error {0}: {1}")]
    Api(u16, String),

    /// Connection refused, DNS failure, reset, ...
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded its timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Response body did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rejected before sending
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for backend calls
pub type ApiResult<T> = Result<T, ApiError>;

/// FastAPI-style error body (`{"detail": "..."}`)
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

impl ApiError {
    /// Map a non-success HTTP status and its body to an error
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = extract_detail(body);
        match status {
            401 => ApiError::Unauthorized(or_default(detail, "please sign in again")),
            403 => ApiError::Forbidden(or_default(detail, "access denied")),
            402 => ApiError::InsufficientCredits(or_default(
                detail,
                "please purchase more credits",
            )),
            404 => ApiError::NotFound(or_default(detail, "it may have expired")),
            413 => ApiError::PayloadTooLarge(or_default(detail, "upload a smaller image")),
            422 => ApiError::UnsupportedFormat(or_default(
                detail,
                "upload a JPEG, PNG or DICOM file",
            )),
            429 => ApiError::RateLimited(or_default(detail, "wait a moment and try again")),
            500..=599 => ApiError::Server(status, or_default(detail, "try again later")),
            _ => ApiError::Api(status, detail),
        }
    }

    /// Map a reqwest transport error
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }

    /// Whether a failed status poll should be retried on the next tick
    ///
    /// Authentication failures and locally invalid requests repeat
    /// identically, so they are not transient. Everything else (transport
    /// failures, 5xx, rate limiting, odd bodies, unknown jobs) is.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            ApiError::Unauthorized(_) | ApiError::Forbidden(_) | ApiError::InvalidInput(_)
        )
    }

    /// 401/403: the session must be cleared and the user sent to sign in
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_) | ApiError::Forbidden(_))
    }

    /// HTTP status behind the error, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized(_) => Some(401),
            ApiError::Forbidden(_) => Some(403),
            ApiError::InsufficientCredits(_) => Some(402),
            ApiError::NotFound(_) => Some(404),
            ApiError::PayloadTooLarge(_) => Some(413),
            ApiError::UnsupportedFormat(_) => Some(422),
            ApiError::RateLimited(_) => Some(429),
            ApiError::Server(code, _) | ApiError::Api(code, _) => Some(*code),
            ApiError::Network(_)
            | ApiError::Timeout(_)
            | ApiError::Parse(_)
            | ApiError::InvalidInput(_) => None,
        }
    }
}

fn extract_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => body.trim().to_string(),
    }
}

fn or_default(detail: String, fallback: &str) -> String {
    if detail.is_empty() {
        fallback.to_string()
    } else {
        detail
    }
}
