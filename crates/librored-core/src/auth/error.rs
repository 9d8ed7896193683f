//! Error taxonomy of the authenticated request pipeline.

use std::time::Duration;

use thiserror::Error;

/// Network-level failure: connection refused, timeout, broken body.
///
/// Never an authentication condition; the pipeline passes it through without
/// involving the refresh coordinator.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportFailure {
    pub message: String,
    pub timed_out: bool,
}

impl TransportFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    /// Classifies a reqwest error.
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self {
                message: format!("Request timed out: {e}"),
                timed_out: true,
            }
        } else if e.is_connect() {
            Self::new(format!("Connection failed: {e}"))
        } else if e.is_request() {
            Self::new(format!("Request error: {e}"))
        } else {
            Self::new(format!("Network error: {e}"))
        }
    }
}

/// Failure of login or register.
#[derive(Debug, Clone, Error)]
pub enum AuthFailure {
    /// The identity service refused the request (bad credentials, duplicate user).
    #[error("{message} (HTTP {status})")]
    Rejected { status: u16, message: String },
    #[error(transparent)]
    Transport(#[from] TransportFailure),
    /// The service answered success but the body was unusable.
    #[error("Malformed response from identity service: {0}")]
    InvalidResponse(String),
    /// The credential was issued but could not be persisted.
    #[error("Failed to persist session: {0}")]
    Storage(String),
}

/// Failure of a token refresh. Fatal for the session.
///
/// `Clone` because one failure is delivered to every queued call.
#[derive(Debug, Clone, Error)]
pub enum RefreshFailure {
    #[error("no refresh token available")]
    MissingRefreshToken,
    /// Non-success HTTP status from the refresh endpoint (401 included).
    #[error("refresh token rejected (HTTP {status})")]
    Rejected { status: u16, message: Option<String> },
    /// HTTP success with `status: FAILURE` or without an access token.
    #[error("refresh denied: {0}")]
    Denied(String),
    #[error("refresh timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("refresh failed: {0}")]
    Transport(TransportFailure),
    #[error("failed to persist refreshed credential: {0}")]
    Storage(String),
    /// The task driving the refresh went away before delivering an outcome.
    #[error("refresh was abandoned")]
    Abandoned,
}

/// Why an access token payload could not be turned into an identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    #[error("token is not a three-part JWT")]
    Malformed,
    #[error("token payload is not base64url")]
    Base64,
    #[error("token payload is not a JSON object")]
    NotAnObject,
    #[error("token claim `{0}` is missing or has the wrong type")]
    Claim(&'static str),
}

/// Outcome of a pipeline call that did not produce a response.
///
/// Every HTTP status other than 401 comes back as a response; the pipeline
/// does not mask application errors.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// 401 on a call that carried no credential.
    #[error("authentication required")]
    Unauthenticated,
    /// 401 again after a successful refresh.
    #[error("request rejected with a freshly refreshed token")]
    Unauthorized,
    #[error("session expired: {0}")]
    RefreshFailure(#[from] RefreshFailure),
    #[error(transparent)]
    Transport(#[from] TransportFailure),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// True when the session was torn down and the user must log in again.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::RefreshFailure(_))
    }
}
