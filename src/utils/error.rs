//! The `error` module defines the error types shared across the hub.
//!
//! `HubError` is what every fallible hub operation returns. Each variant maps
//! onto one HTTP status so the transport layer can turn it straight into a
//! response. `GapError` is not a failure of the request: it travels alongside
//! a backlog replay to tell the subscriber that some events were lost.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum HubError {
    /// Bad, missing or expired JWT (401), or a JWT lacking scope (403).
    #[error(transparent)]
    Authentication(#[from] AuthError),

    #[error("forbidden: {0}")]
    Authorization(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            HubError::Authentication(err) => err.status_code(),
            HubError::Authorization(_) => StatusCode::FORBIDDEN,
            HubError::Validation(_) => StatusCode::BAD_REQUEST,
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            HubError::Storage(_) | HubError::Config(_) | HubError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sled::Error> for HubError {
    fn from(err: sled::Error) -> Self {
        HubError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Storage(err.to_string())
    }
}

impl From<config::ConfigError> for HubError {
    fn from(err: config::ConfigError) -> Self {
        HubError::Config(err.to_string())
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let mut response = (status, self.to_string()).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"mercure\""),
            );
        }
        response
    }
}

/// The backlog could not satisfy a `Last-Event-ID`: the event is unknown or
/// was evicted. Replay restarts from the oldest retained event, so the
/// subscriber sees a jump in ids and must re-fetch its state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no retained event follows `{last_event_id}`; replaying from the oldest retained event")]
pub struct GapError {
    pub last_event_id: String,
    /// Sequence of the first event the replay resumed from, if any is retained.
    pub resumed_from: Option<u64>,
}
