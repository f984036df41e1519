//! Failure taxonomy of the chat endpoint.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Every non-streaming answer of `POST /api/chat`.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Caller is over quota.
    #[error("Rate limit exceeded")]
    QuotaExceeded,
    /// Body missing, unparseable, or without a question.
    #[error("{0}")]
    BadRequest(String),
    /// Embedding or completion backend failed before any output.
    #[error("{0}")]
    UpstreamUnavailable(String),
    /// Local failure, such as the rate-limit store.
    #[error("{0}")]
    Internal(String),
}

impl ChatError {
    /// Status code sent for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ChatError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Logs the full chain and keeps `reason` as the client-facing text.
    pub fn upstream(reason: &str, err: anyhow::Error) -> Self {
        error!(error = ?err, "{reason}");
        ChatError::UpstreamUnavailable(reason.to_string())
    }

    /// Logs the full chain and returns a generic 500.
    pub fn internal(reason: &str, err: anyhow::Error) -> Self {
        error!(error = ?err, "{reason}");
        ChatError::Internal(reason.to_string())
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
