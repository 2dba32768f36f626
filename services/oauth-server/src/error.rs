//! Callback flow errors
//!
//! Every failure is terminal for its request. Client-caused problems map to
//! 422, provider and storage failures to 500; the body is a short plaintext
//! message and the underlying cause is only logged.

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum FlowError {
    /// Required input missing or blank. The payload is the response body.
    #[error("{0}")]
    InvalidRequest(&'static str),

    #[error("decoding state failed")]
    InvalidState(#[source] google_auth::Error),

    #[error("exchange token failed")]
    ExchangeFailed(#[source] google_auth::Error),

    #[error("saving token failed")]
    PersistenceFailed(#[source] google_auth::Error),
}

impl FlowError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ExchangeFailed(_) | Self::PersistenceFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Metrics label for this failure.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidState(_) => "invalid_state",
            Self::ExchangeFailed(_) => "exchange_failed",
            Self::PersistenceFailed(_) => "persistence_failed",
        }
    }

    /// Log the failure with its cause: `warn` for client errors, `error`
    /// for server-side ones.
    pub fn log(&self, route: &'static str, request_id: &str) {
        let cause = match self {
            Self::InvalidRequest(_) => None,
            Self::InvalidState(e) | Self::ExchangeFailed(e) | Self::PersistenceFailed(e) => {
                Some(e.to_string())
            }
        };
        if self.status().is_server_error() {
            error!(route, request_id, cause = cause.as_deref(), "{}", self);
        } else {
            warn!(route, request_id, cause = cause.as_deref(), "{}", self);
        }
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
