//! HTTP boundary error.
//!
//! Every subsystem error reaching a handler converts into [`ApiError`],
//! which picks the status and renders a plain text body. Secrets never
//! appear in messages; the subsystem errors do not carry them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::auth::AuthError;
use crate::backup::BackupError;
use crate::forward::ForwardError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Credentials were presented and rejected, or were required and absent.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated, but lacking the claim or group the route needs.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(e) => match e {
                AuthError::AllNodesUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                AuthError::UserListing(_) | AuthError::Http(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Forward(e) => e.status(),
            ApiError::Backup(e) => e.status(),
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "Request refused");
        }

        (status, self.to_string()).into_response()
    }
}
