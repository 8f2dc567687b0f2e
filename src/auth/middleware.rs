//! Authentication middleware.
//!
//! Runs the configured [`Authenticator`] once per request and attaches the
//! resulting [`ClaimSet`] as a request extension. Route policy (which paths
//! need claims, which groups) lives with the handlers.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthOutcome, Authenticator, ClaimSet, Credentials};
use crate::forward::request_host;
use crate::http::error::ApiError;
use crate::net::PeerCertificate;
use crate::observability::metrics;

/// Middleware state; `None` disables authentication.
#[derive(Clone, Default)]
pub struct AuthState {
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

impl AuthState {
    pub fn new(authenticator: Option<Arc<dyn Authenticator>>) -> Self {
        Self { authenticator }
    }
}

/// Paths served without looking at credentials.
pub fn bypasses_auth(path: &str) -> bool {
    matches!(path, "/healthz/live" | "/healthz-live")
        || path.starts_with("/.well-known/acme-challenge/")
}

/// Evidence the authenticators can look at.
pub fn collect_credentials(request: &Request) -> Credentials {
    Credentials {
        authorization: request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        host: request_host(request.headers(), request.uri()),
        client_certificate: request
            .extensions()
            .get::<PeerCertificate>()
            .and_then(|peer| peer.0.clone()),
    }
}

pub async fn authenticate(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(authenticator) = state.authenticator else {
        return Ok(next.run(request).await);
    };
    if bypasses_auth(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let credentials = collect_credentials(&request);
    let scheme = authenticator.scheme().as_str();

    // Cancelled when this request is dropped.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let outcome = match authenticator.authenticate(&credentials, &cancel).await {
        Ok(outcome) => outcome,
        Err(e) => {
            metrics::record_auth(scheme, "error");
            return Err(e.into());
        }
    };
    metrics::record_auth(scheme, outcome.label());

    match outcome {
        AuthOutcome::NoResult => {}
        AuthOutcome::Reject(reason) => return Err(ApiError::Unauthorized(reason)),
        AuthOutcome::Accept(claims) => {
            tracing::debug!(identity = %claims.identity, scheme, "Request authenticated");
            request.extensions_mut().insert::<ClaimSet>(claims);
        }
    }

    Ok(next.run(request).await)
}
