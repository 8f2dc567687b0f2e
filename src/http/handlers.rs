//! Route handlers.
//!
//! # Responsibilities
//! - Forward everything not owned by the proxy to the mapped node
//! - Require a claim set on the cluster-internal endpoints
//! - Serve `/Me`, health probes, ACME redirects and backups
//!
//! # Data Flow
//! ```text
//! /healthz/live, /healthz-live ──▶ 200
//! /.well-known/acme-challenge/* ──▶ 302 to handler (or forward if unset)
//! /Me ──▶ role claim? ──▶ {certificate, username, groups} | 403
//! /gossip /ping /stats /elections ──▶ claims? ──▶ forward | 401
//! POST /admin/backup ──▶ admin group? ──▶ BackupService ──▶ tar stream
//! * ──▶ forward
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::{ClaimSet, UserInfo};
use crate::backup::{BackupService, Compression};
use crate::forward::{request_host, Forwarder};
use crate::http::error::ApiError;

/// Who may start a backup.
#[derive(Debug, Clone)]
pub struct BackupPolicy {
    pub require_admin: bool,
    pub admin_group: String,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Arc<Forwarder>,
    pub backup: Option<Arc<BackupService>>,
    pub backup_policy: BackupPolicy,
    pub acme_handler: Option<Url>,
    /// Whether an authenticator runs; protected routes stay open otherwise.
    pub auth_enabled: bool,
}

/// Catch-all: forward to the node behind the request host.
pub async fn proxy(
    State(state): State<AppState>,
    claims: Option<Extension<ClaimSet>>,
    request: Request,
) -> Result<Response, ApiError> {
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let claims = claims.map(|Extension(claims)| claims);

    Ok(state
        .forwarder
        .forward(request, claims.as_ref(), client_ip)
        .await?)
}

/// Cluster endpoints that are never served anonymously.
pub async fn protected(
    state: State<AppState>,
    claims: Option<Extension<ClaimSet>>,
    request: Request,
) -> Result<Response, ApiError> {
    if state.auth_enabled && claims.is_none() {
        return Err(ApiError::Unauthorized("Authentication required".to_string()));
    }
    proxy(state, claims, request).await
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    /// Certificate display name, or the user name for basic logins.
    pub certificate: String,
    pub username: String,
    pub groups: Vec<String>,
}

/// Describe the caller from its role claim.
pub async fn me(claims: Option<Extension<ClaimSet>>) -> Result<Json<MeResponse>, ApiError> {
    let Some(Extension(claims)) = claims else {
        return Err(ApiError::Forbidden("No role claim".to_string()));
    };
    let Some(role) = claims.role.as_deref() else {
        return Err(ApiError::Forbidden("No role claim".to_string()));
    };

    let user = UserInfo::parse(role);
    Ok(Json(MeResponse {
        certificate: claims.certificate.clone().unwrap_or(claims.identity.clone()),
        username: user.username,
        groups: user.groups,
    }))
}

pub async fn healthz() -> &'static str {
    "Healthy"
}

/// Redirect ACME http-01 challenges, or forward them when no handler is set.
pub async fn acme(
    state: State<AppState>,
    claims: Option<Extension<ClaimSet>>,
    request: Request,
) -> Result<Response, ApiError> {
    let Some(base) = state.acme_handler.as_ref() else {
        return proxy(state, claims, request).await;
    };

    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let destination = base
        .join(path)
        .map_err(|e| ApiError::Internal(format!("invalid ACME redirect: {e}")))?;

    tracing::info!(destination = %destination, "Redirecting ACME challenge");
    Ok((StatusCode::FOUND, [(header::LOCATION, destination.to_string())]).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct BackupQuery {
    pub compression: Option<Compression>,
}

/// Stream a tar archive of the node behind the request host.
pub async fn backup(
    State(state): State<AppState>,
    Query(query): Query<BackupQuery>,
    claims: Option<Extension<ClaimSet>>,
    request: Request,
) -> Result<Response, ApiError> {
    let Some(service) = state.backup.as_ref() else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    if state.backup_policy.require_admin {
        let Some(Extension(claims)) = claims else {
            return Err(ApiError::Unauthorized("Authentication required".to_string()));
        };
        if !claims.in_group(&state.backup_policy.admin_group) {
            tracing::warn!(
                identity = %claims.identity,
                group = %state.backup_policy.admin_group,
                "Backup refused, caller not in admin group"
            );
            return Err(ApiError::Forbidden("Backup requires admin group".to_string()));
        }
    }

    let host = request_host(request.headers(), request.uri())
        .ok_or_else(|| ApiError::BadRequest("Missing Host header".to_string()))?;
    let compression = query.compression.unwrap_or_default();

    let stream = service.start(&host, compression).await?;

    let mut response = Response::new(stream.body);
    for (name, value) in stream.headers {
        response.headers_mut().insert(name, value);
    }
    Ok(response)
}
