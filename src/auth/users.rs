//! Basic credentials matched against the node's user list.
//!
//! The caller's header is replayed to `GET /users` on the node behind the
//! request host. Only a user able to list users gets past the backend; the
//! listing then supplies the groups.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, StatusCode};
use serde::Deserialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::auth::basic::decode_basic;
use crate::auth::{
    AuthError, AuthOutcome, AuthScheme, Authenticator, ClaimSet, Credentials, UserInfo,
};
use crate::forward::NodeTable;

#[derive(Debug, Deserialize)]
struct UserList {
    #[serde(default)]
    data: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserEntry {
    login_name: String,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    disabled: bool,
}

pub struct UserListAuthenticator {
    client: reqwest::Client,
    nodes: Arc<NodeTable>,
    scheme: String,
    request_timeout: Duration,
}

impl UserListAuthenticator {
    pub fn new(client: reqwest::Client, nodes: Arc<NodeTable>, scheme: impl Into<String>) -> Self {
        Self {
            client,
            nodes,
            scheme: scheme.into(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    async fn fetch(&self, host: &str, authorization: &str) -> Result<Result<UserList, StatusCode>, AuthError> {
        let node = self
            .nodes
            .resolve(host)
            .ok_or_else(|| AuthError::HostNotMapped(host.to_string()))?;
        let url = format!("{}://{}/users", self.scheme, node.internal_host);

        let response = match timeout(
            self.request_timeout,
            self.client
                .get(&url)
                .header(header::AUTHORIZATION, authorization)
                .send(),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_connect() || e.is_timeout() => {
                tracing::warn!(node = %node.internal_host, error = %e, "User listing node unreachable");
                return Err(AuthError::AllNodesUnreachable { attempts: 1 });
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                tracing::warn!(node = %node.internal_host, "User listing timed out");
                return Err(AuthError::AllNodesUnreachable { attempts: 1 });
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(Err(status));
        }
        Ok(Ok(response.json::<UserList>().await?))
    }
}

#[async_trait]
impl Authenticator for UserListAuthenticator {
    fn scheme(&self) -> AuthScheme {
        AuthScheme::UserList
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<AuthOutcome, AuthError> {
        let Some(authorization) = credentials.authorization.as_deref() else {
            return Ok(AuthOutcome::NoResult);
        };
        let Some((user, _)) = decode_basic(authorization) else {
            return Ok(AuthOutcome::NoResult);
        };
        let Some(host) = credentials.host.as_deref() else {
            return Ok(AuthOutcome::NoResult);
        };

        let listing = tokio::select! {
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            listing = self.fetch(host, authorization) => listing?,
        };

        let users = match listing {
            Ok(users) => users,
            Err(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                tracing::warn!(user = %user, "User listing refused credentials");
                return Ok(AuthOutcome::Reject("Unauthorized".to_string()));
            }
            Err(status) => return Err(AuthError::UserListing(status.as_u16())),
        };

        let Some(entry) = users.data.into_iter().find(|u| u.login_name == user) else {
            return Ok(AuthOutcome::NoResult);
        };
        if entry.disabled {
            tracing::warn!(user = %user, "Disabled user attempted login");
            return Ok(AuthOutcome::Reject("User disabled".to_string()));
        }

        let info = UserInfo {
            username: entry.login_name,
            groups: entry.groups,
        };
        Ok(AuthOutcome::Accept(ClaimSet {
            role: Some(info.payload()),
            identity: info.username,
            groups: info.groups,
            scheme: AuthScheme::UserList,
            certificate: None,
        }))
    }
}
