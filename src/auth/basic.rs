//! Basic credentials validated by the cluster itself.
//!
//! # Responsibilities
//! - Decode `Authorization: Basic <base64(user:pass)>`
//! - Probe `GET /info` on each node, in configured order, with the
//!   caller's original header
//! - Fail over only on transport errors; any HTTP status is an answer
//!
//! # Data Flow
//! ```text
//! header ──decode──▶ (user, pass)
//!    │
//!    └──▶ node[0] /info ──transport error──▶ node[1] /info ──▶ ... ──▶ AllNodesUnreachable
//!              │                                  │
//!           status                             status
//!              ▼                                  ▼
//!       200 ⇒ Accept, else Reject          200 ⇒ Accept, else Reject
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthError, AuthOutcome, AuthScheme, Authenticator, ClaimSet, Credentials};
use crate::forward::NodeTable;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Split a `Basic` header into user name and password.
///
/// The password may contain `:`; only the first one separates.
pub fn decode_basic(authorization: &str) -> Option<(String, String)> {
    let (scheme, encoded) = authorization.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Which node answered a probe, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub status: StatusCode,
    pub node: String,
    /// Nodes tried, including the one that answered.
    pub attempts: usize,
}

/// Validates basic credentials against `/info` with node failover.
pub struct BasicAuthBridge {
    client: reqwest::Client,
    nodes: Arc<NodeTable>,
    scheme: String,
    probe_timeout: Duration,
}

impl BasicAuthBridge {
    pub fn new(client: reqwest::Client, nodes: Arc<NodeTable>, scheme: impl Into<String>) -> Self {
        Self {
            client,
            nodes,
            scheme: scheme.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Send the header to each node until one answers.
    pub async fn probe(
        &self,
        authorization: &str,
        cancel: &CancellationToken,
    ) -> Result<ProbeReport, AuthError> {
        for (i, node) in self.nodes.iter().enumerate() {
            let url = format!("{}://{}/info", self.scheme, node.internal_host);
            let fut = self
                .client
                .get(&url)
                .header(header::AUTHORIZATION, authorization)
                .send();

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                result = timeout(self.probe_timeout, fut) => result,
            };

            match result {
                Ok(Ok(response)) => {
                    return Ok(ProbeReport {
                        status: response.status(),
                        node: node.internal_host.clone(),
                        attempts: i + 1,
                    });
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        node_idx = i,
                        node = %node.internal_host,
                        error = %e,
                        "Node unreachable, trying next node"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        node_idx = i,
                        node = %node.internal_host,
                        "Probe timed out, trying next node"
                    );
                }
            }
        }

        Err(AuthError::AllNodesUnreachable {
            attempts: self.nodes.len(),
        })
    }
}

#[async_trait]
impl Authenticator for BasicAuthBridge {
    fn scheme(&self) -> AuthScheme {
        AuthScheme::Basic
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

        let report = self.probe(authorization, cancel).await?;
        if report.status != StatusCode::OK {
            tracing::warn!(
                user = %user,
                node = %report.node,
                status = report.status.as_u16(),
                "Basic credentials rejected"
            );
            return Ok(AuthOutcome::Reject("Invalid username/password".to_string()));
        }

        tracing::debug!(user = %user, node = %report.node, attempts = report.attempts, "Basic credentials accepted");
        Ok(AuthOutcome::Accept(ClaimSet {
            identity: user,
            role: None,
            groups: Vec::new(),
            scheme: AuthScheme::Basic,
            certificate: None,
        }))
    }
}
