//! Streaming request forwarder.
//!
//! # Responsibilities
//! - Map the request `Host` to its internal node
//! - Rewrite headers through [`ForwardingTransform`]
//! - Stream the request body up and the response body down
//!
//! # Design Decisions
//! - No retries: requests may not be idempotent and bodies are not buffered
//! - An unmapped host is a deployment error (500), not a client error

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use thiserror::Error;

use crate::auth::ClaimSet;
use crate::config::{ClusterConfig, TimeoutConfig};
use crate::forward::nodes::NodeTable;
use crate::forward::transform::{ForwardedInfo, ForwardingTransform};
use crate::forward::request_host;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("request has no Host header")]
    MissingHost,

    #[error("no cluster node is mapped to host '{0}'")]
    HostNotMapped(String),

    #[error("header cannot be forwarded: {0}")]
    InvalidHeader(#[from] axum::http::header::InvalidHeaderValue),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::MissingHost => StatusCode::BAD_REQUEST,
            ForwardError::HostNotMapped(_) | ForwardError::InvalidHeader(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ForwardError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Client used for node traffic: no redirects, optional TLS verification.
pub fn build_client(
    cluster: &ClusterConfig,
    timeouts: &TimeoutConfig,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(!cluster.verify_tls)
        .connect_timeout(Duration::from_secs(timeouts.connect_secs))
        .build()
}

/// Forwards requests to the node behind their `Host`.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    nodes: Arc<NodeTable>,
    scheme: String,
    transform: ForwardingTransform,
    tls: bool,
}

impl Forwarder {
    pub fn new(
        client: reqwest::Client,
        nodes: Arc<NodeTable>,
        scheme: impl Into<String>,
        transform: ForwardingTransform,
        tls: bool,
    ) -> Self {
        Self {
            client,
            nodes,
            scheme: scheme.into(),
            transform,
            tls,
        }
    }

    pub async fn forward(
        &self,
        request: Request<Body>,
        claims: Option<&ClaimSet>,
        client_ip: Option<IpAddr>,
    ) -> Result<Response<Body>, ForwardError> {
        let started = Instant::now();
        let host = request_host(request.headers(), request.uri()).ok_or(ForwardError::MissingHost)?;
        let node = self
            .nodes
            .resolve(&host)
            .ok_or_else(|| ForwardError::HostNotMapped(host.clone()))?;

        let (parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}://{}{}", self.scheme, node.internal_host, path);

        let info = ForwardedInfo {
            client_ip,
            tls: self.tls,
            host: Some(host.clone()),
        };
        let headers = self.transform.request_headers(
            &parts.headers,
            claims.and_then(|c| c.role.as_deref()),
            &info,
        )?;

        tracing::debug!(
            method = %parts.method,
            host = %host,
            node = %node.internal_host,
            path = %path,
            "Forwarding request"
        );

        let upstream = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .inspect_err(|e| {
                tracing::warn!(node = %node.internal_host, error = %e, "Upstream request failed");
                metrics::record_request(parts.method.as_str(), 502, &node.internal_host, started);
            })?;

        let status = upstream.status();
        metrics::record_request(
            parts.method.as_str(),
            status.as_u16(),
            &node.internal_host,
            started,
        );

        let headers = self.transform.response_headers(upstream.headers());
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
