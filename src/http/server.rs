//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the proxy-owned routes and the catch-all
//! - Wire up middleware (request ID, tracing, body limit, CORS, auth)
//! - Serve plain HTTP, or TLS with client certificate capture
//! - Stop accepting and drain on shutdown
//!
//! # Design Decisions
//! - CORS is answered by the proxy; backend CORS headers are stripped
//! - Authentication runs inside CORS so preflights never need credentials
//! - Health probe spans are logged at debug

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, Method, Request};
use axum::middleware;
use axum::routing::{any, get, post};
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth::middleware::{authenticate, AuthState};
use crate::config::{ClusterConfig, ProxyConfig};
use crate::http::handlers::{self, AppState};
use crate::net::{load_tls_config, ClientCertAcceptor, TlsError};

/// Request headers browsers may send to the cluster.
const CORS_REQUEST_HEADERS: [&str; 10] = [
    "content-type",
    "authorization",
    "es-longpoll",
    "es-expectedversion",
    "es-eventid",
    "es-eventtype",
    "es-requiremaster",
    "es-requireleader",
    "es-harddelete",
    "es-resolvelinktos",
];

/// Response headers exposed to browser scripts.
const CORS_EXPOSED_HEADERS: [&str; 4] = [
    "location",
    "authorization",
    "es-position",
    "es-currentversion",
];

/// Connections still open after this long are closed at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    pub fn new(config: ProxyConfig, state: AppState, auth: AuthState) -> Self {
        let router = Self::build_router(&config, state, auth);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(config: &ProxyConfig, state: AppState, auth: AuthState) -> Router {
        Router::new()
            .route("/healthz/live", get(handlers::healthz))
            .route("/healthz-live", get(handlers::healthz))
            .route("/Me", get(handlers::me))
            .route("/admin/backup", post(handlers::backup))
            .route("/.well-known/acme-challenge/{*token}", any(handlers::acme))
            .route("/gossip", any(handlers::protected))
            .route("/ping", any(handlers::protected))
            .route("/stats", any(handlers::protected))
            .route("/elections", any(handlers::protected))
            .route("/", any(handlers::proxy))
            .route("/{*path}", any(handlers::proxy))
            .with_state(state)
            .layer(middleware::from_fn_with_state(auth, authenticate))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http().make_span_with(request_span))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
                    .layer(cors_layer(&config.cluster)),
            )
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.config.listener.tls.clone() {
            Some(tls) => {
                let addr: SocketAddr = self
                    .config
                    .listener
                    .bind_address
                    .parse()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
                let tls = load_tls_config(&tls)?;
                self.run_tls(addr, ClientCertAcceptor::new(tls), shutdown).await
            }
            None => {
                let listener = TcpListener::bind(&self.config.listener.bind_address).await?;
                self.run(listener, shutdown).await
            }
        }
    }

    /// Serve plain HTTP on an already bound listener.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, tls = false, "HTTP server starting");

        let draining = Arc::new(Notify::new());
        let started = draining.clone();
        let graceful = async move {
            shutdown.await;
            started.notify_one();
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .into_future();

        tokio::select! {
            result = server => result?,
            _ = async {
                draining.notified().await;
                tokio::time::sleep(DRAIN_TIMEOUT).await;
            } => tracing::warn!(timeout = ?DRAIN_TIMEOUT, "Drain deadline passed, dropping open connections"),
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve TLS, exposing the client certificate to the auth middleware.
    pub async fn run_tls<F>(
        self,
        addr: SocketAddr,
        acceptor: ClientCertAcceptor,
        shutdown: F,
    ) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(address = %addr, tls = true, "HTTP server starting");

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            shutdown.await;
            drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind(addr)
            .acceptor(acceptor)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// CORS policy for browsers talking to the cluster through its public hosts.
pub fn cors_layer(cluster: &ClusterConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cluster
        .nodes
        .iter()
        .filter_map(|node| {
            let host = node.public_host.trim_end_matches('/');
            HeaderValue::from_str(&format!("https://{host}"))
                .inspect_err(|_| tracing::warn!(host = %host, "Public host is not a valid origin"))
                .ok()
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(CORS_REQUEST_HEADERS.map(HeaderName::from_static))
        .expose_headers(CORS_EXPOSED_HEADERS.map(HeaderName::from_static))
}

fn request_span(request: &Request<Body>) -> tracing::Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if request.uri().path().starts_with("/healthz") {
        tracing::debug_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id
        )
    } else {
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            host,
            request_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;

    #[test]
    fn cors_headers_are_valid_names() {
        for name in CORS_REQUEST_HEADERS.iter().chain(CORS_EXPOSED_HEADERS.iter()) {
            assert!(HeaderName::from_bytes(name.as_bytes()).is_ok(), "{name}");
        }
    }

    #[test]
    fn cors_layer_builds_from_nodes() {
        let mut cluster = ClusterConfig::default();
        cluster.nodes.push(NodeConfig {
            public_host: "a.esdb.local/".to_string(),
            internal_host: "10.0.0.1:2113".to_string(),
        });
        let _ = cors_layer(&cluster);
    }
}
