//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the shared HTTP client and node table
//! - Select the authenticator for the configured mode
//! - Start the certificate registry watch
//! - Build the backup service over the configured exec transport
//! - Hand a ready [`HttpServer`] back to `main`
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - A registry watch that fails stops the process
//!
//! # Data Flow
//! ```text
//! ProxyConfig
//!   ├─▶ reqwest client + NodeTable ─────────────┬─▶ Forwarder ─▶ AppState
//!   ├─▶ auth.mode ─▶ Authenticator ─────────────┴─▶ AuthState
//!   │      └─ certificate: KubeSecretStore ─▶ CertificateRegistry ─▶ watch task
//!   └─▶ backup.transport ─▶ RemoteExecutor ─▶ BackupService ─▶ AppState
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::InvalidHeaderName;
use axum::http::HeaderName;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::auth::middleware::AuthState;
use crate::auth::{
    Authenticator, BasicAuthBridge, CertificateAuthenticator, CertificateRegistry,
    KubeSecretStore, RegistryError, UserListAuthenticator,
};
use crate::backup::BackupService;
use crate::config::{AuthMode, ExecTransportKind, ProxyConfig};
use crate::exec::{ExecTransport, KubeExecTransport, LocalExecTransport, RemoteExecutor};
use crate::forward::forwarder::build_client;
use crate::forward::{Forwarder, ForwardingTransform, NodeTable};
use crate::http::{AppState, BackupPolicy, HttpServer};
use crate::lifecycle::shutdown::Shutdown;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("kubernetes client: {0}")]
    Kube(#[from] kube::Error),

    #[error("HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("trust header: {0}")]
    TrustHeader(#[from] InvalidHeaderName),

    #[error("ACME handler: {0}")]
    AcmeHandler(#[from] url::ParseError),
}

/// A background task that ended the process.
#[derive(Debug, Error)]
pub enum BackgroundError {
    #[error("certificate watch: {0}")]
    Watch(#[from] RegistryError),

    #[error("background task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A server ready to run, plus the background tasks it depends on.
pub struct Application {
    pub server: HttpServer,
    pub background: Vec<JoinHandle<Result<(), RegistryError>>>,
}

/// Build every subsystem from a validated configuration.
pub async fn build(config: ProxyConfig, shutdown: &Shutdown) -> Result<Application, StartupError> {
    let client = build_client(&config.cluster, &config.timeouts)?;
    let nodes = Arc::new(NodeTable::from_config(&config.cluster.nodes));
    tracing::info!(nodes = nodes.len(), scheme = %config.cluster.scheme, "Node table loaded");

    let needs_kube = config.auth.mode == AuthMode::Certificate
        || (config.backup.enabled && config.backup.transport == ExecTransportKind::Kube);
    let kube = if needs_kube {
        Some(kube::Client::try_default().await?)
    } else {
        None
    };

    let mut background = Vec::new();
    let probe_timeout = Duration::from_secs(config.timeouts.probe_secs);
    let authenticator: Option<Arc<dyn Authenticator>> = match config.auth.mode {
        AuthMode::None => None,
        AuthMode::Basic => Some(Arc::new(
            BasicAuthBridge::new(client.clone(), nodes.clone(), &config.cluster.scheme)
                .with_timeout(probe_timeout),
        )),
        AuthMode::Users => Some(Arc::new(
            UserListAuthenticator::new(client.clone(), nodes.clone(), &config.cluster.scheme)
                .with_timeout(probe_timeout),
        )),
        AuthMode::Certificate => {
            let certificates = &config.auth.certificates;
            let client = match &kube {
                Some(client) => client.clone(),
                None => kube::Client::try_default().await?,
            };
            let store = KubeSecretStore::new(client, &certificates.namespace, &certificates.secret_name);
            let registry = Arc::new(CertificateRegistry::new(Arc::new(store), certificates));

            match registry.reload().await {
                Ok(snapshot) => tracing::info!(certificates = snapshot.len(), "Certificate registry loaded"),
                Err(e) => tracing::warn!(error = %e, "Initial certificate load failed, retrying on demand"),
            }
            if certificates.watch {
                background.push(spawn_registry_watch(registry.clone(), shutdown.clone()));
            }

            Some(Arc::new(CertificateAuthenticator::new(registry)))
        }
    };
    tracing::info!(mode = %config.auth.mode, "Authentication configured");

    let backup = if config.backup.enabled {
        let transport: Arc<dyn ExecTransport> = match (config.backup.transport, &kube) {
            (ExecTransportKind::Kube, Some(client)) => Arc::new(
                KubeExecTransport::new(client.clone(), &config.backup.namespace)
                    .with_container(config.backup.container.clone())
                    .with_readiness_check(config.backup.check_readiness),
            ),
            _ => Arc::new(LocalExecTransport::new("local", &config.backup.namespace)),
        };
        let executor = RemoteExecutor::new(transport).with_buffers(
            config.backup.exec_buffer_bytes,
            config.backup.stream_buffer_bytes,
        );
        tracing::info!(
            transport = ?config.backup.transport,
            pods = config.backup.pods.len(),
            "Backup endpoint enabled"
        );
        Some(Arc::new(BackupService::new(executor, &config.backup)))
    } else {
        None
    };

    let server = assemble(config, client, nodes, authenticator, backup)?;
    Ok(Application { server, background })
}

/// Wire already built subsystems into a server.
pub fn assemble(
    config: ProxyConfig,
    client: reqwest::Client,
    nodes: Arc<NodeTable>,
    authenticator: Option<Arc<dyn Authenticator>>,
    backup: Option<Arc<BackupService>>,
) -> Result<HttpServer, StartupError> {
    let transform = ForwardingTransform::new(HeaderName::from_bytes(
        config.cluster.trust_header.as_bytes(),
    )?);
    let forwarder = Forwarder::new(
        client,
        nodes,
        &config.cluster.scheme,
        transform,
        config.listener.tls.is_some(),
    );
    let acme_handler = config
        .cluster
        .acme_handler
        .as_deref()
        .map(url::Url::parse)
        .transpose()?;

    let state = AppState {
        forwarder: Arc::new(forwarder),
        backup,
        backup_policy: BackupPolicy {
            require_admin: config.backup.require_admin,
            admin_group: config.backup.admin_group.clone(),
        },
        acme_handler,
        auth_enabled: authenticator.is_some(),
    };
    let auth = AuthState::new(authenticator);

    Ok(HttpServer::new(config, state, auth))
}

/// Keep the registry in step with its secret; a failed watch stops the
/// process and is returned from the task.
pub fn spawn_registry_watch(
    registry: Arc<CertificateRegistry>,
    shutdown: Shutdown,
) -> JoinHandle<Result<(), RegistryError>> {
    tokio::spawn(async move {
        let result = registry.watch(shutdown.subscribe()).await;
        match &result {
            Ok(()) => tracing::debug!("Certificate watch stopped"),
            Err(e) => {
                tracing::error!(error = %e, "Certificate watch failed, shutting down");
                shutdown.trigger();
            }
        }
        result
    })
}

/// Await every background task; the first failure is returned.
pub async fn join_background(
    tasks: Vec<JoinHandle<Result<(), RegistryError>>>,
) -> Result<(), BackgroundError> {
    let mut failure = None;
    for task in tasks {
        let outcome = match task.await {
            Ok(result) => result.map_err(BackgroundError::from),
            Err(e) => Err(BackgroundError::from(e)),
        };
        if let Err(e) = outcome {
            failure.get_or_insert(e);
        }
    }
    failure.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialStore, MemoryStore};
    use crate::config::{CertificateStoreConfig, NodeConfig};

    #[tokio::test]
    async fn assemble_without_auth_leaves_routes_open() {
        let mut config = ProxyConfig::default();
        config.auth.mode = AuthMode::None;
        config.cluster.nodes.push(NodeConfig {
            public_host: "a.esdb.local".to_string(),
            internal_host: "127.0.0.1:2113".to_string(),
        });
        let nodes = Arc::new(NodeTable::from_config(&config.cluster.nodes));

        let server = assemble(config, reqwest::Client::new(), nodes, None, None).unwrap();
        assert_eq!(server.config().auth.mode, AuthMode::None);
    }

    #[tokio::test]
    async fn invalid_acme_handler_is_rejected() {
        let mut config = ProxyConfig::default();
        config.cluster.acme_handler = Some("not a url".to_string());

        let result = assemble(config, reqwest::Client::new(), Arc::new(NodeTable::default()), None, None);
        assert!(matches!(result, Err(StartupError::AcmeHandler(_))));
    }

    #[tokio::test]
    async fn failed_watch_triggers_shutdown() {
        let store = Arc::new(MemoryStore::default());
        let registry = Arc::new(CertificateRegistry::new(
            store.clone() as Arc<dyn CredentialStore>,
            &CertificateStoreConfig::default(),
        ));
        let shutdown = Shutdown::new();
        let mut stopped = shutdown.subscribe();

        let task = spawn_registry_watch(registry, shutdown.clone());
        while store.watcher_count() == 0 {
            tokio::task::yield_now().await;
        }
        store.fail_watch("secret watch closed");

        tokio::time::timeout(Duration::from_secs(2), stopped.recv())
            .await
            .unwrap()
            .unwrap();

        let err = join_background(vec![task]).await.unwrap_err();
        assert!(matches!(err, BackgroundError::Watch(_)));
    }

    #[tokio::test]
    async fn watch_stopped_by_shutdown_is_clean() {
        let store = Arc::new(MemoryStore::default());
        let registry = Arc::new(CertificateRegistry::new(
            store.clone() as Arc<dyn CredentialStore>,
            &CertificateStoreConfig::default(),
        ));
        let shutdown = Shutdown::new();

        let task = spawn_registry_watch(registry, shutdown.clone());
        while store.watcher_count() == 0 {
            tokio::task::yield_now().await;
        }
        shutdown.trigger();

        assert!(join_background(vec![task]).await.is_ok());
    }
}
