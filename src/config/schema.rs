//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Cluster nodes and forwarding settings.
    pub cluster: ClusterConfig,

    /// Authentication mode and credential store settings.
    pub auth: AuthConfig,

    /// Backup extraction settings.
    pub backup: BackupConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration. Required for certificate authentication.
    pub tls: Option<TlsConfig>,

    /// Maximum accepted request body size for forwarded requests.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,

    /// Optional CA bundle (PEM) used to verify client certificates.
    /// When absent, client certificates are requested but not chain-verified.
    #[serde(default)]
    pub client_ca_path: Option<String>,
}

/// A public host and the internal address of the node behind it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// Host header clients use to reach this node.
    pub public_host: String,

    /// Internal `host:port` the node listens on.
    pub internal_host: String,
}

/// Cluster forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Nodes in failover order.
    pub nodes: Vec<NodeConfig>,

    /// Scheme used to reach internal hosts ("http" or "https").
    pub scheme: String,

    /// Verify backend TLS certificates.
    pub verify_tls: bool,

    /// Header carrying the trusted identity to the backend.
    pub trust_header: String,

    /// Base URL that ACME http-01 challenges are redirected to.
    pub acme_handler: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            scheme: "https".to_string(),
            verify_tls: false,
            trust_header: "ES-TrustedAuth".to_string(),
            acme_handler: None,
        }
    }
}

/// Authentication strategy applied to every request.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No authentication; every request is anonymous.
    None,
    /// Mutual TLS client certificates looked up in the credential store.
    #[default]
    Certificate,
    /// Basic credentials probed against the cluster nodes.
    Basic,
    /// Basic credentials matched against the backend user list.
    Users,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuthMode::None => "none",
            AuthMode::Certificate => "certificate",
            AuthMode::Basic => "basic",
            AuthMode::Users => "users",
        };
        f.write_str(name)
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Selected authentication strategy.
    pub mode: AuthMode,

    /// Certificate registry settings (certificate mode).
    pub certificates: CertificateStoreConfig,
}

/// Location and refresh policy of the client certificate secret.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CertificateStoreConfig {
    /// Namespace holding the secret.
    pub namespace: String,

    /// Name of the secret holding certificates and auth payloads.
    pub secret_name: String,

    /// Key suffix identifying certificate entries.
    pub certificate_suffix: String,

    /// Snapshot age after which a synchronous reload happens.
    pub cache_ttl_secs: u64,

    /// Subscribe to secret change notifications.
    pub watch: bool,
}

impl Default for CertificateStoreConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            secret_name: "proxy-client-certificates".to_string(),
            certificate_suffix: ".pfx".to_string(),
            cache_ttl_secs: 300,
            watch: true,
        }
    }
}

/// How backup commands reach the database container.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecTransportKind {
    /// Kubernetes pod exec over websocket.
    #[default]
    Kube,
    /// Child processes on the local host (sidecar deployment).
    Local,
}

/// Backup extraction configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Expose `POST /admin/backup`.
    pub enabled: bool,

    /// Exec transport used to run backup commands.
    pub transport: ExecTransportKind,

    /// Namespace of the database pods.
    pub namespace: String,

    /// Public host to pod name.
    pub pods: BTreeMap<String, String>,

    /// Container to exec into; the pod default when absent.
    pub container: Option<String>,

    /// Database data directory inside the container.
    pub data_directory: String,

    /// Root for per-backup scratch directories inside the container.
    pub temp_directory: String,

    /// Require an authenticated caller in `admin_group`. Only the
    /// certificate and users auth modes carry groups.
    pub require_admin: bool,

    /// Group required to trigger a backup.
    pub admin_group: String,

    /// Refuse backups while any pod container is not ready.
    pub check_readiness: bool,

    /// Demultiplexer buffer for buffered commands.
    pub exec_buffer_bytes: usize,

    /// Demultiplexer buffer for the streamed archive.
    pub stream_buffer_bytes: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            transport: ExecTransportKind::Kube,
            namespace: "default".to_string(),
            pods: BTreeMap::new(),
            container: None,
            data_directory: "/var/lib/eventstore".to_string(),
            temp_directory: "/tmp".to_string(),
            require_admin: true,
            admin_group: "$admins".to_string(),
            check_readiness: true,
            exec_buffer_bytes: 64 * 1024,
            stream_buffer_bytes: 1024 * 1024,
        }
    }
}

/// Timeout configuration for outbound calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Total timeout for authentication probes in seconds.
    pub probe_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            probe_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Bind address of the Prometheus exporter.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "eventstore_proxy=info,tower_http=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
