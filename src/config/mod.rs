//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → PROXY_* environment overrides
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the node table lives for the process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, AuthMode, BackupConfig, CertificateStoreConfig, ClusterConfig,
    ExecTransportKind, ListenerConfig, LogFormat, NodeConfig, ObservabilityConfig, ProxyConfig,
    TimeoutConfig, TlsConfig,
};
