//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! request (Authorization header, Host, TLS peer certificate)
//!     → middleware.rs (collect Credentials, skip health probes)
//!     → Authenticator (selected once at startup)
//!         ├─ certificate.rs  fingerprint → registry.rs snapshot
//!         ├─ basic.rs        probe /info on nodes in order
//!         └─ users.rs        match /users listing
//!     → AuthOutcome
//!         NoResult   → continue anonymous
//!         Reject     → 401
//!         Accept     → ClaimSet attached as request extension
//! ```
//!
//! # Design Decisions
//! - One trait, variants chosen by configuration; no handler hierarchy
//! - "No result" is a value, not an error
//! - Backend unreachability is an error (503), distinct from a reject

pub mod basic;
pub mod certificate;
pub mod middleware;
pub mod registry;
pub mod store;
pub mod users;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use basic::BasicAuthBridge;
pub use certificate::CertificateAuthenticator;
pub use registry::{CertificateRegistry, ClientCertificate, IdentityRecord, RegistryError};
pub use store::{CredentialStore, KubeSecretStore, MemoryStore, StoreError};
pub use users::UserListAuthenticator;

/// Scheme that produced a claim set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Certificate,
    Basic,
    UserList,
}

impl AuthScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::Certificate => "certificate",
            AuthScheme::Basic => "basic",
            AuthScheme::UserList => "users",
        }
    }
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSet {
    /// User name, or the certificate display name for certificate logins.
    pub identity: String,
    /// Value forwarded in the trust header, `"user; group,group"`.
    pub role: Option<String>,
    pub groups: Vec<String>,
    pub scheme: AuthScheme,
    /// Display name of the client certificate, when one was used.
    pub certificate: Option<String>,
}

impl ClaimSet {
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Result of running an authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The credentials were absent or not for this scheme.
    NoResult,
    /// The credentials were presented and are wrong.
    Reject(String),
    Accept(ClaimSet),
}

impl AuthOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AuthOutcome::NoResult => "no_result",
            AuthOutcome::Reject(_) => "reject",
            AuthOutcome::Accept(_) => "accept",
        }
    }
}

/// Credential evidence taken from a request.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub authorization: Option<String>,
    pub host: Option<String>,
    /// DER encoded leaf certificate presented during the TLS handshake.
    pub client_certificate: Option<Bytes>,
}

/// Errors that prevent an authentication decision.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No cluster nodes could be reached for authentication")]
    AllNodesUnreachable { attempts: usize },

    #[error("no cluster node is mapped to host '{0}'")]
    HostNotMapped(String),

    #[error("user listing failed with status {0}")]
    UserListing(u16),

    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("authentication cancelled")]
    Cancelled,
}

/// A strategy turning credentials into an [`AuthOutcome`].
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn scheme(&self) -> AuthScheme;

    async fn authenticate(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<AuthOutcome, AuthError>;
}

/// `"username; group1,group2"` split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub username: String,
    pub groups: Vec<String>,
}

impl UserInfo {
    /// Split at the first `;`; the groups segment is optional.
    pub fn parse(payload: &str) -> Self {
        let (username, groups) = match payload.split_once(';') {
            Some((username, groups)) => (username, groups),
            None => (payload, ""),
        };
        Self {
            username: username.trim().to_string(),
            groups: groups
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Inverse of [`UserInfo::parse`]; just the user name when there are
    /// no groups.
    pub fn payload(&self) -> String {
        if self.groups.is_empty() {
            return self.username.clone();
        }
        format!("{}; {}", self.username, self.groups.join(","))
    }
}
