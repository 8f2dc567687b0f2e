//! Client certificate registry.
//!
//! Holds an immutable snapshot of every registered client certificate,
//! keyed by thumbprint, and swaps it wholesale whenever the backing
//! credential store changes.
//!
//! # Responsibilities
//! - Load `{THUMBPRINT}{suffix}` / `{THUMBPRINT}.auth` pairs from the store
//! - Serve lookups without locking (`ArcSwapOption` snapshot)
//! - Refresh synchronously when the snapshot is older than the TTL
//! - Follow store change notifications until shutdown
//! - Write path used by administration tooling: save, register, remove
//!
//! # Data Flow
//! ```text
//! CredentialStore::read ──▶ reload() ──▶ RegistrySnapshot ──▶ ArcSwapOption
//!          ▲                    ▲                                 │
//!          │               watch() (Changed)              current() / lookup
//!   CredentialStore::watch ─────┘                                 ▼
//!                                                   CertificateAuthenticator
//! ```
//!
//! # Design Decisions
//! - Readers either see the previous full map or the next full map
//! - Concurrent refresh triggers collapse behind one async mutex, with a
//!   freshness re-check after acquiring it
//! - A missing `.auth` entry fails the whole reload; the previous snapshot
//!   stays in place
//! - A failing watch stream ends the task with an error

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use futures_util::StreamExt;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

use crate::auth::store::{CredentialStore, Entries, StoreError, StoreEvent};
use crate::auth::UserInfo;
use crate::config::CertificateStoreConfig;

const AUTH_SUFFIX: &str = ".auth";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("entry '{key}' is not a valid X.509 certificate: {reason}")]
    InvalidCertificate { key: String, reason: String },

    #[error("no auth payload stored for certificate {0}")]
    MissingAuth(String),

    #[error("a certificate named '{0}' is already registered")]
    Duplicate(String),

    #[error("no certificate named '{0}' is registered")]
    NotRegistered(String),

    #[error("certificate watch ended")]
    WatchEnded,
}

/// What the registry knows about one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Uppercase hex SHA-1 of the DER encoding.
    pub fingerprint: String,
    /// Subject common name, or the fingerprint when the subject has none.
    pub display_name: String,
    /// `"username; group,group"`.
    pub auth_payload: String,
}

impl IdentityRecord {
    pub fn user_info(&self) -> UserInfo {
        UserInfo::parse(&self.auth_payload)
    }
}

/// A certificate together with its identity record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    pub der: Vec<u8>,
    pub record: IdentityRecord,
}

impl ClientCertificate {
    /// Build a record for `der` granting `username` the given groups.
    pub fn new(der: Vec<u8>, username: &str, groups: &[String]) -> Result<Self, RegistryError> {
        let display_name = simple_name(&der).map_err(|reason| RegistryError::InvalidCertificate {
            key: "<new>".to_string(),
            reason,
        })?;
        let payload = UserInfo {
            username: username.to_string(),
            groups: groups.to_vec(),
        }
        .payload();

        Ok(Self {
            record: IdentityRecord {
                fingerprint: thumbprint(&der),
                display_name,
                auth_payload: payload,
            },
            der,
        })
    }
}

/// One full load of the store.
#[derive(Debug)]
pub struct RegistrySnapshot {
    entries: HashMap<String, ClientCertificate>,
    loaded_at: Instant,
}

impl RegistrySnapshot {
    fn new(entries: HashMap<String, ClientCertificate>) -> Self {
        Self {
            entries,
            loaded_at: Instant::now(),
        }
    }

    pub fn lookup(&self, fingerprint: &str) -> Option<&IdentityRecord> {
        self.entries.get(fingerprint).map(|c| &c.record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn age(&self) -> Duration {
        self.loaded_at.elapsed()
    }

    fn certificates(&self) -> Vec<ClientCertificate> {
        let mut certificates: Vec<_> = self.entries.values().cloned().collect();
        certificates.sort_by(|a, b| a.record.display_name.cmp(&b.record.display_name));
        certificates
    }
}

/// Fingerprint → identity lookups over a credential store.
pub struct CertificateRegistry {
    store: Arc<dyn CredentialStore>,
    snapshot: ArcSwapOption<RegistrySnapshot>,
    reload_lock: Mutex<()>,
    ttl: Duration,
    suffix: String,
}

impl CertificateRegistry {
    pub fn new(store: Arc<dyn CredentialStore>, config: &CertificateStoreConfig) -> Self {
        Self {
            store,
            snapshot: ArcSwapOption::empty(),
            reload_lock: Mutex::new(()),
            ttl: Duration::from_secs(config.cache_ttl_secs),
            suffix: config.certificate_suffix.clone(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The current snapshot, reloading first when missing or stale.
    pub async fn current(&self) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        let _guard = self.reload_lock.lock().await;
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }
        self.reload_locked().await
    }

    /// Look up a fingerprint in the current snapshot.
    pub async fn lookup(&self, fingerprint: &str) -> Result<Option<IdentityRecord>, RegistryError> {
        Ok(self.current().await?.lookup(fingerprint).cloned())
    }

    /// Reload from the store unconditionally.
    pub async fn reload(&self) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        let _guard = self.reload_lock.lock().await;
        self.reload_locked().await
    }

    fn fresh(&self) -> Option<Arc<RegistrySnapshot>> {
        self.snapshot
            .load_full()
            .filter(|snapshot| snapshot.age() < self.ttl)
    }

    async fn reload_locked(&self) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        let certificates = self.load_certificates().await?;
        let entries = certificates
            .into_iter()
            .map(|c| (c.record.fingerprint.clone(), c))
            .collect();

        let snapshot = Arc::new(RegistrySnapshot::new(entries));
        self.snapshot.store(Some(snapshot.clone()));

        crate::observability::metrics::set_certificates_loaded(snapshot.len());
        tracing::info!(certificates = snapshot.len(), "Certificate registry loaded");
        Ok(snapshot)
    }

    /// Parse every certificate entry in the store.
    pub async fn load_certificates(&self) -> Result<Vec<ClientCertificate>, RegistryError> {
        let Some(entries) = self.store.read().await? else {
            return Ok(Vec::new());
        };

        let mut certificates = Vec::new();
        for (key, value) in &entries {
            if !key.ends_with(&self.suffix) {
                continue;
            }

            let der = decode_certificate(value).map_err(|reason| {
                RegistryError::InvalidCertificate {
                    key: key.clone(),
                    reason,
                }
            })?;
            let fingerprint = thumbprint(&der);
            let display_name =
                simple_name(&der).map_err(|reason| RegistryError::InvalidCertificate {
                    key: key.clone(),
                    reason,
                })?;

            let payload = entries
                .get(&format!("{fingerprint}{AUTH_SUFFIX}"))
                .ok_or_else(|| RegistryError::MissingAuth(fingerprint.clone()))?;

            certificates.push(ClientCertificate {
                record: IdentityRecord {
                    fingerprint,
                    display_name,
                    auth_payload: String::from_utf8_lossy(payload).into_owned(),
                },
                der,
            });
        }

        Ok(certificates)
    }

    /// Follow store notifications until shutdown.
    ///
    /// Returns `Ok` on shutdown and an error when the notification stream
    /// fails or ends; the caller treats the latter as fatal.
    pub async fn watch(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), RegistryError> {
        let mut events = self.store.watch();
        tracing::info!("Watching certificate store");

        loop {
            let event = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!("Certificate watch stopped");
                    return Ok(());
                }
                event = events.next() => event,
            };

            match event {
                Some(Ok(StoreEvent::Changed)) => {
                    if let Err(e) = self.reload().await {
                        tracing::error!(error = %e, "Certificate reload failed, keeping previous snapshot");
                    }
                }
                Some(Ok(StoreEvent::Deleted)) => {
                    tracing::debug!("Certificate store deleted, waiting for recreate");
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Certificate watch failed");
                    return Err(e.into());
                }
                None => return Err(RegistryError::WatchEnded),
            }
        }
    }

    /// Replace the store contents with exactly `certificates`.
    pub async fn save(&self, certificates: &[ClientCertificate]) -> Result<(), RegistryError> {
        let mut entries: Entries = BTreeMap::new();
        for certificate in certificates {
            let fingerprint = &certificate.record.fingerprint;
            entries.insert(format!("{fingerprint}{}", self.suffix), certificate.der.clone());
            entries.insert(
                format!("{fingerprint}{AUTH_SUFFIX}"),
                certificate.record.auth_payload.clone().into_bytes(),
            );
        }

        self.store.write(entries).await?;
        self.reload().await?;
        Ok(())
    }

    /// Add a certificate for `username`.
    pub async fn register(
        &self,
        der: Vec<u8>,
        username: &str,
        groups: &[String],
    ) -> Result<ClientCertificate, RegistryError> {
        let certificate = ClientCertificate::new(der, username, groups)?;
        let mut certificates = self.load_certificates().await?;

        if certificates
            .iter()
            .any(|c| c.record.display_name == certificate.record.display_name)
        {
            return Err(RegistryError::Duplicate(certificate.record.display_name));
        }

        certificates.push(certificate.clone());
        self.save(&certificates).await?;

        tracing::info!(
            name = %certificate.record.display_name,
            thumbprint = %certificate.record.fingerprint,
            "Client certificate registered"
        );
        Ok(certificate)
    }

    /// Remove the certificate with display name `name`.
    pub async fn remove(&self, name: &str) -> Result<(), RegistryError> {
        let mut certificates = self.load_certificates().await?;
        let before = certificates.len();
        certificates.retain(|c| c.record.display_name != name);

        if certificates.len() == before {
            return Err(RegistryError::NotRegistered(name.to_string()));
        }

        self.save(&certificates).await?;
        tracing::info!(name = %name, "Client certificate removed");
        Ok(())
    }

    /// Registered certificates, sorted by display name.
    pub async fn list(&self) -> Result<Vec<ClientCertificate>, RegistryError> {
        Ok(self.current().await?.certificates())
    }
}

/// Uppercase hex SHA-1 of a DER encoded certificate.
pub fn thumbprint(der: &[u8]) -> String {
    hex::encode_upper(Sha1::digest(der))
}

/// Subject common name, falling back to the thumbprint.
pub fn simple_name(der: &[u8]) -> Result<String, String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).map_err(|e| e.to_string())?;
    let name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| thumbprint(der));
    Ok(name)
}

/// Accept DER as is, or the first certificate of a PEM bundle.
fn decode_certificate(bytes: &[u8]) -> Result<Vec<u8>, String> {
    if bytes.starts_with(b"-----BEGIN") {
        let mut reader = bytes;
        let der = rustls_pemfile::certs(&mut reader)
            .next()
            .ok_or_else(|| "PEM contains no certificate".to_string())?
            .map_err(|e| e.to_string())?;
        return Ok(der.to_vec());
    }

    x509_parser::parse_x509_certificate(bytes).map_err(|e| e.to_string())?;
    Ok(bytes.to_vec())
}
