//! Credential store: a namespaced key-value secret.
//!
//! # Responsibilities
//! - Read the whole object ("not found" is an empty store, not an error)
//! - Replace the whole object, carrying labels and annotations forward
//! - Report change notifications for the registry's watch task

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{future, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::runtime::watcher::{self, Event};
use kube::Client;
use thiserror::Error;
use tokio::sync::broadcast;

/// Key to raw bytes.
pub type Entries = BTreeMap<String, Vec<u8>>;

/// Change notification from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// Object created, updated, or listed on watch start.
    Changed,
    /// Object deleted. Updates are delete-then-create, so this is always
    /// followed by a `Changed`.
    Deleted,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("watch failed: {0}")]
    Watch(String),

    #[error("credential store lock poisoned")]
    Poisoned,
}

/// Backing store for client certificates.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `None` when the object does not exist.
    async fn read(&self) -> Result<Option<Entries>, StoreError>;

    /// Replace the object with exactly `entries`.
    async fn write(&self, entries: Entries) -> Result<(), StoreError>;

    /// Change notifications; the stream ends or errors when the watch dies.
    fn watch(&self) -> BoxStream<'static, Result<StoreEvent, StoreError>>;
}

/// A Kubernetes `Secret`.
#[derive(Clone)]
pub struct KubeSecretStore {
    api: Api<Secret>,
    namespace: String,
    name: String,
}

impl KubeSecretStore {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl CredentialStore for KubeSecretStore {
    async fn read(&self) -> Result<Option<Entries>, StoreError> {
        let Some(secret) = self.api.get_opt(&self.name).await? else {
            tracing::debug!(namespace = %self.namespace, secret = %self.name, "Secret not found");
            return Ok(None);
        };

        Ok(Some(
            secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| (key, value.0))
                .collect(),
        ))
    }

    async fn write(&self, entries: Entries) -> Result<(), StoreError> {
        let existing = self.api.get_opt(&self.name).await?;
        let (labels, annotations) = match &existing {
            Some(secret) => (
                secret.metadata.labels.clone(),
                secret.metadata.annotations.clone(),
            ),
            None => (None, None),
        };

        // The secret is immutable, so an update is delete + create.
        if existing.is_some() {
            self.api.delete(&self.name, &DeleteParams::default()).await?;
        }

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels,
                annotations,
                ..Default::default()
            },
            data: Some(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, ByteString(value)))
                    .collect(),
            ),
            immutable: Some(true),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };
        self.api.create(&PostParams::default(), &secret).await?;

        tracing::info!(namespace = %self.namespace, secret = %self.name, "Secret replaced");
        Ok(())
    }

    fn watch(&self) -> BoxStream<'static, Result<StoreEvent, StoreError>> {
        let config = watcher::Config::default().fields(&format!("metadata.name={}", self.name));
        watcher::watcher(self.api.clone(), config)
            .filter_map(|event| {
                future::ready(match event {
                    Ok(Event::Apply(_)) | Ok(Event::InitApply(_)) => Some(Ok(StoreEvent::Changed)),
                    Ok(Event::Delete(_)) => Some(Ok(StoreEvent::Deleted)),
                    Ok(Event::Init) | Ok(Event::InitDone) => None,
                    Err(e) => Some(Err(StoreError::Watch(e.to_string()))),
                })
            })
            .boxed()
    }
}

/// In-process store, for single-binary setups and tests.
pub struct MemoryStore {
    entries: Mutex<Option<Entries>>,
    events: broadcast::Sender<Result<StoreEvent, String>>,
}

impl MemoryStore {
    pub fn new(entries: Option<Entries>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            entries: Mutex::new(entries),
            events,
        }
    }

    /// Push a notification to every watcher.
    pub fn notify(&self, event: StoreEvent) {
        let _ = self.events.send(Ok(event));
    }

    /// Make every watcher fail.
    pub fn fail_watch(&self, reason: &str) {
        let _ = self.events.send(Err(reason.to_string()));
    }

    /// Number of live watch streams.
    pub fn watcher_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Drop the object, as if it was deleted.
    pub fn clear(&self) -> Result<(), StoreError> {
        *self.entries.lock().map_err(|_| StoreError::Poisoned)? = None;
        self.notify(StoreEvent::Deleted);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn read(&self) -> Result<Option<Entries>, StoreError> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .map_err(|_| StoreError::Poisoned)
    }

    async fn write(&self, entries: Entries) -> Result<(), StoreError> {
        *self.entries.lock().map_err(|_| StoreError::Poisoned)? = Some(entries);
        self.notify(StoreEvent::Deleted);
        self.notify(StoreEvent::Changed);
        Ok(())
    }

    fn watch(&self) -> BoxStream<'static, Result<StoreEvent, StoreError>> {
        let rx = self.events.subscribe();
        futures_util::stream::unfold(rx, |mut rx| async move {
            let event = match rx.recv().await {
                Ok(Ok(event)) => Ok(event),
                Ok(Err(reason)) => Err(StoreError::Watch(reason)),
                // Missed notifications collapse into one reload.
                Err(broadcast::error::RecvError::Lagged(_)) => Ok(StoreEvent::Changed),
                Err(broadcast::error::RecvError::Closed) => return None,
            };
            Some((event, rx))
        })
        .boxed()
    }
}
