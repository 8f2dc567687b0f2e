//! Backup extraction subsystem.
//!
//! # Data Flow
//! ```text
//! POST /admin/backup (Host, ?compression)
//!     → BackupService::start
//!         → host → pod (static map)
//!         → RemoteExecutor::resolve (readiness gate, 503)
//!         → job.rs (BackupJob: base dir, file name, headers)
//!         → spawned task: orchestrator.rs ──tar──▶ duplex writer
//!     ← headers (oneshot) + duplex reader as the response body
//! ```
//!
//! # Design Decisions
//! - The orchestrator runs in its own task; dropping the response cancels
//!   remote commands but never skips cleanup
//! - Failures before headers become an error status; later failures only
//!   truncate the body

pub mod job;
pub mod orchestrator;

use std::collections::HashMap;

use axum::body::Body;
use futures_util::StreamExt;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::config::BackupConfig;
use crate::exec::RemoteExecutor;

pub use job::{to_unix_directory, BackupJob, Compression, PathNotRooted};
pub use orchestrator::{BackupError, BackupHeaders, BackupOrchestrator, BackupPhase, BackupReport};

/// A backup whose headers are final and whose archive is streaming.
pub struct BackupStream {
    pub headers: BackupHeaders,
    pub body: Body,
}

/// Entry point used by the HTTP layer.
pub struct BackupService {
    orchestrator: BackupOrchestrator,
    pods: HashMap<String, String>,
    data_directory: String,
    temp_directory: String,
    stream_buffer: usize,
}

impl BackupService {
    pub fn new(executor: RemoteExecutor, config: &BackupConfig) -> Self {
        Self {
            orchestrator: BackupOrchestrator::new(executor),
            pods: config
                .pods
                .iter()
                .map(|(host, pod)| (host.to_ascii_lowercase(), pod.clone()))
                .collect(),
            data_directory: config.data_directory.clone(),
            temp_directory: config.temp_directory.clone(),
            stream_buffer: config.stream_buffer_bytes,
        }
    }

    /// Pod serving the public `host`; case-insensitive.
    pub fn pod_for(&self, host: &str) -> Option<&str> {
        self.pods.get(&host.to_ascii_lowercase()).map(String::as_str)
    }

    /// Start a backup of the node behind `host`.
    ///
    /// Returns once the response headers are known, or with the error that
    /// stopped the run before that point.
    pub async fn start(&self, host: &str, compression: Compression) -> Result<BackupStream, BackupError> {
        let pod = self
            .pod_for(host)
            .ok_or_else(|| BackupError::HostNotMapped(host.to_string()))?;

        let target = self.orchestrator.executor().resolve(pod).await?;
        let job = BackupJob::new(&self.temp_directory, &self.data_directory, host, compression)?;

        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let (mut writer, reader) = tokio::io::duplex(self.stream_buffer);
        let (headers_tx, headers_rx) = oneshot::channel();

        let orchestrator = self.orchestrator.clone();
        let task = tokio::spawn(async move {
            orchestrator
                .run(&target, &job, headers_tx, &mut writer, &cancel)
                .await
        });

        match headers_rx.await {
            Ok(headers) => {
                // The guard lives as long as the body; dropping it cancels the run.
                let body = ReaderStream::new(reader).map(move |chunk| {
                    let _ = &guard;
                    chunk
                });
                Ok(BackupStream {
                    headers,
                    body: Body::from_stream(body),
                })
            }
            Err(_) => match task.await {
                Ok(Err(e)) => Err(e),
                Ok(Ok(_)) => Err(BackupError::HeadersDropped),
                Err(e) => Err(BackupError::Task(e.to_string())),
            },
        }
    }
}
