//! Backup orchestration over remote execution.
//!
//! # Responsibilities
//! - Prepare a scratch directory on the node and describe the run in it
//! - Commit response headers as soon as the archive is certain to start
//! - Copy index, checkpoint and chunk files, then normalize permissions
//! - Stream `tar` output straight into the response body
//! - Remove the scratch directory on every exit path
//!
//! # Data Flow
//! ```text
//! Created
//!   │ mkdir base                         (failure here: nothing to clean)
//!   ▼
//! DirectoryPrepared ─┐
//!   │ metadata/ (markers + metadata.json, concurrently)
//!   ▼                │
//! MetadataWritten    │
//!   │ headers ──▶ oneshot ──▶ HTTP 200 committed
//!   ▼                │
//! HeadersSent        │
//!   │ cp index/ (batched), *.chk, chunk-*.*
//!   ▼                │  any error
//! FilesCopied        │
//!   │ chmod 755 dirs, 644 files
//!   ▼                │
//! PermissionsFixed   │
//!   │ tar c ──stdout──▶ sink
//!   ▼                ▼
//! Completed ──▶ rm -rf base (fresh token, never cancelled)
//! ```

use axum::http::header::{HeaderName, HeaderValue};
use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::backup::job::{shell_quote, BackupJob, PathNotRooted};
use crate::exec::{ContainerInfo, ExecError, ExecTarget, RemoteExecutor};
use crate::observability::metrics;

/// Files per `cp` invocation, keeping command lines bounded.
const COPY_BATCH: usize = 500;

/// Headers handed to the HTTP layer once they are final.
pub type BackupHeaders = Vec<(HeaderName, HeaderValue)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPhase {
    Created,
    DirectoryPrepared,
    MetadataWritten,
    HeadersSent,
    FilesCopied,
    PermissionsFixed,
    Streaming,
    Completed,
}

impl std::fmt::Display for BackupPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackupPhase::Created => "created",
            BackupPhase::DirectoryPrepared => "directory_prepared",
            BackupPhase::MetadataWritten => "metadata_written",
            BackupPhase::HeadersSent => "headers_sent",
            BackupPhase::FilesCopied => "files_copied",
            BackupPhase::PermissionsFixed => "permissions_fixed",
            BackupPhase::Streaming => "streaming",
            BackupPhase::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("backup metadata could not be encoded: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error(transparent)]
    Path(#[from] PathNotRooted),

    #[error("no pod is mapped to host '{0}'")]
    HostNotMapped(String),

    #[error("response was dropped before headers were sent")]
    HeadersDropped,

    #[error("backup task failed: {0}")]
    Task(String),
}

impl BackupError {
    /// Status reported when the failure happens before headers are sent.
    pub fn status(&self) -> StatusCode {
        match self {
            BackupError::Exec(ExecError::PodNotReady(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub file_name: String,
    /// Entries `tar` reported writing.
    pub entries: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Metadata<'a> {
    date: chrono::DateTime<chrono::Utc>,
    server: &'a str,
    pod: PodMetadata<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PodMetadata<'a> {
    name: &'a str,
    namespace: &'a str,
    containers: &'a [ContainerInfo],
}

/// Drives one backup through its phases.
#[derive(Clone)]
pub struct BackupOrchestrator {
    executor: RemoteExecutor,
}

impl BackupOrchestrator {
    pub fn new(executor: RemoteExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &RemoteExecutor {
        &self.executor
    }

    /// Run the backup, writing the archive to `sink`.
    ///
    /// `headers` fires once the archive is certain to start; if it never
    /// fires the caller still owns the response status.
    pub async fn run<W>(
        &self,
        target: &ExecTarget,
        job: &BackupJob,
        headers: oneshot::Sender<BackupHeaders>,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<BackupReport, BackupError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let base = job.remote_base_dir.as_str();
        tracing::info!(
            pod = %target,
            base = %base,
            server = %job.server_name,
            compression = job.compression.as_str(),
            "Creating backup"
        );

        self.executor.exec(target, &["mkdir", base], cancel).await?;

        let mut phase = BackupPhase::DirectoryPrepared;
        let result = self
            .phases(target, job, headers, sink, cancel, &mut phase)
            .await;

        // Runs even when the request was cancelled.
        let cleanup = CancellationToken::new();
        if let Err(e) = self
            .executor
            .exec(target, &["rm", "-rf", base], &cleanup)
            .await
        {
            tracing::error!(pod = %target, base = %base, error = %e, "Backup cleanup failed");
        }

        match &result {
            Ok(report) => tracing::info!(
                pod = %target,
                file = %report.file_name,
                entries = report.entries,
                "Backup completed"
            ),
            Err(e) => tracing::error!(pod = %target, phase = %phase, error = %e, "Backup failed"),
        }
        metrics::record_backup(job.compression.as_str(), result.is_ok());
        result
    }

    async fn phases<W>(
        &self,
        target: &ExecTarget,
        job: &BackupJob,
        headers: oneshot::Sender<BackupHeaders>,
        sink: &mut W,
        cancel: &CancellationToken,
        phase: &mut BackupPhase,
    ) -> Result<BackupReport, BackupError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.write_metadata(target, job, cancel).await?;
        *phase = BackupPhase::MetadataWritten;

        headers
            .send(job.headers())
            .map_err(|_| BackupError::HeadersDropped)?;
        *phase = BackupPhase::HeadersSent;

        self.copy_files(target, job, cancel).await?;
        *phase = BackupPhase::FilesCopied;

        self.fix_permissions(target, job, cancel).await?;
        *phase = BackupPhase::PermissionsFixed;

        *phase = BackupPhase::Streaming;
        let entries = self.stream_archive(target, job, sink, cancel).await?;
        *phase = BackupPhase::Completed;

        Ok(BackupReport {
            file_name: job.file_name(),
            entries,
        })
    }

    async fn write_metadata(
        &self,
        target: &ExecTarget,
        job: &BackupJob,
        cancel: &CancellationToken,
    ) -> Result<(), BackupError> {
        let dir = job.metadata_dir();
        self.executor.exec(target, &["mkdir", &dir], cancel).await?;

        let metadata = serde_json::to_vec(&Metadata {
            date: job.timestamp,
            server: &job.server_name,
            pod: PodMetadata {
                name: &target.pod,
                namespace: &target.namespace,
                containers: &target.containers,
            },
        })?;

        // Shell redirection is the only way to create a file with content.
        let write_json = format!(
            "echo '{}' | base64 -d > '{}/metadata.json' || exit $?",
            STANDARD.encode(metadata),
            dir
        );
        let stamp_marker = format!("{}/{}", dir, job.stamp());
        let server_marker = format!("{}/{}", dir, job.server_name);

        let touch_stamp = ["touch", stamp_marker.as_str()];
        let touch_server = ["touch", server_marker.as_str()];
        let write = ["/bin/sh", "-c", write_json.as_str()];

        tokio::try_join!(
            self.executor.exec(target, &touch_stamp, cancel),
            self.executor.exec(target, &touch_server, cancel),
            self.executor.exec(target, &write, cancel),
        )?;
        Ok(())
    }

    async fn copy_files(
        &self,
        target: &ExecTarget,
        job: &BackupJob,
        cancel: &CancellationToken,
    ) -> Result<(), BackupError> {
        let data = job.data_directory.as_str();
        let backup = job.backup_dir();
        self.executor.exec(target, &["mkdir", &backup], cancel).await?;

        let listing = format!("cd '{data}' && find index/ -type f || exit $?");
        let index = self
            .executor
            .exec(target, &["/bin/sh", "-c", &listing], cancel)
            .await?;

        let (checkpoints, files): (Vec<&str>, Vec<&str>) =
            index.stdout_lines().partition(|f| f.ends_with(".chk"));
        tracing::debug!(
            checkpoints = checkpoints.len(),
            files = files.len(),
            "Copying index files"
        );

        for group in [&checkpoints, &files] {
            for batch in group.chunks(COPY_BATCH) {
                let args = batch
                    .iter()
                    .map(|f| shell_quote(f))
                    .collect::<Vec<_>>()
                    .join(" ");
                self.copy(target, data, &backup, &format!("--parents {args}"), cancel)
                    .await?;
            }
        }

        self.copy(target, data, &backup, "*.chk", cancel).await?;
        self.copy(target, data, &backup, "chunk-*.*", cancel).await?;
        Ok(())
    }

    /// `cp -a <args> <backup>` from the data directory, through the shell
    /// for globbing.
    async fn copy(
        &self,
        target: &ExecTarget,
        data: &str,
        backup: &str,
        args: &str,
        cancel: &CancellationToken,
    ) -> Result<(), BackupError> {
        let script = format!("cd '{data}' && cp -a {args} '{backup}' || exit $?");
        self.executor
            .exec(target, &["/bin/sh", "-c", &script], cancel)
            .await?;
        Ok(())
    }

    async fn fix_permissions(
        &self,
        target: &ExecTarget,
        job: &BackupJob,
        cancel: &CancellationToken,
    ) -> Result<(), BackupError> {
        let base = job.remote_base_dir.as_str();
        for (kind, mode) in [("d", "755"), ("f", "644")] {
            let script = format!("find '{base}' -type {kind} -exec chmod {mode} {{}} +");
            self.executor
                .exec(target, &["/bin/sh", "-c", &script], cancel)
                .await?;
        }
        Ok(())
    }

    async fn stream_archive<W>(
        &self,
        target: &ExecTarget,
        job: &BackupJob,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<usize, BackupError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let flags = format!("-v{}OC", job.compression.tar_flag());
        let response = self
            .executor
            .exec_streaming(
                target,
                &["tar", "c", &flags, &job.remote_base_dir, "metadata/", "backup/"],
                sink,
                cancel,
            )
            .await?;
        sink.shutdown().await.map_err(ExecError::from)?;

        let entries = response.stderr_lines().count();
        tracing::info!(pod = %target, entries, "Wrote tar archive");
        Ok(entries)
    }
}
