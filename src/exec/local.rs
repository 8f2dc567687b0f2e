//! Local process transport.
//!
//! Runs commands as child processes of the proxy, for deployments where
//! the database shares the proxy's filesystem (sidecar). Output is framed
//! exactly like the Kubernetes channel protocol so the same executor and
//! demultiplexer handle both.

use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::exec::demux::{ChannelIndex, FrameSource, MessageFrames};
use crate::exec::error::ExecError;
use crate::exec::transport::{ExecTarget, ExecTransport};

const READ_CHUNK: usize = 32 * 1024;

/// Exec transport spawning local processes.
#[derive(Debug, Clone)]
pub struct LocalExecTransport {
    pod: String,
    namespace: String,
}

impl LocalExecTransport {
    /// `pod` and `namespace` are only reported in backup metadata.
    pub fn new(pod: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl ExecTransport for LocalExecTransport {
    async fn resolve(&self, pod: &str) -> Result<ExecTarget, ExecError> {
        let pod = if pod.is_empty() { &self.pod } else { pod };
        Ok(ExecTarget {
            pod: pod.to_string(),
            namespace: self.namespace.clone(),
            container: None,
            containers: Vec::new(),
        })
    }

    async fn open(
        &self,
        target: &ExecTarget,
        command: &[String],
    ) -> Result<Box<dyn FrameSource>, ExecError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ExecError::Request("empty command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Transport("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Transport("stderr not captured".to_string()))?;

        let (tx, rx) = mpsc::channel::<Result<Bytes, ExecError>>(16);
        let pod = target.pod.clone();

        tokio::spawn(async move {
            let pumps = async {
                tokio::join!(
                    pump(stdout, ChannelIndex::STDOUT, tx.clone()),
                    pump(stderr, ChannelIndex::STDERR, tx.clone()),
                )
            };

            tokio::select! {
                _ = pumps => {}
                _ = tx.closed() => {
                    tracing::debug!(pod = %pod, "Exec reader dropped, killing local process");
                    let _ = child.kill().await;
                    return;
                }
            }

            let control = match child.wait().await {
                Ok(status) => status_frame(status),
                Err(e) => {
                    let _ = tx.send(Err(ExecError::Io(e))).await;
                    return;
                }
            };
            let _ = tx.send(Ok(control)).await;
        });

        let messages = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        })
        .boxed();

        Ok(Box::new(MessageFrames::new(messages)))
    }
}

async fn pump<R>(mut reader: R, channel: ChannelIndex, tx: mpsc::Sender<Result<Bytes, ExecError>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let mut frame = BytesMut::with_capacity(n + 1);
                frame.put_u8(channel.0);
                frame.extend_from_slice(&buf[..n]);
                if tx.send(Ok(frame.freeze())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(ExecError::Io(e))).await;
                break;
            }
        }
    }
}

/// Control message in the shape the API server sends.
fn status_frame(status: ExitStatus) -> Bytes {
    let body = if status.success() {
        serde_json::json!({ "metadata": {}, "status": "Success" })
    } else {
        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        serde_json::json!({
            "metadata": {},
            "status": "Failure",
            "message": format!("command terminated with non-zero exit code: {}", status),
            "reason": "NonZeroExitCode",
            "details": { "causes": [{ "reason": "ExitCode", "message": code }] },
        })
    };

    let mut frame = BytesMut::new();
    frame.put_u8(ChannelIndex::ERROR.0);
    frame.extend_from_slice(body.to_string().as_bytes());
    frame.freeze()
}
