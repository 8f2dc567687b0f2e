//! Remote command execution.
//!
//! # Responsibilities
//! - Open one exec channel per command through an [`ExecTransport`]
//! - Buffer stdout, or write it through to a sink
//! - Always capture stderr for diagnostics
//! - Turn the control channel into an [`ExecResponse`] and classify it
//!
//! # Data Flow
//! ```text
//! command ──▶ transport.open ──▶ FrameSource
//!                                   │
//!                              Demultiplexer
//!                     ┌─────────────┼──────────────┐
//!                  stdout         stderr        control
//!               buffer | sink     buffer     JSON → ExecResponse
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::exec::demux::{ChannelHandler, ChannelIndex, Demultiplexer, StreamMode};
use crate::exec::error::{ExecError, RemoteExecError};
use crate::exec::response::ExecResponse;
use crate::exec::transport::{ExecTarget, ExecTransport};

/// Buffer size for commands whose stdout is buffered.
pub const DEFAULT_EXEC_BUFFER: usize = 64 * 1024;

/// Buffer size for commands whose stdout is streamed.
pub const DEFAULT_STREAM_BUFFER: usize = 1024 * 1024;

/// Runs commands on remote targets.
#[derive(Clone)]
pub struct RemoteExecutor {
    transport: Arc<dyn ExecTransport>,
    exec_buffer: usize,
    stream_buffer: usize,
}

impl RemoteExecutor {
    pub fn new(transport: Arc<dyn ExecTransport>) -> Self {
        Self {
            transport,
            exec_buffer: DEFAULT_EXEC_BUFFER,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    pub fn with_buffers(mut self, exec_buffer: usize, stream_buffer: usize) -> Self {
        self.exec_buffer = exec_buffer;
        self.stream_buffer = stream_buffer;
        self
    }

    /// Resolve a pod name into an exec target.
    pub async fn resolve(&self, pod: &str) -> Result<ExecTarget, ExecError> {
        self.transport.resolve(pod).await
    }

    /// Run `command`, buffering stdout into the response.
    pub async fn exec(
        &self,
        target: &ExecTarget,
        command: &[&str],
        cancel: &CancellationToken,
    ) -> Result<ExecResponse, ExecError> {
        let mut output = Output {
            stdout: Stdout::Buffer(Vec::new()),
            stderr: Vec::new(),
            control: Vec::new(),
        };
        self.run(target, command, &mut output, self.exec_buffer, cancel)
            .await
    }

    /// Run `command`, writing stdout to `sink` as it arrives.
    pub async fn exec_streaming<W>(
        &self,
        target: &ExecTarget,
        command: &[&str],
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<ExecResponse, ExecError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut output = Output {
            stdout: Stdout::Sink(sink),
            stderr: Vec::new(),
            control: Vec::new(),
        };
        self.run(target, command, &mut output, self.stream_buffer, cancel)
            .await
    }

    async fn run(
        &self,
        target: &ExecTarget,
        command: &[&str],
        output: &mut Output<'_>,
        buffer_size: usize,
        cancel: &CancellationToken,
    ) -> Result<ExecResponse, ExecError> {
        let command: Vec<String> = command.iter().map(|part| part.to_string()).collect();
        let rendered = format_command(command.as_slice());

        tracing::debug!(pod = %target, command = %rendered, "Executing remote command");

        let mut source = self
            .transport
            .open(target, &command)
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    pod = %target,
                    command = %rendered,
                    error = %e,
                    "Failed to open exec channel"
                );
            })?;

        let demux = Demultiplexer::new(StreamMode::RemoteCommand, buffer_size);
        let read = demux.read(source.as_mut(), output, cancel).await;
        let read = match read {
            Ok(()) => output.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = read {
            tracing::warn!(
                pod = %target,
                command = %rendered,
                transport = %source.state(),
                error = %e,
                "Remote command stream failed"
            );
            return Err(e);
        }

        let mut response = ExecResponse::from_control(&output.control)?;
        response.std_out = output.stdout.take_text();
        response.std_err = text(std::mem::take(&mut output.stderr));

        if response.is_success() {
            return Ok(response);
        }

        tracing::warn!(
            pod = %target,
            command = %rendered,
            transport = %source.state(),
            status = %response.status,
            message = response.message.as_deref().unwrap_or_default(),
            reason = response.reason.as_deref().unwrap_or_default(),
            stderr = response.std_err.as_deref().unwrap_or_default(),
            "Remote command failed"
        );

        Err(RemoteExecError { command, response }.into())
    }
}

enum Stdout<'a> {
    Buffer(Vec<u8>),
    Sink(&'a mut (dyn AsyncWrite + Unpin + Send)),
}

impl Stdout<'_> {
    fn take_text(&mut self) -> Option<String> {
        match self {
            Stdout::Buffer(buffer) => text(std::mem::take(buffer)),
            Stdout::Sink(_) => None,
        }
    }
}

struct Output<'a> {
    stdout: Stdout<'a>,
    stderr: Vec<u8>,
    control: Vec<u8>,
}

impl Output<'_> {
    async fn flush(&mut self) -> Result<(), ExecError> {
        if let Stdout::Sink(sink) = &mut self.stdout {
            sink.flush().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<'a> ChannelHandler for Output<'a> {
    async fn on_data(&mut self, channel: ChannelIndex, data: &[u8]) -> Result<(), ExecError> {
        match channel {
            ChannelIndex::STDOUT => match &mut self.stdout {
                Stdout::Buffer(buffer) => buffer.extend_from_slice(data),
                Stdout::Sink(sink) => sink.write_all(data).await?,
            },
            ChannelIndex::STDERR => self.stderr.extend_from_slice(data),
            ChannelIndex::ERROR => self.control.extend_from_slice(data),
            other => return Err(ExecError::UnexpectedChannel(other.0)),
        }
        Ok(())
    }
}

fn text(bytes: Vec<u8>) -> Option<String> {
    if bytes.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Render a command for diagnostics.
///
/// Arguments containing a space or a double quote are wrapped in double
/// quotes with inner quotes escaped.
pub fn format_command<S: AsRef<str>>(command: &[S]) -> String {
    command
        .iter()
        .map(|part| {
            let part = part.as_ref();
            if part.contains(' ') || part.contains('"') {
                format!("\"{}\"", part.replace('"', "\\\""))
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
