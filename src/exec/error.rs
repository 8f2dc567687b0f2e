//! Errors raised while running remote commands.

use thiserror::Error;

use crate::exec::executor::format_command;
use crate::exec::response::ExecResponse;

/// Errors that can occur during remote execution.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The command ran but did not report success.
    #[error(transparent)]
    Command(#[from] RemoteExecError),

    /// Websocket or process plumbing failed.
    #[error("exec transport error: {0}")]
    Transport(String),

    /// Kubernetes API call failed.
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Writing to the output sink or spawning a process failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The control channel did not carry a valid status object.
    #[error("invalid control message: {0}")]
    Control(#[from] serde_json::Error),

    /// A frame arrived on a channel this executor does not read.
    #[error("unexpected channel index {0}")]
    UnexpectedChannel(u8),

    /// The exec request could not be built.
    #[error("invalid exec request: {0}")]
    Request(String),

    #[error("pod '{0}' not found")]
    PodNotFound(String),

    #[error("pod '{0}' is not ready")]
    PodNotReady(String),

    #[error("remote execution cancelled")]
    Cancelled,
}

/// A remote command finished with a status other than `Success`.
#[derive(Debug, Clone)]
pub struct RemoteExecError {
    pub command: Vec<String>,
    pub response: ExecResponse,
}

impl std::fmt::Display for RemoteExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = format!(
            "Error running command '{}': {}: {}: {}",
            format_command(self.command.as_slice()),
            self.response.status,
            self.response.message.as_deref().unwrap_or_default(),
            self.response.std_err.as_deref().unwrap_or_default(),
        );
        f.write_str(&text.replace("\r\n", "\\n").replace('\n', "\\n"))
    }
}

impl std::error::Error for RemoteExecError {}
