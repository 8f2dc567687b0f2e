//! Exec transport abstraction.

use async_trait::async_trait;
use serde::Serialize;

use crate::exec::demux::FrameSource;
use crate::exec::error::ExecError;

/// Name and image of a container in the target pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
}

/// Where commands run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    pub pod: String,
    pub namespace: String,
    /// Container to exec into; the pod default when `None`.
    pub container: Option<String>,
    pub containers: Vec<ContainerInfo>,
}

impl std::fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)?;
        if let Some(container) = &self.container {
            write!(f, ":{}", container)?;
        }
        Ok(())
    }
}

/// Opens command channels against a target.
///
/// Every channel is opened with stdin disabled, stdout and stderr captured
/// and no tty.
#[async_trait]
pub trait ExecTransport: Send + Sync {
    /// Look up a pod, failing with [`ExecError::PodNotReady`] when the
    /// transport enforces readiness and a container is not ready.
    async fn resolve(&self, pod: &str) -> Result<ExecTarget, ExecError>;

    /// Start `command` and return its multiplexed output.
    async fn open(
        &self,
        target: &ExecTarget,
        command: &[String],
    ) -> Result<Box<dyn FrameSource>, ExecError>;
}
