//! Kubernetes pod exec over the `v4.channel.k8s.io` websocket protocol.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{future, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio_tungstenite::tungstenite::Message;

use crate::exec::demux::{FrameSource, MessageFrames};
use crate::exec::error::ExecError;
use crate::exec::transport::{ContainerInfo, ExecTarget, ExecTransport};

/// Exec transport backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeExecTransport {
    client: Client,
    namespace: String,
    container: Option<String>,
    check_readiness: bool,
}

impl KubeExecTransport {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            container: None,
            check_readiness: true,
        }
    }

    pub fn with_container(mut self, container: Option<String>) -> Self {
        self.container = container;
        self
    }

    pub fn with_readiness_check(mut self, enabled: bool) -> Self {
        self.check_readiness = enabled;
        self
    }
}

#[async_trait]
impl ExecTransport for KubeExecTransport {
    async fn resolve(&self, name: &str) -> Result<ExecTarget, ExecError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let pod = pods
            .get_opt(name)
            .await?
            .ok_or_else(|| ExecError::PodNotFound(name.to_string()))?;

        if self.check_readiness && !containers_ready(&pod) {
            tracing::warn!(pod = %name, namespace = %self.namespace, "Pod containers are not ready");
            return Err(ExecError::PodNotReady(name.to_string()));
        }

        let containers = pod
            .spec
            .map(|spec| {
                spec.containers
                    .into_iter()
                    .map(|c| ContainerInfo {
                        name: c.name,
                        image: c.image.unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ExecTarget {
            pod: name.to_string(),
            namespace: self.namespace.clone(),
            container: self.container.clone(),
            containers,
        })
    }

    async fn open(
        &self,
        target: &ExecTarget,
        command: &[String],
    ) -> Result<Box<dyn FrameSource>, ExecError> {
        let mut params = AttachParams::default()
            .stdin(false)
            .stdout(true)
            .stderr(true)
            .tty(false);
        if let Some(container) = &target.container {
            params = params.container(container.clone());
        }

        let request = kube::core::Request::new(format!(
            "/api/v1/namespaces/{}/pods",
            target.namespace
        ))
        .exec(&target.pod, command.to_vec(), &params)
        .map_err(|e| ExecError::Request(e.to_string()))?;

        let connection = self.client.connect(request).await?;

        let messages = connection
            .into_stream()
            .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
            .filter_map(|message| {
                future::ready(match message {
                    Ok(Message::Binary(data)) => Some(Ok(data)),
                    Ok(Message::Text(text)) => {
                        Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes())))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(ExecError::Transport(e.to_string()))),
                })
            })
            .boxed();

        Ok(Box::new(MessageFrames::new(messages)))
    }
}

/// True when every container reports ready.
pub fn containers_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .map(|statuses| !statuses.is_empty() && statuses.iter().all(|c| c.ready))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};

    fn pod_with(ready: &[bool]) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(
                    ready
                        .iter()
                        .enumerate()
                        .map(|(i, ready)| ContainerStatus {
                            name: format!("c{i}"),
                            ready: *ready,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn readiness_requires_every_container() {
        assert!(containers_ready(&pod_with(&[true, true])));
        assert!(!containers_ready(&pod_with(&[true, false])));
        assert!(!containers_ready(&pod_with(&[])));
        assert!(!containers_ready(&Pod::default()));
    }
}
