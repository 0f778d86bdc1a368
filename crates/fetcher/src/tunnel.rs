//! Tunnel seam: the Fetcher only needs "an endpoint that reaches the collector, closed afterwards".

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kfzf_kubehub::{list_collector_pods, open_tunnel, Tunnel};
use kube::Client;
use tracing::{info, warn};

use crate::FetchError;

/// An open tunnel to a collector. Must be closed with [`OpenTunnel::close`].
#[async_trait]
pub trait OpenTunnel: Send {
    /// `host:port` reaching the collector's HTTP port.
    fn endpoint(&self) -> String;
    /// Namespace the collector pod was found in.
    fn collector_namespace(&self) -> &str;
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait TunnelOpener: Send + Sync {
    /// `namespace_hint` is the namespace the collector was last seen in, if any.
    async fn open(&self, namespace_hint: Option<&str>) -> Result<Box<dyn OpenTunnel>, FetchError>;
}

/// Port-forwards to the running collector pod selected by label.
pub struct KubeTunnelOpener {
    client: Client,
    label_selector: String,
    namespace: Option<String>,
    local_port: u16,
}

impl KubeTunnelOpener {
    pub fn new(client: Client, label_selector: impl Into<String>, namespace: Option<String>, local_port: u16) -> Self {
        Self { client, label_selector: label_selector.into(), namespace, local_port }
    }
}

struct KubeTunnel {
    tunnel: Tunnel,
    namespace: String,
}

#[async_trait]
impl OpenTunnel for KubeTunnel {
    fn endpoint(&self) -> String { self.tunnel.endpoint() }

    fn collector_namespace(&self) -> &str { &self.namespace }

    async fn close(self: Box<Self>) { self.tunnel.close().await }
}

#[async_trait]
impl TunnelOpener for KubeTunnelOpener {
    async fn open(&self, namespace_hint: Option<&str>) -> Result<Box<dyn OpenTunnel>, FetchError> {
        let scope = self.namespace.as_deref().or(namespace_hint);
        let mut pods = list_collector_pods(self.client.clone(), scope, &self.label_selector).await?;
        if pods.is_empty() && self.namespace.is_none() && scope.is_some() {
            // the remembered namespace may be stale
            pods = list_collector_pods(self.client.clone(), None, &self.label_selector).await?;
        }
        let target = select_collector_target(&pods, &self.label_selector)?;
        let tunnel = open_tunnel(self.client.clone(), &target.namespace, &target.pod, self.local_port, target.port)
            .await
            .map_err(|e| FetchError::TunnelSetup(e.to_string()))?;
        info!(pod = %target.pod, ns = %target.namespace, endpoint = %tunnel.endpoint(), "collector tunnel opened");
        Ok(Box::new(KubeTunnel { tunnel, namespace: target.namespace }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorTarget {
    pub pod: String,
    pub namespace: String,
    pub port: u16,
}

/// Pick the collector pod and its single container port.
pub fn select_collector_target(pods: &[Pod], label_selector: &str) -> Result<CollectorTarget, FetchError> {
    let Some(pod) = pods.first() else {
        return Err(FetchError::NoCollectorPod { selector: label_selector.to_string() });
    };
    if pods.len() > 1 {
        warn!(count = pods.len(), selector = %label_selector, "several collector pods running, using the first");
    }
    let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or_default();
    if containers.len() != 1 {
        return Err(FetchError::ContainerCount(containers.len()));
    }
    let ports = containers[0].ports.as_deref().unwrap_or_default();
    if ports.len() != 1 {
        return Err(FetchError::PortCount(ports.len()));
    }
    let raw = ports[0].container_port;
    let port = u16::try_from(raw).ok().filter(|p| *p > 0).ok_or(FetchError::InvalidPort(raw))?;
    Ok(CollectorTarget {
        pod: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        port,
    })
}
