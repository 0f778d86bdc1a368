//! Collector pod lookup and local port-forward tunnels.

use std::net::SocketAddr;

use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams},
    Client,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("port-forward request failed: {0}")]
    Kube(#[from] kube::Error),
    #[error("binding local tunnel port: {0}")]
    Io(#[from] std::io::Error),
}

/// Running collector pods matching `label_selector`, optionally restricted to `namespace`.
pub async fn list_collector_pods(client: Client, namespace: Option<&str>, label_selector: &str) -> Result<Vec<Pod>, kube::Error> {
    let api: Api<Pod> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let lp = ListParams::default().labels(label_selector).fields("status.phase=Running");
    Ok(api.list(&lp).await?.items)
}

/// An open local listener forwarding to a pod port. Closed on [`Tunnel::close`] or drop.
pub struct Tunnel {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Tunnel {
    pub fn local_addr(&self) -> SocketAddr { self.local_addr }

    /// `host:port` to reach the forwarded pod port.
    pub fn endpoint(&self) -> String { self.local_addr.to_string() }

    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!(addr = %self.local_addr, "tunnel closed");
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) { self.cancel.cancel(); }
}

/// Open a tunnel from `127.0.0.1:local_port` (0 = ephemeral) to `pod:remote_port`.
/// The first port-forward is opened before returning so setup errors surface here.
pub async fn open_tunnel(client: Client, namespace: &str, pod: &str, local_port: u16, remote_port: u16) -> Result<Tunnel, TunnelError> {
    let api: Api<Pod> = Api::namespaced(client, namespace);
    let first = api.portforward(pod, &[remote_port]).await?;
    let listener = TcpListener::bind(("127.0.0.1", local_port)).await?;
    let local_addr = listener.local_addr()?;
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let pod = pod.to_string();
    info!(pod = %pod, ns = %namespace, addr = %local_addr, remote_port, "tunnel ready");

    let task = tokio::spawn(async move {
        let mut pending = Some(first);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => {
                    let (mut inbound, peer) = match accepted {
                        Ok(c) => c,
                        Err(e) => { warn!(error = %e, "tunnel accept failed"); break; }
                    };
                    let forwarder = match pending.take() {
                        Some(pf) => Ok(pf),
                        None => api.portforward(&pod, &[remote_port]).await,
                    };
                    let mut pf = match forwarder {
                        Ok(pf) => pf,
                        Err(e) => { warn!(error = %e, "port-forward failed"); continue; }
                    };
                    let conn_token = token.clone();
                    tokio::spawn(async move {
                        let Some(mut upstream) = pf.take_stream(remote_port) else {
                            warn!("port-forward stream missing");
                            return;
                        };
                        tokio::select! {
                            _ = conn_token.cancelled() => {}
                            res = tokio::io::copy_bidirectional(&mut inbound, &mut upstream) => {
                                if let Err(e) = res { debug!(peer = %peer, error = %e, "tunnel connection ended with error"); }
                            }
                        }
                    });
                }
            }
        }
    });
    Ok(Tunnel { local_addr, cancel, task: Some(task) })
}
