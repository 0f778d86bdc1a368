//! Watch and poll tasks feeding stores.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::{apps, autoscaling, batch, core::v1 as corev1, networking};
use kfzf_core::{EventKind, ResourceType, WatchEvent};
use kfzf_store::{spawn_ingest, spawn_persist_ticker, Store};
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject},
    runtime::watcher::{self, Event},
    runtime::WatchStreamExt,
    Client,
};
use metrics::counter;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("resource {0} is unknown")]
    UnknownResource(String),
    #[error("invalid namespace pattern {pattern}: {source}")]
    InvalidPattern { pattern: String, #[source] source: regex::Error },
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Empty means every watchable type.
    pub watch_resources: Vec<ResourceType>,
    pub exclude_resources: Vec<ResourceType>,
    /// Empty means every namespace.
    pub watch_namespaces: Vec<Regex>,
    pub exclude_namespaces: Vec<Regex>,
    pub node_polling_period: Duration,
    pub namespace_polling_period: Duration,
    pub queue_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            watch_resources: Vec::new(),
            exclude_resources: Vec::new(),
            watch_namespaces: Vec::new(),
            exclude_namespaces: Vec::new(),
            node_polling_period: Duration::from_secs(300),
            namespace_polling_period: Duration::from_secs(600),
            queue_capacity: 1024,
        }
    }
}

impl WatcherConfig {
    pub fn selected_types(&self) -> Vec<ResourceType> {
        ResourceType::WATCHABLE
            .iter()
            .copied()
            .filter(|rt| self.watch_resources.is_empty() || self.watch_resources.contains(rt))
            .filter(|rt| !self.exclude_resources.contains(rt))
            .collect()
    }

    pub fn has_namespace_filters(&self) -> bool {
        !self.watch_namespaces.is_empty() || !self.exclude_namespaces.is_empty()
    }

    pub fn namespace_selected(&self, ns: &str) -> bool {
        let included = self.watch_namespaces.is_empty() || self.watch_namespaces.iter().any(|re| re.is_match(ns));
        included && !self.exclude_namespaces.iter().any(|re| re.is_match(ns))
    }

    pub fn polling_period(&self, rt: ResourceType) -> Duration {
        match rt {
            ResourceType::Namespace => self.namespace_polling_period,
            _ => self.node_polling_period,
        }
    }
}

pub fn parse_resource_list(names: &[String]) -> Result<Vec<ResourceType>, WatcherError> {
    names
        .iter()
        .map(|n| match ResourceType::parse(n) {
            ResourceType::Unknown | ResourceType::ApiResource => Err(WatcherError::UnknownResource(n.clone())),
            rt => Ok(rt),
        })
        .collect()
}

pub fn parse_namespace_filters(patterns: &[String]) -> Result<Vec<Regex>, WatcherError> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|source| WatcherError::InvalidPattern { pattern: p.clone(), source }))
        .collect()
}

/// API coordinates for a watchable type.
pub fn api_resource_for(rt: ResourceType) -> Option<ApiResource> {
    let ar = match rt {
        ResourceType::ConfigMap => ApiResource::erase::<corev1::ConfigMap>(&()),
        ResourceType::CronJob => ApiResource::erase::<batch::v1::CronJob>(&()),
        ResourceType::DaemonSet => ApiResource::erase::<apps::v1::DaemonSet>(&()),
        ResourceType::Deployment => ApiResource::erase::<apps::v1::Deployment>(&()),
        ResourceType::Endpoints => ApiResource::erase::<corev1::Endpoints>(&()),
        ResourceType::HorizontalPodAutoscaler => ApiResource::erase::<autoscaling::v1::HorizontalPodAutoscaler>(&()),
        ResourceType::Ingress => ApiResource::erase::<networking::v1::Ingress>(&()),
        ResourceType::Job => ApiResource::erase::<batch::v1::Job>(&()),
        ResourceType::Namespace => ApiResource::erase::<corev1::Namespace>(&()),
        ResourceType::Node => ApiResource::erase::<corev1::Node>(&()),
        ResourceType::Pod => ApiResource::erase::<corev1::Pod>(&()),
        ResourceType::PersistentVolume => ApiResource::erase::<corev1::PersistentVolume>(&()),
        ResourceType::PersistentVolumeClaim => ApiResource::erase::<corev1::PersistentVolumeClaim>(&()),
        ResourceType::ReplicaSet => ApiResource::erase::<apps::v1::ReplicaSet>(&()),
        ResourceType::Secret => ApiResource::erase::<corev1::Secret>(&()),
        ResourceType::Service => ApiResource::erase::<corev1::Service>(&()),
        ResourceType::ServiceAccount => ApiResource::erase::<corev1::ServiceAccount>(&()),
        ResourceType::StatefulSet => ApiResource::erase::<apps::v1::StatefulSet>(&()),
        ResourceType::ApiResource | ResourceType::Unknown => return None,
    };
    Some(ar)
}

/// Translate a watcher event into store events.
fn translate(ev: Event<DynamicObject>, namespace: Option<&str>) -> Vec<WatchEvent> {
    let one = |kind: EventKind, o: &DynamicObject| match crate::to_raw(o) {
        Ok(raw) => Some(WatchEvent::Object(kind, raw)),
        Err(e) => {
            warn!(error = %e, "dropping unserializable object");
            None
        }
    };
    match ev {
        Event::Applied(o) => one(EventKind::Update, &o).into_iter().collect(),
        Event::Deleted(o) => one(EventKind::Delete, &o).into_iter().collect(),
        Event::Restarted(list) => {
            let items = list.iter().filter_map(|o| crate::to_raw(o).ok()).collect();
            vec![WatchEvent::Replace { namespace: namespace.map(|s| s.to_string()), items }]
        }
    }
}

fn is_forbidden(e: &watcher::Error) -> bool {
    match e {
        watcher::Error::InitialListFailed(kube::Error::Api(resp)) | watcher::Error::WatchStartFailed(kube::Error::Api(resp)) => resp.code == 403,
        watcher::Error::WatchError(resp) => resp.code == 403,
        _ => false,
    }
}

/// Spawns the tasks keeping stores current for one cluster connection.
pub struct ResourceWatcher {
    client: Client,
    config: WatcherConfig,
}

impl ResourceWatcher {
    pub fn new(client: Client, config: WatcherConfig) -> Self { Self { client, config } }

    pub fn config(&self) -> &WatcherConfig { &self.config }

    /// Namespaces to watch individually, or `None` for a single cluster-wide watch.
    async fn selected_namespaces(&self) -> anyhow::Result<Option<Vec<String>>> {
        if !self.config.has_namespace_filters() { return Ok(None); }
        let api: Api<corev1::Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        let names: Vec<String> = list
            .items
            .into_iter()
            .filter_map(|n| n.metadata.name)
            .filter(|n| self.config.namespace_selected(n))
            .collect();
        info!(count = names.len(), "namespace filters active");
        Ok(Some(names))
    }

    /// Start ingest, persist and watch (or poll) tasks for `store`.
    pub async fn start(&self, store: Arc<Store>, cancel: CancellationToken) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let rt = store.resource_type();
        let ar = api_resource_for(rt).ok_or_else(|| anyhow::anyhow!("resource {} cannot be watched", rt))?;
        let (tx, ingest) = spawn_ingest(Arc::clone(&store), self.config.queue_capacity, cancel.clone());
        let mut handles = vec![ingest, spawn_persist_ticker(Arc::clone(&store), cancel.clone())];

        if rt.is_polled() {
            let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
            handles.push(tokio::spawn(run_poll(api, rt, self.config.polling_period(rt), tx, cancel)));
            return Ok(handles);
        }

        let namespaces = if rt.is_namespaced() { self.selected_namespaces().await? } else { None };
        match namespaces {
            None => {
                let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
                handles.push(tokio::spawn(run_watch(api, rt, None, tx, cancel)));
            }
            Some(list) => {
                for ns in list {
                    let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), &ns, &ar);
                    handles.push(tokio::spawn(run_watch(api, rt, Some(ns), tx.clone(), cancel.clone())));
                }
            }
        }
        Ok(handles)
    }
}

async fn run_watch(api: Api<DynamicObject>, rt: ResourceType, namespace: Option<String>, tx: mpsc::Sender<WatchEvent>, cancel: CancellationToken) {
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    info!(resource = rt.name(), ns = ?namespace, "watcher started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(ev)) => {
                    for wev in translate(ev, namespace.as_deref()) {
                        if tx.send(wev).await.is_err() {
                            debug!(resource = rt.name(), "store queue closed; stopping watcher");
                            return;
                        }
                    }
                }
                Some(Err(e)) if is_forbidden(&e) => {
                    warn!(resource = rt.name(), ns = ?namespace, error = %e, "watch forbidden; stopping");
                    counter!("kfzf_watch_forbidden_total", 1, "resource" => rt.name());
                    break;
                }
                Some(Err(e)) => {
                    warn!(resource = rt.name(), ns = ?namespace, error = %e, "watch error; retrying with backoff");
                }
                None => {
                    warn!(resource = rt.name(), "watcher stream ended");
                    break;
                }
            }
        }
    }
    info!(resource = rt.name(), ns = ?namespace, "watcher stopped");
}

async fn run_poll(api: Api<DynamicObject>, rt: ResourceType, period: Duration, tx: mpsc::Sender<WatchEvent>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    info!(resource = rt.name(), period_s = period.as_secs(), "poller started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match api.list(&ListParams::default()).await {
                    Ok(list) => {
                        let items = list.items.iter().filter_map(|o| crate::to_raw(o).ok()).collect();
                        if tx.send(WatchEvent::Replace { namespace: None, items }).await.is_err() { break; }
                    }
                    Err(kube::Error::Api(resp)) if resp.code == 403 => {
                        warn!(resource = rt.name(), "list forbidden; stopping poller");
                        break;
                    }
                    Err(e) => warn!(resource = rt.name(), error = %e, "poll failed; retrying next period"),
                }
            }
        }
    }
    info!(resource = rt.name(), "poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(watch: &[&str], exclude: &[&str]) -> WatcherConfig {
        let w: Vec<String> = watch.iter().map(|s| s.to_string()).collect();
        let e: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        WatcherConfig { watch_namespaces: parse_namespace_filters(&w).unwrap(), exclude_namespaces: parse_namespace_filters(&e).unwrap(), ..WatcherConfig::default() }
    }

    #[test]
    fn namespace_filters() {
        let c = cfg(&[], &[]);
        assert!(!c.has_namespace_filters());
        assert!(c.namespace_selected("anything"));

        let c = cfg(&["^team-"], &["-sandbox$"]);
        assert!(c.namespace_selected("team-a"));
        assert!(!c.namespace_selected("team-a-sandbox"));
        assert!(!c.namespace_selected("kube-system"));

        let c = cfg(&[], &["^kube-"]);
        assert!(c.has_namespace_filters());
        assert!(c.namespace_selected("default"));
        assert!(!c.namespace_selected("kube-system"));
    }

    #[test]
    fn resource_selection() {
        let mut c = WatcherConfig::default();
        assert_eq!(c.selected_types().len(), ResourceType::WATCHABLE.len());
        c.watch_resources = parse_resource_list(&["pods".into(), "svc".into(), "nodes".into()]).unwrap();
        c.exclude_resources = parse_resource_list(&["nodes".into()]).unwrap();
        assert_eq!(c.selected_types(), vec![ResourceType::Pod, ResourceType::Service]);
        assert!(matches!(parse_resource_list(&["bogus".into()]), Err(WatcherError::UnknownResource(n)) if n == "bogus"));
        assert!(parse_namespace_filters(&["(".into()]).is_err());
    }

    #[test]
    fn every_watchable_type_has_api_coordinates() {
        for rt in ResourceType::WATCHABLE {
            let ar = api_resource_for(rt).unwrap();
            assert_eq!(ar.plural, rt.name(), "{}", rt);
        }
        assert!(api_resource_for(ResourceType::ApiResource).is_none());
    }

    #[test]
    fn restarted_becomes_scoped_replace() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1", "kind": "Pod", "metadata": {"name": "a", "namespace": "ns1"}
        }))
        .unwrap();
        let evs = translate(Event::Restarted(vec![obj.clone()]), Some("ns1"));
        assert!(matches!(&evs[..], [WatchEvent::Replace { namespace: Some(ns), items }] if ns == "ns1" && items.len() == 1));
        let evs = translate(Event::Applied(obj), None);
        assert!(matches!(&evs[..], [WatchEvent::Object(EventKind::Update, _)]));
    }
}
