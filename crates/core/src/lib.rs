//! kfzf core types: resource types, the resource model and snapshots.

#![forbid(unsafe_code)]

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod columns;

pub use columns::{header_for, project, render_age, render_row};

/// Closed set of resource types known to the collector and the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    ApiResource,
    ConfigMap,
    CronJob,
    DaemonSet,
    Deployment,
    Endpoints,
    HorizontalPodAutoscaler,
    Ingress,
    Job,
    Namespace,
    Node,
    Pod,
    PersistentVolume,
    PersistentVolumeClaim,
    ReplicaSet,
    Secret,
    Service,
    ServiceAccount,
    StatefulSet,
    Unknown,
}

impl ResourceType {
    /// Every type the collector can watch or poll (excludes the API resource list and `Unknown`).
    pub const WATCHABLE: [ResourceType; 18] = [
        ResourceType::ConfigMap,
        ResourceType::CronJob,
        ResourceType::DaemonSet,
        ResourceType::Deployment,
        ResourceType::Endpoints,
        ResourceType::HorizontalPodAutoscaler,
        ResourceType::Ingress,
        ResourceType::Job,
        ResourceType::Namespace,
        ResourceType::Node,
        ResourceType::Pod,
        ResourceType::PersistentVolume,
        ResourceType::PersistentVolumeClaim,
        ResourceType::ReplicaSet,
        ResourceType::Secret,
        ResourceType::Service,
        ResourceType::ServiceAccount,
        ResourceType::StatefulSet,
    ];

    /// Canonical plural name; used as cache file name and HTTP path segment.
    pub fn name(&self) -> &'static str {
        match self {
            ResourceType::ApiResource => "apiresources",
            ResourceType::ConfigMap => "configmaps",
            ResourceType::CronJob => "cronjobs",
            ResourceType::DaemonSet => "daemonsets",
            ResourceType::Deployment => "deployments",
            ResourceType::Endpoints => "endpoints",
            ResourceType::HorizontalPodAutoscaler => "horizontalpodautoscalers",
            ResourceType::Ingress => "ingresses",
            ResourceType::Job => "jobs",
            ResourceType::Namespace => "namespaces",
            ResourceType::Node => "nodes",
            ResourceType::Pod => "pods",
            ResourceType::PersistentVolume => "persistentvolumes",
            ResourceType::PersistentVolumeClaim => "persistentvolumeclaims",
            ResourceType::ReplicaSet => "replicasets",
            ResourceType::Secret => "secrets",
            ResourceType::Service => "services",
            ResourceType::ServiceAccount => "serviceaccounts",
            ResourceType::StatefulSet => "statefulsets",
            ResourceType::Unknown => "unknown",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(
            self,
            ResourceType::ApiResource | ResourceType::Namespace | ResourceType::Node | ResourceType::PersistentVolume | ResourceType::Unknown
        )
    }

    /// Types without incremental events; the collector relists them on a timer.
    pub fn is_polled(&self) -> bool {
        matches!(self, ResourceType::Node | ResourceType::Namespace)
    }

    /// Case-sensitive alias match. Unmatched input yields `Unknown`.
    pub fn parse(s: &str) -> ResourceType {
        match s {
            "apiresources" | "apiresource" => ResourceType::ApiResource,
            "cm" | "configmaps" | "configmap" => ResourceType::ConfigMap,
            "cronjobs" | "cronjob" | "cj" | "cronjobs.batch" => ResourceType::CronJob,
            "daemonsets" | "daemonset" | "ds" | "daemonsets.apps" => ResourceType::DaemonSet,
            "deployments" | "deployment" | "deploy" | "deployments.apps" => ResourceType::Deployment,
            "endpoints" | "endpoint" | "ep" => ResourceType::Endpoints,
            "horizontalpodautoscalers" | "horizontalpodautoscaler" | "hpas" | "hpa" | "horizontalpodautoscalers.autoscaling" => ResourceType::HorizontalPodAutoscaler,
            "ingresses" | "ingress" | "ing" | "ingresses.networking.k8s.io" => ResourceType::Ingress,
            "jobs" | "job" | "jobs.batch" => ResourceType::Job,
            "namespaces" | "namespace" | "ns" => ResourceType::Namespace,
            "nodes" | "node" | "no" => ResourceType::Node,
            "pods" | "pod" | "po" | "p" => ResourceType::Pod,
            "persistentvolumes" | "persistentvolume" | "pv" => ResourceType::PersistentVolume,
            "persistentvolumeclaims" | "persistentvolumeclaim" | "pvc" => ResourceType::PersistentVolumeClaim,
            "replicasets" | "replicaset" | "rs" | "replicasets.apps" => ResourceType::ReplicaSet,
            "secrets" | "secret" => ResourceType::Secret,
            "services" | "service" | "svc" => ResourceType::Service,
            "serviceaccounts" | "serviceaccount" | "sa" => ResourceType::ServiceAccount,
            "statefulsets" | "statefulset" | "statefulsets.apps" | "sts" => ResourceType::StatefulSet,
            _ => ResourceType::Unknown,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("object is not a JSON object")]
    NotAnObject,
    #[error("object has no metadata.name")]
    MissingName,
}

/// Options applied when building resources from raw objects.
#[derive(Debug, Clone, Default)]
pub struct CtorConfig {
    /// Node roles hidden from the node `Roles` column.
    pub ignored_node_roles: FxHashSet<String>,
}

/// One cluster object, reduced to what completion needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// `None` for cluster-scoped kinds.
    pub namespace: Option<String>,
    pub name: String,
    /// Unix seconds; 0 when unknown.
    pub creation_ts: i64,
    pub labels: SmallVec<[(String, String); 8]>,
    pub field_selectors: SmallVec<[(String, String); 2]>,
    /// Kind-specific display fields, in header order.
    pub fields: SmallVec<[String; 8]>,
}

impl Resource {
    pub fn key(&self) -> String {
        object_key(self.namespace.as_deref(), &self.name)
    }

    /// Whether replacing `prev` with `self` changes anything a completion would show.
    pub fn has_changed(&self, prev: &Resource) -> bool {
        self.fields != prev.fields || self.labels != prev.labels || self.field_selectors != prev.field_selectors || self.namespace != prev.namespace
    }

    /// Namespace as rendered in rows and occurrence keys.
    pub fn namespace_or_none(&self) -> &str {
        self.namespace.as_deref().unwrap_or(CLUSTER_SCOPED_NS)
    }
}

/// Namespace placeholder used in keys for cluster-scoped objects.
pub const CLUSTER_SCOPED_NS: &str = "None";

/// Stable per-object key: `<namespace>_<name>`, with `None` for cluster-scoped objects.
pub fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}_{}", ns, name),
        _ => format!("{}_{}", CLUSTER_SCOPED_NS, name),
    }
}

/// Key of a raw object, computed from its metadata.
pub fn raw_key(raw: &serde_json::Value) -> Result<String, ModelError> {
    let meta = raw.get("metadata");
    let name = meta.and_then(|m| m.get("name")).and_then(|v| v.as_str()).ok_or(ModelError::MissingName)?;
    let ns = meta.and_then(|m| m.get("namespace")).and_then(|v| v.as_str());
    Ok(object_key(ns, name))
}

/// Full set of objects of one resource type, keyed by [`object_key`].
pub type Snapshot = FxHashMap<String, Resource>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

/// Event delivered by a watch or poll task to a store.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Object(EventKind, serde_json::Value),
    /// Relist result. `namespace` limits the replacement to that namespace.
    Replace { namespace: Option<String>, items: Vec<serde_json::Value> },
}

/// Per-type summary reported by `/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub resource_type: String,
    pub item_per_namespace: std::collections::BTreeMap<String, usize>,
    /// RFC 3339; `None` until the first persist.
    pub last_dumped: Option<String>,
}

/// Format a timestamp for the `Last-Modified` header.
pub fn http_date(t: chrono::DateTime<chrono::Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn parse_http_date(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc2822(s).ok().map(|t| t.with_timezone(&chrono::Utc))
}

pub mod prelude {
    pub use super::{object_key, CtorConfig, EventKind, ModelError, Resource, ResourceStats, ResourceType, Snapshot, WatchEvent};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve() {
        assert_eq!(ResourceType::parse("po"), ResourceType::Pod);
        assert_eq!(ResourceType::parse("sts"), ResourceType::StatefulSet);
        assert_eq!(ResourceType::parse("statefulsets.apps"), ResourceType::StatefulSet);
        assert_eq!(ResourceType::parse("ns"), ResourceType::Namespace);
        assert_eq!(ResourceType::parse("Pods"), ResourceType::Unknown);
        assert_eq!(ResourceType::parse("-l"), ResourceType::Unknown);
    }

    #[test]
    fn group_qualified_names_resolve() {
        let cases = [
            ("cronjobs.batch", ResourceType::CronJob),
            ("jobs.batch", ResourceType::Job),
            ("daemonsets.apps", ResourceType::DaemonSet),
            ("deployments.apps", ResourceType::Deployment),
            ("replicasets.apps", ResourceType::ReplicaSet),
            ("statefulsets.apps", ResourceType::StatefulSet),
            ("ingresses.networking.k8s.io", ResourceType::Ingress),
            ("horizontalpodautoscalers.autoscaling", ResourceType::HorizontalPodAutoscaler),
        ];
        for (name, rt) in cases {
            assert_eq!(ResourceType::parse(name), rt, "{name}");
        }
        assert_eq!(ResourceType::parse("deployments.extensions"), ResourceType::Unknown);
    }

    #[test]
    fn names_parse_back() {
        for rt in ResourceType::WATCHABLE {
            assert_eq!(ResourceType::parse(rt.name()), rt, "{}", rt);
        }
        assert_eq!(ResourceType::parse(ResourceType::ApiResource.name()), ResourceType::ApiResource);
    }

    #[test]
    fn keys_are_stable_and_namespaced() {
        assert_eq!(object_key(Some("kube-system"), "coredns"), "kube-system_coredns");
        assert_ne!(object_key(Some("a"), "x"), object_key(Some("b"), "x"));
        assert_eq!(object_key(None, "node-1"), "None_node-1");
        assert_eq!(object_key(Some(""), "node-1"), "None_node-1");
        let raw = serde_json::json!({"metadata": {"name": "x", "namespace": "a", "resourceVersion": "1"}});
        let raw2 = serde_json::json!({"metadata": {"name": "x", "namespace": "a", "resourceVersion": "2"}});
        assert_eq!(raw_key(&raw).unwrap(), raw_key(&raw2).unwrap());
        assert_eq!(raw_key(&serde_json::json!({})), Err(ModelError::MissingName));
    }

    #[test]
    fn http_dates() {
        let t = chrono::DateTime::parse_from_rfc3339("2006-01-02T15:04:05Z").unwrap().with_timezone(&chrono::Utc);
        assert_eq!(http_date(t), "Mon, 02 Jan 2006 15:04:05 GMT");
        assert_eq!(parse_http_date("Mon, 02 Jan 2006 15:04:05 GMT"), Some(t));
        assert_eq!(parse_http_date("yesterday"), None);
    }
}
