//! Completion candidates for an in-progress command line.

use kfzf_core::{header_for, render_row, Resource, ResourceType, Snapshot};
use kfzf_fetcher::SnapshotSource;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::format::format_completion;
use crate::parse::{parse_flag_and_resource, parse_namespace_from_args, FlagCompletion};
use crate::CompletionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    Label,
    FieldSelector,
}

impl TagType {
    fn column(&self) -> &'static str {
        match self {
            TagType::Label => "Label",
            TagType::FieldSelector => "FieldSelector",
        }
    }

    fn pairs<'a>(&self, r: &'a Resource) -> &'a [(String, String)] {
        match self {
            TagType::Label => &r.labels,
            TagType::FieldSelector => &r.field_selectors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub cluster: String,
    pub header: String,
    pub completions: Vec<String>,
}

impl CompletionResult {
    /// `Cluster: <name>`, the header, then one line per candidate, tab-aligned.
    pub fn formatted_output(&self) -> String {
        let mut lines = Vec::with_capacity(self.completions.len() + 1);
        lines.push(self.header.as_str());
        lines.extend(self.completions.iter().map(String::as_str));
        format!("Cluster: {}\n{}", self.cluster, format_completion(&lines))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub namespace: String,
    pub value: String,
    pub count: usize,
}

impl Occurrence {
    fn to_row(&self, namespaced: bool) -> String {
        if namespaced {
            format!("{}\t{}\t{}", self.namespace, self.value, self.count)
        } else {
            format!("{}\t{}", self.value, self.count)
        }
    }
}

fn in_namespace(r: &Resource, namespace: Option<&str>) -> bool {
    namespace.map_or(true, |ns| r.namespace.as_deref() == Some(ns))
}

/// Count `key=value` pairs per namespace, most frequent first, then by namespace and value.
pub fn tag_occurrences(snapshot: &Snapshot, namespace: Option<&str>, tag: TagType) -> Vec<Occurrence> {
    let mut counts: FxHashMap<(&str, String), usize> = FxHashMap::default();
    for r in snapshot.values().filter(|r| in_namespace(r, namespace)) {
        for (k, v) in tag.pairs(r) {
            *counts.entry((r.namespace_or_none(), format!("{}={}", k, v))).or_default() += 1;
        }
    }
    let mut out: Vec<Occurrence> = counts
        .into_iter()
        .map(|((ns, value), count)| Occurrence { namespace: ns.to_string(), value, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.namespace.cmp(&b.namespace)).then_with(|| a.value.cmp(&b.value)));
    out
}

pub fn tag_header(rt: ResourceType, tag: TagType) -> String {
    let mut cols = Vec::with_capacity(3);
    if rt.is_namespaced() {
        cols.push("Namespace");
    }
    cols.push(tag.column());
    cols.push("Occurrences");
    cols.join("\t")
}

/// One formatted row per resource, sorted.
pub fn resource_rows(rt: ResourceType, snapshot: &Snapshot, namespace: Option<&str>, now: i64) -> Vec<String> {
    let mut rows: Vec<String> = snapshot.values().filter(|r| in_namespace(r, namespace)).map(|r| render_row(rt, r, now)).collect();
    rows.sort();
    rows
}

pub struct CompletionEngine<S> {
    source: S,
    cluster: String,
}

impl<S: SnapshotSource> CompletionEngine<S> {
    pub fn new(source: S, cluster: impl Into<String>) -> Self { Self { source, cluster: cluster.into() } }

    pub fn source(&self) -> &S { &self.source }

    pub async fn process_command_args<A: AsRef<str> + Sync>(&self, verb: &str, args: &[A]) -> Result<CompletionResult, CompletionError> {
        self.process_command_args_at(verb, args, chrono::Utc::now().timestamp()).await
    }

    /// Same as [`Self::process_command_args`] with ages computed against `now` (unix seconds).
    pub async fn process_command_args_at<A: AsRef<str> + Sync>(&self, verb: &str, args: &[A], now: i64) -> Result<CompletionResult, CompletionError> {
        let (rt, flag) = parse_flag_and_resource(verb, args)?;
        // only namespaced kinds can be narrowed, and never while completing the namespace itself
        let namespace = match flag {
            FlagCompletion::Namespace => None,
            _ if !rt.is_namespaced() => None,
            _ => parse_namespace_from_args(args),
        };
        debug!(resource = %rt, flag = %flag, namespace = ?namespace, "completing");

        let tag = match flag {
            FlagCompletion::Label => Some(TagType::Label),
            FlagCompletion::FieldSelector => Some(TagType::FieldSelector),
            _ => None,
        };
        if tag.is_some() && rt == ResourceType::ApiResource {
            return Err(CompletionError::NoOccurrenceOnApiResources);
        }
        let snapshot = self.source.get_resources(rt).await?;

        let (header, completions) = match tag {
            Some(tag) => {
                let rows = tag_occurrences(&snapshot, namespace, tag).iter().map(|o| o.to_row(rt.is_namespaced())).collect();
                (tag_header(rt, tag), rows)
            }
            None => (header_for(rt).join("\t"), resource_rows(rt, &snapshot, namespace, now)),
        };
        Ok(CompletionResult { cluster: self.cluster.clone(), header, completions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfzf_core::{project, CtorConfig};
    use serde_json::json;

    fn snapshot(rt: ResourceType, items: &[serde_json::Value]) -> Snapshot {
        items
            .iter()
            .map(|v| {
                let r = project(rt, v, &CtorConfig::default()).unwrap();
                (r.key(), r)
            })
            .collect()
    }

    fn pod(name: &str, ns: &str, labels: serde_json::Value) -> serde_json::Value {
        json!({"metadata": {"name": name, "namespace": ns, "labels": labels}, "spec": {"nodeName": "minikube"}, "status": {"phase": "Running"}})
    }

    #[test]
    fn occurrences_rank_by_count_then_namespace_then_value() {
        let snap = snapshot(
            ResourceType::Pod,
            &[
                pod("etcd", "kube-system", json!({"tier": "control-plane"})),
                pod("apiserver", "kube-system", json!({"tier": "control-plane"})),
                pod("scheduler", "kube-system", json!({"tier": "control-plane"})),
                pod("controller", "kube-system", json!({"tier": "control-plane"})),
                pod("coredns", "kube-system", json!({"k8s-app": "kube-dns"})),
                pod("web", "default", json!({"k8s-app": "kube-dns"})),
            ],
        );
        let occ = tag_occurrences(&snap, None, TagType::Label);
        assert_eq!(occ[0].to_row(true), "kube-system\ttier=control-plane\t4");
        assert_eq!(occ[1].to_row(true), "default\tk8s-app=kube-dns\t1");
        assert_eq!(occ[2].to_row(true), "kube-system\tk8s-app=kube-dns\t1");

        let only_default = tag_occurrences(&snap, Some("default"), TagType::Label);
        assert_eq!(only_default.len(), 1);

        let fs = tag_occurrences(&snap, None, TagType::FieldSelector);
        assert_eq!(fs[0].to_row(true), "kube-system\tspec.nodeName=minikube\t5");
    }

    #[test]
    fn headers_follow_scope() {
        assert_eq!(tag_header(ResourceType::Pod, TagType::Label), "Namespace\tLabel\tOccurrences");
        assert_eq!(tag_header(ResourceType::Node, TagType::FieldSelector), "FieldSelector\tOccurrences");
    }

    #[test]
    fn formatted_output_starts_with_cluster() {
        let res = CompletionResult { cluster: "minikube".into(), header: "Name\tAge".into(), completions: vec!["web-0\t1d".into()] };
        assert_eq!(res.formatted_output(), "Cluster: minikube\nName  Age\nweb-0 1d\n");
    }
}
