//! Per-kind column registry: headers, JSON projection into [`Resource`], row rendering.

use serde_json::Value;
use smallvec::SmallVec;

use crate::{CtorConfig, ModelError, Resource, ResourceType};

/// Labels hidden from the `Labels` column. Occurrence completion still sees them.
const EXCLUDED_LABELS: &[&str] = &[
    "pod-template-generation",
    "app.kubernetes.io/name",
    "controller-revision-hash",
    "app.kubernetes.io/managed-by",
    "pod-template-hash",
    "statefulset.kubernetes.io/pod-name",
    "controller-uid",
];

const NODE_ROLE_PREFIX: &str = "node-role.kubernetes.io/";
const MAX_LIST_ITEMS: usize = 20;
const MAX_CONTAINERS_LEN: usize = 300;

/// Kind-specific columns between `Name` and `Age`.
fn kind_columns(rt: ResourceType) -> &'static [&'static str] {
    match rt {
        ResourceType::CronJob => &["Schedule", "LastSchedule", "Containers"],
        ResourceType::DaemonSet => &["Desired", "Current", "Ready", "LabelSelector", "Containers"],
        ResourceType::Deployment => &["Desired", "Current", "Up-to-date", "Available"],
        ResourceType::Endpoints => &["ReadyIps", "ReadyPods", "NotReadyIps", "NotReadyPods"],
        ResourceType::HorizontalPodAutoscaler => &["Reference", "Targets", "MinPods", "MaxPods", "Replicas"],
        ResourceType::Ingress => &["Address"],
        ResourceType::Job => &["Completions", "Containers"],
        ResourceType::Node => &["Roles", "Status", "InstanceType", "Zone", "InternalIp", "Taints", "InstanceID"],
        ResourceType::Pod => &["PodIp", "HostIp", "NodeName", "Phase", "QOSClass", "Containers", "Tolerations", "Claims"],
        ResourceType::PersistentVolume => &["Status", "StorageClass", "Zone", "Claim", "Volume", "Affinities"],
        ResourceType::PersistentVolumeClaim => &["Status", "Capacity", "VolumeName", "StorageClass"],
        ResourceType::ReplicaSet => &["Replicas", "AvailableReplicas", "ReadyReplicas", "Selector"],
        ResourceType::Secret => &["Type", "Data"],
        ResourceType::Service => &["Type", "ClusterIp", "Ports", "Selector"],
        ResourceType::ServiceAccount => &["Secrets"],
        ResourceType::StatefulSet => &["Replicas", "Selector"],
        _ => &[],
    }
}

/// Header for a full listing of `rt`.
pub fn header_for(rt: ResourceType) -> Vec<&'static str> {
    match rt {
        ResourceType::ApiResource => vec!["Name", "Shortnames", "ApiVersion", "Namespaced", "Kind"],
        ResourceType::Unknown => vec!["Unknown"],
        _ => {
            let mut cols = Vec::with_capacity(12);
            if rt.is_namespaced() { cols.push("Namespace"); }
            cols.push("Name");
            cols.extend_from_slice(kind_columns(rt));
            cols.push("Age");
            cols.push("Labels");
            cols
        }
    }
}

/// Build a [`Resource`] of type `rt` from a raw API object.
pub fn project(rt: ResourceType, raw: &Value, cfg: &CtorConfig) -> Result<Resource, ModelError> {
    if !raw.is_object() { return Err(ModelError::NotAnObject); }
    let name = raw.pointer("/metadata/name").and_then(|v| v.as_str()).ok_or(ModelError::MissingName)?;
    let namespace = raw
        .pointer("/metadata/namespace")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    let creation_ts = raw
        .pointer("/metadata/creationTimestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.timestamp())
        .unwrap_or(0);
    let mut labels: SmallVec<[(String, String); 8]> = SmallVec::new();
    if let Some(obj) = raw.pointer("/metadata/labels").and_then(|v| v.as_object()) {
        for (k, v) in obj.iter() {
            if let Some(s) = v.as_str() { labels.push((k.clone(), s.to_string())); }
        }
    }
    labels.sort();

    let mut res = Resource { namespace, name: name.to_string(), creation_ts, labels, field_selectors: SmallVec::new(), fields: SmallVec::new() };
    match rt {
        ResourceType::ApiResource => project_api_resource(raw, &mut res),
        ResourceType::CronJob => project_cronjob(raw, &mut res),
        ResourceType::DaemonSet => project_daemonset(raw, &mut res),
        ResourceType::Deployment => project_deployment(raw, &mut res),
        ResourceType::Endpoints => project_endpoints(raw, &mut res),
        ResourceType::HorizontalPodAutoscaler => project_hpa(raw, &mut res),
        ResourceType::Ingress => project_ingress(raw, &mut res),
        ResourceType::Job => project_job(raw, &mut res),
        ResourceType::Node => project_node(raw, cfg, &mut res),
        ResourceType::Pod => project_pod(raw, &mut res),
        ResourceType::PersistentVolume => project_pv(raw, &mut res),
        ResourceType::PersistentVolumeClaim => project_pvc(raw, &mut res),
        ResourceType::ReplicaSet => project_replicaset(raw, &mut res),
        ResourceType::Secret => project_secret(raw, &mut res),
        ResourceType::Service => project_service(raw, &mut res),
        ResourceType::ServiceAccount => project_service_account(raw, &mut res),
        ResourceType::StatefulSet => project_statefulset(raw, &mut res),
        ResourceType::ConfigMap | ResourceType::Namespace | ResourceType::Unknown => {}
    }
    Ok(res)
}

/// Render one completion row: tab-separated, empty cells shown as `None`.
pub fn render_row(rt: ResourceType, r: &Resource, now: i64) -> String {
    let mut cells: Vec<String> = Vec::with_capacity(r.fields.len() + 4);
    if rt == ResourceType::ApiResource {
        cells.push(r.name.clone());
        cells.extend(r.fields.iter().cloned());
    } else {
        if rt.is_namespaced() { cells.push(r.namespace_or_none().to_string()); }
        cells.push(r.name.clone());
        cells.extend(r.fields.iter().cloned());
        cells.push(render_age(r.creation_ts, now));
        cells.push(labels_string(r));
    }
    cells.iter().map(|c| cell(c)).collect::<Vec<_>>().join("\t")
}

/// Compact age like `3d4h`, `2h10m`, `5m` or `42s`.
pub fn render_age(creation_ts: i64, now: i64) -> String {
    if creation_ts <= 0 { return "-".to_string(); }
    let mut secs = (now - creation_ts).max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}

fn cell(s: &str) -> String {
    if s.is_empty() { return "None".to_string(); }
    s.chars().map(|c| if c.is_whitespace() { '_' } else { c }).collect()
}

fn labels_string(r: &Resource) -> String {
    let parts: Vec<String> = r
        .labels
        .iter()
        .filter(|(k, _)| !EXCLUDED_LABELS.contains(&k.as_str()))
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    join_or_none(parts, ",")
}

fn join_or_none(parts: Vec<String>, sep: &str) -> String {
    if parts.is_empty() { "None".to_string() } else { parts.join(sep) }
}

fn join_max_or_none(parts: Vec<String>, max: usize, sep: &str) -> String {
    if parts.len() > max {
        let mut head: Vec<String> = parts.into_iter().take(max).collect();
        head.push("...".to_string());
        return head.join(sep);
    }
    join_or_none(parts, sep)
}

fn str_at(raw: &Value, ptr: &str) -> String {
    raw.pointer(ptr).and_then(|v| v.as_str()).unwrap_or("").to_string()
}

fn num_at(raw: &Value, ptr: &str) -> String {
    raw.pointer(ptr).and_then(|v| v.as_i64()).unwrap_or(0).to_string()
}

fn last_url_part(s: &str) -> String {
    s.rsplit('/').next().unwrap_or("").to_string()
}

fn map_pairs(raw: &Value, ptr: &str) -> Vec<String> {
    let mut out: Vec<String> = raw
        .pointer(ptr)
        .and_then(|v| v.as_object())
        .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| format!("{}={}", k, s))).collect())
        .unwrap_or_default();
    out.sort();
    out
}

fn container_names(raw: &Value, spec_ptr: &str) -> String {
    let mut names: Vec<String> = Vec::new();
    for key in ["containers", "initContainers"] {
        if let Some(arr) = raw.pointer(&format!("{}/{}", spec_ptr, key)).and_then(|v| v.as_array()) {
            names.extend(arr.iter().filter_map(|c| c.get("name").and_then(|v| v.as_str()).map(|s| s.to_string())));
        }
    }
    let mut joined = join_or_none(names, ",");
    if joined.len() > MAX_CONTAINERS_LEN {
        let mut cut = MAX_CONTAINERS_LEN;
        while !joined.is_char_boundary(cut) { cut -= 1; }
        joined.truncate(cut);
    }
    joined
}

fn lb_addresses(raw: &Value) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(arr) = raw.pointer("/status/loadBalancer/ingress").and_then(|v| v.as_array()) {
        for it in arr {
            if let Some(ip) = it.get("ip").and_then(|v| v.as_str()) { out.push(ip.to_string()); }
            else if let Some(h) = it.get("hostname").and_then(|v| v.as_str()) { out.push(h.to_string()); }
        }
    }
    out
}

fn project_api_resource(raw: &Value, r: &mut Resource) {
    let short: Vec<String> = raw
        .get("shortNames")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|s| s.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default();
    r.fields.push(join_or_none(short, ","));
    r.fields.push(str_at(raw, "/groupVersion"));
    r.fields.push(raw.get("namespaced").and_then(|v| v.as_bool()).unwrap_or(false).to_string());
    r.fields.push(str_at(raw, "/kind"));
}

fn project_cronjob(raw: &Value, r: &mut Resource) {
    r.fields.push(str_at(raw, "/spec/schedule"));
    r.fields.push(str_at(raw, "/status/lastScheduleTime"));
    r.fields.push(container_names(raw, "/spec/jobTemplate/spec/template/spec"));
}

fn project_daemonset(raw: &Value, r: &mut Resource) {
    r.fields.push(num_at(raw, "/status/desiredNumberScheduled"));
    r.fields.push(num_at(raw, "/status/currentNumberScheduled"));
    r.fields.push(num_at(raw, "/status/numberReady"));
    r.fields.push(join_or_none(map_pairs(raw, "/spec/selector/matchLabels"), ","));
    r.fields.push(container_names(raw, "/spec/template/spec"));
}

fn project_deployment(raw: &Value, r: &mut Resource) {
    r.fields.push(num_at(raw, "/spec/replicas"));
    r.fields.push(num_at(raw, "/status/replicas"));
    r.fields.push(num_at(raw, "/status/updatedReplicas"));
    r.fields.push(num_at(raw, "/status/availableReplicas"));
}

fn project_endpoints(raw: &Value, r: &mut Resource) {
    let (mut ready_ips, mut ready_pods, mut not_ready_ips, mut not_ready_pods) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
    for subset in raw.get("subsets").and_then(|v| v.as_array()).into_iter().flatten() {
        for (key, ips, pods) in [("addresses", &mut ready_ips, &mut ready_pods), ("notReadyAddresses", &mut not_ready_ips, &mut not_ready_pods)] {
            for addr in subset.get(key).and_then(|v| v.as_array()).into_iter().flatten() {
                if let Some(ip) = addr.get("ip").and_then(|v| v.as_str()) { ips.push(ip.to_string()); }
                if addr.pointer("/targetRef/kind").and_then(|v| v.as_str()) == Some("Pod") {
                    if let Some(n) = addr.pointer("/targetRef/name").and_then(|v| v.as_str()) { pods.push(n.to_string()); }
                }
            }
        }
    }
    r.fields.push(join_max_or_none(ready_ips, MAX_LIST_ITEMS, ","));
    r.fields.push(join_max_or_none(ready_pods, MAX_LIST_ITEMS, ","));
    r.fields.push(join_max_or_none(not_ready_ips, MAX_LIST_ITEMS, ","));
    r.fields.push(join_max_or_none(not_ready_pods, MAX_LIST_ITEMS, ","));
}

fn project_hpa(raw: &Value, r: &mut Resource) {
    r.fields.push(format!("{}/{}", str_at(raw, "/spec/scaleTargetRef/kind"), str_at(raw, "/spec/scaleTargetRef/name")));
    let target = raw.pointer("/spec/targetCPUUtilizationPercentage").and_then(|v| v.as_i64());
    let current = raw.pointer("/status/currentCPUUtilizationPercentage").and_then(|v| v.as_i64());
    r.fields.push(match (current, target) {
        (Some(c), Some(t)) => format!("{}%/{}%", c, t),
        (None, Some(t)) => format!("<unknown>/{}%", t),
        _ => String::new(),
    });
    r.fields.push(raw.pointer("/spec/minReplicas").and_then(|v| v.as_i64()).map(|v| v.to_string()).unwrap_or_default());
    r.fields.push(num_at(raw, "/spec/maxReplicas"));
    r.fields.push(num_at(raw, "/status/currentReplicas"));
}

fn project_ingress(raw: &Value, r: &mut Resource) {
    r.fields.push(join_or_none(lb_addresses(raw), ","));
}

fn project_job(raw: &Value, r: &mut Resource) {
    let desired = raw.pointer("/spec/completions").and_then(|v| v.as_i64()).unwrap_or(1);
    let succeeded = raw.pointer("/status/succeeded").and_then(|v| v.as_i64()).unwrap_or(0);
    r.fields.push(format!("{}/{}", succeeded, desired));
    r.fields.push(container_names(raw, "/spec/template/spec"));
}

fn project_node(raw: &Value, cfg: &CtorConfig, r: &mut Resource) {
    let mut roles: Vec<String> = r
        .labels
        .iter()
        .filter_map(|(k, _)| k.strip_prefix(NODE_ROLE_PREFIX))
        .filter(|role| !cfg.ignored_node_roles.contains(*role))
        .map(|s| s.to_string())
        .collect();
    roles.sort();
    r.fields.push(join_or_none(roles, ","));

    let mut status = "Ready".to_string();
    for c in raw.pointer("/status/conditions").and_then(|v| v.as_array()).into_iter().flatten() {
        if c.get("type").and_then(|v| v.as_str()) == Some("Ready") && c.get("status").and_then(|v| v.as_str()) != Some("True") {
            status = c.get("reason").and_then(|v| v.as_str()).unwrap_or("NotReady").to_string();
        }
    }
    r.fields.push(status);

    let label = |k: &str| r.labels.iter().find(|(lk, _)| lk == k).map(|(_, v)| v.clone()).unwrap_or_default();
    let instance_type = label("node.kubernetes.io/instance-type");
    let instance_type = if instance_type.is_empty() { label("beta.kubernetes.io/instance-type") } else { instance_type };
    let zone = label("topology.kubernetes.io/zone");
    let zone = if zone.is_empty() { label("failure-domain.beta.kubernetes.io/zone") } else { zone };
    r.fields.push(instance_type);
    r.fields.push(zone);

    let mut internal_ip = String::new();
    for a in raw.pointer("/status/addresses").and_then(|v| v.as_array()).into_iter().flatten() {
        if a.get("type").and_then(|v| v.as_str()) == Some("InternalIP") {
            internal_ip = a.get("address").and_then(|v| v.as_str()).unwrap_or("").to_string();
        }
    }
    r.fields.push(internal_ip);

    let taints: Vec<String> = raw
        .pointer("/spec/taints")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|t| {
                    let key = t.get("key").and_then(|v| v.as_str()).unwrap_or("");
                    let effect = t.get("effect").and_then(|v| v.as_str()).unwrap_or("");
                    match t.get("value").and_then(|v| v.as_str()).filter(|v| !v.is_empty()) {
                        Some(val) => format!("{}={}:{}", key, val, effect),
                        None => format!("{}:{}", key, effect),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    r.fields.push(join_or_none(taints, ","));

    let provider = str_at(raw, "/spec/providerID");
    r.fields.push(if provider.is_empty() { "Unknown".to_string() } else { last_url_part(&provider) });
}

fn pod_phase(raw: &Value) -> String {
    let waiting_or_failed = |cs: &Value| -> Option<String> {
        if let Some(reason) = cs.pointer("/state/waiting/reason").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) {
            return Some(reason.to_string());
        }
        match cs.pointer("/state/terminated/reason").and_then(|v| v.as_str()) {
            Some(reason) if reason != "Completed" => Some(reason.to_string()),
            _ => None,
        }
    };
    for cs in raw.pointer("/status/initContainerStatuses").and_then(|v| v.as_array()).into_iter().flatten() {
        if let Some(reason) = waiting_or_failed(cs) { return format!("Init:{}", reason); }
    }
    for cs in raw.pointer("/status/containerStatuses").and_then(|v| v.as_array()).into_iter().flatten() {
        if let Some(reason) = waiting_or_failed(cs) { return reason; }
    }
    for c in raw.pointer("/status/conditions").and_then(|v| v.as_array()).into_iter().flatten() {
        if c.get("status").and_then(|v| v.as_str()) != Some("True") {
            if let Some(reason) = c.get("reason").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) { return reason.to_string(); }
        }
    }
    let reason = str_at(raw, "/status/reason");
    if !reason.is_empty() { return reason; }
    str_at(raw, "/status/phase")
}

fn project_pod(raw: &Value, r: &mut Resource) {
    let node = str_at(raw, "/spec/nodeName");
    let phase = pod_phase(raw);
    r.fields.push(str_at(raw, "/status/podIP"));
    r.fields.push(str_at(raw, "/status/hostIP"));
    r.fields.push(node.clone());
    r.fields.push(phase.clone());
    r.fields.push(str_at(raw, "/status/qosClass"));
    r.fields.push(container_names(raw, "/spec"));

    let tolerations: Vec<String> = raw
        .pointer("/spec/tolerations")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| {
                    let key = t.get("key").and_then(|v| v.as_str()).unwrap_or("");
                    if key.starts_with("node.kubernetes.io") { return None; }
                    let effect = t.get("effect").and_then(|v| v.as_str()).unwrap_or("");
                    Some(if t.get("operator").and_then(|v| v.as_str()) == Some("Equal") {
                        format!("{}={}:{}", key, t.get("value").and_then(|v| v.as_str()).unwrap_or(""), effect)
                    } else if key.is_empty() {
                        "Exists".to_string()
                    } else {
                        format!("{}:{}", key, effect)
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    r.fields.push(join_or_none(tolerations, ","));

    let ns = r.namespace_or_none().to_string();
    let claims: Vec<String> = raw
        .pointer("/spec/volumes")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.pointer("/persistentVolumeClaim/claimName").and_then(|c| c.as_str()))
                .map(|c| format!("{}/{}", ns, c))
                .collect()
        })
        .unwrap_or_default();
    r.fields.push(join_or_none(claims, ","));

    r.field_selectors.push(("spec.nodeName".to_string(), node));
    r.field_selectors.push(("status.phase".to_string(), phase));
}

fn project_pv(raw: &Value, r: &mut Resource) {
    r.fields.push(str_at(raw, "/status/phase"));
    r.fields.push(str_at(raw, "/spec/storageClassName"));
    let zone = r
        .labels
        .iter()
        .find(|(k, _)| k == "topology.kubernetes.io/zone" || k == "failure-domain.beta.kubernetes.io/zone")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    r.fields.push(zone);
    let claim = match (raw.pointer("/spec/claimRef/namespace").and_then(|v| v.as_str()), raw.pointer("/spec/claimRef/name").and_then(|v| v.as_str())) {
        (Some(ns), Some(name)) => format!("{}/{}", ns, name),
        _ => String::new(),
    };
    r.fields.push(claim);
    let volume = if let Some(id) = raw.pointer("/spec/awsElasticBlockStore/volumeID").and_then(|v| v.as_str()) {
        last_url_part(id)
    } else if let Some(pd) = raw.pointer("/spec/gcePersistentDisk/pdName").and_then(|v| v.as_str()) {
        pd.to_string()
    } else {
        str_at(raw, "/spec/csi/volumeHandle")
    };
    r.fields.push(volume);
    let mut affinities = Vec::new();
    for term in raw.pointer("/spec/nodeAffinity/required/nodeSelectorTerms").and_then(|v| v.as_array()).into_iter().flatten() {
        for expr in term.get("matchExpressions").and_then(|v| v.as_array()).into_iter().flatten() {
            let values: Vec<String> = expr
                .get("values")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|s| s.as_str().map(|s| s.to_string())).collect())
                .unwrap_or_default();
            affinities.push(format!(
                "{}:{}:{}",
                expr.get("key").and_then(|v| v.as_str()).unwrap_or(""),
                expr.get("operator").and_then(|v| v.as_str()).unwrap_or(""),
                join_or_none(values, ";")
            ));
        }
    }
    r.fields.push(join_or_none(affinities, ","));
}

fn project_pvc(raw: &Value, r: &mut Resource) {
    r.fields.push(str_at(raw, "/status/phase"));
    r.fields.push(str_at(raw, "/status/capacity/storage"));
    r.fields.push(str_at(raw, "/spec/volumeName"));
    r.fields.push(str_at(raw, "/spec/storageClassName"));
}

fn project_replicaset(raw: &Value, r: &mut Resource) {
    r.fields.push(num_at(raw, "/status/replicas"));
    r.fields.push(num_at(raw, "/status/availableReplicas"));
    r.fields.push(num_at(raw, "/status/readyReplicas"));
    r.fields.push(join_or_none(map_pairs(raw, "/spec/selector/matchLabels"), ","));
}

fn project_secret(raw: &Value, r: &mut Resource) {
    r.fields.push(str_at(raw, "/type"));
    r.fields.push(raw.get("data").and_then(|v| v.as_object()).map(|m| m.len()).unwrap_or(0).to_string());
}

fn project_service(raw: &Value, r: &mut Resource) {
    r.fields.push(str_at(raw, "/spec/type"));
    r.fields.push(str_at(raw, "/spec/clusterIP"));
    let ports: Vec<String> = raw
        .pointer("/spec/ports")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|p| {
                    let name = p.get("name").and_then(|v| v.as_str()).unwrap_or("");
                    let port = p.get("port").and_then(|v| v.as_i64()).unwrap_or(0);
                    match p.get("nodePort").and_then(|v| v.as_i64()).filter(|n| *n > 0) {
                        Some(node_port) => format!("{}:{}/{}", name, port, node_port),
                        None => format!("{}:{}", name, port),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    r.fields.push(join_or_none(ports, ","));
    r.fields.push(join_or_none(map_pairs(raw, "/spec/selector"), ","));
}

fn project_service_account(raw: &Value, r: &mut Resource) {
    let secrets: Vec<String> = raw
        .get("secrets")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|s| s.get("name").and_then(|v| v.as_str()).map(|s| s.to_string())).collect())
        .unwrap_or_default();
    r.fields.push(join_or_none(secrets, ","));
}

fn project_statefulset(raw: &Value, r: &mut Resource) {
    r.fields.push(format!("{}/{}", num_at(raw, "/status/readyReplicas"), num_at(raw, "/spec/replicas")));
    r.fields.push(join_or_none(map_pairs(raw, "/spec/selector/matchLabels"), ","));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod() -> Value {
        json!({
            "metadata": {"name": "coredns-1", "namespace": "kube-system", "creationTimestamp": "2024-01-01T00:00:00Z",
                          "labels": {"k8s-app": "kube-dns", "pod-template-hash": "abc"}},
            "spec": {"nodeName": "minikube", "containers": [{"name": "coredns"}],
                     "tolerations": [{"key": "CriticalAddonsOnly", "operator": "Exists"}, {"key": "node.kubernetes.io/not-ready", "effect": "NoExecute"}],
                     "volumes": [{"name": "data", "persistentVolumeClaim": {"claimName": "dns-data"}}]},
            "status": {"phase": "Running", "podIP": "10.0.0.2", "hostIP": "192.168.49.2", "qosClass": "Burstable"}
        })
    }

    #[test]
    fn pod_projection_and_row() {
        let r = project(ResourceType::Pod, &pod(), &CtorConfig::default()).unwrap();
        assert_eq!(r.key(), "kube-system_coredns-1");
        assert_eq!(r.fields.len(), kind_columns(ResourceType::Pod).len());
        assert_eq!(r.field_selectors.as_slice(), &[("spec.nodeName".to_string(), "minikube".to_string()), ("status.phase".to_string(), "Running".to_string())]);
        let created = r.creation_ts;
        let row = render_row(ResourceType::Pod, &r, created + 90_000);
        assert_eq!(
            row,
            "kube-system\tcoredns-1\t10.0.0.2\t192.168.49.2\tminikube\tRunning\tBurstable\tcoredns\tCriticalAddonsOnly:\tkube-system/dns-data\t1d1h\tk8s-app=kube-dns"
        );
        assert_eq!(row.split('\t').count(), header_for(ResourceType::Pod).len());
    }

    #[test]
    fn waiting_container_reason_wins_over_phase() {
        let mut raw = pod();
        raw["status"]["containerStatuses"] = json!([{"state": {"waiting": {"reason": "CrashLoopBackOff"}}}]);
        let r = project(ResourceType::Pod, &raw, &CtorConfig::default()).unwrap();
        assert_eq!(r.fields[3], "CrashLoopBackOff");
    }

    #[test]
    fn node_is_cluster_scoped_and_hides_ignored_roles() {
        let raw = json!({
            "metadata": {"name": "node-1", "labels": {"node-role.kubernetes.io/control-plane": "", "node-role.kubernetes.io/master": ""}},
            "spec": {"providerID": "aws:///eu-west-1a/i-0123"},
            "status": {"addresses": [{"type": "InternalIP", "address": "10.1.1.1"}]}
        });
        let mut cfg = CtorConfig::default();
        cfg.ignored_node_roles.insert("master".to_string());
        let r = project(ResourceType::Node, &raw, &cfg).unwrap();
        assert_eq!(r.key(), "None_node-1");
        assert_eq!(r.fields[0], "control-plane");
        assert_eq!(r.fields[6], "i-0123");
        let row = render_row(ResourceType::Node, &r, 0);
        assert!(row.starts_with("node-1\tcontrol-plane\tReady\tNone\tNone\t10.1.1.1\tNone\ti-0123\t-\t"), "{}", row);
    }

    #[test]
    fn api_resource_row_has_no_age_or_labels() {
        let raw = json!({"metadata": {"name": "deployments"}, "shortNames": ["deploy"], "groupVersion": "apps/v1", "namespaced": true, "kind": "Deployment"});
        let r = project(ResourceType::ApiResource, &raw, &CtorConfig::default()).unwrap();
        assert_eq!(render_row(ResourceType::ApiResource, &r, 0), "deployments\tdeploy\tapps/v1\ttrue\tDeployment");
    }

    #[test]
    fn malformed_objects_are_rejected() {
        assert_eq!(project(ResourceType::Pod, &json!("x"), &CtorConfig::default()), Err(ModelError::NotAnObject));
        assert_eq!(project(ResourceType::Pod, &json!({"metadata": {}}), &CtorConfig::default()), Err(ModelError::MissingName));
    }

    #[test]
    fn headers_include_namespace_only_when_namespaced() {
        assert_eq!(header_for(ResourceType::ConfigMap), vec!["Namespace", "Name", "Age", "Labels"]);
        assert_eq!(header_for(ResourceType::Namespace), vec!["Name", "Age", "Labels"]);
    }

    #[test]
    fn age_rendering() {
        assert_eq!(render_age(0, 100), "-");
        assert_eq!(render_age(100, 142), "42s");
        assert_eq!(render_age(100, 100 + 3 * 3600 + 600), "3h10m");
    }
}
