//! kfzf kubehub: cluster configuration, watch/poll wiring into stores,
//! API resource discovery and collector-pod tunnels.

#![forbid(unsafe_code)]

pub mod cluster;
pub mod discovery;
pub mod tunnel;
pub mod watcher;

pub use cluster::{current_context, current_namespace, ClusterConfig, IN_CLUSTER};
pub use discovery::{api_resource_items, dump_api_resources};
pub use tunnel::{list_collector_pods, open_tunnel, Tunnel, TunnelError};
pub use watcher::{api_resource_for, parse_namespace_filters, parse_resource_list, ResourceWatcher, WatcherConfig, WatcherError};

/// Serialize an object for the store, dropping `metadata.managedFields`.
pub(crate) fn to_raw<K: serde::Serialize>(obj: &K) -> Result<serde_json::Value, serde_json::Error> {
    let mut v = serde_json::to_value(obj)?;
    strip_managed_fields(&mut v);
    Ok(v)
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_fields_are_dropped() {
        let obj = serde_json::json!({"metadata": {"name": "a", "managedFields": [{"manager": "kubectl"}]}});
        let raw = to_raw(&obj).unwrap();
        assert!(raw["metadata"].get("managedFields").is_none());
        assert_eq!(raw["metadata"]["name"], "a");
    }
}
