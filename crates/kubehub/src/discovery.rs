//! Server API resource discovery, dumped through an `apiresources` store.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kfzf_store::Store;
use kube::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Raw items for one group version. Subresources (`pods/log`, ...) are skipped;
/// non-core resources are named `<plural>.<group>`.
pub fn api_resource_items(list: &APIResourceList) -> Vec<Value> {
    let group = list.group_version.rsplit_once('/').map(|(g, _)| g).unwrap_or("");
    list.resources
        .iter()
        .filter(|r| !r.name.contains('/'))
        .map(|r| {
            let name = if group.is_empty() { r.name.clone() } else { format!("{}.{}", r.name, group) };
            json!({
                "metadata": { "name": name },
                "shortNames": r.short_names.clone().unwrap_or_default(),
                "groupVersion": list.group_version,
                "namespaced": r.namespaced,
                "kind": r.kind,
            })
        })
        .collect()
}

/// Discover preferred API resources and persist them immediately. Returns the item count.
pub async fn dump_api_resources(client: Client, store: &Store) -> anyhow::Result<usize> {
    let mut items = Vec::new();
    let core = client.list_core_api_versions().await?;
    for version in core.versions {
        let list = client.list_core_api_resources(&version).await?;
        items.extend(api_resource_items(&list));
    }
    let groups = client.list_api_groups().await?;
    for group in groups.groups {
        let Some(gv) = group.preferred_version.or_else(|| group.versions.into_iter().next()) else { continue };
        match client.list_api_group_resources(&gv.group_version).await {
            Ok(list) => items.extend(api_resource_items(&list)),
            Err(e) => warn!(group_version = %gv.group_version, error = %e, "skipping unavailable group version"),
        }
    }
    let count = items.len();
    store.replace_all(&items);
    store.persist()?;
    info!(count, path = %store.path().display(), "api resources dumped");
    Ok(count)
}
