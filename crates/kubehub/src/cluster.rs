//! Cluster context and cache layout.

use std::path::PathBuf;

use kfzf_core::ResourceType;
use kube::config::Kubeconfig;
use tracing::debug;

/// Cluster name used when no kubeconfig context is available.
pub const IN_CLUSTER: &str = "incluster";
const DEFAULT_NAMESPACE: &str = "default";

/// Resolved cluster selection plus the cache root it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub cluster_name: String,
    pub cache_dir: PathBuf,
}

impl ClusterConfig {
    pub fn new(cluster_name: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self { cluster_name: cluster_name.into(), cache_dir: cache_dir.into() }
    }

    /// Use the kubeconfig's current context as cluster name.
    pub fn load(cache_dir: impl Into<PathBuf>) -> Self {
        let cluster_name = current_context().unwrap_or_else(|| IN_CLUSTER.to_string());
        Self::new(cluster_name, cache_dir)
    }

    /// Per-cluster directory holding one snapshot file per resource type.
    pub fn dest_dir(&self) -> PathBuf { self.cache_dir.join(&self.cluster_name) }

    pub fn resource_store_path(&self, rt: ResourceType) -> PathBuf { self.dest_dir().join(rt.name()) }

    pub fn file_store_exists(&self, rt: ResourceType) -> bool { self.resource_store_path(rt).is_file() }
}

fn read_kubeconfig() -> Option<Kubeconfig> {
    match Kubeconfig::read() {
        Ok(k) => Some(k),
        Err(e) => {
            debug!(error = %e, "no usable kubeconfig");
            None
        }
    }
}

pub fn current_context() -> Option<String> {
    read_kubeconfig()?.current_context.filter(|c| !c.is_empty())
}

/// Namespace of the current context, `default` when unset.
pub fn current_namespace() -> String {
    read_kubeconfig().and_then(|k| context_namespace(&k)).unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}

fn context_namespace(k: &Kubeconfig) -> Option<String> {
    let current = k.current_context.as_deref()?;
    k.contexts
        .iter()
        .find(|c| c.name == current)
        .and_then(|c| c.context.as_ref())
        .and_then(|c| c.namespace.clone())
        .filter(|ns| !ns.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_per_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ClusterConfig::new("minikube", dir.path());
        assert_eq!(cfg.resource_store_path(ResourceType::Pod), dir.path().join("minikube").join("pods"));
        assert!(!cfg.file_store_exists(ResourceType::Pod));
        std::fs::create_dir_all(cfg.dest_dir()).unwrap();
        std::fs::write(cfg.resource_store_path(ResourceType::Pod), b"x").unwrap();
        assert!(cfg.file_store_exists(ResourceType::Pod));
    }

    #[test]
    fn namespace_comes_from_current_context() {
        let yaml = r#"
apiVersion: v1
kind: Config
current-context: dev
contexts:
- name: dev
  context:
    cluster: c
    user: u
    namespace: team-a
- name: prod
  context:
    cluster: c
    user: u
"#;
        let k = Kubeconfig::from_yaml(yaml).unwrap();
        assert_eq!(context_namespace(&k).as_deref(), Some("team-a"));
        let mut other = k.clone();
        other.current_context = Some("prod".into());
        assert_eq!(context_namespace(&other), None);
    }
}
