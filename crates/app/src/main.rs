use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kfzf_api::{ServerConfig, StoreRegistry};
use kfzf_core::{CtorConfig, ResourceType};
use kfzf_kubehub::{current_context, dump_api_resources, parse_namespace_filters, parse_resource_list, ClusterConfig, ResourceWatcher, WatcherConfig};
use kfzf_store::{Store, StoreConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const CONTEXT_CHECK_PERIOD: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "kfzf-collector", version, about = "Watches a cluster and serves resource snapshots for kfzf-client")]
struct Cli {
    /// Root directory of the per-cluster snapshot files
    #[arg(long, env = "KFZF_CACHE_DIR", default_value = "/tmp/kfzf/cache")]
    cache_dir: PathBuf,
    #[arg(long, env = "KFZF_LISTEN_ADDRESS", default_value = "localhost:8080")]
    listen_address: String,
    /// Minimum seconds between two writes of the same snapshot
    #[arg(long, env = "KFZF_MIN_PERSIST_INTERVAL", default_value_t = 10)]
    min_persist_interval: u64,
    /// Resource types to watch, all when empty
    #[arg(long, env = "KFZF_WATCH_RESOURCES", value_delimiter = ',')]
    watch_resources: Vec<String>,
    #[arg(long, env = "KFZF_EXCLUDE_RESOURCES", value_delimiter = ',')]
    exclude_resources: Vec<String>,
    /// Namespace regexes to watch, all when empty
    #[arg(long, env = "KFZF_WATCH_NAMESPACES", value_delimiter = ',')]
    watch_namespaces: Vec<String>,
    #[arg(long, env = "KFZF_EXCLUDE_NAMESPACES", value_delimiter = ',')]
    exclude_namespaces: Vec<String>,
    /// Node roles hidden from the node role column
    #[arg(long, env = "KFZF_IGNORED_NODE_ROLES", value_delimiter = ',')]
    ignored_node_roles: Vec<String>,
    #[arg(long, env = "KFZF_NODE_POLLING_PERIOD", default_value_t = 300)]
    node_polling_period: u64,
    #[arg(long, env = "KFZF_NAMESPACE_POLLING_PERIOD", default_value_t = 600)]
    namespace_polling_period: u64,
}

impl Cli {
    fn watcher_config(&self) -> Result<WatcherConfig> {
        Ok(WatcherConfig {
            watch_resources: parse_resource_list(&self.watch_resources)?,
            exclude_resources: parse_resource_list(&self.exclude_resources)?,
            watch_namespaces: parse_namespace_filters(&self.watch_namespaces)?,
            exclude_namespaces: parse_namespace_filters(&self.exclude_namespaces)?,
            node_polling_period: Duration::from_secs(self.node_polling_period),
            namespace_polling_period: Duration::from_secs(self.namespace_polling_period),
            ..WatcherConfig::default()
        })
    }

    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            min_persist_interval: Duration::from_secs(self.min_persist_interval),
            ctor: CtorConfig { ignored_node_roles: self.ignored_node_roles.iter().cloned().collect() },
        }
    }
}

fn init_tracing() {
    let env = std::env::var("KFZF_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KFZF_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KFZF_METRICS_ADDR; expected host:port");
        }
    }
}

/// Stores and tasks for the cluster of the current context.
async fn start_cluster(
    cache_dir: &Path,
    watcher_config: &WatcherConfig,
    store_config: &StoreConfig,
    registry: &StoreRegistry,
    cancel: &CancellationToken,
) -> Result<Vec<JoinHandle<()>>> {
    let cluster = ClusterConfig::load(cache_dir);
    let client = kube::Client::try_default().await.context("connecting to cluster")?;
    info!(cluster = %cluster.cluster_name, dir = %cluster.dest_dir().display(), "starting collector");

    let watcher = ResourceWatcher::new(client.clone(), watcher_config.clone());
    let mut stores = Vec::new();
    let mut handles = Vec::new();
    for rt in watcher_config.selected_types() {
        let store = Arc::new(Store::new(rt, cluster.resource_store_path(rt), store_config.clone()));
        match watcher.start(Arc::clone(&store), cancel.clone()).await {
            Ok(h) => {
                handles.extend(h);
                stores.push(store);
            }
            Err(e) => warn!(resource = %rt, error = %format!("{:#}", e), "not watching resource"),
        }
    }

    let api_resources = Arc::new(Store::new(
        ResourceType::ApiResource,
        cluster.resource_store_path(ResourceType::ApiResource),
        store_config.clone(),
    ));
    if let Err(e) = dump_api_resources(client, &api_resources).await {
        warn!(error = %format!("{:#}", e), "api resource discovery failed");
    }
    stores.push(api_resources);

    info!(stores = stores.len(), tasks = handles.len(), "collector running");
    registry.replace(stores);
    Ok(handles)
}

/// Returns true when the context changed, false on shutdown.
async fn wait_for_context_change(context: &mut Option<String>, shutdown: &CancellationToken) -> bool {
    let mut ticker = tokio::time::interval(CONTEXT_CHECK_PERIOD);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = ticker.tick() => {
                let current = current_context();
                if current != *context {
                    info!(from = ?context, to = ?current, "kubeconfig context changed, restarting");
                    *context = current;
                    return true;
                }
            }
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let watcher_config = cli.watcher_config().context("invalid watch filters")?;
    let store_config = cli.store_config();
    let server_config = ServerConfig { listen_address: cli.listen_address.clone() };

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_token.cancel();
        }
    });

    let registry = Arc::new(StoreRegistry::new());
    let listener = kfzf_api::bind(&server_config).await?;
    let server = tokio::spawn(kfzf_api::serve(listener, Arc::clone(&registry), shutdown.clone()));

    let mut context = current_context();
    loop {
        let generation = shutdown.child_token();
        let handles = match start_cluster(&cli.cache_dir, &watcher_config, &store_config, &registry, &generation).await {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "collector not started, waiting for a context change");
                Vec::new()
            }
        };
        let changed = wait_for_context_change(&mut context, &shutdown).await;
        generation.cancel();
        for h in handles {
            let _ = h.await;
        }
        if !changed {
            break;
        }
    }

    server.await.context("http server task")??;
    info!("collector stopped");
    Ok(())
}
