//! Snapshot resolution for the completion client.
//!
//! Sources are tried cheapest first and the first success wins:
//! 1. the collocated collector's own snapshot file,
//! 2. a previously fetched copy younger than `minimum_cache`,
//! 3. the collector's HTTP endpoint, with a `HEAD` probe against the recorded `Last-Modified`,
//! 4. the same HTTP exchange through a port-forward tunnel to the collector pod.

#![forbid(unsafe_code)]

mod state;
mod tunnel;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use kfzf_core::{ResourceStats, ResourceType, Snapshot};
use kfzf_kubehub::ClusterConfig;
use kfzf_persist::{decode_snapshot, load_snapshot, write_atomic, PersistError};
use metrics::counter;
use reqwest::header::LAST_MODIFIED;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

pub use state::{FetcherState, STATE_FILE_NAME};
pub use tunnel::{select_collector_target, CollectorTarget, KubeTunnelOpener, OpenTunnel, TunnelOpener};

const STALE_LOCAL_FILE: Duration = Duration::from_secs(3600);
const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("no running collector pod matches selector {selector}")]
    NoCollectorPod { selector: String },
    #[error("collector pod should have exactly one container, found {0}")]
    ContainerCount(usize),
    #[error("collector container should expose exactly one port, found {0}")]
    PortCount(usize),
    #[error("invalid collector port {0}")]
    InvalidPort(i32),
    #[error("tunnel setup failed: {0}")]
    TunnelSetup(String),
    #[error("{url} returned {status}")]
    HttpStatus { status: u16, url: String },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} has no Last-Modified header")]
    MissingLastModified { url: String },
    #[error("decoding snapshot: {0}")]
    Decode(String),
    #[error(transparent)]
    Persist(PersistError),
    #[error("kubernetes api: {0}")]
    Kube(#[from] kube::Error),
    #[error("no collector endpoint reachable and no tunnel available")]
    NoRemote,
}

impl From<PersistError> for FetchError {
    fn from(e: PersistError) -> Self {
        match e {
            PersistError::Decode(msg) => FetchError::Decode(msg),
            other => FetchError::Persist(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub fetcher_cache_path: PathBuf,
    /// `host:port` of a collector reachable without a tunnel.
    pub http_endpoint: Option<String>,
    pub minimum_cache: Duration,
    /// 0 picks an ephemeral port.
    pub port_forward_local_port: u16,
    pub collector_label_selector: String,
    pub collector_namespace: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            fetcher_cache_path: PathBuf::from("/tmp/kfzf/fetcher_cache"),
            http_endpoint: None,
            minimum_cache: Duration::from_secs(60),
            port_forward_local_port: 0,
            collector_label_selector: "app=kfzf-collector".to_string(),
            collector_namespace: None,
        }
    }
}

/// Anything the completion engine can read snapshots from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn get_resources(&self, rt: ResourceType) -> Result<Snapshot, FetchError>;
}

pub struct Fetcher {
    config: FetcherConfig,
    cluster: ClusterConfig,
    http: reqwest::Client,
    opener: Option<Arc<dyn TunnelOpener>>,
    state: Mutex<FetcherState>,
}

impl Fetcher {
    /// `cluster` locates the collocated collector's snapshot files; fetched copies go under
    /// `<fetcher_cache_path>/<cluster_name>/`.
    pub fn new(config: FetcherConfig, cluster: ClusterConfig, opener: Option<Arc<dyn TunnelOpener>>) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder().build()?;
        let state = FetcherState::new(&config.fetcher_cache_path.join(&cluster.cluster_name));
        Ok(Self { config, cluster, http, opener, state: Mutex::new(state) })
    }

    pub fn cluster_name(&self) -> &str { &self.cluster.cluster_name }

    pub fn cache_path(&self, rt: ResourceType) -> PathBuf {
        self.config.fetcher_cache_path.join(&self.cluster.cluster_name).join(rt.name())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FetcherState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn save_state(&self) {
        if let Err(e) = self.with_state(|s| s.save_if_changed()) {
            warn!(error = %e, "saving fetcher state");
        }
    }

    pub async fn get_resources(&self, rt: ResourceType) -> Result<Snapshot, FetchError> {
        if self.cluster.file_store_exists(rt) {
            let path = self.cluster.resource_store_path(rt);
            if elapsed_since_modified(&path).is_some_and(|age| age > STALE_LOCAL_FILE) {
                warn!(path = %path.display(), "local snapshot is older than one hour");
            }
            match load_snapshot(&path) {
                Ok(snap) => {
                    debug!(resource = %rt, path = %path.display(), "using local snapshot");
                    counter!("kfzf_fetcher_tier_total", 1, "tier" => "local");
                    return Ok(snap);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "unusable local snapshot"),
            }
        }

        let cache = self.cache_path(rt);
        if elapsed_since_modified(&cache).is_some_and(|age| age < self.config.minimum_cache) {
            match load_snapshot(&cache) {
                Ok(snap) => {
                    debug!(resource = %rt, path = %cache.display(), "using recent cache");
                    counter!("kfzf_fetcher_tier_total", 1, "tier" => "cache");
                    return Ok(snap);
                }
                Err(e) => warn!(path = %cache.display(), error = %e, "unusable cached snapshot"),
            }
        }

        if let Some(endpoint) = self.reachable_endpoint().await {
            counter!("kfzf_fetcher_tier_total", 1, "tier" => "http");
            return self.fetch_from(&endpoint, rt).await;
        }

        counter!("kfzf_fetcher_tier_total", 1, "tier" => "tunnel");
        self.through_tunnel(|endpoint| async move { self.fetch_from(&endpoint, rt).await }).await
    }

    /// Collector stats, always fetched remotely.
    pub async fn get_stats(&self) -> Result<Vec<ResourceStats>, FetchError> {
        if let Some(endpoint) = self.reachable_endpoint().await {
            return self.stats_from(&endpoint).await;
        }
        self.through_tunnel(|endpoint| async move { self.stats_from(&endpoint).await }).await
    }

    async fn reachable_endpoint(&self) -> Option<String> {
        let endpoint = self.config.http_endpoint.as_ref()?;
        match tokio::time::timeout(REACHABILITY_TIMEOUT, tokio::net::TcpStream::connect(endpoint.as_str())).await {
            Ok(Ok(_)) => Some(endpoint.clone()),
            Ok(Err(e)) => {
                info!(endpoint = %endpoint, error = %e, "collector endpoint unreachable");
                None
            }
            Err(_) => {
                info!(endpoint = %endpoint, "collector endpoint connect timed out");
                None
            }
        }
    }

    async fn through_tunnel<T, F, Fut>(&self, f: F) -> Result<T, FetchError>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = Result<T, FetchError>>,
    {
        let Some(opener) = self.opener.as_ref() else { return Err(FetchError::NoRemote) };
        let hint = self.with_state(|s| s.collector_namespace());
        let tunnel = opener.open(hint.as_deref()).await?;
        self.with_state(|s| s.set_collector_namespace(tunnel.collector_namespace()));
        let result = f(tunnel.endpoint()).await;
        tunnel.close().await;
        self.save_state();
        result
    }

    async fn fetch_from(&self, endpoint: &str, rt: ResourceType) -> Result<Snapshot, FetchError> {
        let url = format!("http://{}/k8s/resources/{}", endpoint, rt.name());
        let cache = self.cache_path(rt);
        let known = self.with_state(|s| s.last_modified(rt));

        if let Some(known) = known.filter(|_| cache.is_file()) {
            match self.probe(&url).await {
                Ok(current) if current == known => match load_snapshot(&cache) {
                    Ok(snap) => {
                        debug!(resource = %rt, last_modified = %current, "collector snapshot unchanged");
                        touch(&cache);
                        return Ok(snap);
                    }
                    Err(e) => warn!(path = %cache.display(), error = %e, "unusable cached snapshot, refetching"),
                },
                Ok(current) => debug!(resource = %rt, known = %known, current = %current, "collector snapshot changed"),
                Err(e) => warn!(url = %url, error = %e, "freshness probe failed, refetching"),
            }
        }

        let resp = self.http.get(&url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(FetchError::HttpStatus { status: resp.status().as_u16(), url });
        }
        let last_modified = header_value(&resp, &url)?;
        let body = resp.bytes().await?;
        let snap = decode_snapshot(&body)?;
        write_atomic(&cache, &body)?;
        info!(resource = %rt, items = snap.len(), path = %cache.display(), "snapshot fetched");
        self.with_state(|s| s.set_last_modified(rt, &last_modified));
        self.save_state();
        Ok(snap)
    }

    async fn probe(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.http.head(url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(FetchError::HttpStatus { status: resp.status().as_u16(), url: url.to_string() });
        }
        header_value(&resp, url)
    }

    async fn stats_from(&self, endpoint: &str) -> Result<Vec<ResourceStats>, FetchError> {
        let url = format!("http://{}/stats", endpoint);
        let resp = self.http.get(&url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(FetchError::HttpStatus { status: resp.status().as_u16(), url });
        }
        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SnapshotSource for Fetcher {
    async fn get_resources(&self, rt: ResourceType) -> Result<Snapshot, FetchError> { Fetcher::get_resources(self, rt).await }
}

fn header_value(resp: &reqwest::Response, url: &str) -> Result<String, FetchError> {
    resp.headers()
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| FetchError::MissingLastModified { url: url.to_string() })
}

fn elapsed_since_modified(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(SystemTime::now().duration_since(modified).unwrap_or_default())
}

/// Reset the cache mtime so the recent-cache tier covers a verified copy.
fn touch(path: &Path) {
    let res = std::fs::File::options().append(true).open(path).and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = res {
        debug!(path = %path.display(), error = %e, "touching cache file");
    }
}
