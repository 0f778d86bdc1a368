//! kfzf collector HTTP surface.
//!
//! `GET|HEAD /k8s/resources/<type>` serves the persisted snapshot file of a store with a
//! `Last-Modified` header set to its last persist time. `/stats` and `/readiness` report state.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use kfzf_core::{http_date, ResourceStats, ResourceType};
use kfzf_store::Store;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self { Self { listen_address: "localhost:8080".to_string() } }
}

/// Stores currently served; swapped wholesale when the collector restarts on a context change.
#[derive(Default)]
pub struct StoreRegistry {
    stores: ArcSwap<HashMap<ResourceType, Arc<Store>>>,
}

impl StoreRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn replace(&self, stores: Vec<Arc<Store>>) {
        let map: HashMap<ResourceType, Arc<Store>> = stores.into_iter().map(|s| (s.resource_type(), s)).collect();
        self.stores.store(Arc::new(map));
    }

    pub fn get(&self, rt: ResourceType) -> Option<Arc<Store>> { self.stores.load().get(&rt).cloned() }

    pub fn stats(&self) -> Vec<ResourceStats> {
        let mut out: Vec<ResourceStats> = self.stores.load().values().map(|s| s.stats()).collect();
        out.sort_by(|a, b| a.resource_type.cmp(&b.resource_type));
        out
    }
}

async fn resource(State(registry): State<Arc<StoreRegistry>>, method: Method, Path(name): Path<String>) -> Response {
    counter!("kfzf_api_requests_total", 1, "route" => "resources", "method" => method.to_string());
    let rt = ResourceType::parse(&name);
    let Some(store) = registry.get(rt) else {
        debug!(resource = %name, "unknown or unwatched resource");
        return (StatusCode::NOT_FOUND, format!("resource {} not found", name)).into_response();
    };
    let Some(last) = store.last_persist() else {
        return (StatusCode::NOT_FOUND, format!("resource {} not dumped yet", name)).into_response();
    };
    let last_modified = http_date(last);
    if method == Method::HEAD {
        return (StatusCode::OK, [(header::LAST_MODIFIED, last_modified)]).into_response();
    }
    match tokio::fs::read(store.path()).await {
        Ok(body) => (StatusCode::OK, [(header::LAST_MODIFIED, last_modified), (header::CONTENT_TYPE, "application/octet-stream".to_string())], body).into_response(),
        Err(e) => {
            warn!(path = %store.path().display(), error = %e, "reading snapshot file");
            (StatusCode::NOT_FOUND, format!("resource {} not readable", name)).into_response()
        }
    }
}

async fn stats(State(registry): State<Arc<StoreRegistry>>) -> impl IntoResponse {
    counter!("kfzf_api_requests_total", 1, "route" => "stats", "method" => "GET");
    Json(registry.stats())
}

async fn readiness() -> &'static str { "Ok" }

pub fn create_router(registry: Arc<StoreRegistry>) -> Router {
    Router::new()
        .route("/k8s/resources/:name", get(resource))
        .route("/stats", get(stats))
        .route("/readiness", get(readiness))
        .with_state(registry)
}

pub async fn bind(config: &ServerConfig) -> anyhow::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(&config.listen_address)
        .await
        .map_err(|e| anyhow::anyhow!("binding {}: {}", config.listen_address, e))
}

/// Serve until `cancel` fires.
pub async fn serve(listener: tokio::net::TcpListener, registry: Arc<StoreRegistry>, cancel: CancellationToken) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "starting http server");
    axum::serve(listener, create_router(registry))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!(addr = %addr, "http server stopped");
    Ok(())
}
