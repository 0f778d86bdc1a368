//! kfzf store: the in-memory snapshot of one resource type, fed by watch events
//! and persisted to disk with a dirty flag plus a minimum inter-persist interval.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use kfzf_core::{project, raw_key, CtorConfig, EventKind, ResourceStats, ResourceType, Snapshot, WatchEvent};
use kfzf_persist::{encode_snapshot, write_atomic, PersistError};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_MIN_PERSIST_INTERVAL: Duration = Duration::from_secs(10);
/// Matches the one-second resolution of `Last-Modified`.
pub const MIN_PERSIST_INTERVAL_FLOOR: Duration = Duration::from_secs(1);
const MIN_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub min_persist_interval: Duration,
    pub ctor: CtorConfig,
}

impl Default for StoreConfig {
    fn default() -> Self { Self { min_persist_interval: DEFAULT_MIN_PERSIST_INTERVAL, ctor: CtorConfig::default() } }
}

struct State {
    data: Snapshot,
    dirty: bool,
    /// Bumped on every mutation; a persist only clears `dirty` if nothing changed while it wrote.
    generation: u64,
    last_persist: Option<Instant>,
    last_persist_at: Option<DateTime<Utc>>,
    persists: u64,
}

/// Authoritative snapshot for one resource type.
pub struct Store {
    resource_type: ResourceType,
    path: PathBuf,
    config: StoreConfig,
    inner: Mutex<State>,
    /// Held from encode to rename so concurrent persists land in snapshot order.
    persisting: Mutex<()>,
}

impl Store {
    pub fn new(resource_type: ResourceType, path: impl Into<PathBuf>, mut config: StoreConfig) -> Self {
        if config.min_persist_interval < MIN_PERSIST_INTERVAL_FLOOR {
            warn!(
                resource = resource_type.name(),
                requested_ms = config.min_persist_interval.as_millis() as u64,
                "minimum persist interval raised to one second"
            );
            config.min_persist_interval = MIN_PERSIST_INTERVAL_FLOOR;
        }
        Self {
            resource_type,
            path: path.into(),
            config,
            inner: Mutex::new(State { data: Snapshot::default(), dirty: false, generation: 0, last_persist: None, last_persist_at: None, persists: 0 }),
            persisting: Mutex::new(()),
        }
    }

    pub fn resource_type(&self) -> ResourceType { self.resource_type }
    pub fn path(&self) -> &Path { &self.path }
    pub fn config(&self) -> &StoreConfig { &self.config }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply one event. Returns whether the snapshot changed.
    /// Malformed objects are logged and skipped.
    pub fn apply_event(&self, kind: EventKind, raw: &serde_json::Value) -> bool {
        let rt = self.resource_type.name();
        counter!("kfzf_store_events_total", 1, "resource" => rt);
        if kind == EventKind::Delete {
            let key = match raw_key(raw) {
                Ok(k) => k,
                Err(e) => {
                    warn!(resource = rt, error = %e, "skipping malformed delete event");
                    return false;
                }
            };
            let mut st = self.lock();
            if st.data.remove(&key).is_some() {
                st.dirty = true;
                st.generation += 1;
                return true;
            }
            return false;
        }

        let res = match project(self.resource_type, raw, &self.config.ctor) {
            Ok(r) => r,
            Err(e) => {
                warn!(resource = rt, error = %e, "skipping malformed object");
                return false;
            }
        };
        let key = res.key();
        let mut st = self.lock();
        if kind == EventKind::Update {
            if let Some(prev) = st.data.get(&key) {
                if !res.has_changed(prev) {
                    counter!("kfzf_store_events_skipped_total", 1, "resource" => rt);
                    return false;
                }
            }
        }
        st.data.insert(key, res);
        st.dirty = true;
        st.generation += 1;
        true
    }

    /// Discard the current snapshot and rebuild it from `items`. Always marks dirty.
    pub fn replace_all(&self, items: &[serde_json::Value]) {
        let data = self.build(items);
        let mut st = self.lock();
        st.data = data;
        st.dirty = true;
        st.generation += 1;
    }

    /// Replace only the entries of `namespace`, leaving other namespaces untouched.
    pub fn replace_namespace(&self, namespace: &str, items: &[serde_json::Value]) {
        let fresh = self.build(items);
        let mut st = self.lock();
        st.data.retain(|_, r| r.namespace.as_deref() != Some(namespace));
        st.data.extend(fresh);
        st.dirty = true;
        st.generation += 1;
    }

    fn build(&self, items: &[serde_json::Value]) -> Snapshot {
        let mut data = Snapshot::default();
        for raw in items {
            match project(self.resource_type, raw, &self.config.ctor) {
                Ok(r) => { data.insert(r.key(), r); }
                Err(e) => warn!(resource = self.resource_type.name(), error = %e, "skipping malformed object in relist"),
            }
        }
        data
    }

    /// Persist if dirty and the minimum interval has elapsed since the last persist.
    /// Returns whether a write happened. On failure the store stays dirty.
    pub fn persist_if_due(&self) -> Result<bool, PersistError> {
        self.persist_inner(false)
    }

    /// Persist now if dirty, ignoring the interval.
    pub fn persist(&self) -> Result<bool, PersistError> {
        self.persist_inner(true)
    }

    fn persist_inner(&self, force: bool) -> Result<bool, PersistError> {
        let _persisting = self.persisting.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let started = Instant::now();
        let (bytes, generation) = {
            let st = self.lock();
            if !st.dirty { return Ok(false); }
            if !force {
                if let Some(last) = st.last_persist {
                    if last.elapsed() < self.config.min_persist_interval { return Ok(false); }
                }
            }
            (encode_snapshot(&st.data)?, st.generation)
        };
        let rt = self.resource_type.name();
        if let Err(e) = write_atomic(&self.path, &bytes) {
            counter!("kfzf_store_persist_errors_total", 1, "resource" => rt);
            return Err(e);
        }
        let mut st = self.lock();
        st.last_persist = Some(Instant::now());
        st.last_persist_at = Some(Utc::now());
        st.persists += 1;
        if st.generation == generation { st.dirty = false; }
        counter!("kfzf_store_persist_total", 1, "resource" => rt);
        histogram!("kfzf_store_persist_ms", started.elapsed().as_secs_f64() * 1000.0, "resource" => rt);
        debug!(resource = rt, path = %self.path.display(), items = st.data.len(), "persisted snapshot");
        Ok(true)
    }

    pub fn snapshot(&self) -> Snapshot { self.lock().data.clone() }
    pub fn len(&self) -> usize { self.lock().data.len() }
    pub fn is_empty(&self) -> bool { self.lock().data.is_empty() }
    pub fn is_dirty(&self) -> bool { self.lock().dirty }
    pub fn last_persist(&self) -> Option<DateTime<Utc>> { self.lock().last_persist_at }
    /// Number of successful persists since creation.
    pub fn persist_count(&self) -> u64 { self.lock().persists }

    pub fn stats(&self) -> ResourceStats {
        let st = self.lock();
        let mut item_per_namespace: BTreeMap<String, usize> = BTreeMap::new();
        for r in st.data.values() {
            *item_per_namespace.entry(r.namespace_or_none().to_string()).or_default() += 1;
        }
        ResourceStats {
            resource_type: self.resource_type.name().to_string(),
            item_per_namespace,
            last_dumped: st.last_persist_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Spawn the ingest loop applying events to `store` in delivery order.
/// Returns the sender side of a bounded queue of capacity `cap`.
pub fn spawn_ingest(store: Arc<Store>, cap: usize, cancel: CancellationToken) -> (mpsc::Sender<WatchEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<WatchEvent>(cap.max(1));
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = rx.recv() => {
                    match maybe {
                        Some(WatchEvent::Object(kind, raw)) => { store.apply_event(kind, &raw); }
                        Some(WatchEvent::Replace { namespace: Some(ns), items }) => store.replace_namespace(&ns, &items),
                        Some(WatchEvent::Replace { namespace: None, items }) => store.replace_all(&items),
                        None => {
                            debug!(resource = store.resource_type().name(), "event channel closed; exiting ingest loop");
                            break;
                        }
                    }
                }
            }
        }
        info!(resource = store.resource_type().name(), "ingest loop stopped");
    });
    (tx, handle)
}

/// Spawn the periodic persist check. Ticks every quarter of the minimum interval.
pub fn spawn_persist_ticker(store: Arc<Store>, cancel: CancellationToken) -> JoinHandle<()> {
    let period = (store.config.min_persist_interval / 4).max(MIN_TICK);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let s = Arc::clone(&store);
                    match tokio::task::spawn_blocking(move || s.persist_if_due()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(resource = store.resource_type().name(), error = %e, "persist failed; will retry"),
                        Err(e) => warn!(resource = store.resource_type().name(), error = %e, "persist task failed; will retry"),
                    }
                }
            }
        }
        debug!(resource = store.resource_type().name(), "persist ticker stopped");
    })
}
