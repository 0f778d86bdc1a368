//! Per-context side file remembering server modification times and the collector namespace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kfzf_core::ResourceType;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const STATE_FILE_NAME: &str = "fetcher_state";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StateData {
    #[serde(default)]
    collector_namespace: Option<String>,
    /// Resource type name to `Last-Modified` header value.
    #[serde(default)]
    last_modified: BTreeMap<String, String>,
}

/// Loaded lazily on first use and written back only when something changed.
#[derive(Debug)]
pub struct FetcherState {
    path: PathBuf,
    data: Option<StateData>,
    changed: bool,
}

impl FetcherState {
    pub fn new(dir: &Path) -> Self {
        Self { path: dir.join(STATE_FILE_NAME), data: None, changed: false }
    }

    pub fn path(&self) -> &Path { &self.path }

    fn data(&mut self) -> &mut StateData {
        let path = &self.path;
        self.data.get_or_insert_with(|| match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring unreadable fetcher state");
                StateData::default()
            }),
            Err(_) => StateData::default(),
        })
    }

    pub fn last_modified(&mut self, rt: ResourceType) -> Option<String> {
        self.data().last_modified.get(rt.name()).cloned()
    }

    pub fn set_last_modified(&mut self, rt: ResourceType, value: &str) {
        let data = self.data();
        if data.last_modified.get(rt.name()).map(|v| v.as_str()) != Some(value) {
            data.last_modified.insert(rt.name().to_string(), value.to_string());
            self.changed = true;
        }
    }

    pub fn collector_namespace(&mut self) -> Option<String> {
        self.data().collector_namespace.clone()
    }

    pub fn set_collector_namespace(&mut self, ns: &str) {
        let data = self.data();
        if data.collector_namespace.as_deref() != Some(ns) {
            data.collector_namespace = Some(ns.to_string());
            self.changed = true;
        }
    }

    /// Write the file if anything changed since it was loaded.
    pub fn save_if_changed(&mut self) -> Result<bool, kfzf_persist::PersistError> {
        if !self.changed { return Ok(false); }
        let Some(data) = self.data.as_ref() else { return Ok(false) };
        let bytes = serde_json::to_vec_pretty(data).map_err(|e| kfzf_persist::PersistError::Encode(e.to_string()))?;
        kfzf_persist::write_atomic(&self.path, &bytes)?;
        self.changed = false;
        debug!(path = %self.path.display(), "fetcher state saved");
        Ok(true)
    }
}
