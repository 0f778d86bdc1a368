//! kfzf persistence: snapshot encoding and crash-safe file writes.
//! A snapshot file is gzip-compressed JSON; the same bytes are served over HTTP.

#![forbid(unsafe_code)]

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use kfzf_core::Snapshot;
use metrics::histogram;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("encoding snapshot: {0}")]
    Encode(String),
    #[error("decoding snapshot: {0}")]
    Decode(String),
}

impl PersistError {
    fn io(path: &Path, source: std::io::Error) -> Self { PersistError::Io { path: path.to_path_buf(), source } }

    pub fn is_decode(&self) -> bool { matches!(self, PersistError::Decode(_)) }
}

/// Encode a snapshot to its on-disk and wire form.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>, PersistError> {
    let started = std::time::Instant::now();
    let json = serde_json::to_vec(snapshot).map_err(|e| PersistError::Encode(e.to_string()))?;
    let mut enc = GzEncoder::new(Vec::with_capacity(json.len() / 4 + 64), Compression::default());
    enc.write_all(&json).map_err(|e| PersistError::Encode(e.to_string()))?;
    let out = enc.finish().map_err(|e| PersistError::Encode(e.to_string()))?;
    histogram!("kfzf_persist_encode_ms", started.elapsed().as_secs_f64() * 1000.0);
    Ok(out)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, PersistError> {
    let mut json = Vec::with_capacity(bytes.len() * 4);
    GzDecoder::new(bytes).read_to_end(&mut json).map_err(|e| PersistError::Decode(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| PersistError::Decode(e.to_string()))
}

/// Write `bytes` to `dest` through a temp file in the same directory, then rename.
/// Readers see either the previous file or the complete new one.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| PersistError::io(dir, e))?;
    let file_name = dest.file_name().and_then(|n| n.to_str()).unwrap_or("snapshot");
    let tmp = dir.join(format!(".{}.tmp-{}", file_name, std::process::id()));
    {
        let mut f = std::fs::File::create(&tmp).map_err(|e| PersistError::io(&tmp, e))?;
        f.write_all(bytes).map_err(|e| PersistError::io(&tmp, e))?;
        f.sync_all().map_err(|e| PersistError::io(&tmp, e))?;
    }
    if let Err(e) = std::fs::rename(&tmp, dest) {
        let _ = std::fs::remove_file(&tmp);
        return Err(PersistError::io(dest, e));
    }
    tracing::debug!(path = %dest.display(), bytes = bytes.len(), "snapshot written");
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<Snapshot, PersistError> {
    let bytes = std::fs::read(path).map_err(|e| PersistError::io(path, e))?;
    decode_snapshot(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfzf_core::{project, CtorConfig, ResourceType};

    fn snapshot() -> Snapshot {
        let mut s = Snapshot::default();
        for (ns, name) in [("default", "web-0"), ("kube-system", "coredns")] {
            let raw = serde_json::json!({"metadata": {"name": name, "namespace": ns, "labels": {"app": name}}});
            let r = project(ResourceType::Pod, &raw, &CtorConfig::default()).unwrap();
            s.insert(r.key(), r);
        }
        s
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pods");
        let snap = snapshot();
        write_atomic(&path, &encode_snapshot(&snap).unwrap()).unwrap();
        assert_eq!(load_snapshot(&path).unwrap(), snap);
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pods");
        write_atomic(&path, &encode_snapshot(&snapshot()).unwrap()).unwrap();
        write_atomic(&path, &encode_snapshot(&Snapshot::default()).unwrap()).unwrap();
        assert!(load_snapshot(&path).unwrap().is_empty());
    }

    #[test]
    fn corrupt_input_is_a_decode_error() {
        assert!(decode_snapshot(b"not gzip").unwrap_err().is_decode());
        let dir = tempfile::tempdir().unwrap();
        let err = load_snapshot(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, PersistError::Io { .. }));
    }
}
