//! Persistent storage seam.
//!
//! `PersistentStore` models origin-private storage (OPFS in the browser).
//! This crate ships a filesystem-backed implementation for a native host
//! process and an in-memory fake for tests; the wasm-bindgen sibling crate
//! provides the OPFS-backed production implementation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::StorageError;

/// Minimal key-value store with atomic-write-then-rename semantics.
pub trait PersistentStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn write_atomic(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn list_prefixed(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Filesystem-backed store for a native host process. Keys map to paths
/// relative to `root`.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl PersistentStore for FsStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io {
                path: key.to_string(),
                source: e,
            }),
        }
    }

    fn write_atomic(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Io {
                path: key.to_string(),
                source: e,
            })?;
        }
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, bytes).map_err(|e| StorageError::Io {
            path: key.to_string(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|e| StorageError::Io {
            path: key.to_string(),
            source: e,
        })?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        std::fs::rename(self.path_for(from), self.path_for(to)).map_err(|e| StorageError::Io {
            path: from.to_string(),
            source: e,
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io {
                path: key.to_string(),
                source: e,
            }),
        }
    }

    fn list_prefixed(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.path_for(Path::new(prefix).parent().map_or("", |p| p.to_str().unwrap_or("")));
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => {
                return Err(StorageError::Io {
                    path: dir.display().to_string(),
                    source: e,
                })
            }
        };
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::Io {
                path: dir.display().to_string(),
                source: e,
            })?;
            if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                if let Some(rel_str) = rel.to_str() {
                    if rel_str.starts_with(prefix) {
                        out.push(rel_str.to_string());
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Deterministic in-memory store for tests and the in-process fakes,
/// backed by a `BTreeMap` so key enumeration is stable.
#[cfg(any(test, feature = "test-internals"))]
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Optional quota in bytes; `None` means unbounded. Used by tests that
    /// exercise the storage-quota-exceeded failure path.
    quota_bytes: Option<usize>,
}

#[cfg(any(test, feature = "test-internals"))]
impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn total_bytes(&self, map: &BTreeMap<String, Vec<u8>>) -> usize {
        map.values().map(Vec::len).sum()
    }
}

#[cfg(any(test, feature = "test-internals"))]
impl PersistentStore for InMemoryStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write_atomic(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut map = self.entries.lock();
        if let Some(quota) = self.quota_bytes {
            let existing = map.get(key).map(Vec::len).unwrap_or(0);
            let projected = self.total_bytes(&map) - existing + bytes.len();
            if projected > quota {
                return Err(StorageError::QuotaExceeded {
                    session_id: key.to_string(),
                });
            }
        }
        map.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let mut map = self.entries.lock();
        let value = map
            .remove(from)
            .ok_or_else(|| StorageError::RecordNotFound(from.to_string()))?;
        map.insert(to.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn list_prefixed(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_rename_preserves_content() {
        let store = InMemoryStore::new();
        store.write_atomic("sessions/a.delta", b"payload").unwrap();
        store
            .rename("sessions/a.delta", "sessions/a.delta.quarantined.1")
            .unwrap();
        assert!(store.read("sessions/a.delta").unwrap().is_none());
        assert_eq!(
            store.read("sessions/a.delta.quarantined.1").unwrap(),
            Some(b"payload".to_vec())
        );
    }

    #[test]
    fn quota_exceeded_keeps_prior_value() {
        let store = InMemoryStore::with_quota(8);
        store.write_atomic("k", b"12345678").unwrap();
        let result = store.write_atomic("k", b"123456789");
        assert!(matches!(result, Err(StorageError::QuotaExceeded { .. })));
        assert_eq!(store.read("k").unwrap(), Some(b"12345678".to_vec()));
    }

    #[test]
    fn fs_store_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        store.write_atomic("sessions/x.json", b"{}").unwrap();
        assert_eq!(store.read("sessions/x.json").unwrap(), Some(b"{}".to_vec()));
    }
}
