//! Session records and the sole persistence write path.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

use super::delta::Delta;
use super::store::PersistentStore;

/// `{id, name, createdAtMs, updatedAtMs, baseFingerprint, deltaBytes}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub base_fingerprint: String,
    pub delta_bytes: u64,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, base_fingerprint: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            name: name.into(),
            created_at_ms: now,
            updated_at_ms: now,
            base_fingerprint: base_fingerprint.into(),
            delta_bytes: 0,
        }
    }

    fn touch(&mut self, base_fingerprint: String, delta_bytes: u64) {
        self.updated_at_ms = now_ms();
        self.base_fingerprint = base_fingerprint;
        self.delta_bytes = delta_bytes;
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Result of loading a session's persisted delta.
pub enum LoadedDelta {
    /// No delta on disk yet (first boot).
    Absent,
    /// Delta matched the composed base fingerprint.
    Valid(Delta),
    /// Delta existed but its fingerprint didn't match (or it failed to
    /// decode); the corrupt file has been quarantined and the caller
    /// should boot with an empty delta and surface a warning.
    Quarantined { reason: String },
}

/// Owns the single write path into origin-private storage. Exactly one
/// write path exists: the Supervisor's post-export handler. Worker code
/// never writes persistence directly.
pub struct SessionStore {
    backing: Arc<dyn PersistentStore>,
    writes_performed: std::sync::atomic::AtomicU64,
}

impl SessionStore {
    pub fn new(backing: Arc<dyn PersistentStore>) -> Self {
        Self {
            backing,
            writes_performed: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn record_key(id: &str) -> String {
        format!("sessions/{id}.json")
    }

    fn delta_key(id: &str) -> String {
        format!("sessions/{id}.delta")
    }

    pub fn load_record(&self, id: &str) -> Result<Option<SessionRecord>, StorageError> {
        match self.backing.read(&Self::record_key(id))? {
            Some(bytes) => {
                let record: SessionRecord = serde_json::from_slice(&bytes)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Loads the session's delta, validating it against the composed base
    /// fingerprint. A mismatch or decode failure quarantines the file
    /// in-place and reports [`LoadedDelta::Quarantined`] instead of an
    /// error — corruption here is recoverable by design.
    pub fn load_delta(
        &self,
        id: &str,
        expected_fingerprint: &str,
    ) -> Result<LoadedDelta, StorageError> {
        let key = Self::delta_key(id);
        let Some(bytes) = self.backing.read(&key)? else {
            return Ok(LoadedDelta::Absent);
        };

        let record = self.load_record(id)?;
        let fingerprint_ok = record
            .as_ref()
            .is_some_and(|r| r.base_fingerprint == expected_fingerprint);

        let decoded = if fingerprint_ok {
            Delta::decode(&bytes).ok()
        } else {
            None
        };

        match decoded {
            Some(delta) => Ok(LoadedDelta::Valid(delta)),
            None => {
                let reason = if fingerprint_ok {
                    "delta failed to decode".to_string()
                } else {
                    format!(
                        "base fingerprint mismatch: expected {expected_fingerprint}, session has {}",
                        record.map(|r| r.base_fingerprint).unwrap_or_default()
                    )
                };
                self.quarantine(id)?;
                Ok(LoadedDelta::Quarantined { reason })
            }
        }
    }

    fn quarantine(&self, id: &str) -> Result<(), StorageError> {
        let key = Self::delta_key(id);
        let quarantined = format!("{key}.quarantined.{}", now_ms());
        self.backing.rename(&key, &quarantined)
    }

    /// The sole write path: persists the session record and its delta
    /// atomically (write-then-rename for the delta). Called exactly once
    /// per successful `vfs_export`.
    pub fn save(
        &self,
        mut record: SessionRecord,
        base_fingerprint: &str,
        delta: &Delta,
    ) -> Result<SessionRecord, StorageError> {
        let encoded = delta.encode();
        record.touch(base_fingerprint.to_string(), encoded.len() as u64);

        self.backing.write_atomic(&Self::delta_key(&record.id), &encoded)?;
        self.backing.write_atomic(
            &Self::record_key(&record.id),
            &serde_json::to_vec(&record)?,
        )?;
        self.writes_performed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(record)
    }

    /// Number of successful writes through [`SessionStore::save`]. Used by
    /// tests asserting the single-write-path property.
    pub fn writes_performed(&self) -> u64 {
        self.writes_performed.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::delta::compute_delta;
    use crate::overlay::store::InMemoryStore;
    use crate::overlay::tarfile::{EntryKind, TarEntry};
    use bytes::Bytes;

    fn file(path: &str, content: &str) -> TarEntry {
        TarEntry {
            path: path.to_string(),
            mode: 0o644,
            mtime: 1,
            kind: EntryKind::File,
            content: Bytes::copy_from_slice(content.as_bytes()),
        }
    }

    #[test]
    fn boot_write_reload_scenario() {
        let store = SessionStore::new(Arc::new(InMemoryStore::new()));
        let base = vec![];
        let record = SessionRecord::new("m1", "machine", "fp1");

        let current = vec![file("/root/a.txt", "hello")];
        let delta = compute_delta(&base, &current);
        let saved = store.save(record, "fp1", &delta).unwrap();
        assert_eq!(store.writes_performed(), 1);

        let loaded_record = store.load_record("m1").unwrap().unwrap();
        assert_eq!(loaded_record, saved);

        match store.load_delta("m1", "fp1").unwrap() {
            LoadedDelta::Valid(delta) => {
                assert!(delta.added.contains_key("/root/a.txt"));
            }
            _ => panic!("expected a valid delta"),
        }
    }

    #[test]
    fn fingerprint_mismatch_quarantines_and_boots_empty() {
        let store = SessionStore::new(Arc::new(InMemoryStore::new()));
        let record = SessionRecord::new("m1", "machine", "fp-old");
        let delta = compute_delta(&[], &[file("/a", "x")]);
        store.save(record, "fp-old", &delta).unwrap();

        match store.load_delta("m1", "fp-new").unwrap() {
            LoadedDelta::Quarantined { .. } => {}
            _ => panic!("expected quarantine on fingerprint mismatch"),
        }

        // Original key gone, quarantined copy present.
        assert!(store.backing.read("sessions/m1.delta").unwrap().is_none());
        let quarantined = store.backing.list_prefixed("sessions/m1.delta.quarantined.").unwrap();
        assert_eq!(quarantined.len(), 1);
    }

    #[test]
    fn single_write_path_counts_one_per_export() {
        let store = SessionStore::new(Arc::new(InMemoryStore::new()));
        let mut record = SessionRecord::new("m1", "machine", "fp1");
        for i in 0..3 {
            let delta = compute_delta(&[], &[file("/a", &format!("v{i}"))]);
            record = store.save(record, "fp1", &delta).unwrap();
        }
        assert_eq!(store.writes_performed(), 3);
    }
}
