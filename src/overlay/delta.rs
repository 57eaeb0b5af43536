//! Session delta: structured diff against a composed base, plus its
//! on-disk encoding.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;

use crate::error::LayerError;

use super::tarfile::{EntryKind, TarEntry};

/// A structured diff of a session against its composed base.
///
/// Invariants: `added ∩ modified = ∅`,
/// `deleted ∩ (added ∪ modified) = ∅`. Both sets are keyed by path so the
/// invariants hold by construction rather than needing a runtime check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub added: BTreeMap<String, TarEntry>,
    pub modified: BTreeMap<String, TarEntry>,
    pub deleted: BTreeSet<String>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Encodes the delta as a length-prefixed concatenation of its three
    /// sets, as stored at `sessions/{id}.delta`. All integers are
    /// little-endian.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend((self.added.len() as u32).to_le_bytes());
        out.extend((self.modified.len() as u32).to_le_bytes());
        out.extend((self.deleted.len() as u32).to_le_bytes());
        for entry in self.added.values() {
            encode_entry(&mut out, entry);
        }
        for entry in self.modified.values() {
            encode_entry(&mut out, entry);
        }
        for path in &self.deleted {
            encode_path(&mut out, path);
        }
        out
    }

    /// Decodes a delta previously produced by [`Delta::encode`]. Any
    /// structural problem (truncation, garbage length prefixes) is reported
    /// as a [`LayerError`] so callers can fold it into the same corrupt-delta
    /// handling as a fingerprint mismatch.
    pub fn decode(bytes: &[u8]) -> Result<Self, LayerError> {
        let mut cursor = Cursor::new(bytes);
        let added_count = cursor.read_u32("added_count")?;
        let modified_count = cursor.read_u32("modified_count")?;
        let deleted_count = cursor.read_u32("deleted_count")?;

        let mut added = BTreeMap::new();
        for _ in 0..added_count {
            let entry = decode_entry(&mut cursor)?;
            added.insert(entry.path.clone(), entry);
        }
        let mut modified = BTreeMap::new();
        for _ in 0..modified_count {
            let entry = decode_entry(&mut cursor)?;
            modified.insert(entry.path.clone(), entry);
        }
        let mut deleted = BTreeSet::new();
        for _ in 0..deleted_count {
            deleted.insert(decode_path(&mut cursor)?);
        }

        Ok(Self {
            added,
            modified,
            deleted,
        })
    }
}

fn encode_path(out: &mut Vec<u8>, path: &str) {
    out.extend((path.len() as u32).to_le_bytes());
    out.extend(path.as_bytes());
}

fn encode_entry(out: &mut Vec<u8>, entry: &TarEntry) {
    encode_path(out, &entry.path);
    out.extend(entry.mode.to_le_bytes());
    out.extend(entry.mtime.to_le_bytes());
    out.push(match entry.kind {
        EntryKind::File => 0,
        EntryKind::Directory => 1,
    });
    out.extend((entry.content.len() as u32).to_le_bytes());
    out.extend_from_slice(&entry.content);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], LayerError> {
        if self.pos + n > self.bytes.len() {
            return Err(LayerError::Parse {
                layer: "session.delta".to_string(),
                reason: format!("truncated while reading {field}"),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self, field: &'static str) -> Result<u32, LayerError> {
        let slice = self.take(4, field)?;
        Ok(u32::from_le_bytes(slice.try_into().unwrap()))
    }

    fn read_u64(&mut self, field: &'static str) -> Result<u64, LayerError> {
        let slice = self.take(8, field)?;
        Ok(u64::from_le_bytes(slice.try_into().unwrap()))
    }

    fn read_u8(&mut self, field: &'static str) -> Result<u8, LayerError> {
        Ok(self.take(1, field)?[0])
    }
}

fn decode_path(cursor: &mut Cursor<'_>) -> Result<String, LayerError> {
    let len = cursor.read_u32("path_len")? as usize;
    let bytes = cursor.take(len, "path")?;
    String::from_utf8(bytes.to_vec()).map_err(|_| LayerError::Parse {
        layer: "session.delta".to_string(),
        reason: "path is not valid utf-8".to_string(),
    })
}

fn decode_entry(cursor: &mut Cursor<'_>) -> Result<TarEntry, LayerError> {
    let path = decode_path(cursor)?;
    let mode = cursor.read_u32("mode")?;
    let mtime = cursor.read_u64("mtime")?;
    let kind = match cursor.read_u8("kind")? {
        0 => EntryKind::File,
        1 => EntryKind::Directory,
        other => {
            return Err(LayerError::Parse {
                layer: "session.delta".to_string(),
                reason: format!("unknown entry kind {other}"),
            })
        }
    };
    let content_len = cursor.read_u32("content_len")? as usize;
    let content = cursor.take(content_len, "content")?;
    Ok(TarEntry {
        path,
        mode,
        mtime,
        kind,
        content: Bytes::copy_from_slice(content),
    })
}

/// Computes `{added, modified, deleted}` of `current` against `base`.
/// Content equality is exact byte comparison; mode and
/// mtime participate too (mtime compared with second precision, i.e. the
/// stored integer seconds value).
pub fn compute_delta(base: &[TarEntry], current: &[TarEntry]) -> Delta {
    let base_map: BTreeMap<&str, &TarEntry> =
        base.iter().map(|e| (e.path.as_str(), e)).collect();
    let current_map: BTreeMap<&str, &TarEntry> =
        current.iter().map(|e| (e.path.as_str(), e)).collect();

    let mut delta = Delta::default();

    for (path, entry) in &current_map {
        match base_map.get(path) {
            None => {
                delta.added.insert((*path).to_string(), (*entry).clone());
            }
            Some(base_entry) => {
                if !entries_equal(base_entry, entry) {
                    delta.modified.insert((*path).to_string(), (*entry).clone());
                }
            }
        }
    }

    for path in base_map.keys() {
        if !current_map.contains_key(path) {
            delta.deleted.insert((*path).to_string());
        }
    }

    delta
}

fn entries_equal(a: &TarEntry, b: &TarEntry) -> bool {
    a.mode == b.mode && a.mtime == b.mtime && a.kind == b.kind && a.content == b.content
}

/// Rebuilds the current filesystem: start from `base`, drop `deleted`,
/// replace `modified`, append `added`.
pub fn apply_delta(base: &[TarEntry], delta: &Delta) -> Vec<TarEntry> {
    let mut out = Vec::with_capacity(base.len() + delta.added.len());
    for entry in base {
        if delta.deleted.contains(&entry.path) {
            continue;
        }
        if let Some(replacement) = delta.modified.get(&entry.path) {
            out.push(replacement.clone());
        } else {
            out.push(entry.clone());
        }
    }
    for entry in delta.added.values() {
        out.push(entry.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn file(path: &str, content: &str, mtime: u64) -> TarEntry {
        TarEntry {
            path: path.to_string(),
            mode: 0o644,
            mtime,
            kind: EntryKind::File,
            content: Bytes::copy_from_slice(content.as_bytes()),
        }
    }

    fn as_set(entries: &[TarEntry]) -> HashSet<(String, u32, u64, Vec<u8>)> {
        entries
            .iter()
            .map(|e| (e.path.clone(), e.mode, e.mtime, e.content.to_vec()))
            .collect()
    }

    #[test]
    fn delta_round_trip() {
        let base = vec![file("/a", "1", 1), file("/b", "2", 1), file("/c", "3", 1)];
        let current = vec![
            file("/a", "1", 1),       // unchanged
            file("/b", "modified", 2), // modified
            file("/d", "new", 3),      // added
            // "/c" deleted
        ];

        let delta = compute_delta(&base, &current);
        assert!(delta.added.contains_key("/d"));
        assert!(delta.modified.contains_key("/b"));
        assert!(delta.deleted.contains("/c"));
        assert!(!delta.added.contains_key("/a"));

        let rebuilt = apply_delta(&base, &delta);
        assert_eq!(as_set(&rebuilt), as_set(&current));
    }

    #[test]
    fn encode_decode_round_trip() {
        let base = vec![file("/a", "1", 1)];
        let current = vec![file("/a", "2", 2), file("/b", "new", 3)];
        let delta = compute_delta(&base, &current);

        let bytes = delta.encode();
        let decoded = Delta::decode(&bytes).unwrap();
        assert_eq!(decoded, delta);
    }

    #[test]
    fn decode_rejects_truncated_bytes() {
        let base = vec![file("/a", "1", 1)];
        let current = vec![file("/a", "2", 2)];
        let delta = compute_delta(&base, &current);
        let mut bytes = delta.encode();
        bytes.truncate(bytes.len() - 2);
        assert!(Delta::decode(&bytes).is_err());
    }

    #[test]
    fn invariants_hold_by_construction() {
        let base = vec![file("/a", "1", 1)];
        let current = vec![file("/a", "2", 2), file("/b", "new", 1)];
        let delta = compute_delta(&base, &current);
        for path in delta.added.keys() {
            assert!(!delta.modified.contains_key(path));
        }
        for path in &delta.deleted {
            assert!(!delta.added.contains_key(path) && !delta.modified.contains_key(path));
        }
    }
}
