//! Layer composition operations.

use std::collections::HashSet;

use super::tarfile::TarEntry;

/// Union by path: overlay entries fully replace base entries with the same
/// path; unshadowed base entries pass through. Ordering: base first in
/// original order, then overlay-only entries in overlay order — test
/// suites depend on this for determinism.
///
/// Associative at the per-path level: repeated application folds left to
/// right, each later layer winning ties (semantic equality; file order
/// may differ).
pub fn merge_tars(base: &[TarEntry], overlay: &[TarEntry]) -> Vec<TarEntry> {
    let overlay_paths: HashSet<&str> = overlay.iter().map(|e| e.path.as_str()).collect();
    let mut out = Vec::with_capacity(base.len() + overlay.len());
    for entry in base {
        if !overlay_paths.contains(entry.path.as_str()) {
            out.push(entry.clone());
        }
    }
    out.extend(overlay.iter().cloned());
    out
}

/// Folds `merge_tars` over an ordered stack of package layers, later
/// packages winning ties.
pub fn merge_layer_stack(base: &[TarEntry], layers: &[Vec<TarEntry>]) -> Vec<TarEntry> {
    let mut composed = base.to_vec();
    for layer in layers {
        composed = merge_tars(&composed, layer);
    }
    composed
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::overlay::tarfile::EntryKind;
    use bytes::Bytes;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn entry_set(
    ) -> impl Strategy<Value = Vec<TarEntry>> {
        proptest::collection::hash_map("/[a-c]", "[a-c]", 0..4).prop_map(|map| {
            map.into_iter()
                .map(|(path, content)| TarEntry {
                    path,
                    mode: 0o644,
                    mtime: 0,
                    kind: EntryKind::File,
                    content: Bytes::copy_from_slice(content.as_bytes()),
                })
                .collect()
        })
    }

    fn as_map(entries: &[TarEntry]) -> HashMap<&str, &[u8]> {
        entries
            .iter()
            .map(|e| (e.path.as_str(), e.content.as_ref()))
            .collect()
    }

    proptest! {
        // Merge associativity of single-path wins.
        #[test]
        fn merge_associativity(a in entry_set(), b in entry_set(), c in entry_set()) {
            let left = merge_tars(&merge_tars(&a, &b), &c);
            let right = merge_tars(&a, &merge_tars(&b, &c));
            prop_assert_eq!(as_map(&left), as_map(&right));
        }

        // Overlay precedence.
        #[test]
        fn overlay_precedence_holds(base in entry_set(), overlay in entry_set()) {
            let merged = as_map(&merge_tars(&base, &overlay));
            let base_map = as_map(&base);
            let overlay_map = as_map(&overlay);

            for (path, content) in &overlay_map {
                prop_assert_eq!(merged.get(path), Some(content));
            }
            for (path, content) in &base_map {
                if !overlay_map.contains_key(path) {
                    prop_assert_eq!(merged.get(path), Some(content));
                }
            }
        }
    }
}
