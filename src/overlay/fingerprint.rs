//! Base/session fingerprinting.

use sha2::{Digest, Sha256};

/// Hashes raw base-image bytes into the fingerprint stored at
/// `base/fingerprint.txt`.
pub fn base_fingerprint(base_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(base_bytes);
    hex::encode(hasher.finalize())
}

/// `hash(base.fingerprint ∥ pkg₁.id ∥ pkg₂.id ∥ …)`, stored with the
/// session record.
pub fn composed_fingerprint(base_fingerprint: &str, package_ids: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(base_fingerprint.as_bytes());
    for id in package_ids {
        hasher.update(id.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Minimal hex encoding, avoiding a dependency purely for this one call
/// site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for byte in bytes.as_ref() {
            write!(out, "{byte:02x}").unwrap();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_give_same_fingerprint() {
        let a = composed_fingerprint("base1", &["pkg1".to_string(), "pkg2".to_string()]);
        let b = composed_fingerprint("base1", &["pkg1".to_string(), "pkg2".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn package_order_changes_fingerprint() {
        let a = composed_fingerprint("base1", &["pkg1".to_string(), "pkg2".to_string()]);
        let b = composed_fingerprint("base1", &["pkg2".to_string(), "pkg1".to_string()]);
        assert_ne!(a, b);
    }
}
