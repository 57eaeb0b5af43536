//! Local package-layer persistence. The fetch side is a host-JS concern
//! and out of scope here.

use std::sync::Arc;

use crate::config::PackageManifest;
use crate::error::StorageError;

use super::store::PersistentStore;

const MANIFEST_KEY: &str = "packages/manifest.json";

fn tar_key(id: &str) -> String {
    format!("packages/{id}.tar")
}

/// Owns the package layer's local lifecycle: persisting a fetched tar and
/// updating the manifest on install, removing both on uninstall. Created
/// on install, destroyed on uninstall.
pub struct PackageStore {
    backing: Arc<dyn PersistentStore>,
}

impl PackageStore {
    pub fn new(backing: Arc<dyn PersistentStore>) -> Self {
        Self { backing }
    }

    pub fn load_manifest(&self) -> Result<PackageManifest, StorageError> {
        match self.backing.read(MANIFEST_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(PackageManifest::default()),
        }
    }

    fn save_manifest(&self, manifest: &PackageManifest) -> Result<(), StorageError> {
        self.backing
            .write_atomic(MANIFEST_KEY, &serde_json::to_vec(manifest)?)
    }

    /// Persists a fetched package tar and marks it installed.
    pub fn install(&self, id: &str, tar_bytes: &[u8]) -> Result<(), StorageError> {
        self.backing.write_atomic(&tar_key(id), tar_bytes)?;
        let mut manifest = self.load_manifest()?;
        manifest.mark_installed(id);
        self.save_manifest(&manifest)
    }

    /// Removes a package's persisted tar and marks it uninstalled.
    pub fn uninstall(&self, id: &str) -> Result<(), StorageError> {
        self.backing.remove(&tar_key(id))?;
        let mut manifest = self.load_manifest()?;
        manifest.mark_uninstalled(id);
        self.save_manifest(&manifest)
    }

    pub fn load_tar(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.backing.read(&tar_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::store::InMemoryStore;

    #[test]
    fn install_then_uninstall_round_trip() {
        let store = PackageStore::new(Arc::new(InMemoryStore::new()));
        store.install("pkg1", b"tar-bytes").unwrap();

        assert_eq!(store.load_tar("pkg1").unwrap(), Some(b"tar-bytes".to_vec()));
        let manifest = store.load_manifest().unwrap();
        assert!(manifest.installed.iter().any(|p| p == "pkg1"));

        store.uninstall("pkg1").unwrap();
        assert_eq!(store.load_tar("pkg1").unwrap(), None);
        let manifest = store.load_manifest().unwrap();
        assert!(!manifest.installed.iter().any(|p| p == "pkg1"));
    }
}
