//! Base/package fetch seam, used during boot to read the session record
//! and load the base image, packages, and delta.
//!
//! Fetching `rootfsUrl` and package tars over the network is a host-page
//! concern, not part of this core — the actual `fetch()` call is an
//! external collaborator. This seam is the boundary: the Supervisor asks
//! for bytes by id, an `AssetSource` supplies them, already possibly
//! gzipped (`overlay::maybe_decompress` handles that uniformly for both
//! base and packages).
use bytes::Bytes;

use crate::error::LayerError;

pub trait AssetSource: Send + Sync {
    fn fetch_base(&self, rootfs_url: &str) -> Result<Bytes, LayerError>;
    fn fetch_package(&self, package_id: &str) -> Result<Bytes, LayerError>;
}

/// Serves pre-loaded bytes from memory, standing in for the real
/// `fetch()`-backed adapter in tests.
#[derive(Default)]
pub struct StaticAssetSource {
    base: Bytes,
    packages: std::collections::HashMap<String, Bytes>,
}

impl StaticAssetSource {
    pub fn new(base: impl Into<Bytes>) -> Self {
        Self {
            base: base.into(),
            packages: std::collections::HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_package(mut self, id: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        self.packages.insert(id.into(), bytes.into());
        self
    }
}

impl AssetSource for StaticAssetSource {
    fn fetch_base(&self, _rootfs_url: &str) -> Result<Bytes, LayerError> {
        Ok(self.base.clone())
    }

    fn fetch_package(&self, package_id: &str) -> Result<Bytes, LayerError> {
        self.packages
            .get(package_id)
            .cloned()
            .ok_or_else(|| LayerError::Parse {
                layer: package_id.to_string(),
                reason: "package not found in asset source".to_string(),
            })
    }
}
