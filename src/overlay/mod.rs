//! Overlay persistence engine.
//!
//! Composes the guest root filesystem from an immutable base image, an
//! ordered stack of package layers, and a per-session writable delta, and
//! owns the one persistence write path back to origin-private storage.

pub mod delta;
pub mod fingerprint;
pub mod merge;
pub mod packages;
pub mod session;
pub mod store;
pub mod tarfile;

pub use delta::{apply_delta, compute_delta, Delta};
pub use merge::{merge_layer_stack, merge_tars};
pub use tarfile::{EntryKind, TarEntry, TarFile};

use std::io::Read;

use bytes::Bytes;

use crate::error::LayerError;

/// Decompresses a gzipped base/package tar fetched over the network. A
/// plain (non-gzipped) tar is passed through unchanged.
pub fn maybe_decompress(bytes: Bytes) -> Result<Bytes, LayerError> {
    const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
    if bytes.len() >= 2 && bytes[0..2] == GZIP_MAGIC {
        let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|e| LayerError::Parse {
            layer: "rootfs".to_string(),
            reason: format!("gzip decode failed: {e}"),
        })?;
        Ok(Bytes::from(out))
    } else {
        Ok(bytes)
    }
}

/// Full boot composition: `applyDelta(mergeTars(mergeTars(base, pkg1),
/// pkg2, …), sessionDelta)`.
pub fn compose_boot_image(
    base: &[TarEntry],
    packages: &[Vec<TarEntry>],
    session_delta: Option<&Delta>,
) -> Vec<TarEntry> {
    let composed_base = merge_layer_stack(base, packages);
    match session_delta {
        Some(delta) => apply_delta(&composed_base, delta),
        None => composed_base,
    }
}
