//! Machine configuration record.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One configuration record per machine, as accepted by the Supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfig {
    /// Stable machine identifier; also the advisory lock name (`machine:{id}`).
    pub id: String,
    /// Human label, shown in the UI collaborator.
    pub name: String,
    /// Where to fetch the base image. May point at a gzipped tar.
    pub rootfs_url: String,
    /// argv handed to the guest at boot.
    #[serde(default)]
    pub entrypoint: Vec<String>,
    /// Environment strings (`KEY=value`) handed to the guest at boot.
    #[serde(default)]
    pub env: Vec<String>,
    /// Ordered ids of package layers to apply on top of the base.
    #[serde(default)]
    pub packages: Vec<String>,
    /// WebTransport endpoint for the network bridge.
    pub proxy_url: Option<String>,
    /// Auto-save cadence, in milliseconds. Defaults to 10 000.
    #[serde(default = "default_auto_save_ms")]
    pub auto_save_ms: u64,
    /// `connect()` deadline, in milliseconds. Defaults to 30 000.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

const fn default_auto_save_ms() -> u64 {
    10_000
}

const fn default_connect_timeout_ms() -> u64 {
    30_000
}

impl MachineConfig {
    /// Validates the record, matching `ConfigError`'s fatal-at-boot cases.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::EmptyMachineId);
        }
        if self.rootfs_url.trim().is_empty() {
            return Err(ConfigError::MissingRootfsUrl);
        }
        Ok(())
    }

    /// Parses a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML configuration document. Only available with the
    /// `config-file` feature, matching a deployment that prefers a
    /// hand-edited file over a JSON blob assembled by the host page.
    #[cfg(feature = "config-file")]
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_millis(self.auto_save_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// The `packages/manifest.json` file the Overlay Engine reads and rewrites
/// on install/uninstall; see `DESIGN.md` for its on-disk layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageManifest {
    pub available: Vec<PackageInfo>,
    pub installed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
}

impl PackageManifest {
    pub fn mark_installed(&mut self, id: &str) {
        if !self.installed.iter().any(|p| p == id) {
            self.installed.push(id.to_string());
        }
    }

    pub fn mark_uninstalled(&mut self, id: &str) {
        self.installed.retain(|p| p != id);
    }
}
