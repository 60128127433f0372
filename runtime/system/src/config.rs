//! Runtime configuration
//!
//! ```toml
//! [partitions]
//! system = "/system"
//! data = "/data"
//!
//! [boot]
//! lock_timeout_ms = 1000
//!
//! [services]
//! autostart = ["statusbar", "wifi"]
//! ```
//!
//! Every field has a default; an empty document yields [`SystemConfig::default`].

use core::time::Duration;
use std::fs;
use std::path::Path;

use keel_paths::PartitionLayout;
use serde::Deserialize;

use crate::{Result, SystemError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemConfig {
    pub partitions: PartitionLayout,
    pub boot: BootConfig,
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootConfig {
    /// Bound on waiting for runtime locks
    pub lock_timeout_ms: u64,
    /// Bound on waiting for each app to stop at shutdown
    pub shutdown_timeout_ms: u64,
    /// Also discover apps installed in `app/` on a mounted SD card
    pub scan_sdcard: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 1000,
            shutdown_timeout_ms: 5000,
            scan_sdcard: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServicesConfig {
    /// Started at boot in addition to services whose manifest asks for it
    pub autostart: Vec<String>,
}

impl SystemConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| SystemError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| SystemError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.boot.lock_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.boot.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(SystemConfig::from_toml_str("").unwrap(), SystemConfig::default());
    }

    #[test]
    fn test_full_document() {
        let config = SystemConfig::from_toml_str(
            r#"
            [partitions]
            system = "/flash/system"
            data = "/flash/data"
            user = "/sdcard/user"

            [boot]
            lock_timeout_ms = 250

            [services]
            autostart = ["statusbar", "wifi"]
            "#,
        )
        .unwrap();

        assert_eq!(config.partitions.system, PathBuf::from("/flash/system"));
        assert_eq!(config.partitions.user, Some(PathBuf::from("/sdcard/user")));
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert!(config.boot.scan_sdcard);
        assert_eq!(config.services.autostart, vec!["statusbar", "wifi"]);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = SystemConfig::from_toml_str("[boot]\nlock_timeout = 5\n").unwrap_err();
        assert!(matches!(err, SystemError::Config(_)));
    }
}
