//! Keel Paths - Logical roots to physical mount points
//!
//! # Purpose
//! Apps and services never hard-code where the system or data partition is
//! mounted. They ask for a logical root (system, data, temp, per-app install
//! or user directory) and get a physical path for the running board.
//!
//! # Integration Points
//! - Depends on: keel-hal (SD card presence and mount state)
//! - Provides to: keel-app (install paths, app user data), keel-service
//!   (service data), keel-system (layout from `SystemConfig`)
//!
//! # Architecture
//! - [`PartitionLayout`]: the mount points, deserializable from config
//! - [`Paths`]: pure resolvers composing the layout with ids
//! - [`find_first_mounted_sdcard_path`]: the one resolver that probes hardware
//!
//! # Testing Strategy
//! - Unit tests: every resolver, layout defaults and overrides
//! - Integration tests: SD card lookup on simulated boards

use std::path::{Path, PathBuf};

use keel_hal::{Device, HalRegistry, SdCard};
use serde::Deserialize;

pub const DEFAULT_SYSTEM_ROOT: &str = "/system";
pub const DEFAULT_DATA_ROOT: &str = "/data";

/// Where each partition is mounted
///
/// `temp`, `install` and `user` default to `tmp`, `app` and `user` inside
/// the data partition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartitionLayout {
    pub system: PathBuf,
    pub data: PathBuf,
    pub temp: Option<PathBuf>,
    pub install: Option<PathBuf>,
    pub user: Option<PathBuf>,
}

impl Default for PartitionLayout {
    fn default() -> Self {
        Self {
            system: PathBuf::from(DEFAULT_SYSTEM_ROOT),
            data: PathBuf::from(DEFAULT_DATA_ROOT),
            temp: None,
            install: None,
            user: None,
        }
    }
}

impl PartitionLayout {
    /// Layout with both partitions under `root`, for host simulation
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            system: root.join("system"),
            data: root.join("data"),
            ..Self::default()
        }
    }
}

/// Resolver for logical paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paths {
    layout: PartitionLayout,
}

impl Paths {
    pub fn new(layout: PartitionLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// Read-only system partition
    pub fn system_root(&self) -> &Path {
        &self.layout.system
    }

    /// Writable data partition
    pub fn data_root(&self) -> &Path {
        &self.layout.data
    }

    /// Scratch area
    pub fn temp_path(&self) -> PathBuf {
        self.layout
            .temp
            .clone()
            .unwrap_or_else(|| self.layout.data.join("tmp"))
    }

    /// Parent directory of every installed app
    pub fn install_root(&self) -> PathBuf {
        self.layout
            .install
            .clone()
            .unwrap_or_else(|| self.layout.data.join("app"))
    }

    /// Install directory of `app_id`, or the install root without one
    pub fn app_install_path(&self, app_id: Option<&str>) -> PathBuf {
        match app_id {
            Some(id) => join(self.install_root(), id),
            None => self.install_root(),
        }
    }

    /// Writable user partition
    pub fn user_path(&self) -> PathBuf {
        self.layout
            .user
            .clone()
            .unwrap_or_else(|| self.layout.data.join("user"))
    }

    /// Private data directory of `app_id`
    pub fn app_user_path(&self, app_id: &str) -> PathBuf {
        join(self.user_path(), app_id)
    }

    /// Assets of a built-in app
    pub fn app_system_path(&self, app_id: &str) -> PathBuf {
        join(self.layout.system.join("app"), app_id)
    }

    /// Writable directory of a service
    pub fn service_data_path(&self, service_id: &str) -> PathBuf {
        join(self.layout.data.join("service"), service_id)
    }

    /// Read-only assets of a service
    pub fn service_system_path(&self, service_id: &str) -> PathBuf {
        join(self.layout.system.join("service"), service_id)
    }
}

/// Append `child` to `root`, ignoring leading separators in `child`
///
/// Unlike [`Path::join`], an absolute `child` never replaces `root`.
pub fn join(root: impl AsRef<Path>, child: &str) -> PathBuf {
    root.as_ref().join(child.trim_start_matches('/'))
}

/// Mount path of the first inserted and mounted SD card
///
/// `None` when the board has no card reader, the slot is empty, or the card
/// failed to mount.
pub fn find_first_mounted_sdcard_path(hal: &HalRegistry) -> Option<PathBuf> {
    let handle = hal.sdcard()?;
    let card = handle.device()?;

    if card.is_mounted() {
        Some(card.mount_path().to_path_buf())
    } else {
        log::debug!("SD card {} present but not mounted", card.name());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let paths = Paths::default();
        assert_eq!(paths.system_root(), Path::new("/system"));
        assert_eq!(paths.data_root(), Path::new("/data"));
        assert_eq!(paths.temp_path(), PathBuf::from("/data/tmp"));
        assert_eq!(paths.install_root(), PathBuf::from("/data/app"));
        assert_eq!(paths.user_path(), PathBuf::from("/data/user"));
    }

    #[test]
    fn test_app_paths() {
        let paths = Paths::default();
        assert_eq!(paths.app_install_path(None), PathBuf::from("/data/app"));
        assert_eq!(
            paths.app_install_path(Some("com.example.notes")),
            PathBuf::from("/data/app/com.example.notes")
        );
        assert_eq!(
            paths.app_user_path("com.example.notes"),
            PathBuf::from("/data/user/com.example.notes")
        );
        assert_eq!(
            paths.app_system_path("com.example.notes"),
            PathBuf::from("/system/app/com.example.notes")
        );
    }

    #[test]
    fn test_service_paths() {
        let paths = Paths::default();
        assert_eq!(paths.service_data_path("wifi"), PathBuf::from("/data/service/wifi"));
        assert_eq!(paths.service_system_path("wifi"), PathBuf::from("/system/service/wifi"));
    }

    #[test]
    fn test_overrides() {
        let layout = PartitionLayout {
            temp: Some(PathBuf::from("/ram")),
            install: Some(PathBuf::from("/apps")),
            ..PartitionLayout::rooted_at("/tmp/keel")
        };
        let paths = Paths::new(layout);
        assert_eq!(paths.system_root(), Path::new("/tmp/keel/system"));
        assert_eq!(paths.temp_path(), PathBuf::from("/ram"));
        assert_eq!(paths.app_install_path(Some("a.b.c.d")), PathBuf::from("/apps/a.b.c.d"));
        assert_eq!(paths.user_path(), PathBuf::from("/tmp/keel/data/user"));
    }

    #[test]
    fn test_join_keeps_root() {
        assert_eq!(join("/data", "/etc"), PathBuf::from("/data/etc"));
        assert_eq!(join("/data", "settings"), PathBuf::from("/data/settings"));
    }
}
