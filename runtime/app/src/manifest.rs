//! App manifests and descriptor parsing

use core::fmt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use bitflags::bitflags;
use keel_hal::Capabilities;

use crate::app::App;
use crate::{ManifestError, ManifestResult};

pub const MIN_ID_LEN: usize = 5;
pub const MAX_ID_LEN: usize = 64;

/// Creates a fresh app instance for every launch
pub type EntryPoint = Arc<dyn Fn() -> Arc<dyn App> + Send + Sync>;

/// Whether `id` can name an app
///
/// Ids become directory names, so they are limited to ASCII alphanumerics
/// and dots; path separators can never appear.
pub fn is_valid_id(id: &str) -> bool {
    (MIN_ID_LEN..=MAX_ID_LEN).contains(&id.len())
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AppCategory {
    System,
    Settings,
    #[default]
    User,
}

/// Where an app's files live
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AppLocation {
    /// Built into the firmware image
    #[default]
    Internal,
    /// Installed on a data partition or SD card
    External { path: PathBuf },
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AppFlags: u32 {
        /// Not listed by launchers
        const HIDDEN = 1 << 0;
        const HIDE_STATUS_BAR = 1 << 1;
        /// At most one live launch at a time
        const SINGLE_INSTANCE = 1 << 2;
    }
}

impl AppFlags {
    fn parse_list(list: &str) -> Option<Self> {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .try_fold(AppFlags::empty(), |flags, name| {
                let flag = match name.to_ascii_lowercase().as_str() {
                    "hidden" => AppFlags::HIDDEN,
                    "hidestatusbar" | "hide_status_bar" => AppFlags::HIDE_STATUS_BAR,
                    "singleinstance" | "single_instance" => AppFlags::SINGLE_INSTANCE,
                    _ => return None,
                };
                Some(flags | flag)
            })
    }
}

/// Metadata of one installable or built-in app
#[derive(Clone)]
pub struct AppManifest {
    pub id: String,
    pub name: String,
    pub version_name: String,
    pub version_code: u64,
    pub category: AppCategory,
    pub flags: AppFlags,
    pub location: AppLocation,
    pub required_capabilities: Capabilities,
    pub entry: EntryPoint,
}

impl AppManifest {
    /// Manifest for a built-in app with default metadata
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        entry: impl Fn() -> Arc<dyn App> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version_name: "0.0.0".to_string(),
            version_code: 0,
            category: AppCategory::User,
            flags: AppFlags::empty(),
            location: AppLocation::Internal,
            required_capabilities: Capabilities::empty(),
            entry: Arc::new(entry),
        }
    }

    pub fn with_category(mut self, category: AppCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_flags(mut self, flags: AppFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_version(mut self, name: impl Into<String>, code: u64) -> Self {
        self.version_name = name.into();
        self.version_code = code;
        self
    }

    pub fn requiring(mut self, capabilities: Capabilities) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    pub fn is_single_instance(&self) -> bool {
        self.flags.contains(AppFlags::SINGLE_INSTANCE)
    }

    pub fn is_hidden(&self) -> bool {
        self.flags.contains(AppFlags::HIDDEN)
    }
}

impl fmt::Debug for AppManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppManifest")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version_name", &self.version_name)
            .field("version_code", &self.version_code)
            .field("category", &self.category)
            .field("flags", &self.flags)
            .field("location", &self.location)
            .field("required_capabilities", &self.required_capabilities)
            .finish_non_exhaustive()
    }
}

/// Manifest metadata parsed from an installed app's descriptor
///
/// Carries everything but the entry point, which the installer resolves
/// separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDescriptor {
    pub manifest_version: String,
    pub id: String,
    pub name: String,
    pub version_name: String,
    pub version_code: u64,
    pub target_sdk: String,
    pub target_platforms: Vec<String>,
    pub flags: AppFlags,
    pub required_capabilities: Capabilities,
}

fn required<'a>(map: &'a BTreeMap<String, String>, key: &str) -> ManifestResult<&'a str> {
    map.get(key)
        .map(|value| value.trim())
        .ok_or_else(|| ManifestError::MissingField {
            field: key.to_string(),
        })
}

fn all_chars(value: &str, valid: impl Fn(char) -> bool) -> bool {
    value.chars().all(valid)
}

impl AppDescriptor {
    /// Parse a flat descriptor map
    ///
    /// Either every field validates or nothing is produced.
    ///
    /// # Errors
    /// - `ManifestError::MissingField` for an absent required key
    /// - `ManifestError::InvalidId` for an id failing [`is_valid_id`]
    /// - `ManifestError::InvalidField` for any other malformed value
    pub fn parse(map: &BTreeMap<String, String>) -> ManifestResult<Self> {
        let manifest_version = required(map, "[manifest]version")?;
        if manifest_version.is_empty()
            || !all_chars(manifest_version, |c| c.is_ascii_alphanumeric() || c == '.')
        {
            return Err(ManifestError::invalid("[manifest]version", "expected digits and dots"));
        }

        let id = required(map, "[app]id")?;
        if !is_valid_id(id) {
            return Err(ManifestError::InvalidId { id: id.to_string() });
        }

        let name = required(map, "[app]name")?;
        if name.len() < 2 || !all_chars(name, |c| c.is_ascii_alphanumeric() || c == ' ' || c == '-') {
            return Err(ManifestError::invalid("[app]name", "expected at least 2 letters, digits, spaces or dashes"));
        }

        let version_name = required(map, "[app]versionName")?;
        if version_name.is_empty()
            || !all_chars(version_name, |c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            return Err(ManifestError::invalid("[app]versionName", "unexpected character"));
        }

        let version_code = required(map, "[app]versionCode")?;
        if version_code.is_empty() || !all_chars(version_code, |c| c.is_ascii_digit()) {
            return Err(ManifestError::invalid("[app]versionCode", "expected digits"));
        }
        let version_code = version_code
            .parse::<u64>()
            .map_err(|e| ManifestError::invalid("[app]versionCode", e.to_string()))?;

        let target_sdk = required(map, "[target]sdk")?;
        let target_platforms = required(map, "[target]platforms")?
            .split(',')
            .map(str::trim)
            .filter(|platform| !platform.is_empty())
            .map(str::to_string)
            .collect();

        let flags = match map.get("[app]flags") {
            Some(list) => AppFlags::parse_list(list)
                .ok_or_else(|| ManifestError::invalid("[app]flags", format!("unknown flag in {list:?}")))?,
            None => AppFlags::empty(),
        };

        let required_capabilities = match map.get("[app]capabilities") {
            Some(list) => Capabilities::parse_list(list)
                .map_err(|e| ManifestError::invalid("[app]capabilities", e.to_string()))?,
            None => Capabilities::empty(),
        };

        Ok(Self {
            manifest_version: manifest_version.to_string(),
            id: id.to_string(),
            name: name.to_string(),
            version_name: version_name.to_string(),
            version_code,
            target_sdk: target_sdk.to_string(),
            target_platforms,
            flags,
            required_capabilities,
        })
    }

    /// Manifest for this descriptor, installed at `path`
    pub fn into_manifest(self, path: PathBuf, entry: EntryPoint) -> AppManifest {
        AppManifest {
            id: self.id,
            name: self.name,
            version_name: self.version_name,
            version_code: self.version_code,
            category: AppCategory::User,
            flags: self.flags,
            location: AppLocation::External { path },
            required_capabilities: self.required_capabilities,
            entry,
        }
    }
}
