//! Manifest Registry
//!
//! Holds every registered app, keyed by id. Built-in apps are registered at
//! boot; installed apps are discovered from the install root and may be
//! unregistered again on uninstall.

use core::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use keel_sync::Lock;

use crate::manifest::{is_valid_id, AppDescriptor, AppManifest, EntryPoint};
use crate::properties::load_properties;
use crate::{ManifestError, ManifestResult};

/// File name of the descriptor inside an app's install directory
pub const DESCRIPTOR_FILE: &str = "manifest.properties";

/// Supplies entry points for apps installed outside the firmware image
pub trait EntryResolver {
    /// Entry point for the app described by `descriptor`, installed at `path`
    fn resolve(&self, descriptor: &AppDescriptor, path: &Path) -> Option<EntryPoint>;
}

impl<F> EntryResolver for F
where
    F: Fn(&AppDescriptor, &Path) -> Option<EntryPoint>,
{
    fn resolve(&self, descriptor: &AppDescriptor, path: &Path) -> Option<EntryPoint> {
        self(descriptor, path)
    }
}

/// Registered app manifests
#[derive(Default)]
pub struct ManifestRegistry {
    manifests: Lock<RefCell<BTreeMap<String, Arc<AppManifest>>>>,
}

static_assertions::assert_impl_all!(ManifestRegistry: Send, Sync);

impl ManifestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manifest
    ///
    /// # Arguments
    ///
    /// * `manifest` - Manifest to add; its id must be valid and unused
    ///
    /// # Returns
    ///
    /// Ok(()) on success, or an error if:
    /// - The id fails validation (`InvalidId`)
    /// - The id is already registered (`DuplicateId`)
    ///
    /// The registry is unchanged on error.
    pub fn register(&self, manifest: AppManifest) -> ManifestResult<()> {
        if !is_valid_id(&manifest.id) {
            log::error!("Rejected app with invalid id {:?}", manifest.id);
            return Err(ManifestError::InvalidId { id: manifest.id });
        }

        let guard = self.manifests.scoped();
        let mut manifests = guard.borrow_mut();
        if manifests.contains_key(&manifest.id) {
            log::warn!("App {} is already registered", manifest.id);
            return Err(ManifestError::DuplicateId { id: manifest.id });
        }

        log::info!("Registered app {}", manifest.id);
        manifests.insert(manifest.id.clone(), Arc::new(manifest));
        Ok(())
    }

    /// Remove an app, returning its manifest
    pub fn unregister(&self, id: &str) -> ManifestResult<Arc<AppManifest>> {
        let removed = self.manifests.scoped().borrow_mut().remove(id);
        match removed {
            Some(manifest) => {
                log::info!("Unregistered app {id}");
                Ok(manifest)
            }
            None => Err(ManifestError::NotFound { id: id.to_string() }),
        }
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<AppManifest>> {
        self.manifests.scoped().borrow().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.manifests.scoped().borrow().contains_key(id)
    }

    /// All manifests, ordered by id
    pub fn list(&self) -> Vec<Arc<AppManifest>> {
        self.manifests.scoped().borrow().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.manifests.scoped().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse one installed app's descriptor and register it
    ///
    /// Nothing is registered unless the descriptor parses, the id matches
    /// nothing registered, and an entry point resolves.
    pub fn install(&self, app_dir: &Path, resolver: &dyn EntryResolver) -> ManifestResult<()> {
        let map = load_properties(&app_dir.join(DESCRIPTOR_FILE))?;
        let descriptor = AppDescriptor::parse(&map)?;

        if self.contains(&descriptor.id) {
            return Err(ManifestError::DuplicateId { id: descriptor.id });
        }

        let entry = resolver.resolve(&descriptor, app_dir).ok_or_else(|| {
            ManifestError::invalid("[app]id", format!("no entry point for {}", descriptor.id))
        })?;

        self.register(descriptor.into_manifest(app_dir.to_path_buf(), entry))
    }

    /// Register every app installed under `install_root`
    ///
    /// Scans `<install_root>/*/manifest.properties`. Apps that fail to parse
    /// or resolve are logged and skipped. Returns the number registered.
    pub fn discover_installed(&self, install_root: &Path, resolver: &dyn EntryResolver) -> usize {
        let entries = match fs::read_dir(install_root) {
            Ok(entries) => entries,
            Err(e) => {
                log::info!("No installed apps at {}: {}", install_root.display(), e);
                return 0;
            }
        };

        let mut dirs: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.join(DESCRIPTOR_FILE).is_file())
            .collect();
        dirs.sort();

        let mut registered = 0;
        for dir in dirs {
            match self.install(&dir, resolver) {
                Ok(()) => registered += 1,
                Err(e) => log::warn!("Skipping app at {}: {}", dir.display(), e),
            }
        }

        log::info!(
            "Discovered {} installed app(s) in {}",
            registered,
            install_root.display()
        );
        registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{App, AppContext};

    struct Idle;

    impl App for Idle {
        fn run(&self, _ctx: &AppContext) {}
    }

    fn manifest(id: &str) -> AppManifest {
        AppManifest::new(id, "Idle", || Arc::new(Idle) as Arc<dyn App>)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ManifestRegistry::new();
        registry.register(manifest("com.example.idle")).unwrap();

        assert!(registry.contains("com.example.idle"));
        assert_eq!(registry.lookup("com.example.idle").unwrap().name, "Idle");
        assert!(registry.lookup("com.example.other").is_none());
    }

    #[test]
    fn test_duplicate_id_keeps_one_entry() {
        let registry = ManifestRegistry::new();
        registry.register(manifest("com.example.idle")).unwrap();

        assert_eq!(
            registry.register(manifest("com.example.idle")),
            Err(ManifestError::DuplicateId {
                id: "com.example.idle".into()
            })
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_id_leaves_registry_untouched() {
        let registry = ManifestRegistry::new();
        for id in ["com/example", "abc", "", "com.example.idle/../x"] {
            assert_eq!(
                registry.register(manifest(id)),
                Err(ManifestError::InvalidId { id: id.into() })
            );
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister() {
        let registry = ManifestRegistry::new();
        registry.register(manifest("com.example.idle")).unwrap();

        assert_eq!(registry.unregister("com.example.idle").unwrap().id, "com.example.idle");
        assert_eq!(
            registry.unregister("com.example.idle").unwrap_err(),
            ManifestError::NotFound {
                id: "com.example.idle".into()
            }
        );
    }

    #[test]
    fn test_list_is_ordered_by_id() {
        let registry = ManifestRegistry::new();
        registry.register(manifest("org.example.b")).unwrap();
        registry.register(manifest("com.example.a")).unwrap();

        let ids: Vec<_> = registry.list().iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["com.example.a", "org.example.b"]);
    }
}
