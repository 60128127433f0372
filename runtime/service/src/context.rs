//! Service manifests and per-service contexts

use core::cell::RefCell;
use core::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keel_app::Bundle;
use keel_paths::Paths;
use keel_sync::Lock;

/// A long-lived background worker
///
/// `on_start` and `on_stop` run on the thread calling
/// [`crate::ServiceRuntime::start`] / [`crate::ServiceRuntime::stop`]; a
/// service that needs a worker thread spawns it in `on_start` and joins it
/// in `on_stop`.
pub trait Service: Send + Sync {
    /// Return `false` to refuse starting; the service stays stopped
    fn on_start(&self, ctx: &ServiceContext) -> bool;

    fn on_stop(&self, _ctx: &ServiceContext) {}
}

/// Creates a fresh service instance for every start
pub type ServiceFactory = Arc<dyn Fn() -> Arc<dyn Service> + Send + Sync>;

/// Registration record of one service
#[derive(Clone)]
pub struct ServiceManifest {
    pub id: String,
    /// Started by the system once booting completes
    pub autostart: bool,
    pub factory: ServiceFactory,
}

impl ServiceManifest {
    pub fn new(
        id: impl Into<String>,
        factory: impl Fn() -> Arc<dyn Service> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            autostart: false,
            factory: Arc::new(factory),
        }
    }

    pub fn autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }
}

impl fmt::Debug for ServiceManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceManifest")
            .field("id", &self.id)
            .field("autostart", &self.autostart)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle
    pub(crate) fn can_become(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directories owned by one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePaths {
    data: PathBuf,
    system: PathBuf,
}

impl ServicePaths {
    pub fn new(paths: &Paths, service_id: &str) -> Self {
        Self {
            data: paths.service_data_path(service_id),
            system: paths.service_system_path(service_id),
        }
    }

    /// Writable directory, on the data partition
    pub fn data_directory(&self) -> &Path {
        &self.data
    }

    /// Read-only assets, on the system partition
    pub fn system_directory(&self) -> &Path {
        &self.system
    }

    pub fn data_path(&self, child: &str) -> PathBuf {
        keel_paths::join(&self.data, child)
    }

    pub fn system_path(&self, child: &str) -> PathBuf {
        keel_paths::join(&self.system, child)
    }
}

pub(crate) struct ContextState {
    pub(crate) state: ServiceState,
    pub(crate) parameters: Bundle,
    pub(crate) service: Option<Arc<dyn Service>>,
}

/// Runtime record of one registered service
///
/// Created on registration and kept until the runtime is dropped. All
/// mutable state sits behind the context's own lock.
pub struct ServiceContext {
    manifest: ServiceManifest,
    paths: ServicePaths,
    pub(crate) inner: Lock<RefCell<ContextState>>,
}

static_assertions::assert_impl_all!(ServiceContext: Send, Sync);

impl ServiceContext {
    pub(crate) fn new(manifest: ServiceManifest, paths: &Paths) -> Self {
        let service_paths = ServicePaths::new(paths, &manifest.id);
        Self {
            manifest,
            paths: service_paths,
            inner: Lock::new(RefCell::new(ContextState {
                state: ServiceState::Stopped,
                parameters: Bundle::new(),
                service: None,
            })),
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn manifest(&self) -> &ServiceManifest {
        &self.manifest
    }

    pub fn state(&self) -> ServiceState {
        self.inner.scoped().borrow().state
    }

    /// Parameters of the current or last start
    pub fn parameters(&self) -> Bundle {
        self.inner.scoped().borrow().parameters.clone()
    }

    pub fn paths(&self) -> &ServicePaths {
        &self.paths
    }

    /// The running instance, if any
    pub fn service(&self) -> Option<Arc<dyn Service>> {
        self.inner.scoped().borrow().service.clone()
    }

    /// Move along one lifecycle edge
    ///
    /// Caller holds `inner`. Returns whether the transition was allowed.
    pub(crate) fn transition(&self, inner: &mut ContextState, next: ServiceState) -> bool {
        if !inner.state.can_become(next) {
            return false;
        }
        log::debug!("Service {}: {} -> {}", self.manifest.id, inner.state, next);
        inner.state = next;
        true
    }
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("id", &self.manifest.id)
            .field("state", &self.state())
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}
