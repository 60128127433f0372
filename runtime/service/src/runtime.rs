//! Service Runtime
//!
//! Services are keyed by their stable id; at most one instance of a service
//! is ever live. `start` and `stop` claim the service by moving it into
//! `Starting` / `Stopping` under its context lock, then run the service's
//! callback with no lock held.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use keel_app::Bundle;
use keel_paths::Paths;
use keel_sync::Lock;

use crate::context::{ServiceContext, ServiceManifest, ServiceState};
use crate::{Result, ServiceError};

/// Default bound on waiting for a service's context lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Whether `id` can name a service
///
/// Ids become directory names: non-empty ASCII alphanumerics, `.`, `-`
/// and `_`.
pub fn is_valid_service_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Registers, starts and stops services
pub struct ServiceRuntime {
    paths: Paths,
    booted: AtomicBool,
    lock_timeout: Duration,
    contexts: Lock<RefCell<BTreeMap<String, Arc<ServiceContext>>>>,
}

static_assertions::assert_impl_all!(ServiceRuntime: Send, Sync);

impl ServiceRuntime {
    pub fn new(paths: Paths) -> Self {
        Self::with_lock_timeout(paths, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(paths: Paths, lock_timeout: Duration) -> Self {
        Self {
            paths,
            booted: AtomicBool::new(false),
            lock_timeout,
            contexts: Lock::new(RefCell::new(BTreeMap::new())),
        }
    }

    /// Accept lifecycle calls
    pub fn open(&self) {
        self.booted.store(true, Ordering::Release);
        log::info!("Service runtime open");
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::Acquire)
    }

    /// Register a service, creating its context in `Stopped`
    ///
    /// # Errors
    /// - `ServiceError::InvalidId` if the id fails [`is_valid_service_id`]
    /// - `ServiceError::DuplicateId` if the id is taken
    pub fn register(&self, manifest: ServiceManifest) -> Result<Arc<ServiceContext>> {
        if !is_valid_service_id(&manifest.id) {
            return Err(ServiceError::InvalidId { id: manifest.id });
        }

        let guard = self.contexts.scoped_timeout(self.lock_timeout)?;
        let mut contexts = guard.borrow_mut();
        if contexts.contains_key(&manifest.id) {
            log::warn!("Service {} is already registered", manifest.id);
            return Err(ServiceError::DuplicateId { id: manifest.id });
        }

        let id = manifest.id.clone();
        let context = Arc::new(ServiceContext::new(manifest, &self.paths));
        contexts.insert(id.clone(), context.clone());
        log::info!("Registered service {id}");
        Ok(context)
    }

    pub fn find(&self, id: &str) -> Option<Arc<ServiceContext>> {
        self.contexts.scoped().borrow().get(id).cloned()
    }

    pub fn state(&self, id: &str) -> Option<ServiceState> {
        self.find(id).map(|context| context.state())
    }

    /// Every registered service, ordered by id
    pub fn list(&self) -> Vec<Arc<ServiceContext>> {
        self.contexts.scoped().borrow().values().cloned().collect()
    }

    fn context(&self, id: &str) -> Result<Arc<ServiceContext>> {
        if !self.is_booted() {
            return Err(ServiceError::NotBooted);
        }
        self.find(id).ok_or_else(|| ServiceError::UnknownService { id: id.to_string() })
    }

    /// Start service `id` with `parameters`
    ///
    /// A fresh instance is created from the manifest's factory; the service
    /// is `Running` once its `on_start` returned `true`.
    ///
    /// # Errors
    /// - `ServiceError::NotBooted` before [`ServiceRuntime::open`]
    /// - `ServiceError::UnknownService` if `id` is not registered
    /// - `ServiceError::AlreadyRunning` unless the service is `Stopped`
    /// - `ServiceError::StartFailed` if `on_start` refused or panicked
    /// - `ServiceError::LockTimeout` if the context stayed locked
    pub fn start(&self, id: &str, parameters: Bundle) -> Result<()> {
        let context = self.context(id)?;

        {
            let guard = context.inner.scoped_timeout(self.lock_timeout)?;
            let mut inner = guard.borrow_mut();
            if !context.transition(&mut inner, ServiceState::Starting) {
                return Err(ServiceError::AlreadyRunning { id: id.to_string() });
            }
            inner.parameters = parameters;
        }

        log::info!("Starting service {id}");
        let factory = context.manifest().factory.clone();
        let started = panic::catch_unwind(AssertUnwindSafe(|| {
            let service = factory();
            service.on_start(&context).then_some(service)
        }));

        let guard = context.inner.scoped();
        let mut inner = guard.borrow_mut();
        match started {
            Ok(Some(service)) => {
                inner.service = Some(service);
                context.transition(&mut inner, ServiceState::Running);
                log::info!("Service {id} running");
                Ok(())
            }
            Ok(None) => {
                context.transition(&mut inner, ServiceState::Stopped);
                log::warn!("Service {id} refused to start");
                Err(ServiceError::StartFailed { id: id.to_string() })
            }
            Err(_) => {
                context.transition(&mut inner, ServiceState::Stopped);
                log::error!("Service {id} panicked while starting");
                Err(ServiceError::StartFailed { id: id.to_string() })
            }
        }
    }

    /// Stop a running service
    ///
    /// # Errors
    /// - `ServiceError::NotRunning` unless the service is `Running`
    pub fn stop(&self, id: &str) -> Result<()> {
        let context = self.context(id)?;

        let service = {
            let guard = context.inner.scoped_timeout(self.lock_timeout)?;
            let mut inner = guard.borrow_mut();
            if !context.transition(&mut inner, ServiceState::Stopping) {
                return Err(ServiceError::NotRunning { id: id.to_string() });
            }
            inner.service.take()
        };

        log::info!("Stopping service {id}");
        if let Some(service) = service {
            if panic::catch_unwind(AssertUnwindSafe(|| service.on_stop(&context))).is_err() {
                log::error!("Service {id} panicked while stopping");
            }
        }

        let guard = context.inner.scoped();
        context.transition(&mut guard.borrow_mut(), ServiceState::Stopped);
        log::info!("Service {id} stopped");
        Ok(())
    }

    /// Start every service marked `autostart`, in id order
    ///
    /// Failures are logged; returns the number of services started.
    pub fn start_autostart(&self) -> usize {
        let ids: Vec<String> = self
            .list()
            .iter()
            .filter(|context| context.manifest().autostart)
            .map(|context| context.id().to_string())
            .collect();
        self.start_all(&ids)
    }

    /// Start each of `ids` that is not already running
    ///
    /// Failures are logged; returns the number of services started.
    pub fn start_all(&self, ids: &[String]) -> usize {
        let mut started = 0;
        for id in ids {
            match self.start(id, Bundle::new()) {
                Ok(()) => started += 1,
                Err(ServiceError::AlreadyRunning { .. }) => {}
                Err(e) => log::error!("Autostart of {id} failed: {e}"),
            }
        }
        started
    }

    /// Stop every running service, in reverse id order
    ///
    /// Returns the number of services stopped.
    pub fn stop_all(&self) -> usize {
        self.list()
            .iter()
            .rev()
            .filter(|context| context.state() == ServiceState::Running)
            .filter(|context| match self.stop(context.id()) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Could not stop service {}: {}", context.id(), e);
                    false
                }
            })
            .count()
    }
}

impl core::fmt::Debug for ServiceRuntime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceRuntime")
            .field("booted", &self.is_booted())
            .field("services", &self.contexts.scoped().borrow().len())
            .finish_non_exhaustive()
    }
}
