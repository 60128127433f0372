//! The system context
//!
//! One [`System`] value owns every registry and runtime of a running device.
//! Nothing is global: tests boot as many systems side by side as they like.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};
use std::path::Path;
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use keel_app::{AppDescriptor, AppManifest, AppRuntime, EntryPoint, EntryResolver, ManifestRegistry};
use keel_hal::{BoardConfiguration, Capabilities, HalRegistry};
use keel_paths::{find_first_mounted_sdcard_path, Paths};
use keel_service::{ServiceManifest, ServiceRuntime};
use keel_sync::Lock;

use crate::config::SystemConfig;
use crate::Result;

/// Boot and shutdown milestones
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    BootHalBegin,
    BootHalEnd { available: Capabilities },
    BootAppsRegistered { count: usize },
    BootServicesStarted { count: usize },
    BootComplete,
    Shutdown,
}

/// Resolver for systems that only run built-in apps
struct NoExternalApps;

impl EntryResolver for NoExternalApps {
    fn resolve(&self, descriptor: &AppDescriptor, path: &Path) -> Option<EntryPoint> {
        log::debug!(
            "No entry point for installed app {} at {}",
            descriptor.id,
            path.display()
        );
        None
    }
}

/// A booted device
pub struct System {
    config: SystemConfig,
    hal: Arc<HalRegistry>,
    paths: Paths,
    manifests: Arc<ManifestRegistry>,
    apps: AppRuntime,
    services: ServiceRuntime,
    boot_events: Vec<SystemEvent>,
    subscribers: Lock<RefCell<Vec<Sender<SystemEvent>>>>,
    shut_down: AtomicBool,
}

static_assertions::assert_impl_all!(System: Send, Sync);

impl System {
    /// Boot with built-in apps only
    ///
    /// See [`System::boot_with_resolver`].
    pub fn boot(
        board: &BoardConfiguration,
        config: SystemConfig,
        apps: Vec<AppManifest>,
        services: Vec<ServiceManifest>,
    ) -> Result<Self> {
        Self::boot_with_resolver(board, config, apps, services, &NoExternalApps)
    }

    /// Boot the board and bring up every runtime
    ///
    /// 1. HAL: bootstrap and capability factories
    /// 2. Manifests: built-in `apps`, then apps installed on the data
    ///    partition and the SD card, with entry points from `resolver`
    /// 3. Runtimes: `services` registered, boot gate opened
    /// 4. Autostart services started
    ///
    /// # Errors
    /// - `SystemError::Hal` if the board bootstrap failed
    /// - `SystemError::Manifest` if a built-in app is invalid or duplicated
    /// - `SystemError::Service` if a service is invalid or duplicated
    pub fn boot_with_resolver(
        board: &BoardConfiguration,
        config: SystemConfig,
        apps: Vec<AppManifest>,
        services: Vec<ServiceManifest>,
        resolver: &dyn EntryResolver,
    ) -> Result<Self> {
        let mut boot_events = Vec::new();
        let mut record = |event: SystemEvent| {
            log::info!("{event:?}");
            boot_events.push(event);
        };

        record(SystemEvent::BootHalBegin);
        let hal = Arc::new(HalRegistry::boot(board)?);
        record(SystemEvent::BootHalEnd {
            available: hal.available(),
        });

        let paths = Paths::new(config.partitions.clone());
        let manifests = Arc::new(ManifestRegistry::new());
        for manifest in apps {
            manifests.register(manifest)?;
        }
        manifests.discover_installed(&paths.install_root(), resolver);
        if config.boot.scan_sdcard {
            if let Some(sdcard) = find_first_mounted_sdcard_path(&hal) {
                manifests.discover_installed(&keel_paths::join(sdcard, "app"), resolver);
            }
        }
        record(SystemEvent::BootAppsRegistered {
            count: manifests.len(),
        });

        let app_runtime = AppRuntime::with_lock_timeout(
            manifests.clone(),
            hal.clone(),
            paths.clone(),
            config.lock_timeout(),
        );
        let service_runtime = ServiceRuntime::with_lock_timeout(paths.clone(), config.lock_timeout());
        for manifest in services {
            service_runtime.register(manifest)?;
        }

        app_runtime.open();
        service_runtime.open();

        let started =
            service_runtime.start_autostart() + service_runtime.start_all(&config.services.autostart);
        record(SystemEvent::BootServicesStarted { count: started });
        record(SystemEvent::BootComplete);

        Ok(Self {
            config,
            hal,
            paths,
            manifests,
            apps: app_runtime,
            services: service_runtime,
            boot_events,
            subscribers: Lock::new(RefCell::new(Vec::new())),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn hal(&self) -> &Arc<HalRegistry> {
        &self.hal
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn manifests(&self) -> &Arc<ManifestRegistry> {
        &self.manifests
    }

    pub fn apps(&self) -> &AppRuntime {
        &self.apps
    }

    pub fn services(&self) -> &ServiceRuntime {
        &self.services
    }

    /// Events emitted while booting, in order
    pub fn boot_events(&self) -> &[SystemEvent] {
        &self.boot_events
    }

    /// Receive events emitted from now on
    pub fn subscribe(&self) -> Receiver<SystemEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.scoped().borrow_mut().push(tx);
        rx
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop every app, then every service
    ///
    /// Only the first call does anything.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        log::info!("Shutting down");
        let stuck = self.apps.stop_all(self.config.shutdown_timeout());
        if !stuck.is_empty() {
            log::warn!("{} app(s) did not stop: {:?}", stuck.len(), stuck);
        }
        let stopped = self.services.stop_all();
        log::info!("Stopped {stopped} service(s)");

        let event = SystemEvent::Shutdown;
        self.subscribers
            .scoped()
            .borrow_mut()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

impl core::fmt::Debug for System {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("System")
            .field("board", &self.hal.board_name())
            .field("available", &self.hal.available())
            .field("apps", &self.manifests.len())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
