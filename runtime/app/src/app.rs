//! The app contract and the context an app runs with

use core::cell::RefCell;
use core::time::Duration;
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use keel_hal::{Capability, CapabilityKind, HalRegistry, Subscription};
use keel_paths::Paths;
use keel_sync::{Lock, WAIT_FOREVER};

use crate::manifest::{AppLocation, AppManifest};
use crate::runtime::{Instance, Shared};
use crate::{Bundle, LaunchId, LaunchResult};

/// Entry point of an app
///
/// One value is created per launch and driven from that launch's thread;
/// [`App::on_result`] may arrive from a child's thread, hence `Sync`.
pub trait App: Send + Sync {
    /// Called once before the app is considered running
    fn on_create(&self, _ctx: &AppContext) {}

    /// Main body; returning ends the launch
    ///
    /// Long-running apps must return soon after a stop is requested. The
    /// default body just waits for one.
    fn run(&self, ctx: &AppContext) {
        ctx.wait_for_stop(WAIT_FOREVER);
    }

    /// Called once after `run` returned, before subscriptions are released
    fn on_destroy(&self, _ctx: &AppContext) {}

    /// Result of a child launched through [`AppContext::launch_child`]
    fn on_result(&self, _child: LaunchId, _result: &Bundle) {}
}

/// Everything one launch of an app can reach
pub struct AppContext {
    pub(crate) launch: LaunchId,
    pub(crate) manifest: Arc<AppManifest>,
    pub(crate) parameters: Bundle,
    pub(crate) instance: Arc<Instance>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) stop_signal: Receiver<()>,
    pub(crate) subscriptions: Lock<RefCell<Vec<Subscription>>>,
}

impl AppContext {
    pub fn launch_id(&self) -> LaunchId {
        self.launch
    }

    pub fn manifest(&self) -> &AppManifest {
        &self.manifest
    }

    /// Parameters passed by the launcher
    pub fn parameters(&self) -> &Bundle {
        &self.parameters
    }

    pub fn is_stop_requested(&self) -> bool {
        self.instance.is_stop_requested()
    }

    /// Block until a stop is requested or `timeout` elapses
    ///
    /// Returns whether a stop was requested.
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        if self.is_stop_requested() {
            return true;
        }

        // The sender is dropped when the stop is requested.
        let outcome = if timeout == WAIT_FOREVER {
            self.stop_signal.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            self.stop_signal.recv_timeout(timeout)
        };
        matches!(outcome, Err(RecvTimeoutError::Disconnected)) || self.is_stop_requested()
    }

    /// Use a capability for the rest of this launch
    ///
    /// The subscription is released when the launch stops.
    pub fn capability(&self, kind: CapabilityKind) -> Option<Capability> {
        let subscription = self.shared.hal.subscribe(kind)?;
        let capability = subscription.capability().clone();
        self.subscriptions.scoped().borrow_mut().push(subscription);
        Some(capability)
    }

    pub fn hal(&self) -> &HalRegistry {
        &self.shared.hal
    }

    pub fn paths(&self) -> &Paths {
        &self.shared.paths
    }

    /// Private writable directory of this app
    pub fn user_data_path(&self) -> PathBuf {
        self.shared.paths.app_user_path(&self.manifest.id)
    }

    /// Directory holding this app's own files
    pub fn install_path(&self) -> PathBuf {
        match &self.manifest.location {
            AppLocation::External { path } => path.clone(),
            AppLocation::Internal => self.shared.paths.app_system_path(&self.manifest.id),
        }
    }

    /// Launch another app on top of this one
    ///
    /// Its result is delivered to [`App::on_result`] when it stops.
    pub fn launch_child(&self, app_id: &str, parameters: Bundle) -> LaunchResult<LaunchId> {
        self.shared.launch(app_id, parameters, Some(self.launch))
    }

    /// Request this launch to stop with `result`
    pub fn finish(&self, result: Bundle) {
        self.instance.request_stop(Some(result));
    }

    pub(crate) fn release_subscriptions(&self) -> usize {
        let released: Vec<Subscription> = self.subscriptions.scoped().borrow_mut().drain(..).collect();
        released.len()
    }
}

impl core::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppContext")
            .field("launch", &self.launch)
            .field("app", &self.manifest.id)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}
