//! App lifecycle runtime
//!
//! Every launch gets a [`LaunchId`] and its own thread. The id moves through
//! `Launching -> Running -> Stopping -> Stopped`; each launch's state lives
//! under that launch's lock, so a `stop` racing the app's own exit always
//! observes the last written state.
//!
//! Lock order: the instance table, then one instance, then the foreground
//! stack, then the event subscribers. App code never runs with any of them
//! held.

use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use keel_hal::{Capabilities, HalRegistry};
use keel_paths::Paths;
use keel_sync::{Lock, ScopedLock};

use crate::app::{App, AppContext};
use crate::manifest::AppManifest;
use crate::registry::ManifestRegistry;
use crate::{Bundle, LaunchError, LaunchResult};

/// Finished launches kept around for `state` and `take_result`
const RETAINED_STOPPED: usize = 32;

/// Default bound on waiting for runtime locks
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Identifies one launch of an app
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LaunchId(u64);

impl LaunchId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LaunchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of one launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LaunchState {
    Launching,
    Running,
    Stopping,
    Stopped,
}

/// Foreground and lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
    Started { launch: LaunchId, app: String },
    Showing { launch: LaunchId },
    Hiding { launch: LaunchId },
    Stopped { launch: LaunchId, app: String },
}

/// Snapshot of one launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchInfo {
    pub launch: LaunchId,
    pub app: String,
    pub state: LaunchState,
    pub parent: Option<LaunchId>,
}

struct InstanceState {
    state: LaunchState,
    result: Option<Bundle>,
    result_taken: bool,
    stop_signal: Option<Sender<()>>,
    watchers: Vec<Sender<LaunchState>>,
    app: Option<Arc<dyn App>>,
    thread: Option<JoinHandle<()>>,
}

pub(crate) struct Instance {
    launch: LaunchId,
    manifest: Arc<AppManifest>,
    parent: Option<LaunchId>,
    stop_requested: AtomicBool,
    state: Lock<RefCell<InstanceState>>,
}

impl Instance {
    fn state(&self) -> LaunchState {
        self.state.scoped().borrow().state
    }

    pub(crate) fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Move to Stopping unless already there or beyond
    ///
    /// Returns whether this call made the transition.
    pub(crate) fn request_stop(&self, result: Option<Bundle>) -> bool {
        let guard = self.state.scoped();
        let mut state = guard.borrow_mut();
        if state.state >= LaunchState::Stopping {
            return false;
        }

        state.result = result;
        self.stop_requested.store(true, Ordering::Release);
        // Dropping the sender wakes `AppContext::wait_for_stop`.
        state.stop_signal = None;
        set_state(&mut state, LaunchState::Stopping);
        log::info!("Stopping app {} ({})", self.manifest.id, self.launch);
        true
    }

    fn info(&self) -> LaunchInfo {
        LaunchInfo {
            launch: self.launch,
            app: self.manifest.id.clone(),
            state: self.state(),
            parent: self.parent,
        }
    }
}

fn set_state(state: &mut InstanceState, next: LaunchState) {
    state.state = next;
    state
        .watchers
        .retain(|watcher| watcher.send(next).is_ok() && next != LaunchState::Stopped);
}

pub(crate) struct Shared {
    pub(crate) manifests: Arc<ManifestRegistry>,
    pub(crate) hal: Arc<HalRegistry>,
    pub(crate) paths: Paths,
    booted: AtomicBool,
    lock_timeout: Duration,
    next_launch: AtomicU64,
    instances: Lock<RefCell<BTreeMap<LaunchId, Arc<Instance>>>>,
    stack: Lock<RefCell<Vec<LaunchId>>>,
    subscribers: Lock<RefCell<Vec<Sender<LoaderEvent>>>>,
}

impl Shared {
    fn guard<'a, T>(&self, lock: &'a Lock<T>) -> LaunchResult<ScopedLock<'a, T>> {
        Ok(lock.scoped_timeout(self.lock_timeout)?)
    }

    fn instance(&self, launch: LaunchId) -> LaunchResult<Arc<Instance>> {
        let guard = self.guard(&self.instances)?;
        let instance = guard.borrow().get(&launch).cloned();
        instance.ok_or(LaunchError::UnknownLaunch { launch })
    }

    fn publish(&self, event: LoaderEvent) {
        log::debug!("Loader event {event:?}");
        let guard = self.subscribers.scoped();
        guard
            .borrow_mut()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub(crate) fn launch(
        self: &Arc<Self>,
        app_id: &str,
        parameters: Bundle,
        parent: Option<LaunchId>,
    ) -> LaunchResult<LaunchId> {
        if !self.booted.load(Ordering::Acquire) {
            return Err(LaunchError::NotBooted);
        }

        let manifest = self
            .manifests
            .lookup(app_id)
            .ok_or_else(|| LaunchError::UnknownApp {
                id: app_id.to_string(),
            })?;

        let required = manifest.required_capabilities;
        let missing = required.difference(self.hal.available());
        if !missing.is_empty() {
            log::warn!("Cannot launch {app_id}: missing {missing:?}");
            return Err(LaunchError::MissingCapability {
                app: app_id.to_string(),
                missing,
            });
        }

        let mut subscriptions = Vec::new();
        for kind in required.kinds() {
            match self.hal.subscribe(kind) {
                Some(subscription) => subscriptions.push(subscription),
                // Removed between the check and here (SD card)
                None => {
                    return Err(LaunchError::MissingCapability {
                        app: app_id.to_string(),
                        missing: Capabilities::from(kind),
                    })
                }
            }
        }

        let (stop_tx, stop_rx) = channel::bounded(1);
        let instance = {
            let guard = self.guard(&self.instances)?;
            let mut instances = guard.borrow_mut();

            if manifest.is_single_instance()
                && instances.values().any(|instance| {
                    instance.manifest.id == manifest.id && instance.state() != LaunchState::Stopped
                })
            {
                return Err(LaunchError::AlreadyRunning {
                    app: app_id.to_string(),
                });
            }

            let launch = LaunchId(self.next_launch.fetch_add(1, Ordering::Relaxed));
            let instance = Arc::new(Instance {
                launch,
                manifest: manifest.clone(),
                parent,
                stop_requested: AtomicBool::new(false),
                state: Lock::new(RefCell::new(InstanceState {
                    state: LaunchState::Launching,
                    result: None,
                    result_taken: false,
                    stop_signal: Some(stop_tx),
                    watchers: Vec::new(),
                    app: None,
                    thread: None,
                })),
            });
            instances.insert(launch, instance.clone());
            prune(&mut instances);
            instance
        };

        let launch = instance.launch;
        log::info!("Launching app {app_id} as {launch}");

        let context = AppContext {
            launch,
            manifest,
            parameters,
            instance: instance.clone(),
            shared: self.clone(),
            stop_signal: stop_rx,
            subscriptions: Lock::new(RefCell::new(subscriptions)),
        };

        let shared = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("app {app_id}"))
            .spawn(move || shared.run_instance(context));

        match spawned {
            Ok(handle) => {
                instance.state.scoped().borrow_mut().thread = Some(handle);
                Ok(launch)
            }
            Err(e) => {
                log::error!("Failed to spawn thread for {app_id}: {e}");
                self.instances.scoped().borrow_mut().remove(&launch);
                Err(LaunchError::SpawnFailed {
                    app: app_id.to_string(),
                })
            }
        }
    }

    /// Body of a launch's thread
    fn run_instance(&self, context: AppContext) {
        let instance = context.instance.clone();
        let app_id = instance.manifest.id.clone();

        let app = match panic::catch_unwind(AssertUnwindSafe(|| (instance.manifest.entry)())) {
            Ok(app) => Some(app),
            Err(_) => {
                log::error!("Entry point of {app_id} panicked");
                None
            }
        };

        if let Some(app) = &app {
            instance.state.scoped().borrow_mut().app = Some(app.clone());

            if panic::catch_unwind(AssertUnwindSafe(|| app.on_create(&context))).is_err() {
                log::error!("App {app_id} panicked in on_create");
                instance.request_stop(None);
            }

            if self.enter_running(&instance) {
                if panic::catch_unwind(AssertUnwindSafe(|| app.run(&context))).is_err() {
                    log::error!("App {app_id} panicked in run");
                }
            }

            instance.request_stop(None);
            if panic::catch_unwind(AssertUnwindSafe(|| app.on_destroy(&context))).is_err() {
                log::error!("App {app_id} panicked in on_destroy");
            }
        } else {
            instance.request_stop(None);
        }

        let released = context.release_subscriptions();
        log::debug!("Released {released} capability subscription(s) of {app_id}");

        self.hide(instance.launch);

        let result = {
            let guard = instance.state.scoped();
            let mut state = guard.borrow_mut();
            state.app = None;
            let result = state.result.get_or_insert_with(Bundle::new).clone();
            set_state(&mut state, LaunchState::Stopped);
            result
        };
        log::info!("App {app_id} ({}) stopped", instance.launch);

        self.publish(LoaderEvent::Stopped {
            launch: instance.launch,
            app: app_id,
        });

        if let Some(parent) = instance.parent {
            self.deliver_result(parent, instance.launch, &result);
        }
    }

    /// Launching -> Running, unless a stop got there first
    ///
    /// The app is in the foreground by the time anyone observes Running.
    fn enter_running(&self, instance: &Instance) -> bool {
        let guard = instance.state.scoped();
        let mut state = guard.borrow_mut();
        if state.state != LaunchState::Launching {
            return false;
        }

        self.publish(LoaderEvent::Started {
            launch: instance.launch,
            app: instance.manifest.id.clone(),
        });
        self.show(instance.launch);
        set_state(&mut state, LaunchState::Running);
        log::info!("App {} ({}) running", instance.manifest.id, instance.launch);
        true
    }

    fn deliver_result(&self, parent: LaunchId, child: LaunchId, result: &Bundle) {
        let Ok(instance) = self.instance(parent) else {
            return;
        };
        let app = instance.state.scoped().borrow().app.clone();
        if let Some(app) = app {
            if panic::catch_unwind(AssertUnwindSafe(|| app.on_result(child, result))).is_err() {
                log::error!("App {} panicked in on_result", instance.manifest.id);
            }
        }
    }

    /// Put `launch` in the foreground, hiding the previous one
    fn show(&self, launch: LaunchId) {
        let previous = {
            let guard = self.stack.scoped();
            let mut stack = guard.borrow_mut();
            let previous = stack.last().copied();
            stack.push(launch);
            previous
        };

        if let Some(previous) = previous {
            self.publish(LoaderEvent::Hiding { launch: previous });
        }
        self.publish(LoaderEvent::Showing { launch });
    }

    /// Remove `launch` from the stack, showing what it covered
    fn hide(&self, launch: LaunchId) {
        let revealed = {
            let guard = self.stack.scoped();
            let mut stack = guard.borrow_mut();
            let was_top = stack.last() == Some(&launch);
            stack.retain(|entry| *entry != launch);
            if was_top {
                stack.last().copied()
            } else {
                None
            }
        };

        if let Some(revealed) = revealed {
            self.publish(LoaderEvent::Showing { launch: revealed });
        }
    }
}

/// Drop the oldest finished launches beyond the retention limit
fn prune(instances: &mut BTreeMap<LaunchId, Arc<Instance>>) {
    let stopped: Vec<LaunchId> = instances
        .values()
        .filter(|instance| instance.state() == LaunchState::Stopped)
        .map(|instance| instance.launch)
        .collect();

    for launch in stopped.iter().take(stopped.len().saturating_sub(RETAINED_STOPPED)) {
        instances.remove(launch);
    }
}

/// Launches and stops apps
///
/// Cheap to clone; clones share the same runtime. Lifecycle calls are
/// refused with [`LaunchError::NotBooted`] until [`AppRuntime::open`].
#[derive(Clone)]
pub struct AppRuntime {
    shared: Arc<Shared>,
}

static_assertions::assert_impl_all!(AppRuntime: Send, Sync);

impl AppRuntime {
    pub fn new(manifests: Arc<ManifestRegistry>, hal: Arc<HalRegistry>, paths: Paths) -> Self {
        Self::with_lock_timeout(manifests, hal, paths, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(
        manifests: Arc<ManifestRegistry>,
        hal: Arc<HalRegistry>,
        paths: Paths,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                manifests,
                hal,
                paths,
                booted: AtomicBool::new(false),
                lock_timeout,
                next_launch: AtomicU64::new(1),
                instances: Lock::new(RefCell::new(BTreeMap::new())),
                stack: Lock::new(RefCell::new(Vec::new())),
                subscribers: Lock::new(RefCell::new(Vec::new())),
            }),
        }
    }

    /// Accept lifecycle calls; registries must be fully populated by now
    pub fn open(&self) {
        self.shared.booted.store(true, Ordering::Release);
        log::info!("App runtime open");
    }

    pub fn is_booted(&self) -> bool {
        self.shared.booted.load(Ordering::Acquire)
    }

    pub fn manifests(&self) -> &Arc<ManifestRegistry> {
        &self.shared.manifests
    }

    /// Launch `app_id` with `parameters`
    ///
    /// # Errors
    /// - `LaunchError::NotBooted` before [`AppRuntime::open`]
    /// - `LaunchError::UnknownApp` if no manifest has this id
    /// - `LaunchError::MissingCapability` if a required capability is absent
    /// - `LaunchError::AlreadyRunning` for a live single-instance app
    pub fn launch(&self, app_id: &str, parameters: Bundle) -> LaunchResult<LaunchId> {
        self.shared.launch(app_id, parameters, None)
    }

    /// Launch `app_id` on behalf of `parent`, which receives its result
    pub fn launch_child(
        &self,
        parent: LaunchId,
        app_id: &str,
        parameters: Bundle,
    ) -> LaunchResult<LaunchId> {
        self.shared.instance(parent)?;
        self.shared.launch(app_id, parameters, Some(parent))
    }

    /// Request `launch` to stop, recording `result`
    ///
    /// Stopping a launch that is already stopping or stopped does nothing.
    pub fn stop(&self, launch: LaunchId, result: Bundle) -> LaunchResult<()> {
        if !self.is_booted() {
            return Err(LaunchError::NotBooted);
        }

        let instance = self.shared.instance(launch)?;
        if !instance.request_stop(Some(result)) {
            log::debug!("Launch {launch} is already stopping");
        }
        Ok(())
    }

    /// Hand out the result of a stopped launch, exactly once
    ///
    /// A launch that is stopping is waited for, up to the lock timeout.
    ///
    /// # Errors
    /// - `LaunchError::NoResult` if the launch has not been stopped or its
    ///   result was already taken
    /// - `LaunchError::LockTimeout` if a stopping launch did not finish in time
    pub fn take_result(&self, launch: LaunchId) -> LaunchResult<Bundle> {
        let instance = self.shared.instance(launch)?;

        match instance.state() {
            LaunchState::Launching | LaunchState::Running => {
                return Err(LaunchError::NoResult { launch })
            }
            LaunchState::Stopping => {
                if !self.wait_for_state(launch, LaunchState::Stopped, self.shared.lock_timeout)? {
                    return Err(LaunchError::LockTimeout {
                        waited: self.shared.lock_timeout,
                    });
                }
            }
            LaunchState::Stopped => {}
        }

        let guard = self.shared.guard(&instance.state)?;
        let mut state = guard.borrow_mut();
        if state.result_taken {
            return Err(LaunchError::NoResult { launch });
        }
        state.result_taken = true;
        state.result.take().ok_or(LaunchError::NoResult { launch })
    }

    /// Current state, `None` for unknown or forgotten launches
    pub fn state(&self, launch: LaunchId) -> Option<LaunchState> {
        self.shared.instance(launch).ok().map(|instance| instance.state())
    }

    /// Block until `launch` reaches `target` or `timeout` elapses
    ///
    /// Returns `false` on timeout, or when the launch moved past `target`
    /// without stopping there.
    pub fn wait_for_state(
        &self,
        launch: LaunchId,
        target: LaunchState,
        timeout: Duration,
    ) -> LaunchResult<bool> {
        let instance = self.shared.instance(launch)?;
        let (tx, rx) = channel::unbounded();

        {
            let guard = self.shared.guard(&instance.state)?;
            let mut state = guard.borrow_mut();
            if state.state >= target {
                return Ok(state.state == target);
            }
            state.watchers.push(tx);
        }

        let deadline = Instant::now().checked_add(timeout);
        loop {
            let next = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    rx.recv_timeout(remaining)
                }
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match next {
                Ok(state) if state == target => return Ok(true),
                Ok(state) if state > target => return Ok(false),
                Ok(_) => continue,
                Err(_) => return Ok(false),
            }
        }
    }

    /// Launch in the foreground
    pub fn current(&self) -> Option<LaunchId> {
        self.shared.stack.scoped().borrow().last().copied()
    }

    /// Launches that have not stopped, oldest first
    pub fn running(&self) -> Vec<LaunchInfo> {
        let instances: Vec<Arc<Instance>> =
            self.shared.instances.scoped().borrow().values().cloned().collect();
        instances
            .iter()
            .map(|instance| instance.info())
            .filter(|info| info.state != LaunchState::Stopped)
            .collect()
    }

    pub fn info(&self, launch: LaunchId) -> Option<LaunchInfo> {
        self.shared.instance(launch).ok().map(|instance| instance.info())
    }

    /// Receive every [`LoaderEvent`] from now on
    pub fn subscribe(&self) -> Receiver<LoaderEvent> {
        let (tx, rx) = channel::unbounded();
        self.shared.subscribers.scoped().borrow_mut().push(tx);
        rx
    }

    /// Stop every launch and wait for their threads
    ///
    /// Returns the launches that did not stop within `timeout` each.
    pub fn stop_all(&self, timeout: Duration) -> Vec<LaunchId> {
        let launches: Vec<LaunchId> = self.running().into_iter().map(|info| info.launch).collect();
        let mut stuck = Vec::new();

        // Newest first, so children go before their parents.
        for launch in launches.into_iter().rev() {
            let stopped = self
                .stop(launch, Bundle::new())
                .and_then(|()| self.wait_for_state(launch, LaunchState::Stopped, timeout))
                .unwrap_or(false);

            if !stopped {
                log::warn!("Launch {launch} did not stop in time");
                stuck.push(launch);
                continue;
            }

            let thread = self
                .shared
                .instance(launch)
                .ok()
                .and_then(|instance| instance.state.scoped().borrow_mut().thread.take());
            if let Some(thread) = thread {
                if thread.join().is_err() {
                    log::error!("Thread of launch {launch} panicked");
                }
            }
        }

        stuck
    }
}

impl fmt::Debug for AppRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppRuntime")
            .field("booted", &self.is_booted())
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::AppFlags;
    use keel_hal_mock::SimulatedBoard;
    use keel_paths::PartitionLayout;

    const WAIT: Duration = Duration::from_secs(5);

    struct Idle;

    impl App for Idle {}

    struct Panicking;

    impl App for Panicking {
        fn run(&self, _ctx: &AppContext) {
            panic!("boom");
        }
    }

    fn runtime(manifests: Vec<AppManifest>) -> AppRuntime {
        let (board, _) = SimulatedBoard::default().build();
        let hal = Arc::new(HalRegistry::boot(&board).unwrap());
        let registry = Arc::new(ManifestRegistry::new());
        for manifest in manifests {
            registry.register(manifest).unwrap();
        }
        AppRuntime::new(registry, hal, Paths::new(PartitionLayout::default()))
    }

    fn idle(id: &str) -> AppManifest {
        AppManifest::new(id, "Idle", || Arc::new(Idle) as Arc<dyn App>)
    }

    #[test]
    fn test_launch_id_display() {
        assert_eq!(LaunchId(7).to_string(), "#7");
        assert_eq!(LaunchId(7).as_u64(), 7);
    }

    #[test]
    fn test_closed_runtime_refuses_launch() {
        let runtime = runtime(vec![idle("com.example.idle")]);
        assert!(!runtime.is_booted());
        assert_eq!(
            runtime.launch("com.example.idle", Bundle::new()),
            Err(LaunchError::NotBooted)
        );
        assert_eq!(
            runtime.stop(LaunchId(1), Bundle::new()),
            Err(LaunchError::NotBooted)
        );
    }

    #[test]
    fn test_unknown_app() {
        let runtime = runtime(vec![]);
        runtime.open();
        assert_eq!(
            runtime.launch("com.example.none", Bundle::new()),
            Err(LaunchError::UnknownApp {
                id: "com.example.none".into()
            })
        );
    }

    #[test]
    fn test_lifecycle_and_result_taken_once() {
        let runtime = runtime(vec![idle("com.example.idle")]);
        runtime.open();

        let launch = runtime.launch("com.example.idle", Bundle::new()).unwrap();
        assert!(runtime.wait_for_state(launch, LaunchState::Running, WAIT).unwrap());
        assert_eq!(runtime.current(), Some(launch));
        assert_eq!(
            runtime.take_result(launch),
            Err(LaunchError::NoResult { launch })
        );

        let mut result = Bundle::new();
        result.put_i32("code", 42);
        runtime.stop(launch, result.clone()).unwrap();
        assert!(runtime.wait_for_state(launch, LaunchState::Stopped, WAIT).unwrap());

        assert_eq!(runtime.take_result(launch), Ok(result));
        assert_eq!(
            runtime.take_result(launch),
            Err(LaunchError::NoResult { launch })
        );
        assert_eq!(runtime.current(), None);
        assert!(runtime.running().is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let runtime = runtime(vec![idle("com.example.idle")]);
        runtime.open();

        let launch = runtime.launch("com.example.idle", Bundle::new()).unwrap();
        let mut first = Bundle::new();
        first.put_bool("first", true);
        runtime.stop(launch, first.clone()).unwrap();
        runtime.stop(launch, Bundle::new()).unwrap();
        assert!(runtime.wait_for_state(launch, LaunchState::Stopped, WAIT).unwrap());
        runtime.stop(launch, Bundle::new()).unwrap();

        assert_eq!(runtime.take_result(launch), Ok(first));
    }

    #[test]
    fn test_stop_unknown_launch() {
        let runtime = runtime(vec![]);
        runtime.open();
        assert_eq!(
            runtime.stop(LaunchId(99), Bundle::new()),
            Err(LaunchError::UnknownLaunch {
                launch: LaunchId(99)
            })
        );
        assert_eq!(runtime.state(LaunchId(99)), None);
    }

    #[test]
    fn test_single_instance_conflict() {
        let runtime = runtime(vec![
            idle("com.example.single").with_flags(AppFlags::SINGLE_INSTANCE)
        ]);
        runtime.open();

        let launch = runtime.launch("com.example.single", Bundle::new()).unwrap();
        assert_eq!(
            runtime.launch("com.example.single", Bundle::new()),
            Err(LaunchError::AlreadyRunning {
                app: "com.example.single".into()
            })
        );

        runtime.stop(launch, Bundle::new()).unwrap();
        assert!(runtime.wait_for_state(launch, LaunchState::Stopped, WAIT).unwrap());
        assert!(runtime.launch("com.example.single", Bundle::new()).is_ok());
        assert!(runtime.stop_all(WAIT).is_empty());
    }

    #[test]
    fn test_multiple_instances_allowed_by_default() {
        let runtime = runtime(vec![idle("com.example.idle")]);
        runtime.open();

        let first = runtime.launch("com.example.idle", Bundle::new()).unwrap();
        let second = runtime.launch("com.example.idle", Bundle::new()).unwrap();
        assert_ne!(first, second);
        assert_eq!(runtime.running().len(), 2);
        assert!(runtime.stop_all(WAIT).is_empty());
        assert!(runtime.running().is_empty());
    }

    #[test]
    fn test_panicking_app_still_stops() {
        let runtime = runtime(vec![AppManifest::new("com.example.panic", "Panic", || {
            Arc::new(Panicking) as Arc<dyn App>
        })]);
        runtime.open();

        let launch = runtime.launch("com.example.panic", Bundle::new()).unwrap();
        assert!(runtime.wait_for_state(launch, LaunchState::Stopped, WAIT).unwrap());
        assert_eq!(runtime.take_result(launch), Ok(Bundle::new()));
    }

    #[test]
    fn test_wait_for_state_passed_target() {
        let runtime = runtime(vec![idle("com.example.idle")]);
        runtime.open();

        let launch = runtime.launch("com.example.idle", Bundle::new()).unwrap();
        runtime.stop(launch, Bundle::new()).unwrap();
        assert!(runtime.wait_for_state(launch, LaunchState::Stopped, WAIT).unwrap());
        assert!(!runtime.wait_for_state(launch, LaunchState::Running, WAIT).unwrap());
    }

    #[test]
    fn test_prune_keeps_recent_stopped() {
        let runtime = runtime(vec![idle("com.example.idle")]);
        runtime.open();

        let mut launches = Vec::new();
        for _ in 0..RETAINED_STOPPED + 4 {
            let launch = runtime.launch("com.example.idle", Bundle::new()).unwrap();
            runtime.stop(launch, Bundle::new()).unwrap();
            assert!(runtime.wait_for_state(launch, LaunchState::Stopped, WAIT).unwrap());
            launches.push(launch);
        }

        assert_eq!(runtime.state(launches[0]), None);
        assert_eq!(
            runtime.state(*launches.last().unwrap()),
            Some(LaunchState::Stopped)
        );
    }
}
