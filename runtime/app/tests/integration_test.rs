//! Integration tests launching apps against simulated boards

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use keel_app::{
    App, AppContext, AppDescriptor, AppManifest, AppRuntime, Bundle, EntryPoint, LaunchError,
    LaunchId, LaunchState, LoaderEvent, ManifestRegistry,
};
use keel_hal::{Capabilities, CapabilityKind, HalRegistry};
use keel_hal_mock::SimulatedBoard;
use keel_paths::{PartitionLayout, Paths};

const WAIT: Duration = Duration::from_secs(5);

struct Idle;

impl App for Idle {}

fn idle_entry() -> Arc<dyn App> {
    Arc::new(Idle)
}

fn boot(board: SimulatedBoard, manifests: Vec<AppManifest>) -> (AppRuntime, Arc<HalRegistry>) {
    let (board, _) = board.build();
    let hal = Arc::new(HalRegistry::boot(&board).unwrap());
    let registry = Arc::new(ManifestRegistry::new());
    for manifest in manifests {
        registry.register(manifest).unwrap();
    }
    let runtime = AppRuntime::new(registry, hal.clone(), Paths::new(PartitionLayout::default()));
    runtime.open();
    (runtime, hal)
}

/// Power present, touch absent: the touch app is refused, the power app runs
#[test]
fn test_launch_checks_capabilities() {
    let (runtime, hal) = boot(
        SimulatedBoard::default().without(CapabilityKind::Touch),
        vec![
            AppManifest::new("com.example.paint", "Paint", idle_entry)
                .requiring(CapabilityKind::Touch.into()),
            AppManifest::new("com.example.battery", "Battery", idle_entry)
                .requiring(CapabilityKind::Power.into()),
        ],
    );

    assert_eq!(
        runtime.launch("com.example.paint", Bundle::new()),
        Err(LaunchError::MissingCapability {
            app: "com.example.paint".into(),
            missing: Capabilities::TOUCH,
        })
    );
    assert!(runtime.running().is_empty());
    assert_eq!(hal.subscriber_count(CapabilityKind::Touch), 0);

    let launch = runtime.launch("com.example.battery", Bundle::new()).unwrap();
    assert!(runtime.wait_for_state(launch, LaunchState::Running, WAIT).unwrap());
    assert_eq!(hal.subscriber_count(CapabilityKind::Power), 1);

    runtime.stop(launch, Bundle::new()).unwrap();
    assert!(runtime.wait_for_state(launch, LaunchState::Stopped, WAIT).unwrap());
    assert_eq!(hal.subscriber_count(CapabilityKind::Power), 0);
}

struct GpsUser;

impl App for GpsUser {
    fn on_create(&self, ctx: &AppContext) {
        assert!(ctx.capability(CapabilityKind::Gps).is_some());
        assert!(ctx.capability(CapabilityKind::Display).is_some());
    }
}

/// Subscriptions taken at runtime are released once the app stops
#[test]
fn test_runtime_subscriptions_released_on_stop() {
    let (runtime, hal) = boot(
        SimulatedBoard::default(),
        vec![AppManifest::new("com.example.maps", "Maps", || {
            Arc::new(GpsUser) as Arc<dyn App>
        })],
    );

    let launch = runtime.launch("com.example.maps", Bundle::new()).unwrap();
    assert!(runtime.wait_for_state(launch, LaunchState::Running, WAIT).unwrap());
    assert_eq!(hal.subscriber_count(CapabilityKind::Gps), 1);
    assert_eq!(hal.subscriber_count(CapabilityKind::Display), 1);

    runtime.stop(launch, Bundle::new()).unwrap();
    assert!(runtime.wait_for_state(launch, LaunchState::Stopped, WAIT).unwrap());
    assert_eq!(hal.subscriber_count(CapabilityKind::Gps), 0);
    assert_eq!(hal.subscriber_count(CapabilityKind::Display), 0);
}

struct Echo;

impl App for Echo {
    fn on_create(&self, ctx: &AppContext) {
        let mut result = Bundle::new();
        if let Some(text) = ctx.parameters().get_string("text") {
            result.put_string("echo", text);
        }
        ctx.finish(result);
    }
}

struct Parent {
    results: Sender<(LaunchId, Bundle)>,
}

impl App for Parent {
    fn on_create(&self, ctx: &AppContext) {
        let mut parameters = Bundle::new();
        parameters.put_string("text", "hello");
        ctx.launch_child("com.example.echo", parameters).unwrap();
    }

    fn on_result(&self, child: LaunchId, result: &Bundle) {
        let _ = self.results.send((child, result.clone()));
    }
}

/// A child's result reaches its parent's `on_result`
#[test]
fn test_child_result_delivered_to_parent() {
    let (tx, rx) = channel::unbounded();
    let (runtime, _) = boot(
        SimulatedBoard::default(),
        vec![
            AppManifest::new("com.example.echo", "Echo", || Arc::new(Echo) as Arc<dyn App>),
            AppManifest::new("com.example.parent", "Parent", move || {
                Arc::new(Parent { results: tx.clone() }) as Arc<dyn App>
            }),
        ],
    );

    let parent = runtime.launch("com.example.parent", Bundle::new()).unwrap();
    let (child, result) = rx.recv_timeout(WAIT).unwrap();

    assert_ne!(child, parent);
    assert_eq!(result.get_string("echo"), Some("hello"));
    assert_eq!(runtime.info(child).unwrap().parent, Some(parent));
    assert!(runtime.wait_for_state(parent, LaunchState::Running, WAIT).unwrap());
    assert!(runtime.stop_all(WAIT).is_empty());
}

/// Launching on top hides the previous app; stopping shows it again
#[test]
fn test_foreground_events() {
    let (runtime, _) = boot(
        SimulatedBoard::default(),
        vec![
            AppManifest::new("com.example.home", "Home", idle_entry),
            AppManifest::new("com.example.notes", "Notes", idle_entry),
        ],
    );
    let events = runtime.subscribe();

    let home = runtime.launch("com.example.home", Bundle::new()).unwrap();
    assert!(runtime.wait_for_state(home, LaunchState::Running, WAIT).unwrap());
    let notes = runtime.launch("com.example.notes", Bundle::new()).unwrap();
    assert!(runtime.wait_for_state(notes, LaunchState::Running, WAIT).unwrap());
    runtime.stop(notes, Bundle::new()).unwrap();

    let expected = vec![
        LoaderEvent::Started {
            launch: home,
            app: "com.example.home".into(),
        },
        LoaderEvent::Showing { launch: home },
        LoaderEvent::Started {
            launch: notes,
            app: "com.example.notes".into(),
        },
        LoaderEvent::Hiding { launch: home },
        LoaderEvent::Showing { launch: notes },
        LoaderEvent::Showing { launch: home },
        LoaderEvent::Stopped {
            launch: notes,
            app: "com.example.notes".into(),
        },
    ];
    let received: Vec<LoaderEvent> = (0..expected.len())
        .map(|_| events.recv_timeout(WAIT).unwrap())
        .collect();

    assert_eq!(received, expected);
    assert_eq!(runtime.current(), Some(home));
    assert!(runtime.stop_all(WAIT).is_empty());
}

/// Concurrent stops of one launch: one transition, one result
#[test]
fn test_concurrent_stops() {
    let (runtime, _) = boot(
        SimulatedBoard::default(),
        vec![AppManifest::new("com.example.idle", "Idle", idle_entry)],
    );
    let launch = runtime.launch("com.example.idle", Bundle::new()).unwrap();

    crossbeam::scope(|s| {
        for i in 0..4 {
            let runtime = &runtime;
            s.spawn(move |_| {
                let mut result = Bundle::new();
                result.put_i32("stopper", i);
                runtime.stop(launch, result).unwrap();
            });
        }
    })
    .unwrap();

    assert!(runtime.wait_for_state(launch, LaunchState::Stopped, WAIT).unwrap());
    let result = runtime.take_result(launch).unwrap();
    assert!(result.get_i32("stopper").is_some());
    assert_eq!(
        runtime.take_result(launch),
        Err(LaunchError::NoResult { launch })
    );
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("keel-app-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_descriptor(root: &Path, dir: &str, id: &str) {
    let app_dir = root.join(dir);
    fs::create_dir_all(&app_dir).unwrap();
    fs::write(
        app_dir.join(keel_app::DESCRIPTOR_FILE),
        format!(
            "[manifest]\nversion=0.1\n\n[app]\nid={id}\nname=Installed\nversionName=1.0\nversionCode=3\ncapabilities=power\n\n[target]\nsdk=0.1\nplatforms=simulator\n"
        ),
    )
    .unwrap();
}

/// Installed apps are discovered, broken ones skipped, and then launchable
#[test]
fn test_discover_installed_apps() {
    let root = scratch_dir("discover");
    write_descriptor(&root, "a", "com.example.installed");
    write_descriptor(&root, "b", "bad/id");
    fs::create_dir_all(root.join("empty")).unwrap();

    let (runtime, _) = boot(SimulatedBoard::default(), vec![]);
    let resolver = |_: &AppDescriptor, _: &Path| -> Option<EntryPoint> {
        Some(Arc::new(idle_entry) as EntryPoint)
    };

    assert_eq!(runtime.manifests().discover_installed(&root, &resolver), 1);
    let manifest = runtime.manifests().lookup("com.example.installed").unwrap();
    assert!(manifest.required_capabilities.has(CapabilityKind::Power));
    assert_eq!(manifest.version_code, 3);

    let launch = runtime.launch("com.example.installed", Bundle::new()).unwrap();
    assert!(runtime.wait_for_state(launch, LaunchState::Running, WAIT).unwrap());
    assert!(runtime.stop_all(WAIT).is_empty());

    let _ = fs::remove_dir_all(&root);
}
