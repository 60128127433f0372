//! Integration tests racing service lifecycle calls

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use keel_app::Bundle;
use keel_paths::{PartitionLayout, Paths};
use keel_service::{Service, ServiceContext, ServiceError, ServiceManifest, ServiceRuntime, ServiceState};
use keel_sync::ErrorKind;

/// Holds `on_start` until the test releases it
struct Gated {
    entered: Sender<()>,
    release: Receiver<()>,
    live: Arc<AtomicUsize>,
}

impl Service for Gated {
    fn on_start(&self, _ctx: &ServiceContext) -> bool {
        let _ = self.entered.send(());
        let _ = self.release.recv_timeout(Duration::from_secs(5));
        self.live.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn on_stop(&self, _ctx: &ServiceContext) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn gated_runtime() -> (ServiceRuntime, Receiver<()>, Sender<()>, Arc<AtomicUsize>) {
    let (entered_tx, entered_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();
    let live = Arc::new(AtomicUsize::new(0));

    let runtime = ServiceRuntime::new(Paths::new(PartitionLayout::default()));
    let counter = live.clone();
    runtime
        .register(ServiceManifest::new("wifi", move || {
            Arc::new(Gated {
                entered: entered_tx.clone(),
                release: release_rx.clone(),
                live: counter.clone(),
            }) as Arc<dyn Service>
        }))
        .unwrap();
    runtime.open();
    (runtime, entered_rx, release_tx, live)
}

/// Two concurrent starts: exactly one wins, one instance is live
#[test]
fn test_concurrent_start_single_winner() {
    let (runtime, entered, release, live) = gated_runtime();

    let results = crossbeam::scope(|s| {
        let first = s.spawn(|_| runtime.start("wifi", Bundle::new()));
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(runtime.state("wifi"), Some(ServiceState::Starting));

        let second = s.spawn(|_| runtime.start("wifi", Bundle::new()));
        let second = second.join().unwrap();
        release.send(()).unwrap();
        (first.join().unwrap(), second)
    })
    .unwrap();

    assert_eq!(results.0, Ok(()));
    assert_eq!(
        results.1,
        Err(ServiceError::AlreadyRunning { id: "wifi".into() })
    );
    assert_eq!(live.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.state("wifi"), Some(ServiceState::Running));
}

/// Stop while starting is refused; the service still ends up running
#[test]
fn test_stop_during_start() {
    let (runtime, entered, release, _) = gated_runtime();

    crossbeam::scope(|s| {
        let start = s.spawn(|_| runtime.start("wifi", Bundle::new()));
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        let err = runtime.stop("wifi").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        release.send(()).unwrap();
        assert_eq!(start.join().unwrap(), Ok(()));
    })
    .unwrap();

    runtime.stop("wifi").unwrap();
    assert_eq!(runtime.state("wifi"), Some(ServiceState::Stopped));
}

/// Many threads hammering start/stop never leave two instances live
#[test]
fn test_start_stop_storm() {
    let (runtime, _entered, release, live) = gated_runtime();
    for _ in 0..64 {
        release.send(()).unwrap();
    }

    crossbeam::scope(|s| {
        for _ in 0..4 {
            s.spawn(|_| {
                for _ in 0..8 {
                    let _ = runtime.start("wifi", Bundle::new());
                    assert!(live.load(Ordering::SeqCst) <= 1);
                    let _ = runtime.stop("wifi");
                    thread::yield_now();
                }
            });
        }
    })
    .unwrap();

    let _ = runtime.stop("wifi");
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert_eq!(runtime.state("wifi"), Some(ServiceState::Stopped));
}
