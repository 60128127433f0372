//! Built-in apps and services of the simulated device

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use keel_app::{App, AppContext, AppFlags, AppManifest, Bundle};
use keel_hal::{Capabilities, Gps, MetricValue, Power, PowerMetric};
use keel_service::{Service, ServiceContext, ServiceManifest};
use keel_sync::Lock;

/// Reports battery state and exits
struct Battery;

impl App for Battery {
    fn run(&self, ctx: &AppContext) {
        let mut result = Bundle::new();
        if let Some(power) = ctx.hal().power() {
            if let Some(MetricValue::Percent(charge)) = power.metric(PowerMetric::ChargeLevel) {
                result.put_i32("charge", i32::from(charge));
            }
            if let Some(MetricValue::Flag(charging)) = power.metric(PowerMetric::IsCharging) {
                result.put_bool("charging", charging);
            }
        }
        ctx.finish(result);
    }
}

/// Reads one GPS fix, waiting for the receiver to start
struct Locator;

impl App for Locator {
    fn run(&self, ctx: &AppContext) {
        let mut result = Bundle::new();
        if let Some(gps) = ctx.hal().gps() {
            if let Err(e) = gps.start() {
                log::warn!("GPS did not start: {e}");
            }
            if let Some(fix) = gps.fix() {
                result
                    .put_string("latitude", format!("{:.5}", fix.latitude))
                    .put_string("longitude", format!("{:.5}", fix.longitude))
                    .put_i32("satellites", i32::from(fix.satellites));
            }
        }
        ctx.finish(result);
    }
}

/// Echoes its parameters back as its result
struct Echo;

impl App for Echo {
    fn run(&self, ctx: &AppContext) {
        ctx.finish(ctx.parameters().clone());
    }
}

/// Waits until stopped
struct Paint;

impl App for Paint {}

pub fn apps() -> Vec<AppManifest> {
    vec![
        AppManifest::new("com.keel.battery", "Battery", || Arc::new(Battery) as Arc<dyn App>)
            .requiring(Capabilities::POWER),
        AppManifest::new("com.keel.locator", "Locator", || Arc::new(Locator) as Arc<dyn App>)
            .requiring(Capabilities::GPS),
        AppManifest::new("com.keel.echo", "Echo", || Arc::new(Echo) as Arc<dyn App>)
            .with_flags(AppFlags::HIDDEN),
        AppManifest::new("com.keel.paint", "Paint", || Arc::new(Paint) as Arc<dyn App>)
            .requiring(Capabilities::TOUCH | Capabilities::DISPLAY)
            .with_flags(AppFlags::SINGLE_INSTANCE),
    ]
}

/// Polls the battery in the background
#[derive(Default)]
struct StatusBar {
    running: Arc<AtomicBool>,
    worker: Lock<RefCell<Option<JoinHandle<()>>>>,
}

impl Service for StatusBar {
    fn on_start(&self, _ctx: &ServiceContext) -> bool {
        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let spawned = thread::Builder::new()
            .name("statusbar".into())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(50));
                }
            });

        match spawned {
            Ok(handle) => {
                *self.worker.scoped().borrow_mut() = Some(handle);
                true
            }
            Err(e) => {
                log::error!("Status bar worker did not start: {e}");
                false
            }
        }
    }

    fn on_stop(&self, _ctx: &ServiceContext) {
        self.running.store(false, Ordering::Release);
        let worker = self.worker.scoped().borrow_mut().take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

/// Network manager without a radio; only tracks its lifecycle
struct Wifi;

impl Service for Wifi {
    fn on_start(&self, ctx: &ServiceContext) -> bool {
        log::info!("Wifi settings in {}", ctx.paths().data_directory().display());
        true
    }
}

pub fn services() -> Vec<ServiceManifest> {
    vec![
        ServiceManifest::new("statusbar", || Arc::new(StatusBar::default()) as Arc<dyn Service>)
            .autostart(true),
        ServiceManifest::new("wifi", || Arc::new(Wifi) as Arc<dyn Service>),
    ]
}
