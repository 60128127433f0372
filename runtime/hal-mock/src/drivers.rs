//! Simulated drivers, one per capability interface
//!
//! State lives in atomics, lock-free queues or behind a `keel_sync::Lock` so
//! tests can drive the "hardware" (insert a card, queue a touch) from any thread.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use keel_hal::{
    Device, Display, DisplayHandle, DriverError, DriverResult, Gps, GpsFix, I2cBus,
    I2cConfiguration, KeyEvent, Keyboard, MetricValue, Power, PowerMetric, SdCard, SdCardState,
    Touch, TouchPoint,
};
use crossbeam::queue::ArrayQueue;
use keel_sync::critical::{self, isr};
use keel_sync::Lock;

fn not_started(device: &str) -> DriverError {
    DriverError::NotStarted {
        device: device.to_string(),
    }
}

/// Battery gauge with a settable charge level
#[derive(Debug)]
pub struct MockPower {
    charge: AtomicU8,
    charging_enabled: AtomicBool,
    powered_off: AtomicBool,
}

impl MockPower {
    pub fn new(charge: u8) -> Self {
        Self {
            charge: AtomicU8::new(charge.min(100)),
            charging_enabled: AtomicBool::new(true),
            powered_off: AtomicBool::new(false),
        }
    }

    pub fn set_charge(&self, charge: u8) {
        self.charge.store(charge.min(100), Ordering::Release);
    }

    pub fn is_powered_off(&self) -> bool {
        self.powered_off.load(Ordering::Acquire)
    }
}

impl Device for MockPower {
    fn name(&self) -> &str {
        "MockPower"
    }

    fn description(&self) -> &str {
        "Simulated battery gauge and charger"
    }
}

impl Power for MockPower {
    fn supports_metric(&self, _metric: PowerMetric) -> bool {
        true
    }

    fn metric(&self, metric: PowerMetric) -> Option<MetricValue> {
        let charge = self.charge.load(Ordering::Acquire);
        let charging = self.charging_enabled.load(Ordering::Acquire) && charge < 100;
        Some(match metric {
            PowerMetric::ChargeLevel => MetricValue::Percent(charge),
            // Linear 3.3V..4.2V curve
            PowerMetric::BatteryVoltage => MetricValue::Millivolts(3300 + u32::from(charge) * 9),
            PowerMetric::Current => MetricValue::Milliamps(if charging { 250 } else { -120 }),
            PowerMetric::IsCharging => MetricValue::Flag(charging),
        })
    }

    fn supports_charge_control(&self) -> bool {
        true
    }

    fn is_charging_enabled(&self) -> bool {
        self.charging_enabled.load(Ordering::Acquire)
    }

    fn set_charging_enabled(&self, enabled: bool) -> DriverResult<()> {
        self.charging_enabled.store(enabled, Ordering::Release);
        Ok(())
    }

    fn supports_power_off(&self) -> bool {
        true
    }

    fn power_off(&self) -> DriverResult<()> {
        log::info!("MockPower: powering off");
        self.powered_off.store(true, Ordering::Release);
        Ok(())
    }
}

/// Samples the simulated touch controller buffers before it overruns
pub const TOUCH_FIFO_DEPTH: usize = 16;

/// Touch panel fed from a simulated interrupt
///
/// [`MockTouch::push`] plays the panel's interrupt handler: it runs in
/// interrupt context and only touches the lock-free sample FIFO, inside a
/// critical section.
#[derive(Debug)]
pub struct MockTouch {
    started: AtomicBool,
    samples: ArrayQueue<TouchPoint>,
    overruns: AtomicUsize,
}

impl MockTouch {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            samples: ArrayQueue::new(TOUCH_FIFO_DEPTH),
            overruns: AtomicUsize::new(0),
        }
    }

    /// Deliver a sample as the panel's interrupt would
    ///
    /// A full FIFO drops its oldest sample.
    pub fn push(&self, point: TouchPoint) {
        let _irq = isr::enter();
        critical::with(|_| {
            if self.samples.force_push(point).is_some() {
                self.overruns.fetch_add(1, Ordering::Relaxed);
            }
        });
    }

    /// Samples dropped because the FIFO was full
    pub fn overruns(&self) -> usize {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl Default for MockTouch {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for MockTouch {
    fn name(&self) -> &str {
        "MockTouch"
    }
}

impl Touch for MockTouch {
    fn start(&self) -> DriverResult<()> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> DriverResult<()> {
        self.started.store(false, Ordering::Release);
        Ok(())
    }

    fn read(&self) -> Option<TouchPoint> {
        if !self.is_started() {
            return None;
        }
        self.samples.pop()
    }
}

/// Detachable keyboard fed from a queue of key events
#[derive(Debug)]
pub struct MockKeyboard {
    started: AtomicBool,
    attached: AtomicBool,
    keys: Lock<RefCell<VecDeque<KeyEvent>>>,
}

impl MockKeyboard {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            attached: AtomicBool::new(true),
            keys: Lock::new(RefCell::new(VecDeque::new())),
        }
    }

    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::Release);
    }

    pub fn press(&self, code: u32) {
        let guard = self.keys.scoped();
        let mut keys = guard.borrow_mut();
        keys.push_back(KeyEvent {
            code,
            pressed: true,
        });
        keys.push_back(KeyEvent {
            code,
            pressed: false,
        });
    }
}

impl Default for MockKeyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for MockKeyboard {
    fn name(&self) -> &str {
        "MockKeyboard"
    }
}

impl Keyboard for MockKeyboard {
    fn start(&self) -> DriverResult<()> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> DriverResult<()> {
        self.started.store(false, Ordering::Release);
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    fn read_key(&self) -> Option<KeyEvent> {
        if !self.started.load(Ordering::Acquire) || !self.is_attached() {
            return None;
        }
        self.keys.scoped().borrow_mut().pop_front()
    }
}

/// Display panel with a backlight
#[derive(Debug)]
pub struct MockDisplay {
    width: u16,
    height: u16,
    started: AtomicBool,
    backlight: AtomicU8,
    fail_start: bool,
}

impl MockDisplay {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            started: AtomicBool::new(false),
            backlight: AtomicU8::new(255),
            fail_start: false,
        }
    }

    /// A panel that never answers, so `start` fails
    pub fn unresponsive(width: u16, height: u16) -> Self {
        Self {
            fail_start: true,
            ..Self::new(width, height)
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn backlight(&self) -> u8 {
        self.backlight.load(Ordering::Acquire)
    }
}

impl Device for MockDisplay {
    fn name(&self) -> &str {
        "MockDisplay"
    }
}

impl Display for MockDisplay {
    fn start(&self) -> DriverResult<()> {
        if self.fail_start {
            return Err(DriverError::Bus("display did not answer".into()));
        }
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> DriverResult<()> {
        self.started.store(false, Ordering::Release);
        Ok(())
    }

    fn resolution(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    fn supports_backlight_duty(&self) -> bool {
        true
    }

    fn set_backlight_duty(&self, duty: u8) -> DriverResult<()> {
        if !self.is_started() {
            return Err(not_started(self.name()));
        }
        self.backlight.store(duty, Ordering::Release);
        Ok(())
    }

    fn handle(&self) -> Option<DisplayHandle> {
        self.is_started()
            .then(|| DisplayHandle::from_raw(self as *const Self as usize))
    }
}

/// Card reader whose card can be inserted and removed at will
#[derive(Debug)]
pub struct MockSdCard {
    mount_path: PathBuf,
    inserted: AtomicBool,
    state: Lock<RefCell<SdCardState>>,
    mounts: AtomicUsize,
}

impl MockSdCard {
    pub fn new(mount_path: impl Into<PathBuf>, inserted: bool) -> Self {
        Self {
            mount_path: mount_path.into(),
            inserted: AtomicBool::new(inserted),
            state: Lock::new(RefCell::new(SdCardState::Unmounted)),
            mounts: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self) {
        self.inserted.store(true, Ordering::Release);
    }

    /// Pull the card; the filesystem is gone, whatever the driver thinks
    pub fn remove(&self) {
        self.inserted.store(false, Ordering::Release);
        *self.state.scoped().borrow_mut() = SdCardState::Error;
    }

    /// Number of successful mounts so far
    pub fn mount_count(&self) -> usize {
        self.mounts.load(Ordering::Acquire)
    }
}

impl Device for MockSdCard {
    fn name(&self) -> &str {
        "MockSdCard"
    }
}

impl SdCard for MockSdCard {
    fn mount_path(&self) -> &Path {
        &self.mount_path
    }

    fn state(&self) -> SdCardState {
        *self.state.scoped().borrow()
    }

    fn mount(&self) -> DriverResult<()> {
        if !self.inserted.load(Ordering::Acquire) {
            *self.state.scoped().borrow_mut() = SdCardState::Timeout;
            return Err(DriverError::Bus("no card in slot".into()));
        }
        *self.state.scoped().borrow_mut() = SdCardState::Mounted;
        self.mounts.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn unmount(&self) -> DriverResult<()> {
        *self.state.scoped().borrow_mut() = SdCardState::Unmounted;
        Ok(())
    }

    fn is_inserted(&self) -> bool {
        self.inserted.load(Ordering::Acquire)
    }
}

/// GPS receiver reporting a fixed position once started
#[derive(Debug)]
pub struct MockGps {
    running: AtomicBool,
    fix: GpsFix,
}

impl MockGps {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            running: AtomicBool::new(false),
            fix: GpsFix {
                latitude,
                longitude,
                satellites: 7,
            },
        }
    }
}

impl Device for MockGps {
    fn name(&self) -> &str {
        "MockGps"
    }
}

impl Gps for MockGps {
    fn start(&self) -> DriverResult<()> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> DriverResult<()> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn fix(&self) -> Option<GpsFix> {
        self.is_running().then_some(self.fix)
    }
}

/// I2C bus with a register file per attached device address
#[derive(Debug)]
pub struct MockI2cBus {
    name: String,
    port: u8,
    registers: Lock<RefCell<BTreeMap<(u8, u8), u8>>>,
    addresses: Vec<u8>,
}

impl MockI2cBus {
    pub fn new(configuration: &I2cConfiguration, addresses: &[u8]) -> Self {
        Self {
            name: configuration.name.clone(),
            port: configuration.port,
            registers: Lock::new(RefCell::new(BTreeMap::new())),
            addresses: addresses.to_vec(),
        }
    }

    fn check(&self, address: u8) -> DriverResult<()> {
        if self.probe(address) {
            Ok(())
        } else {
            Err(DriverError::Bus(format!("no ack from 0x{address:02x} on {}", self.name)))
        }
    }
}

impl Device for MockI2cBus {
    fn name(&self) -> &str {
        &self.name
    }
}

impl I2cBus for MockI2cBus {
    fn port(&self) -> u8 {
        self.port
    }

    fn probe(&self, address: u8) -> bool {
        self.addresses.contains(&address)
    }

    fn read_register(&self, address: u8, register: u8, buffer: &mut [u8]) -> DriverResult<()> {
        self.check(address)?;
        let guard = self.registers.scoped();
        let registers = guard.borrow();
        for (offset, byte) in buffer.iter_mut().enumerate() {
            let register = register.wrapping_add(offset as u8);
            *byte = registers.get(&(address, register)).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write_register(&self, address: u8, register: u8, data: &[u8]) -> DriverResult<()> {
        self.check(address)?;
        let guard = self.registers.scoped();
        let mut registers = guard.borrow_mut();
        for (offset, byte) in data.iter().enumerate() {
            registers.insert((address, register.wrapping_add(offset as u8)), *byte);
        }
        Ok(())
    }
}
