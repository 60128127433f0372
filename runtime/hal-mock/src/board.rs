//! A complete simulated board
//!
//! [`SimulatedBoard`] produces a [`BoardConfiguration`] with every
//! capability, and keeps the driver instances so tests can reach behind the
//! HAL. Individual capabilities can be dropped, made to fail, or made to
//! panic to exercise graceful degradation.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::path::PathBuf;
use std::sync::Arc;

use keel_hal::{
    BoardConfiguration, CapabilityKind, Display, Gps, I2cBus, I2cConfiguration, I2cInitMode,
    Keyboard, Power, SdCard, Touch,
};

use crate::drivers::{
    MockDisplay, MockGps, MockI2cBus, MockKeyboard, MockPower, MockSdCard, MockTouch,
};

/// Mount point of the simulated card
pub const SDCARD_MOUNT_PATH: &str = "/sdcard";

/// Address of the simulated charger on the internal bus
pub const CHARGER_ADDRESS: u8 = 0x6b;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Normal,
    Absent,
    Fails,
    Panics,
}

/// Driver instances behind a simulated board
#[derive(Debug, Clone)]
pub struct SimulatedDevices {
    pub power: Arc<MockPower>,
    pub keyboard: Arc<MockKeyboard>,
    pub touch: Arc<MockTouch>,
    pub sdcard: Arc<MockSdCard>,
    pub gps: Arc<MockGps>,
    pub display: Arc<MockDisplay>,
    calls: Arc<[AtomicUsize; 7]>,
    bootstraps: Arc<AtomicUsize>,
}

impl SimulatedDevices {
    /// How many times the factory for `kind` ran (per bus for I2C)
    pub fn factory_calls(&self, kind: CapabilityKind) -> usize {
        self.calls[slot(kind)].load(Ordering::SeqCst)
    }

    pub fn bootstrap_calls(&self) -> usize {
        self.bootstraps.load(Ordering::SeqCst)
    }
}

/// Builder for a simulated board
#[derive(Debug, Clone)]
pub struct SimulatedBoard {
    name: String,
    behaviors: [Behavior; 7],
    bootstrap_succeeds: bool,
    card_inserted: bool,
    unresponsive_display: bool,
    i2c: Vec<I2cConfiguration>,
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new("simulator")
    }
}

impl SimulatedBoard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviors: [Behavior::Normal; 7],
            bootstrap_succeeds: true,
            card_inserted: true,
            unresponsive_display: false,
            i2c: vec![
                I2cConfiguration::new("internal", 0, I2cInitMode::OnBoot).with_pins(18, 8),
                I2cConfiguration::new("external", 1, I2cInitMode::Lazy)
                    .with_clock(100_000)
                    .with_pins(43, 44),
            ],
        }
    }

    /// Leave `kind` without a factory
    pub fn without(mut self, kind: CapabilityKind) -> Self {
        self.behaviors[slot(kind)] = Behavior::Absent;
        self
    }

    /// Make the factory for `kind` report failure
    pub fn failing(mut self, kind: CapabilityKind) -> Self {
        self.behaviors[slot(kind)] = Behavior::Fails;
        self
    }

    /// Make the factory for `kind` panic
    pub fn panicking(mut self, kind: CapabilityKind) -> Self {
        self.behaviors[slot(kind)] = Behavior::Panics;
        self
    }

    pub fn bootstrap_fails(mut self) -> Self {
        self.bootstrap_succeeds = false;
        self
    }

    pub fn card_inserted(mut self, inserted: bool) -> Self {
        self.card_inserted = inserted;
        self
    }

    pub fn unresponsive_display(mut self) -> Self {
        self.unresponsive_display = true;
        self
    }

    pub fn i2c_buses(mut self, configurations: Vec<I2cConfiguration>) -> Self {
        self.i2c = configurations;
        self
    }

    /// Produce the board configuration and the drivers it hands out
    pub fn build(self) -> (BoardConfiguration, SimulatedDevices) {
        let devices = SimulatedDevices {
            power: Arc::new(MockPower::new(87)),
            keyboard: Arc::new(MockKeyboard::new()),
            touch: Arc::new(MockTouch::new()),
            sdcard: Arc::new(MockSdCard::new(PathBuf::from(SDCARD_MOUNT_PATH), self.card_inserted)),
            gps: Arc::new(MockGps::new(52.3676, 4.9041)),
            display: Arc::new(if self.unresponsive_display {
                MockDisplay::unresponsive(320, 240)
            } else {
                MockDisplay::new(320, 240)
            }),
            calls: Arc::new(Default::default()),
            bootstraps: Arc::new(AtomicUsize::new(0)),
        };

        let bootstraps = devices.bootstraps.clone();
        let succeeds = self.bootstrap_succeeds;
        let mut builder = BoardConfiguration::builder(self.name.clone()).bootstrap(move || {
            bootstraps.fetch_add(1, Ordering::SeqCst);
            log::debug!("Simulated bootstrap");
            succeeds
        });

        let power: Arc<dyn Power> = devices.power.clone();
        if let Some(factory) = self.factory(CapabilityKind::Power, &devices, power) {
            builder = builder.power(factory);
        }
        let keyboard: Arc<dyn Keyboard> = devices.keyboard.clone();
        if let Some(factory) = self.factory(CapabilityKind::Keyboard, &devices, keyboard) {
            builder = builder.keyboard(factory);
        }
        let touch: Arc<dyn Touch> = devices.touch.clone();
        if let Some(factory) = self.factory(CapabilityKind::Touch, &devices, touch) {
            builder = builder.touch(factory);
        }
        let sdcard: Arc<dyn SdCard> = devices.sdcard.clone();
        if let Some(factory) = self.factory(CapabilityKind::SdCard, &devices, sdcard) {
            builder = builder.sdcard(factory);
        }
        let gps: Arc<dyn Gps> = devices.gps.clone();
        if let Some(factory) = self.factory(CapabilityKind::Gps, &devices, gps) {
            builder = builder.gps(factory);
        }
        let display: Arc<dyn Display> = devices.display.clone();
        if let Some(factory) = self.factory(CapabilityKind::Display, &devices, display) {
            builder = builder.display(factory);
        }

        let behavior = self.behaviors[slot(CapabilityKind::I2c)];
        if behavior != Behavior::Absent {
            let calls = devices.calls.clone();
            builder = builder.i2c(self.i2c.clone(), move |configuration: &I2cConfiguration| {
                calls[slot(CapabilityKind::I2c)].fetch_add(1, Ordering::SeqCst);
                match behavior {
                    Behavior::Fails => None,
                    Behavior::Panics => panic!("simulated I2C bus {} fault", configuration.name),
                    _ => Some(Arc::new(MockI2cBus::new(configuration, &[CHARGER_ADDRESS]))
                        as Arc<dyn I2cBus>),
                }
            });
        }

        (builder.build(), devices)
    }

    /// Factory handing out `device`, shaped by the configured behavior
    fn factory<T: ?Sized + Send + Sync + 'static>(
        &self,
        kind: CapabilityKind,
        devices: &SimulatedDevices,
        device: Arc<T>,
    ) -> Option<impl Fn() -> Option<Arc<T>> + Send + Sync + 'static> {
        let behavior = self.behaviors[slot(kind)];
        if behavior == Behavior::Absent {
            return None;
        }

        let calls = devices.calls.clone();
        Some(move || {
            calls[slot(kind)].fetch_add(1, Ordering::SeqCst);
            match behavior {
                Behavior::Fails => None,
                Behavior::Panics => panic!("simulated {kind} driver fault"),
                _ => Some(device.clone()),
            }
        })
    }
}

fn slot(kind: CapabilityKind) -> usize {
    CapabilityKind::ALL
        .iter()
        .position(|candidate| *candidate == kind)
        .unwrap_or(0)
}
