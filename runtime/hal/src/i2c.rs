//! I2C buses
//!
//! A board lists its buses as [`I2cConfiguration`]s and provides one factory
//! that initializes a bus from a configuration. The [`I2cController`] is the
//! I2C capability: it owns every bus, initializing `OnBoot` buses during boot
//! and `Lazy` ones on first use.

use core::cell::RefCell;
use std::sync::Arc;

use keel_sync::Lock;

use crate::board::I2cFactory;
use crate::device::{Device, DriverResult};

/// When a bus gets initialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum I2cInitMode {
    OnBoot,
    Lazy,
    Disabled,
}

/// Static description of one bus on the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cConfiguration {
    pub name: String,
    pub port: u8,
    pub init_mode: I2cInitMode,
    pub clock_hz: u32,
    pub sda_pin: u8,
    pub scl_pin: u8,
}

impl I2cConfiguration {
    pub fn new(name: impl Into<String>, port: u8, init_mode: I2cInitMode) -> Self {
        Self {
            name: name.into(),
            port,
            init_mode,
            clock_hz: 400_000,
            sda_pin: 0,
            scl_pin: 0,
        }
    }

    pub fn with_clock(mut self, clock_hz: u32) -> Self {
        self.clock_hz = clock_hz;
        self
    }

    pub fn with_pins(mut self, sda_pin: u8, scl_pin: u8) -> Self {
        self.sda_pin = sda_pin;
        self.scl_pin = scl_pin;
        self
    }
}

/// One initialized I2C master bus
pub trait I2cBus: Device {
    fn port(&self) -> u8;

    /// Whether a device acknowledges `address`
    fn probe(&self, address: u8) -> bool;

    fn read_register(&self, address: u8, register: u8, buffer: &mut [u8]) -> DriverResult<()>;

    fn write_register(&self, address: u8, register: u8, data: &[u8]) -> DriverResult<()>;
}

struct BusSlot {
    configuration: I2cConfiguration,
    bus: Option<Arc<dyn I2cBus>>,
    failed: bool,
    initializing: bool,
}

/// Every I2C bus of the board
pub struct I2cController {
    factory: I2cFactory,
    slots: Lock<RefCell<Vec<BusSlot>>>,
}

impl I2cController {
    /// Build the controller, initializing `OnBoot` buses now
    ///
    /// Returns `None` when no bus is usable: every configuration is disabled
    /// or failed to initialize at boot and none is lazy.
    pub(crate) fn boot(configurations: &[I2cConfiguration], factory: I2cFactory) -> Option<Self> {
        let mut slots = Vec::with_capacity(configurations.len());
        let mut usable = false;

        for configuration in configurations {
            let mut slot = BusSlot {
                configuration: configuration.clone(),
                bus: None,
                failed: false,
                initializing: false,
            };

            match configuration.init_mode {
                I2cInitMode::OnBoot => {
                    slot.bus = init_bus(&factory, configuration);
                    slot.failed = slot.bus.is_none();
                    usable |= slot.bus.is_some();
                }
                I2cInitMode::Lazy => usable = true,
                I2cInitMode::Disabled => {
                    log::debug!("I2C bus {} disabled", configuration.name);
                }
            }

            slots.push(slot);
        }

        usable.then(|| Self {
            factory,
            slots: Lock::new(RefCell::new(slots)),
        })
    }

    /// Bus on `port`, initializing it first if it is lazy
    pub fn bus(&self, port: u8) -> Option<Arc<dyn I2cBus>> {
        self.find(|configuration| configuration.port == port)
    }

    /// Bus named `name`, initializing it first if it is lazy
    pub fn bus_by_name(&self, name: &str) -> Option<Arc<dyn I2cBus>> {
        self.find(|configuration| configuration.name == name)
    }

    /// Configurations of every bus, including disabled ones
    pub fn configurations(&self) -> Vec<I2cConfiguration> {
        let guard = self.slots.scoped();
        let slots = guard.borrow();
        slots.iter().map(|slot| slot.configuration.clone()).collect()
    }

    /// Whether the bus on `port` has been initialized
    pub fn is_started(&self, port: u8) -> bool {
        let guard = self.slots.scoped();
        let slots = guard.borrow();
        slots
            .iter()
            .any(|slot| slot.configuration.port == port && slot.bus.is_some())
    }

    fn find(&self, matches: impl Fn(&I2cConfiguration) -> bool) -> Option<Arc<dyn I2cBus>> {
        let guard = self.slots.scoped();
        let (index, configuration) = {
            let mut slots = guard.borrow_mut();
            let (index, slot) = slots
                .iter_mut()
                .enumerate()
                .find(|(_, slot)| matches(&slot.configuration))?;

            let pending = slot.bus.is_none()
                && !slot.failed
                && !slot.initializing
                && slot.configuration.init_mode == I2cInitMode::Lazy;
            if !pending {
                return slot.bus.clone();
            }
            slot.initializing = true;
            (index, slot.configuration.clone())
        };

        // Not borrowed here: the factory may call back into the controller.
        let bus = init_bus(&self.factory, &configuration);

        let mut slots = guard.borrow_mut();
        let slot = &mut slots[index];
        slot.initializing = false;
        slot.failed = bus.is_none();
        slot.bus = bus.clone();
        bus
    }
}

impl Device for I2cController {
    fn name(&self) -> &str {
        "I2C"
    }

    fn description(&self) -> &str {
        "I2C master buses"
    }
}

fn init_bus(factory: &I2cFactory, configuration: &I2cConfiguration) -> Option<Arc<dyn I2cBus>> {
    let built = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| factory(configuration)));
    match built {
        Ok(Some(bus)) => {
            log::info!(
                "Started I2C bus {} on port {} at {} Hz",
                configuration.name,
                configuration.port,
                configuration.clock_hz
            );
            Some(bus)
        }
        Ok(None) => {
            log::error!("Failed to start I2C bus {}", configuration.name);
            None
        }
        Err(_) => {
            log::error!("I2C factory panicked for bus {}", configuration.name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Bus {
        port: u8,
    }

    impl Device for Bus {
        fn name(&self) -> &str {
            "Bus"
        }
    }

    impl I2cBus for Bus {
        fn port(&self) -> u8 {
            self.port
        }

        fn probe(&self, address: u8) -> bool {
            address == 0x6b
        }

        fn read_register(&self, _address: u8, _register: u8, buffer: &mut [u8]) -> DriverResult<()> {
            buffer.fill(0);
            Ok(())
        }

        fn write_register(&self, _address: u8, _register: u8, _data: &[u8]) -> DriverResult<()> {
            Ok(())
        }
    }

    fn counting_factory(calls: Arc<AtomicUsize>) -> I2cFactory {
        Arc::new(move |configuration: &I2cConfiguration| {
            calls.fetch_add(1, Ordering::SeqCst);
            Some(Arc::new(Bus {
                port: configuration.port,
            }) as Arc<dyn I2cBus>)
        })
    }

    #[test]
    fn test_lazy_bus_initializes_on_first_use() {
        let calls = Arc::new(AtomicUsize::new(0));
        let configurations = [
            I2cConfiguration::new("internal", 0, I2cInitMode::OnBoot),
            I2cConfiguration::new("external", 1, I2cInitMode::Lazy),
        ];

        let controller = I2cController::boot(&configurations, counting_factory(calls.clone())).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(controller.is_started(0));
        assert!(!controller.is_started(1));

        let bus = controller.bus_by_name("external").unwrap();
        assert_eq!(bus.port(), 1);
        assert!(controller.bus(1).is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disabled_buses_are_never_started() {
        let calls = Arc::new(AtomicUsize::new(0));
        let configurations = [I2cConfiguration::new("spare", 2, I2cInitMode::Disabled)];

        assert!(I2cController::boot(&configurations, counting_factory(calls.clone())).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_boot_bus_leaves_controller_absent() {
        let factory: I2cFactory =
            Arc::new(|_: &I2cConfiguration| -> Option<Arc<dyn I2cBus>> { None });
        let configurations = [I2cConfiguration::new("internal", 0, I2cInitMode::OnBoot)];
        assert!(I2cController::boot(&configurations, factory).is_none());
    }

    #[test]
    fn test_lazy_factory_may_query_the_controller() {
        use std::sync::OnceLock;

        let controller: Arc<OnceLock<Arc<I2cController>>> = Arc::new(OnceLock::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let factory: I2cFactory = {
            let controller = controller.clone();
            let seen = seen.clone();
            Arc::new(move |configuration: &I2cConfiguration| {
                if let Some(controller) = controller.get() {
                    // The bus being built is not visible yet
                    assert!(controller.is_started(0));
                    assert!(controller.bus(1).is_none());
                    seen.fetch_add(controller.configurations().len(), Ordering::SeqCst);
                }
                Some(Arc::new(Bus {
                    port: configuration.port,
                }) as Arc<dyn I2cBus>)
            })
        };

        let configurations = [
            I2cConfiguration::new("internal", 0, I2cInitMode::OnBoot),
            I2cConfiguration::new("external", 1, I2cInitMode::Lazy),
        ];
        let booted = Arc::new(I2cController::boot(&configurations, factory).unwrap());
        assert!(controller.set(booted.clone()).is_ok());

        assert_eq!(booted.bus(1).unwrap().port(), 1);
        assert!(booted.is_started(1));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
