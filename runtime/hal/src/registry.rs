//! HAL registry
//!
//! Owns one instance per capability kind, built from the board's factories
//! during [`HalRegistry::boot`]. Boot is single-threaded and completes before
//! anything else can see the registry; afterwards the registry is read-only
//! apart from SD card hot-plug, which the slot serializes internally.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::board::{BoardConfiguration, Factory};
use crate::capability::{Capabilities, CapabilityKind};
use crate::device::{Device, Display, Gps, Keyboard, Power, Touch};
use crate::i2c::I2cController;
use crate::sdcard::{SdCardHandle, SdCardSlot};
use crate::{HalError, Result};

/// Shared reference to one capability instance
#[derive(Clone)]
pub enum Capability {
    Power(Arc<dyn Power>),
    Keyboard(Arc<dyn Keyboard>),
    Touch(Arc<dyn Touch>),
    SdCard(SdCardHandle),
    I2c(Arc<I2cController>),
    Gps(Arc<dyn Gps>),
    Display(Arc<dyn Display>),
}

impl Capability {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Capability::Power(_) => CapabilityKind::Power,
            Capability::Keyboard(_) => CapabilityKind::Keyboard,
            Capability::Touch(_) => CapabilityKind::Touch,
            Capability::SdCard(_) => CapabilityKind::SdCard,
            Capability::I2c(_) => CapabilityKind::I2c,
            Capability::Gps(_) => CapabilityKind::Gps,
            Capability::Display(_) => CapabilityKind::Display,
        }
    }

    /// Name of the driver behind the capability
    pub fn name(&self) -> &str {
        match self {
            Capability::Power(device) => device.name(),
            Capability::Keyboard(device) => device.name(),
            Capability::Touch(device) => device.name(),
            Capability::SdCard(handle) => match handle.device() {
                Some(device) => device.name(),
                None => "",
            },
            Capability::I2c(device) => device.name(),
            Capability::Gps(device) => device.name(),
            Capability::Display(device) => device.name(),
        }
    }
}

impl core::fmt::Debug for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Capability")
            .field(&self.kind())
            .field(&self.name())
            .finish()
    }
}

type Counters = [AtomicUsize; 7];

/// Registered interest of one consumer in a capability
///
/// The capability instance stays owned by the registry; dropping the
/// subscription only ends the interest.
pub struct Subscription {
    capability: Capability,
    counters: Arc<Counters>,
}

impl Subscription {
    pub fn kind(&self) -> CapabilityKind {
        self.capability.kind()
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.counters[self.kind().index()].fetch_sub(1, Ordering::AcqRel);
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("capability", &self.capability)
            .finish()
    }
}

/// Capability instances of the booted board
pub struct HalRegistry {
    board: String,
    power: Option<Arc<dyn Power>>,
    keyboard: Option<Arc<dyn Keyboard>>,
    touch: Option<Arc<dyn Touch>>,
    sdcard: Option<Arc<SdCardSlot>>,
    i2c: Option<Arc<I2cController>>,
    gps: Option<Arc<dyn Gps>>,
    display: Option<Arc<dyn Display>>,
    subscriptions: Arc<Counters>,
}

static_assertions::assert_impl_all!(HalRegistry: Send, Sync);
static_assertions::assert_impl_all!(Capability: Send, Sync);

impl HalRegistry {
    /// Run the board bootstrap and every factory, exactly once each
    ///
    /// Factory failures (a `None` result or a panic) leave the capability
    /// absent and never fail the boot.
    ///
    /// # Errors
    /// - `HalError::BootstrapFailed` if the bootstrap callback reports failure
    pub fn boot(board: &BoardConfiguration) -> Result<Self> {
        log::info!("Booting HAL for board {}", board.name);

        if let Some(bootstrap) = &board.bootstrap {
            let succeeded = panic::catch_unwind(AssertUnwindSafe(|| bootstrap())).unwrap_or(false);
            if !succeeded {
                log::error!("Bootstrap failed for board {}", board.name);
                return Err(HalError::BootstrapFailed {
                    board: board.name.clone(),
                });
            }
        }

        let power = build(CapabilityKind::Power, &board.power);
        let keyboard = build(CapabilityKind::Keyboard, &board.keyboard);
        let touch = build(CapabilityKind::Touch, &board.touch);
        let sdcard = build(CapabilityKind::SdCard, &board.sdcard)
            .map(|device| Arc::new(SdCardSlot::new(device)));
        let i2c = board.i2c.as_ref().and_then(|factory| {
            let controller = I2cController::boot(&board.i2c_configurations, factory.clone());
            if controller.is_none() {
                log::warn!("No usable I2C bus on board {}", board.name);
            }
            controller.map(Arc::new)
        });
        let gps = build(CapabilityKind::Gps, &board.gps);
        let display = build(CapabilityKind::Display, &board.display);

        // Displays may share the card's SPI bus, so the card goes first.
        if let Some(slot) = &sdcard {
            slot.mount_if_present();
        }

        let display = display.filter(|device| match device.start() {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to start display {}: {}", device.name(), e);
                false
            }
        });

        let registry = Self {
            board: board.name.clone(),
            power,
            keyboard,
            touch,
            sdcard,
            i2c,
            gps,
            display,
            subscriptions: Arc::new(Default::default()),
        };

        log::info!(
            "HAL ready for board {} with {:?}",
            registry.board,
            registry.available()
        );
        Ok(registry)
    }

    pub fn board_name(&self) -> &str {
        &self.board
    }

    /// Instance for `kind`, `None` if the board lacks it or its factory failed
    ///
    /// Never blocks.
    pub fn get_capability(&self, kind: CapabilityKind) -> Option<Capability> {
        match kind {
            CapabilityKind::Power => self.power.clone().map(Capability::Power),
            CapabilityKind::Keyboard => self.keyboard.clone().map(Capability::Keyboard),
            CapabilityKind::Touch => self.touch.clone().map(Capability::Touch),
            CapabilityKind::SdCard => self.sdcard().map(Capability::SdCard),
            CapabilityKind::I2c => self.i2c.clone().map(Capability::I2c),
            CapabilityKind::Gps => self.gps.clone().map(Capability::Gps),
            CapabilityKind::Display => self.display.clone().map(Capability::Display),
        }
    }

    pub fn has(&self, kind: CapabilityKind) -> bool {
        match kind {
            CapabilityKind::SdCard => self.sdcard.as_ref().is_some_and(|slot| slot.is_present()),
            _ => self.get_capability(kind).is_some(),
        }
    }

    /// Set of kinds currently available
    pub fn available(&self) -> Capabilities {
        CapabilityKind::ALL
            .into_iter()
            .filter(|kind| self.has(*kind))
            .collect()
    }

    pub fn power(&self) -> Option<Arc<dyn Power>> {
        self.power.clone()
    }

    pub fn keyboard(&self) -> Option<Arc<dyn Keyboard>> {
        self.keyboard.clone()
    }

    pub fn touch(&self) -> Option<Arc<dyn Touch>> {
        self.touch.clone()
    }

    /// Handle to the inserted card, revoked once the card is removed
    pub fn sdcard(&self) -> Option<SdCardHandle> {
        self.sdcard
            .as_ref()
            .filter(|slot| slot.is_present())
            .map(|slot| SdCardHandle::new(slot.clone()))
    }

    pub fn i2c(&self) -> Option<Arc<I2cController>> {
        self.i2c.clone()
    }

    pub fn gps(&self) -> Option<Arc<dyn Gps>> {
        self.gps.clone()
    }

    pub fn display(&self) -> Option<Arc<dyn Display>> {
        self.display.clone()
    }

    /// Re-probe a hot-pluggable capability, returns whether it is present
    ///
    /// # Errors
    /// - `HalError::NotHotPluggable` for every kind but `SdCard`
    pub fn refresh(&self, kind: CapabilityKind) -> Result<bool> {
        if !kind.is_hot_pluggable() {
            return Err(HalError::NotHotPluggable { kind });
        }

        Ok(match &self.sdcard {
            Some(slot) => slot.refresh(),
            None => false,
        })
    }

    /// Register interest in `kind`, `None` if the capability is absent
    pub fn subscribe(&self, kind: CapabilityKind) -> Option<Subscription> {
        let capability = self.get_capability(kind)?;
        self.subscriptions[kind.index()].fetch_add(1, Ordering::AcqRel);
        log::trace!("Subscribed to {kind}");

        Some(Subscription {
            capability,
            counters: self.subscriptions.clone(),
        })
    }

    /// Live subscriptions on `kind`
    pub fn subscriber_count(&self, kind: CapabilityKind) -> usize {
        self.subscriptions[kind.index()].load(Ordering::Acquire)
    }

    /// `(kind, driver name)` of every available capability, in boot order
    pub fn devices(&self) -> Vec<(CapabilityKind, String)> {
        CapabilityKind::ALL
            .into_iter()
            .filter_map(|kind| self.get_capability(kind))
            .map(|capability| (capability.kind(), capability.name().to_string()))
            .collect()
    }
}

impl core::fmt::Debug for HalRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HalRegistry")
            .field("board", &self.board)
            .field("available", &self.available())
            .finish()
    }
}

/// Invoke one factory, absorbing failure
fn build<T: Device + ?Sized>(kind: CapabilityKind, factory: &Option<Factory<T>>) -> Option<Arc<T>> {
    let factory = factory.as_ref()?;

    match panic::catch_unwind(AssertUnwindSafe(|| factory())) {
        Ok(Some(device)) => {
            log::info!("Created {} device {}", kind, device.name());
            Some(device)
        }
        Ok(None) => {
            log::error!("Failed to create {kind} device");
            None
        }
        Err(_) => {
            log::error!("Factory for {kind} panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DriverResult, MetricValue, PowerMetric};
    use std::sync::atomic::AtomicBool;

    struct Gauge;

    impl Device for Gauge {
        fn name(&self) -> &str {
            "Gauge"
        }
    }

    impl Power for Gauge {
        fn supports_metric(&self, _metric: PowerMetric) -> bool {
            true
        }

        fn metric(&self, _metric: PowerMetric) -> Option<MetricValue> {
            Some(MetricValue::Flag(true))
        }
    }

    struct Panel {
        fail_start: bool,
    }

    impl Device for Panel {
        fn name(&self) -> &str {
            "Panel"
        }
    }

    impl Display for Panel {
        fn start(&self) -> DriverResult<()> {
            if self.fail_start {
                Err(crate::DriverError::Bus("no ack".into()))
            } else {
                Ok(())
            }
        }

        fn stop(&self) -> DriverResult<()> {
            Ok(())
        }

        fn resolution(&self) -> (u16, u16) {
            (320, 240)
        }

        fn handle(&self) -> Option<crate::DisplayHandle> {
            None
        }
    }

    fn gauge() -> Option<Arc<dyn Power>> {
        Some(Arc::new(Gauge))
    }

    #[test]
    fn test_absent_and_failed_factories() {
        let board = BoardConfiguration::builder("test")
            .power(gauge)
            .gps(|| None)
            .build();

        let hal = HalRegistry::boot(&board).unwrap();
        assert!(hal.has(CapabilityKind::Power));
        assert!(!hal.has(CapabilityKind::Gps));
        assert!(hal.get_capability(CapabilityKind::Touch).is_none());
        assert_eq!(hal.available(), Capabilities::POWER);
        assert_eq!(hal.devices(), vec![(CapabilityKind::Power, "Gauge".to_string())]);
    }

    #[test]
    fn test_panicking_factory_is_absorbed() {
        let board = BoardConfiguration::builder("test")
            .power(gauge)
            .touch(|| panic!("touch controller missing"))
            .build();

        let hal = HalRegistry::boot(&board).unwrap();
        assert!(hal.touch().is_none());
        assert!(hal.power().is_some());
    }

    #[test]
    fn test_bootstrap_failure_aborts_boot() {
        let ran_factory = Arc::new(AtomicBool::new(false));
        let flag = ran_factory.clone();
        let board = BoardConfiguration::builder("broken")
            .bootstrap(|| false)
            .power(move || {
                flag.store(true, Ordering::SeqCst);
                gauge()
            })
            .build();

        let err = HalRegistry::boot(&board).unwrap_err();
        assert_eq!(
            err,
            HalError::BootstrapFailed {
                board: "broken".into()
            }
        );
        assert!(!ran_factory.load(Ordering::SeqCst));
    }

    #[test]
    fn test_display_that_fails_to_start_is_absent() {
        let board = BoardConfiguration::builder("test")
            .display(|| Some(Arc::new(Panel { fail_start: true }) as Arc<dyn Display>))
            .build();
        let hal = HalRegistry::boot(&board).unwrap();
        assert!(hal.display().is_none());

        let board = BoardConfiguration::builder("test")
            .display(|| Some(Arc::new(Panel { fail_start: false }) as Arc<dyn Display>))
            .build();
        let hal = HalRegistry::boot(&board).unwrap();
        assert_eq!(hal.display().unwrap().resolution(), (320, 240));
    }

    #[test]
    fn test_refresh_rejects_fixed_capabilities() {
        let hal = HalRegistry::boot(&BoardConfiguration::builder("test").build()).unwrap();
        assert_eq!(
            hal.refresh(CapabilityKind::Power),
            Err(HalError::NotHotPluggable {
                kind: CapabilityKind::Power
            })
        );
        assert_eq!(hal.refresh(CapabilityKind::SdCard), Ok(false));
    }

    #[test]
    fn test_subscriptions_are_counted() {
        let hal = HalRegistry::boot(&BoardConfiguration::builder("test").power(gauge).build()).unwrap();

        assert!(hal.subscribe(CapabilityKind::Gps).is_none());
        let first = hal.subscribe(CapabilityKind::Power).unwrap();
        let second = hal.subscribe(CapabilityKind::Power).unwrap();
        assert_eq!(first.kind(), CapabilityKind::Power);
        assert_eq!(hal.subscriber_count(CapabilityKind::Power), 2);

        drop(first);
        drop(second);
        assert_eq!(hal.subscriber_count(CapabilityKind::Power), 0);
        assert!(hal.power().is_some());
    }
}
