//! Capability interfaces implemented by board drivers
//!
//! Each trait is one capability contract. Boards implement them on their
//! concrete chips (a BQ24295 charger, a GT911 touch panel, ...) and hand the
//! instances to the registry through factories.

use thiserror::Error;

/// Failure reported by a driver operation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Operation not supported by {device}")]
    NotSupported { device: String },

    #[error("Device {device} is not started")]
    NotStarted { device: String },

    #[error("Bus error: {0}")]
    Bus(String),
}

pub type DriverResult<T> = core::result::Result<T, DriverError>;

/// Common base of every capability interface
pub trait Device: Send + Sync {
    /// Part number or hardware name, e.g. `"BQ24295"`
    fn name(&self) -> &str;

    /// Short description of what the device does
    fn description(&self) -> &str {
        ""
    }
}

/// Power metrics a gauge may report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerMetric {
    ChargeLevel,
    BatteryVoltage,
    Current,
    IsCharging,
}

/// Value of one [`PowerMetric`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricValue {
    Percent(u8),
    Millivolts(u32),
    /// Positive while charging
    Milliamps(i32),
    Flag(bool),
}

/// Battery gauge and charger
pub trait Power: Device {
    fn supports_metric(&self, metric: PowerMetric) -> bool;

    /// Current value, `None` when unsupported or unreadable
    fn metric(&self, metric: PowerMetric) -> Option<MetricValue>;

    fn supports_charge_control(&self) -> bool {
        false
    }

    fn is_charging_enabled(&self) -> bool {
        false
    }

    fn set_charging_enabled(&self, _enabled: bool) -> DriverResult<()> {
        Err(DriverError::NotSupported {
            device: self.name().to_string(),
        })
    }

    fn supports_power_off(&self) -> bool {
        false
    }

    fn power_off(&self) -> DriverResult<()> {
        Err(DriverError::NotSupported {
            device: self.name().to_string(),
        })
    }
}

/// One touch sample in display coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchPoint {
    pub x: u16,
    pub y: u16,
    pub pressed: bool,
}

/// Touch panel
pub trait Touch: Device {
    fn start(&self) -> DriverResult<()>;
    fn stop(&self) -> DriverResult<()>;

    /// Latest sample, `None` when nothing changed since the last read
    fn read(&self) -> Option<TouchPoint>;
}

/// One key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: u32,
    pub pressed: bool,
}

/// Hardware keyboard, possibly detachable
pub trait Keyboard: Device {
    fn start(&self) -> DriverResult<()>;
    fn stop(&self) -> DriverResult<()>;
    fn is_attached(&self) -> bool;
    fn read_key(&self) -> Option<KeyEvent>;
}

/// Handle the rendering toolkit uses to reach a display
///
/// Opaque to the runtime: it is neither created nor destroyed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayHandle(usize);

impl DisplayHandle {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Display panel
pub trait Display: Device {
    fn start(&self) -> DriverResult<()>;
    fn stop(&self) -> DriverResult<()>;

    /// Width and height in pixels
    fn resolution(&self) -> (u16, u16);

    fn supports_backlight_duty(&self) -> bool {
        false
    }

    fn set_backlight_duty(&self, _duty: u8) -> DriverResult<()> {
        Err(DriverError::NotSupported {
            device: self.name().to_string(),
        })
    }

    /// Toolkit handle, available once started
    fn handle(&self) -> Option<DisplayHandle>;
}

/// Position fix reported by a GPS receiver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub satellites: u8,
}

/// GPS receiver
pub trait Gps: Device {
    fn start(&self) -> DriverResult<()>;
    fn stop(&self) -> DriverResult<()>;
    fn is_running(&self) -> bool;
    fn fix(&self) -> Option<GpsFix>;
}
