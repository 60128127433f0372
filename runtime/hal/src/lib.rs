//! Keel HAL - Board capabilities behind fixed interfaces
//!
//! # Purpose
//! The HAL hides which physical chips a board carries. Every hardware
//! function is a capability (Power, Touch, Keyboard, Display, SdCard, I2C,
//! GPS) with one interface contract; a board supplies factories that build
//! its concrete drivers, and the [`HalRegistry`] owns the resulting instances.
//!
//! # Integration Points
//! - Depends on: keel-sync (locks for hot-plug refresh and lazy I2C buses)
//! - Provides to: keel-paths (SD card lookup), keel-app (capability checks
//!   and app subscriptions), keel-system (boot)
//!
//! # Architecture
//! - [`BoardConfiguration`]: immutable value holding the bootstrap callback
//!   and one optional factory per capability
//! - [`HalRegistry::boot`]: runs the bootstrap once, invokes every factory
//!   once, absorbs failures as "capability absent"
//! - After boot, [`HalRegistry::get_capability`] is lock-free; only
//!   [`HalRegistry::refresh`] (SD card hot-plug) takes the registry lock
//!
//! # Testing Strategy
//! - Unit tests: capability sets, factory failure absorption, revocation
//! - Integration tests: full boots of simulated boards from keel-hal-mock

mod board;
mod capability;
mod device;
mod i2c;
mod registry;
mod sdcard;

pub use board::{BoardConfiguration, BoardConfigurationBuilder, BootstrapFn, Factory, I2cFactory};
pub use capability::{Capabilities, CapabilityKind, UnknownCapability};
pub use device::{
    Device, Display, DisplayHandle, DriverError, DriverResult, Gps, GpsFix, KeyEvent, Keyboard,
    MetricValue, Power, PowerMetric, Touch, TouchPoint,
};
pub use i2c::{I2cBus, I2cConfiguration, I2cController, I2cInitMode};
pub use registry::{Capability, HalRegistry, Subscription};
pub use sdcard::{SdCard, SdCardHandle, SdCardState};

use keel_sync::ErrorKind;
use thiserror::Error;

/// Error types for HAL operations
///
/// Factory failures never appear here: they are absorbed at boot and only
/// show up as an absent capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HalError {
    #[error("Board bootstrap failed for {board}")]
    BootstrapFailed { board: String },

    #[error("Capability {kind} is not hot-pluggable")]
    NotHotPluggable { kind: CapabilityKind },
}

impl HalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HalError::BootstrapFailed { .. } => ErrorKind::ResourceUnavailable,
            HalError::NotHotPluggable { .. } => ErrorKind::Validation,
        }
    }
}

pub type Result<T> = core::result::Result<T, HalError>;
