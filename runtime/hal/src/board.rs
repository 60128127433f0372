//! Board configuration
//!
//! The per-board table binding capabilities to concrete drivers. Built once
//! with [`BoardConfiguration::builder`] and never mutated afterwards.

use std::sync::Arc;

use crate::capability::{Capabilities, CapabilityKind};
use crate::device::{Display, Gps, Keyboard, Power, Touch};
use crate::i2c::{I2cBus, I2cConfiguration};
use crate::sdcard::SdCard;

/// Board bootstrap callback, `false` aborts the boot
pub type BootstrapFn = Box<dyn Fn() -> bool + Send + Sync>;

/// Zero-argument driver factory, `None` on failure
pub type Factory<T> = Box<dyn Fn() -> Option<Arc<T>> + Send + Sync>;

/// Builds one bus per I2C configuration
pub type I2cFactory = Arc<dyn Fn(&I2cConfiguration) -> Option<Arc<dyn I2cBus>> + Send + Sync>;

/// Factories and bootstrap of one board
pub struct BoardConfiguration {
    pub(crate) name: String,
    pub(crate) bootstrap: Option<BootstrapFn>,
    pub(crate) power: Option<Factory<dyn Power>>,
    pub(crate) keyboard: Option<Factory<dyn Keyboard>>,
    pub(crate) touch: Option<Factory<dyn Touch>>,
    pub(crate) sdcard: Option<Factory<dyn SdCard>>,
    pub(crate) i2c: Option<I2cFactory>,
    pub(crate) i2c_configurations: Vec<I2cConfiguration>,
    pub(crate) gps: Option<Factory<dyn Gps>>,
    pub(crate) display: Option<Factory<dyn Display>>,
}

impl BoardConfiguration {
    pub fn builder(name: impl Into<String>) -> BoardConfigurationBuilder {
        BoardConfigurationBuilder {
            config: BoardConfiguration {
                name: name.into(),
                bootstrap: None,
                power: None,
                keyboard: None,
                touch: None,
                sdcard: None,
                i2c: None,
                i2c_configurations: Vec::new(),
                gps: None,
                display: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn i2c_configurations(&self) -> &[I2cConfiguration] {
        &self.i2c_configurations
    }

    /// Kinds this board has a factory for
    ///
    /// Declared is not available: a factory may still fail at boot.
    pub fn declared(&self) -> Capabilities {
        CapabilityKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                CapabilityKind::Power => self.power.is_some(),
                CapabilityKind::Keyboard => self.keyboard.is_some(),
                CapabilityKind::Touch => self.touch.is_some(),
                CapabilityKind::SdCard => self.sdcard.is_some(),
                CapabilityKind::I2c => self.i2c.is_some() && !self.i2c_configurations.is_empty(),
                CapabilityKind::Gps => self.gps.is_some(),
                CapabilityKind::Display => self.display.is_some(),
            })
            .collect()
    }
}

impl core::fmt::Debug for BoardConfiguration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BoardConfiguration")
            .field("name", &self.name)
            .field("declared", &self.declared())
            .field("i2c_configurations", &self.i2c_configurations)
            .finish_non_exhaustive()
    }
}

/// Builder for [`BoardConfiguration`]
pub struct BoardConfigurationBuilder {
    config: BoardConfiguration,
}

impl BoardConfigurationBuilder {
    pub fn bootstrap(mut self, bootstrap: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.config.bootstrap = Some(Box::new(bootstrap));
        self
    }

    pub fn power(mut self, factory: impl Fn() -> Option<Arc<dyn Power>> + Send + Sync + 'static) -> Self {
        self.config.power = Some(Box::new(factory));
        self
    }

    pub fn keyboard(
        mut self,
        factory: impl Fn() -> Option<Arc<dyn Keyboard>> + Send + Sync + 'static,
    ) -> Self {
        self.config.keyboard = Some(Box::new(factory));
        self
    }

    pub fn touch(mut self, factory: impl Fn() -> Option<Arc<dyn Touch>> + Send + Sync + 'static) -> Self {
        self.config.touch = Some(Box::new(factory));
        self
    }

    pub fn sdcard(mut self, factory: impl Fn() -> Option<Arc<dyn SdCard>> + Send + Sync + 'static) -> Self {
        self.config.sdcard = Some(Box::new(factory));
        self
    }

    pub fn gps(mut self, factory: impl Fn() -> Option<Arc<dyn Gps>> + Send + Sync + 'static) -> Self {
        self.config.gps = Some(Box::new(factory));
        self
    }

    pub fn display(
        mut self,
        factory: impl Fn() -> Option<Arc<dyn Display>> + Send + Sync + 'static,
    ) -> Self {
        self.config.display = Some(Box::new(factory));
        self
    }

    /// I2C buses and the factory that initializes them
    pub fn i2c(
        mut self,
        configurations: Vec<I2cConfiguration>,
        factory: impl Fn(&I2cConfiguration) -> Option<Arc<dyn I2cBus>> + Send + Sync + 'static,
    ) -> Self {
        self.config.i2c_configurations = configurations;
        self.config.i2c = Some(Arc::new(factory));
        self
    }

    /// Drop the factory for `kind`, leaving the capability absent
    pub fn without(mut self, kind: CapabilityKind) -> Self {
        match kind {
            CapabilityKind::Power => self.config.power = None,
            CapabilityKind::Keyboard => self.config.keyboard = None,
            CapabilityKind::Touch => self.config.touch = None,
            CapabilityKind::SdCard => self.config.sdcard = None,
            CapabilityKind::I2c => self.config.i2c = None,
            CapabilityKind::Gps => self.config.gps = None,
            CapabilityKind::Display => self.config.display = None,
        }
        self
    }

    pub fn build(self) -> BoardConfiguration {
        self.config
    }
}
