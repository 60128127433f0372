//! Simulated hardware for Keel
//!
//! # WARNING: no real hardware here
//!
//! Every driver in this crate only pretends: state lives in memory and is
//! driven by the test (or by `keel-sim`). Use it for host development and
//! tests, never in a board image.
//!
//! ## Usage
//!
//! ```
//! use keel_hal::{CapabilityKind, HalRegistry};
//! use keel_hal_mock::SimulatedBoard;
//!
//! let (board, devices) = SimulatedBoard::default()
//!     .without(CapabilityKind::Touch)
//!     .build();
//! let hal = HalRegistry::boot(&board).unwrap();
//!
//! assert!(hal.get_capability(CapabilityKind::Touch).is_none());
//! assert_eq!(devices.factory_calls(CapabilityKind::Power), 1);
//! ```

mod board;
mod drivers;

pub use board::{SimulatedBoard, SimulatedDevices, CHARGER_ADDRESS, SDCARD_MOUNT_PATH};
pub use drivers::{
    MockDisplay, MockGps, MockI2cBus, MockKeyboard, MockPower, MockSdCard, MockTouch,
    TOUCH_FIFO_DEPTH,
};
