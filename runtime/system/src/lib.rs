//! Keel System - Boot sequence and system context
//!
//! # Purpose
//! Boots a board and wires the registries and runtimes into one
//! [`System`] value that callers pass around explicitly.
//!
//! # Integration Points
//! - Depends on: keel-hal, keel-paths, keel-app, keel-service
//! - Provides to: board firmware entry points, keel-sim
//!
//! # Architecture
//! Booting is strictly ordered: HAL, manifests, runtimes, boot gate,
//! autostart services. Lifecycle calls are refused until the gate opens,
//! so no app or service ever observes a half-populated registry.
//!
//! # Testing Strategy
//! - Unit tests: configuration parsing
//! - Integration tests: full boots of simulated boards, shutdown

mod config;
mod error;
mod system;

pub use config::{BootConfig, ServicesConfig, SystemConfig};
pub use error::{Result, SystemError};
pub use system::{System, SystemEvent};
