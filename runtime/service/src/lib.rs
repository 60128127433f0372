//! Keel Service - Background service lifecycle
//!
//! # Purpose
//! Services are long-lived background workers (wifi, GPS polling, the
//! status bar). Unlike apps they own no UI, produce no result and are
//! identified by a stable id rather than a per-launch id.
//!
//! # Integration Points
//! - Depends on: keel-sync (context locks), keel-paths (service
//!   directories), keel-app (parameter bundles)
//! - Provides to: keel-system, keel-sim
//!
//! # Architecture
//! Each registered service gets one [`ServiceContext`] for the lifetime of
//! the runtime. Its state moves `Stopped -> Starting -> Running -> Stopping
//! -> Stopped` and only ever under the context's own lock, so at most one
//! instance of a service is live at any time.
//!
//! # Testing Strategy
//! - Unit tests: lifecycle edges, registration rules, start refusal
//! - Integration tests: concurrent start/stop races

mod context;
mod error;
mod runtime;

pub use context::{
    Service, ServiceContext, ServiceFactory, ServiceManifest, ServicePaths, ServiceState,
};
pub use error::{Result, ServiceError};
pub use runtime::{is_valid_service_id, ServiceRuntime, DEFAULT_LOCK_TIMEOUT};
