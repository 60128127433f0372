//! Keel App - Manifests, manifest registry and app lifecycle
//!
//! # Purpose
//! Everything between "an app exists" and "an app is running":
//! - [`AppManifest`] / [`AppDescriptor`]: app metadata, built in code or
//!   parsed from an installed app's `manifest.properties`
//! - [`ManifestRegistry`]: the set of launchable apps
//! - [`AppRuntime`]: launches apps on their own threads and drives them
//!   through `Launching -> Running -> Stopping -> Stopped`
//!
//! # Integration Points
//! - Depends on: keel-sync (locks), keel-hal (capability checks and
//!   subscriptions), keel-paths (app directories)
//! - Provides to: keel-system, keel-sim
//!
//! # Architecture
//! A launch is refused before any thread exists when a required capability
//! is missing. Running apps hold a [`keel_hal::Subscription`] for every
//! capability they use; the runtime releases them all once the app's
//! `on_destroy` returns. Results travel in a [`Bundle`] and can be taken
//! exactly once.
//!
//! # Testing Strategy
//! - Unit tests: id rules, descriptor parsing, registry invariants, state
//!   transitions
//! - Integration tests: full launches against simulated boards

mod app;
pub mod bundle;
mod error;
mod manifest;
mod properties;
mod registry;
mod runtime;

pub use app::{App, AppContext};
pub use bundle::{Bundle, Value};
pub use error::{LaunchError, LaunchResult, ManifestError, ManifestResult};
pub use manifest::{
    is_valid_id, AppCategory, AppDescriptor, AppFlags, AppLocation, AppManifest, EntryPoint,
    MAX_ID_LEN, MIN_ID_LEN,
};
pub use properties::{load_properties, parse_properties};
pub use registry::{EntryResolver, ManifestRegistry, DESCRIPTOR_FILE};
pub use runtime::{AppRuntime, LaunchId, LaunchInfo, LaunchState, LoaderEvent, DEFAULT_LOCK_TIMEOUT};
