//! Keel Sync - Locking primitives shared by every Keel crate
//!
//! # Purpose
//! Provides the two primitives the lifecycle runtimes build on:
//! - [`Lock`] / [`ScopedLock`]: a recursive mutex with timed acquisition and
//!   guaranteed release when the guard leaves scope
//! - [`critical`]: interrupt-masking critical sections with explicit nesting
//!   tokens, safe to enter from interrupt context
//!
//! # Integration Points
//! - Depends on: `critical-section` (board or host implementation)
//! - Provides to: keel-hal, keel-app, keel-service, keel-system
//!
//! # Architecture
//! `Lock` is always recursive: the owning thread may re-acquire it and only
//! the outermost release frees it. Misuse that cannot be reported through a
//! `Result` (double release, release from a foreign thread, blocking inside a
//! critical section) goes through [`misuse::fatal`].
//!
//! # Testing Strategy
//! - Unit tests: recursion depth, timeouts, guard release on error paths
//! - Integration tests: cross-thread hand-off, nested critical sections
//! - Benchmarks: uncontended acquire/release

pub mod critical;
mod error;
pub mod lock;
pub mod misuse;

pub use critical::{CriticalToken, IsrGuard};
pub use error::{ErrorKind, LockError};
pub use lock::{Lock, ScopedLock, WAIT_FOREVER};

pub type Result<T> = core::result::Result<T, LockError>;
