//! Error taxonomy shared across the runtime

use core::time::Duration;
use thiserror::Error;

/// Coarse classification of every error the runtime reports
///
/// Each crate's error enum maps onto one of these through its `kind()`
/// method, so callers can decide between retrying, degrading and giving up
/// without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad id or descriptor, rejected before any state change
    Validation,
    /// Unknown app, service, launch or capability
    NotFound,
    /// Duplicate id or already-running instance
    Conflict,
    /// Missing capability or hardware
    ResourceUnavailable,
    /// Lock acquisition timed out
    Timeout,
    /// Programming error (double release, blocking in a critical section)
    FatalMisuse,
}

/// Lock acquisition errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock acquisition timed out after {waited:?}")]
    Timeout { waited: Duration },

    #[error("Lock is held by another thread")]
    WouldBlock,
}

impl LockError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Timeout
    }
}
