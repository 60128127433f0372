use core::time::Duration;

use keel_hal::Capabilities;
use keel_sync::{ErrorKind, LockError};
use thiserror::Error;

use crate::LaunchId;

/// Manifest validation and registry errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Invalid app id: {id:?}")]
    InvalidId { id: String },

    #[error("App already registered: {id}")]
    DuplicateId { id: String },

    #[error("Missing descriptor field: {field}")]
    MissingField { field: String },

    #[error("Invalid descriptor field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("App not registered: {id}")]
    NotFound { id: String },

    #[error("I/O error: {0}")]
    Io(String),
}

impl ManifestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManifestError::InvalidId { .. }
            | ManifestError::MissingField { .. }
            | ManifestError::InvalidField { .. } => ErrorKind::Validation,
            ManifestError::DuplicateId { .. } => ErrorKind::Conflict,
            ManifestError::NotFound { .. } => ErrorKind::NotFound,
            ManifestError::Io(_) => ErrorKind::ResourceUnavailable,
        }
    }

    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ManifestError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for ManifestError {
    fn from(e: std::io::Error) -> Self {
        ManifestError::Io(e.to_string())
    }
}

/// App lifecycle errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("System has not finished booting")]
    NotBooted,

    #[error("Unknown app: {id}")]
    UnknownApp { id: String },

    #[error("App {app} requires unavailable capabilities {missing:?}")]
    MissingCapability { app: String, missing: Capabilities },

    #[error("App {app} is already running")]
    AlreadyRunning { app: String },

    #[error("Unknown launch: {launch}")]
    UnknownLaunch { launch: LaunchId },

    #[error("No result for launch {launch}")]
    NoResult { launch: LaunchId },

    #[error("Failed to spawn thread for app {app}")]
    SpawnFailed { app: String },

    #[error("Timed out after {waited:?}")]
    LockTimeout { waited: Duration },
}

impl LaunchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LaunchError::NotBooted
            | LaunchError::MissingCapability { .. }
            | LaunchError::SpawnFailed { .. } => ErrorKind::ResourceUnavailable,
            LaunchError::UnknownApp { .. }
            | LaunchError::UnknownLaunch { .. }
            | LaunchError::NoResult { .. } => ErrorKind::NotFound,
            LaunchError::AlreadyRunning { .. } => ErrorKind::Conflict,
            LaunchError::LockTimeout { .. } => ErrorKind::Timeout,
        }
    }
}

impl From<LockError> for LaunchError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Timeout { waited } => LaunchError::LockTimeout { waited },
            LockError::WouldBlock => LaunchError::LockTimeout {
                waited: Duration::ZERO,
            },
        }
    }
}

pub type ManifestResult<T> = core::result::Result<T, ManifestError>;
pub type LaunchResult<T> = core::result::Result<T, LaunchError>;
