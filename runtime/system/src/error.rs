use keel_app::{LaunchError, ManifestError};
use keel_hal::HalError;
use keel_service::ServiceError;
use keel_sync::ErrorKind;
use thiserror::Error;

/// Errors surfaced by booting and driving a system
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SystemError {
    #[error("HAL error: {0}")]
    Hal(#[from] HalError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SystemError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SystemError::Hal(e) => e.kind(),
            SystemError::Manifest(e) => e.kind(),
            SystemError::Launch(e) => e.kind(),
            SystemError::Service(e) => e.kind(),
            SystemError::Config(_) => ErrorKind::Validation,
        }
    }
}

pub type Result<T> = core::result::Result<T, SystemError>;
