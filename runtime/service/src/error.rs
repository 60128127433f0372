use core::time::Duration;

use keel_sync::{ErrorKind, LockError};
use thiserror::Error;

/// Service lifecycle errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("System has not finished booting")]
    NotBooted,

    #[error("Invalid service id: {id:?}")]
    InvalidId { id: String },

    #[error("Unknown service: {id}")]
    UnknownService { id: String },

    #[error("Service already registered: {id}")]
    DuplicateId { id: String },

    #[error("Service {id} is already running")]
    AlreadyRunning { id: String },

    #[error("Service {id} is not running")]
    NotRunning { id: String },

    #[error("Service {id} failed to start")]
    StartFailed { id: String },

    #[error("Timed out after {waited:?}")]
    LockTimeout { waited: Duration },
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::NotBooted | ServiceError::StartFailed { .. } => {
                ErrorKind::ResourceUnavailable
            }
            ServiceError::InvalidId { .. } => ErrorKind::Validation,
            ServiceError::UnknownService { .. } => ErrorKind::NotFound,
            ServiceError::DuplicateId { .. }
            | ServiceError::AlreadyRunning { .. }
            | ServiceError::NotRunning { .. } => ErrorKind::Conflict,
            ServiceError::LockTimeout { .. } => ErrorKind::Timeout,
        }
    }
}

impl From<LockError> for ServiceError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Timeout { waited } => ServiceError::LockTimeout { waited },
            LockError::WouldBlock => ServiceError::LockTimeout {
                waited: Duration::ZERO,
            },
        }
    }
}

pub type Result<T> = core::result::Result<T, ServiceError>;
