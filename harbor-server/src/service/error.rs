//! Service error type
//!
//! Every variant carries a stable [`ErrorCode`] so callers can tell "retry
//! later" apart from "fix your request".

use harbor_core::domain::status::{ErrorCode, ErrorStatus};

use crate::logstream::LogStreamError;
use crate::state::StateError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Aborted(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            ServiceError::NotFound(_) => ErrorCode::NotFound,
            ServiceError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            ServiceError::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            ServiceError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            ServiceError::Unauthenticated(_) => ErrorCode::Unauthenticated,
            ServiceError::Aborted(_) => ErrorCode::Aborted,
            ServiceError::Cancelled => ErrorCode::Cancelled,
            ServiceError::Unavailable(_) => ErrorCode::Unavailable,
            ServiceError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn to_status(&self) -> ErrorStatus {
        ErrorStatus::new(self.code(), self.to_string())
    }
}

impl From<StateError> for ServiceError {
    fn from(err: StateError) -> Self {
        let message = err.to_string();
        match err {
            StateError::NotFound { .. } => ServiceError::NotFound(message),
            StateError::AlreadyExists { .. } => ServiceError::AlreadyExists(message),
            StateError::InvalidState(_) => ServiceError::FailedPrecondition(message),
            StateError::InvalidArgument(_) => ServiceError::InvalidArgument(message),
            StateError::Cancelled => ServiceError::Cancelled,
        }
    }
}

impl From<LogStreamError> for ServiceError {
    fn from(err: LogStreamError) -> Self {
        ServiceError::Unavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
