//! Error status shared across the wire
//!
//! Every externally visible failure carries a stable [`ErrorCode`] so clients
//! can tell "retry later" apart from "fix your request".

use serde::{Deserialize, Serialize};

/// Stable error kind, modelled on gRPC status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    PermissionDenied,
    Unauthenticated,
    Aborted,
    Cancelled,
    DeadlineExceeded,
    Unavailable,
    Internal,
    Unknown,
}

impl ErrorCode {
    /// Whether a caller may reasonably retry the same request later
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::Aborted | ErrorCode::Unavailable | ErrorCode::DeadlineExceeded
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::FailedPrecondition => "failed_precondition",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::Aborted => "aborted",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::DeadlineExceeded => "deadline_exceeded",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::Internal => "internal",
            ErrorCode::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A failure with its code, as recorded on a job or sent on a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStatus {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorStatus {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_codes() {
        assert!(ErrorCode::Unavailable.is_retryable());
        assert!(ErrorCode::Aborted.is_retryable());
        assert!(!ErrorCode::InvalidArgument.is_retryable());
        assert!(!ErrorCode::PermissionDenied.is_retryable());
    }

    #[test]
    fn test_status_display() {
        let status = ErrorStatus::new(ErrorCode::NotFound, "job missing");
        assert_eq!(status.to_string(), "not_found: job missing");
    }
}
