use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    CaseAlreadyActive,
    NoActiveCase,
    InvalidTransition,
    CollaboratorFailure,
    TimerLeak,
    SessionClosed,
}

impl ErrorCode {
    /// Whether the caller may retry the same operation on the same case.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::CollaboratorFailure)
    }
}

/// Failure reported by one of the external services the workflow calls.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum CollaboratorError {
    #[error("classification unavailable: {0}")]
    ClassificationUnavailable(String),
    #[error("no facility available: {0}")]
    NoFacilityAvailable(String),
    #[error("dispatch unavailable: {0}")]
    DispatchUnavailable(String),
    #[error("telephony session unavailable: {0}")]
    SessionUnavailable(String),
}

impl CollaboratorError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::CollaboratorFailure
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorReport {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}
