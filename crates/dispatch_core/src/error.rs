use shared::{
    domain::{CaseId, Stage},
    error::{CollaboratorError, ErrorCode, ErrorReport},
};
use thiserror::Error;

use crate::timer::TimerHandle;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("symptom text must not be empty")]
    InvalidInput,
    #[error("case {0} is already active for this session")]
    CaseAlreadyActive(CaseId),
    #[error("no active case")]
    NoActiveCase,
    #[error("{operation} is not allowed during stage {stage:?}")]
    InvalidTransition {
        stage: Stage,
        operation: &'static str,
    },
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error("{handle} fired for case {case_id} after it was released")]
    TimerLeak { case_id: CaseId, handle: TimerHandle },
    #[error("dispatch session is closed")]
    SessionClosed,
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::InvalidInput => ErrorCode::InvalidInput,
            DispatchError::CaseAlreadyActive(_) => ErrorCode::CaseAlreadyActive,
            DispatchError::NoActiveCase => ErrorCode::NoActiveCase,
            DispatchError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            DispatchError::Collaborator(_) => ErrorCode::CollaboratorFailure,
            DispatchError::TimerLeak { .. } => ErrorCode::TimerLeak,
            DispatchError::SessionClosed => ErrorCode::SessionClosed,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.code(), self.to_string())
    }
}
