use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{IssueStatus, TransitionKind, UserRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    InvalidTransition,
    MissingEvidence,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Rejections raised by the issue workflow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("cannot {action} an issue in status {from}")]
    InvalidTransition {
        from: IssueStatus,
        action: TransitionKind,
    },
    #[error("an after photo is required to submit for review")]
    MissingEvidence,
    #[error("role {} may not {action}", role.as_str())]
    Forbidden {
        role: UserRole,
        action: TransitionKind,
    },
}

impl LifecycleError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LifecycleError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            LifecycleError::MissingEvidence => ErrorCode::MissingEvidence,
            LifecycleError::Forbidden { .. } => ErrorCode::Forbidden,
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(value: LifecycleError) -> Self {
        Self {
            code: value.code(),
            message: value.to_string(),
        }
    }
}
