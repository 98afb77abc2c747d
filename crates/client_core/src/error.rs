//! Error taxonomy for the workflow core.

use std::fmt;

use shared::error::ProtocolError;
use thiserror::Error;

use crate::{history::ValidationError, stages::StageKind, workflow::WorkflowPhase};

/// Failure of a single request/response exchange with the collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The request never produced a response (connect failure, timeout, bad URL).
    #[error("transport error: {0}")]
    Transport(String),
    /// The collaborator answered with a failure status.
    #[error("{message}")]
    Remote { status: u16, message: String },
    /// The collaborator answered with success but the body breaks the contract.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<ProtocolError> for GatewayError {
    fn from(value: ProtocolError) -> Self {
        GatewayError::Malformed(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Remote,
    Validation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transport => f.write_str("transport"),
            ErrorCategory::Remote => f.write_str("remote"),
            ErrorCategory::Validation => f.write_str("validation"),
        }
    }
}

/// Non-fatal error attached to the stage whose operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageError {
    stage: StageKind,
    category: ErrorCategory,
    message: String,
}

impl StageError {
    pub fn new(stage: StageKind, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            stage,
            category,
            message: message.into(),
        }
    }

    pub fn from_gateway(stage: StageKind, err: &GatewayError) -> Self {
        let category = match err {
            GatewayError::Transport(_) => ErrorCategory::Transport,
            GatewayError::Remote { .. } | GatewayError::Malformed(_) => ErrorCategory::Remote,
        };
        let message = match err {
            GatewayError::Transport(text) if text.trim().is_empty() => {
                stage.fallback_message().to_string()
            }
            GatewayError::Transport(text) => text.clone(),
            other => other.to_string(),
        };
        Self::new(stage, category, message)
    }

    pub fn from_validation(stage: StageKind, err: &ValidationError) -> Self {
        Self::new(stage, ErrorCategory::Validation, err.to_string())
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed ({}): {}", self.stage, self.category, self.message)
    }
}

/// A request rejected before any remote call was issued. State is unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{0} already has an operation in flight")]
    StageBusy(StageKind),
    #[error("cannot {action} while {phase}")]
    InvalidPhase {
        action: &'static str,
        phase: WorkflowPhase,
    },
    #[error("invalid dataset file: {0}")]
    InvalidFile(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
