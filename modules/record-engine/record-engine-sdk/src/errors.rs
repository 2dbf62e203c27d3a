//! Error types for the record engine.

use std::fmt;

use thiserror::Error;

/// Stable classification of a [`RecordEngineError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Forbidden,
    NotFound,
    Conflict,
    StateMachine,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::StateMachine => "state_machine",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`RecordEngineClient`](crate::RecordEngineClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordEngineError {
    /// Payload or query rejected before reaching storage.
    #[error("validation error on field '{field}': {message}")]
    Validation { field: String, message: String },

    /// The caller may not perform the operation or see its result.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The record does not exist or is hidden from the caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique constraint or concurrent state change prevented the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested transition is not available from the current state.
    #[error("{message}")]
    StateMachine {
        message: String,
        valid_triggers: Vec<String>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl RecordEngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::Forbidden(detail.into())
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound(detail.into())
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::Conflict(detail.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::StateMachine { .. } => ErrorKind::StateMachine,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Human-readable detail without the kind prefix.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Validation { message, .. } | Self::StateMachine { message, .. } => message,
            Self::Forbidden(d) | Self::NotFound(d) | Self::Conflict(d) | Self::Internal(d) => d,
        }
    }
}
