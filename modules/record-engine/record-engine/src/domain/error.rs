//! Domain errors for the record engine.

use record_engine_sdk::RecordEngineError;
use recordkit_db::DbError;

/// Errors raised while serving a record operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DomainError {
    #[error("validation error on field '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{message}")]
    StateMachine {
        message: String,
        valid_triggers: Vec<String>,
    },

    #[error("database error: {0}")]
    Database(DbError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Write attempt on a field the caller may not set.
    pub fn protected(field: &str) -> Self {
        Self::validation(field, format!("Field {field} is protected"))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<DbError> for DomainError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Conflict { field, .. } => {
                Self::Conflict(format!("Duplicate value for unique field '{field}'"))
            }
            other => Self::Database(other),
        }
    }
}

impl From<DomainError> for RecordEngineError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation { field, message } => Self::validation(field, message),
            DomainError::Forbidden(m) => Self::forbidden(m),
            DomainError::NotFound(m) => Self::not_found(m),
            DomainError::Conflict(m) => Self::conflict(m),
            DomainError::StateMachine {
                message,
                valid_triggers,
            } => Self::StateMachine {
                message,
                valid_triggers,
            },
            DomainError::Database(_) => Self::internal("storage failure"),
            DomainError::Internal(m) => Self::internal(m),
        }
    }
}

/// Errors raised while loading configuration or compiling models.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),

    #[error("invalid model directory '{path}': {message}")]
    ModelDirectory { path: String, message: String },

    #[error("model '{model}': {message}")]
    Model { model: String, message: String },

    #[error("object store '{store}': {message}")]
    ObjectStore { store: String, message: String },

    #[error("database '{database}': {message}")]
    Database { database: String, message: String },

    #[error("encryption key '{key}': {message}")]
    Encryption { key: String, message: String },

    #[error("unknown {kind} plugin '{name}'")]
    UnknownPlugin { kind: &'static str, name: String },

    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("storage initialisation failed: {0}")]
    Storage(#[from] DbError),
}

impl ConfigError {
    pub fn model(model: &str, message: impl Into<String>) -> Self {
        Self::Model {
            model: model.to_owned(),
            message: message.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Load(Box::new(e))
    }
}
