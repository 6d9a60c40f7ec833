//! Core error types for choreboard-core.
//!
//! This module defines a comprehensive error hierarchy using thiserror
//! for better error handling and reporting across the library.

use std::path::PathBuf;
use thiserror::Error;

use crate::task::TaskStatus;

/// Core error type for choreboard-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Domain rule violations (state machine, ledger, generation)
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Recoverable domain errors.
///
/// Every failed operation leaves persisted state unchanged, so a caller
/// receiving any of these may refresh and retry.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Operation attempted from a status that does not permit it
    #[error("Invalid state: cannot {operation} an instance in status '{from}'")]
    InvalidState {
        from: TaskStatus,
        operation: &'static str,
    },

    /// Submitter does not match the instance's assignee
    #[error("Account '{submitter_id}' is not the assignee of instance '{instance_id}'")]
    NotAssignee {
        instance_id: String,
        submitter_id: String,
    },

    /// Ledger amounts must be positive integers
    #[error("Invalid ledger amount: {amount} (must be a positive integer)")]
    InvalidAmount { amount: i64 },

    /// Debit would take the balance below zero
    #[error("Insufficient balance on account '{account_id}': have {balance}, need {requested}")]
    InsufficientBalance {
        account_id: String,
        balance: i64,
        requested: i64,
    },

    /// Uniqueness violation on (definition, date) during generation
    #[error("Instance for definition '{definition_id}' on {date} already exists")]
    DuplicateGeneration { definition_id: String, date: String },

    /// Lost the race on a conditional update
    #[error("Concurrent modification of {entity} '{id}'")]
    ConcurrentModification { entity: &'static str, id: String },

    /// Referenced record does not exist
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Record with this identifier already exists
    #[error("{entity} '{id}' already exists")]
    AlreadyExists { entity: &'static str, id: String },

    /// Generation requested for a deactivated definition
    #[error("Definition '{definition_id}' is inactive")]
    InactiveDefinition { definition_id: String },

    /// Definition has an empty eligible-assignee list
    #[error("Definition '{definition_id}' has no eligible assignees")]
    NoAssignees { definition_id: String },
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be decoded into a domain type
    #[error("Corrupt record in {table}: {message}")]
    CorruptRecord { table: &'static str, message: String },

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(DatabaseError::from(err))
    }
}

/// True when the error is a SQLite uniqueness/constraint violation.
///
/// Used to turn raw constraint failures into the specific domain error the
/// violated index stands for (idempotent ledger writes, generation dedup).
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
