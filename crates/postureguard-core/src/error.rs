//! Core error types for postureguard-core.
//!
//! Session control errors are never fatal: every variant of [`SessionError`]
//! leaves the coordinator in a well-defined state and is reported to the
//! caller of the operation that detected it.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for postureguard-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Session control errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Errors reported by the session timer, state machine and coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// `start` was called while a session is running or paused.
    #[error("a session is already active")]
    SessionAlreadyActive,

    /// A duration or threshold was zero or otherwise unusable.
    #[error("invalid configuration for '{key}': {message}")]
    InvalidConfiguration { key: String, message: String },

    /// The requested action is not allowed from the current state.
    #[error("cannot {action} while {state}")]
    InvalidTransition { state: String, action: String },

    /// The classification producer cannot deliver postures.
    #[error("posture classification unavailable: {0}")]
    ClassificationUnavailable(String),
}

impl SessionError {
    pub(crate) fn invalid_transition(state: impl Into<String>, action: impl Into<String>) -> Self {
        SessionError::InvalidTransition {
            state: state.into(),
            action: action.into(),
        }
    }

    pub(crate) fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        SessionError::InvalidConfiguration {
            key: key.into(),
            message: message.into(),
        }
    }
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

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Stored row could not be decoded
    #[error("Corrupt row in '{table}': {message}")]
    CorruptRow { table: String, message: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Data directory could not be resolved or created
    #[error("Cannot prepare data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
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
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_render_reason() {
        let err = SessionError::invalid_transition("idle", "pause");
        assert_eq!(err.to_string(), "cannot pause while idle");

        let err = SessionError::invalid_config("warning_threshold_secs", "must be positive");
        assert_eq!(
            err.to_string(),
            "invalid configuration for 'warning_threshold_secs': must be positive"
        );
    }

    #[test]
    fn session_error_converts_into_core_error() {
        let core: CoreError = SessionError::SessionAlreadyActive.into();
        assert!(matches!(core, CoreError::Session(SessionError::SessionAlreadyActive)));
    }

    #[test]
    fn locked_sqlite_maps_to_locked() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        // Only SQLITE_LOCKED is reported as Locked; a busy database is a query failure.
        assert!(matches!(DatabaseError::from(err), DatabaseError::QueryFailed(_)));

        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            None,
        );
        assert!(matches!(DatabaseError::from(err), DatabaseError::Locked));
    }
}
