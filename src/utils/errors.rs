// src/utils/errors.rs
//! Error types shared by every component
//!
//! Each [`EngineError`] variant maps onto a stable [`ErrorKind`] so that
//! callers (and result slots of batch operations) can branch on the kind
//! without matching on message text.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Engine error type
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Native backend probe failed
    #[error("native backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Tool name not registered
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A known tool or a task failed while running
    #[error("execution of '{name}' failed: {cause}")]
    ExecutionFailed { name: String, cause: String },

    /// Nested tool invocation went past the depth budget
    #[error("recursion limit exceeded: depth {depth} > max {max}")]
    RecursionLimitExceeded { depth: usize, max: usize },

    /// Tool call ran past its wall-clock bound
    #[error("tool '{name}' timed out after {}ms", .after.as_millis())]
    Timeout { name: String, after: Duration },

    /// Task did not reach a terminal state in time
    #[error("task '{name}' timed out after {}ms", .after.as_millis())]
    TimedOut { name: String, after: Duration },

    /// Message text missing fields or carrying wrong types
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Embedded store cannot be opened or read
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// No pooled connection freed up within the bounded wait
    #[error("connection pool exhausted after waiting {}ms", .waited.as_millis())]
    PoolExhausted { waited: Duration },

    /// Statement rejected by the store (syntax, constraints, types)
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Stable classification of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    BackendUnavailable,
    UnknownTool,
    ExecutionFailed,
    RecursionLimitExceeded,
    Timeout,
    TimedOut,
    MalformedMessage,
    StorageUnavailable,
    PoolExhausted,
    QueryFailed,
    ConfigError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::ExecutionFailed => "execution_failed",
            ErrorKind::RecursionLimitExceeded => "recursion_limit_exceeded",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TimedOut => "timed_out",
            ErrorKind::MalformedMessage => "malformed_message",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::QueryFailed => "query_failed",
            ErrorKind::ConfigError => "config_error",
        }
    }

    /// True when the same call may succeed later without any change on the
    /// caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::PoolExhausted | ErrorKind::Timeout | ErrorKind::TimedOut
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineError {
    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            EngineError::UnknownTool(_) => ErrorKind::UnknownTool,
            EngineError::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            EngineError::RecursionLimitExceeded { .. } => ErrorKind::RecursionLimitExceeded,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::TimedOut { .. } => ErrorKind::TimedOut,
            EngineError::MalformedMessage(_) => ErrorKind::MalformedMessage,
            EngineError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            EngineError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            EngineError::QueryFailed(_) => ErrorKind::QueryFailed,
            EngineError::ConfigError(_) => ErrorKind::ConfigError,
        }
    }

    /// Shorthand for an execution failure of `name`
    pub fn execution(name: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        EngineError::ExecutionFailed {
            name: name.into(),
            cause: cause.to_string(),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    ErrorCode::CannotOpen
                        | ErrorCode::NotADatabase
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::DatabaseCorrupt
                        | ErrorCode::PermissionDenied
                        | ErrorCode::ReadOnly
                ) =>
            {
                EngineError::StorageUnavailable(err.to_string())
            }
            _ => EngineError::QueryFailed(err.to_string()),
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;
