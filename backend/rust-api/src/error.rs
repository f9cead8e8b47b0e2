//! Error types shared by the attempt, quota, rank and gateway services.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::attempt::AttemptStatus;

/// Result type alias for arena operations
pub type Result<T> = std::result::Result<T, ArenaError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArenaError {
    /// Another writer already holds the in-progress slot for this user and quiz.
    #[error("An in-progress attempt already exists for user {user_id} and quiz {quiz_id}")]
    Conflict { user_id: String, quiz_id: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Attempt {session_id} is {status}, expected {expected}")]
    InvalidState {
        session_id: String,
        status: AttemptStatus,
        expected: AttemptStatus,
    },

    /// A transition or event that the room state machine does not allow.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Quota exhausted for {resource}, resets at {reset_at}")]
    QuotaExceeded {
        resource: String,
        reset_at: DateTime<Utc>,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl ArenaError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ArenaError::NotFound(what.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ArenaError::Validation(message.into())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        ArenaError::StorageUnavailable(err.to_string())
    }

    /// Errors that indicate a state race rather than a caller mistake.
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            ArenaError::InvalidState { .. } | ArenaError::InvalidTransition(_)
        )
    }
}

impl From<mongodb::error::Error> for ArenaError {
    fn from(err: mongodb::error::Error) -> Self {
        ArenaError::StorageUnavailable(format!("MongoDB error: {}", err))
    }
}

impl From<redis::RedisError> for ArenaError {
    fn from(err: redis::RedisError) -> Self {
        ArenaError::StorageUnavailable(format!("Redis error: {}", err))
    }
}

impl From<validator::ValidationErrors> for ArenaError {
    fn from(err: validator::ValidationErrors) -> Self {
        ArenaError::Validation(err.to_string())
    }
}
