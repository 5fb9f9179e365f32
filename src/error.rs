//! Error types for the dialogue engine.
//!
//! All errors are strongly typed using thiserror so callers can
//! distinguish a malformed command from a failing backend.
//!
//! "No match" is deliberately absent: a trigger that selects nothing
//! returns `Ok(None)`, and a search that finds nothing renders a message.

use thiserror::Error;

use crate::dialogue::DialogueId;
use crate::storage::StorageError;

/// Validation errors raised while checking edit arguments or configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Probability {value} is out of range [0.0, 1.0]")]
    ProbabilityOutOfRange {
        value: f64,
    },

    #[error("Minute of day {value} is out of range [0, 1440)")]
    MinuteOutOfRange {
        value: u16,
    },

    #[error("Invalid regular expression '{pattern}': {reason}")]
    InvalidRegex {
        pattern: String,
        reason: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Question cannot be empty after normalization")]
    EmptyQuestion,

    #[error("No target dialogue was given")]
    NoTarget,

    #[error("Dialogue {id} cannot be its own predecessor")]
    SelfPredecessor {
        id: DialogueId,
    },

    #[error("Page {page} is out of range (1..={pages})")]
    PageOutOfRange {
        page: usize,
        pages: usize,
    },

    #[error("Field '{field}' does not accept this kind of value")]
    FieldTypeMismatch {
        field: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors raised while running an operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Cannot merge into dirty field '{field}'")]
    DirtyMerge {
        field: String,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Queue full: {path} (capacity {capacity})")]
    QueueFull {
        path: String,
        capacity: usize,
    },

    #[error("Timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Sub-invocation '{command}' failed: {reason}")]
    Invocation {
        command: String,
        reason: String,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum TeachError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Permission denied: {reason}")]
    PermissionDenied {
        reason: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl TeachError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a command-level permission error.
    #[must_use]
    pub fn permission(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is a permission error.
    #[must_use]
    pub const fn is_permission(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// Returns true if the error should be shown to the operator verbatim.
    ///
    /// Backend and internal failures are reported generically instead.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::PermissionDenied { .. })
    }
}

/// Result type alias for engine operations.
pub type TeachResult<T> = Result<T, TeachError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_probability() {
        let err = ValidationError::ProbabilityOutOfRange { value: 1.5 };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn test_validation_error_regex() {
        let err = ValidationError::InvalidRegex {
            pattern: "(".to_string(),
            reason: "unclosed group".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("'('"));
        assert!(msg.contains("unclosed group"));
    }

    #[test]
    fn test_execution_error_dirty_merge() {
        let err = ExecutionError::DirtyMerge {
            field: "answer".to_string(),
        };
        assert!(err.to_string().contains("answer"));
    }

    #[test]
    fn test_teach_error_from_validation() {
        let err: TeachError = ValidationError::NoTarget.into();
        assert!(err.is_validation());
        assert!(err.is_user_facing());
        assert!(!err.is_storage());
    }

    #[test]
    fn test_teach_error_from_storage() {
        let err: TeachError = StorageError::BackendError("disk full".to_string()).into();
        assert!(err.is_storage());
        assert!(!err.is_user_facing());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_teach_error_permission_and_internal() {
        let err = TeachError::permission("writer option");
        assert!(err.is_permission());
        assert!(err.is_user_facing());

        let err = TeachError::internal("unexpected state");
        assert!(!err.is_user_facing());
        assert!(err.to_string().contains("unexpected state"));
    }
}
