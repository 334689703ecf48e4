//! Shared Error Types
//!
//! Errors raised while building or decoding domain payloads. These are
//! independent of where the payload came from (the local store, the remote
//! API, or a caller building a mutation).
//!
//! # Error Categories
//!
//! - `SerializationError` - JSON serialization/deserialization failures
//! - `ValidationError` - Payload validation failures (e.g. missing `id`)
//! - `UnknownCollection` - A table name that maps to no known collection
//!
//! # Usage
//!
//! ```rust
//! use eventsync::shared::error::SharedError;
//!
//! let error = SharedError::validation("id", "update payload must carry the target id");
//! ```
use thiserror::Error;

/// Errors raised while handling domain payloads
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SharedError {
    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
    },

    /// Payload validation error
    #[error("Validation error in field '{field}': {message}")]
    ValidationError {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// Table name with no matching collection
    #[error("Unknown collection: {name}")]
    UnknownCollection {
        /// The name as given by the caller
        name: String,
    },
}

impl SharedError {
    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new unknown-collection error
    pub fn unknown_collection(name: impl Into<String>) -> Self {
        Self::UnknownCollection { name: name.into() }
    }
}

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}
