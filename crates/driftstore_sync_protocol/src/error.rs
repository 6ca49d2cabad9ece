//! Protocol-level errors.

use thiserror::Error;

/// Result alias for protocol conversions.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised when converting between wire/persisted forms and
/// typed protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A persisted or received value did not have the expected shape.
    #[error("malformed protocol value: {reason}")]
    Malformed {
        /// What was wrong.
        reason: String,
    },

    /// Underlying JSON (de)serialization failure.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates a malformed-value error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}
