//! Error types for model and schema handling.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur when working with schema metadata and records.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A model name was not found in the namespace.
    #[error("model not found: {name}")]
    ModelNotFound {
        /// Name of the missing model.
        name: String,
    },

    /// A namespace was not found in the schema.
    #[error("namespace not found: {name}")]
    NamespaceNotFound {
        /// Name of the missing namespace.
        name: String,
    },

    /// A record is missing one of its declared key fields.
    #[error("record for model {model} is missing key field {field}")]
    MissingKeyField {
        /// The model whose key is incomplete.
        model: String,
        /// The missing key field.
        field: String,
    },

    /// The relationship graph contains a cycle.
    #[error("cyclic model dependency involving {model}")]
    CyclicDependency {
        /// A model on the cycle.
        model: String,
    },

    /// A record payload could not be interpreted.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the problem.
        message: String,
    },
}

impl ModelError {
    /// Creates a model-not-found error.
    pub fn model_not_found(name: impl Into<String>) -> Self {
        Self::ModelNotFound { name: name.into() }
    }

    /// Creates an invalid-record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }
}
