//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The physical store could not be initialized.
    #[error("storage initialization failed: {message}")]
    InitializationFailed {
        /// Description of the failure.
        message: String,
    },

    /// The adapter was used before `set_up` completed.
    #[error("storage adapter is not initialized")]
    NotInitialized,

    /// A store name was not declared at initialization.
    #[error("store not found: {store}")]
    StoreNotFound {
        /// The unknown store.
        store: String,
    },

    /// A conditional write found a persisted value that does not match
    /// the supplied condition. Nothing was written.
    #[error("condition check failed for {model} record {id}")]
    ConditionCheckFailed {
        /// Model of the gated record.
        model: String,
        /// Identity of the gated record.
        id: String,
    },

    /// Schema metadata was inconsistent with the operation.
    #[error(transparent)]
    Model(#[from] driftstore_model::ModelError),

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl StorageError {
    /// Creates an initialization failure.
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a condition-check failure.
    pub fn condition_check_failed(model: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ConditionCheckFailed {
            model: model.into(),
            id: id.into(),
        }
    }
}
