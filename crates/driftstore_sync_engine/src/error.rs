//! Error types for the sync engine.

use driftstore_sync_protocol::MutationErrorKind;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote rejected or failed a mutation.
    #[error("mutation rejected ({kind:?}): {message}")]
    Mutation {
        /// Rejection classification.
        kind: MutationErrorKind,
        /// Error message from the remote.
        message: String,
    },

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] driftstore_storage::StorageError),

    /// Schema metadata error.
    #[error("model error: {0}")]
    Model(#[from] driftstore_model::ModelError),

    /// Malformed wire or persisted protocol value.
    #[error("protocol error: {0}")]
    Protocol(#[from] driftstore_sync_protocol::ProtocolError),

    /// Not connected to the remote.
    #[error("not connected to remote")]
    NotConnected,

    /// The engine is already running.
    #[error("engine already running")]
    AlreadyRunning,

    /// The engine is not running.
    #[error("engine not running")]
    NotRunning,

    /// The operation was interrupted by shutdown.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a mutation rejection.
    pub fn mutation(kind: MutationErrorKind, message: impl Into<String>) -> Self {
        Self::Mutation {
            kind,
            message: message.into(),
        }
    }

    /// Returns true if retrying the same operation can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Mutation { kind, .. } => kind.is_retryable(),
            SyncError::NotConnected => true,
            _ => false,
        }
    }
}
