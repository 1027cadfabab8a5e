//! Common error types for VeilVault.

use std::time::Duration;

use thiserror::Error;

/// Top-level error type for VeilVault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The cipher engine has not been started yet.
    #[error("Cipher engine is not ready")]
    EngineNotReady,

    /// Key derivation or cipher construction failed.
    #[error("Cipher setup failed: {0}")]
    CipherSetupFailed(String),

    /// An operation did not complete within its bounded wait.
    #[error("Operation '{operation}' timed out after {timeout:?}")]
    OperationTimeout {
        operation: String,
        timeout: Duration,
    },

    /// The cipher engine was shut down while the request was pending.
    #[error("Cipher engine terminated")]
    EngineTerminated,

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// A remote path could not be resolved.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// A chunked upload was aborted.
    #[error("Upload failed after {acknowledged} acknowledged bytes: {reason}")]
    UploadFailed { acknowledged: u64, reason: String },

    /// The remote provider rejected a request or could not be reached.
    #[error("Provider request failed: {0}")]
    ProviderRequestFailed(String),

    /// Missing or expired credentials.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// No task with the given id is known to the queue.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Only queued tasks can be cancelled.
    #[error("Task {id} cannot be cancelled while {status}")]
    TaskNotCancellable { id: String, status: String },

    /// Only failed tasks can be retried.
    #[error("Task {id} cannot be retried while {status}")]
    TaskNotRetryable { id: String, status: String },

    /// A task action panicked instead of returning.
    #[error("Task action panicked: {0}")]
    TaskPanicked(String),

    /// Processing tasks cannot be deleted.
    #[error("Task {id} cannot be deleted while {status}")]
    TaskNotDeletable { id: String, status: String },

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
