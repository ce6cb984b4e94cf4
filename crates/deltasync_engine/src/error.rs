//! Error types for the delta engine.

use deltasync_consistency::ConsistencyError;
use deltasync_protocol::CodecError;
use deltasync_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while queueing or flushing deltas.
#[derive(Error, Debug)]
pub enum SyncError {
    /// An executor failed to deliver a batch.
    #[error("executor {executor} failed: {message}")]
    Executor {
        /// Name of the executor.
        executor: String,
        /// Error message.
        message: String,
        /// Whether the batch can be retried on a later flush.
        retryable: bool,
    },

    /// Persisting the queue failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A delta could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A consistency wait ended without its condition being met.
    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),
}

impl SyncError {
    /// Creates a retryable executor error.
    pub fn executor_retryable(executor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Executor {
            executor: executor.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable executor error.
    pub fn executor_fatal(executor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Executor {
            executor: executor.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Executor { retryable, .. } => *retryable,
            SyncError::Storage(_) => true,
            SyncError::Consistency(ConsistencyError::Timeout { .. }) => true,
            _ => false,
        }
    }
}
