//! Error types for queue operations.

use herald_common::JobId;
use thiserror::Error;

use crate::job::JobState;

/// Errors returned by the queue and its persistence backends.
#[derive(Debug, Error)]
pub enum QueueError {
    /// I/O against the backing store failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Job record could not be encoded for persistence.
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Persisted job record could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Job is not in the queue.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// Administrative cleaning only applies to terminal job states.
    #[error("cannot clean jobs in non-terminal state {0}")]
    NotTerminal(JobState),

    /// The backing store cannot be reached. Health reporting turns
    /// unhealthy; enqueue operations fail fast.
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),

    /// Other internal errors.
    #[error("internal queue error: {0}")]
    Internal(String),
}
