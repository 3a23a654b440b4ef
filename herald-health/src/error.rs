//! Error types for health operations.

use herald_queue::QueueError;
use thiserror::Error;

/// Errors surfaced by the health monitor's administrative operations.
#[derive(Debug, Error)]
pub enum HealthError {
    /// The underlying queue rejected the operation.
    #[error(transparent)]
    Queue(#[from] QueueError),
}
