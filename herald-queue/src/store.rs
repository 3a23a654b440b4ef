//! Persistence trait for queue backends.

use async_trait::async_trait;
use herald_common::JobId;

use crate::{QueueError, job::Job};

/// Backing store for job records.
///
/// The queue writes every job state change through to its store and reloads
/// surviving records on startup. Implementations own their connection
/// lifecycle: callers `connect` before first use and `close` on shutdown;
/// the handle is injected wherever it is needed, never held as a global.
#[async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// Open the backend (create directories, establish connections).
    async fn connect(&self) -> Result<(), QueueError>;

    /// Flush and release the backend.
    async fn close(&self) -> Result<(), QueueError>;

    /// Insert or replace one job record.
    async fn put(&self, job: &Job) -> Result<(), QueueError>;

    /// Remove one job record. Removing an absent record is a no-op, so
    /// best-effort cleanup paths can call this blindly.
    async fn delete(&self, id: JobId) -> Result<(), QueueError>;

    /// Load every persisted job record.
    async fn load_all(&self) -> Result<Vec<Job>, QueueError>;

    /// Cheap connectivity probe for health reporting.
    async fn ping(&self) -> Result<(), QueueError>;
}
