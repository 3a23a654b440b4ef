//! Durable job queue.
//!
//! The queue is the single source of truth for *what to run next*: one job
//! per recipient, paced by `not_before`, drained by the worker pool under
//! at-least-once semantics. Job records are written through to a pluggable
//! [`QueueStore`] backend so a restart restores the queue (demoting jobs
//! that were mid-flight back to waiting).

pub mod backends;
pub mod error;
pub mod job;
pub mod queue;
pub mod store;

pub use backends::{FileQueueStore, MemoryQueueStore};
pub use error::QueueError;
pub use job::{Job, JobState};
pub use queue::{JobCounts, JobQueue};
pub use store::QueueStore;
