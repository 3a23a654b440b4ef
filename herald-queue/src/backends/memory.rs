//! In-memory queue backend.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use herald_common::JobId;
use parking_lot::RwLock;

use crate::{QueueError, job::Job, store::QueueStore};

/// Job records in a `HashMap` behind an `RwLock`.
///
/// Primarily for tests and embedded deployments; nothing survives a
/// process restart. The store can be flipped unavailable to simulate a
/// broker outage in health and failure-path tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryQueueStore {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryQueueStore {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a broker outage: subsequent operations fail with
    /// [`QueueError::Unavailable`] until flipped back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(QueueError::Unavailable(
                "memory backend marked unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Number of persisted records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    /// Whether no records are persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn connect(&self) -> Result<(), QueueError> {
        self.check_available()
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn put(&self, job: &Job) -> Result<(), QueueError> {
        self.check_available()?;
        self.jobs.write().insert(job.id, job.clone());
        Ok(())
    }

    async fn delete(&self, id: JobId) -> Result<(), QueueError> {
        self.check_available()?;
        self.jobs.write().remove(&id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Job>, QueueError> {
        self.check_available()?;
        let mut jobs: Vec<_> = self.jobs.read().values().cloned().collect();
        // Job ids are ULIDs, so this is creation order.
        jobs.sort_by_key(|job| job.id);
        Ok(jobs)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.check_available()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use herald_common::{CampaignId, JobPriority, RecipientId};

    use super::*;

    fn job() -> Job {
        Job::new(
            CampaignId::generate(),
            RecipientId::generate(),
            "primary".into(),
            "subject",
            "body",
            JobPriority::Normal,
            0,
        )
    }

    #[tokio::test]
    async fn put_delete_round_trip() {
        let store = MemoryQueueStore::new();
        let job = job();

        store.put(&job).await.unwrap();
        assert_eq!(store.len(), 1);

        store.delete(job.id).await.unwrap();
        assert!(store.is_empty());

        // Deleting an absent record stays a no-op.
        store.delete(job.id).await.unwrap();
    }

    #[tokio::test]
    async fn outage_simulation() {
        let store = MemoryQueueStore::new();
        store.set_unavailable(true);

        assert!(matches!(
            store.ping().await,
            Err(QueueError::Unavailable(_))
        ));
        assert!(matches!(
            store.put(&job()).await,
            Err(QueueError::Unavailable(_))
        ));

        store.set_unavailable(false);
        store.ping().await.unwrap();
    }
}
