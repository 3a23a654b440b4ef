//! Queue management: pacing, claiming, campaign-level control.

use std::{collections::HashSet, sync::Arc, time::Duration};

use dashmap::{DashMap, DashSet};
use herald_common::{CampaignId, JobId, unix_now};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    QueueError,
    job::{Job, JobState},
    store::QueueStore,
};

/// Counts per job state, with waiting split into ready and delayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobCounts {
    /// Jobs that have not yet reached a terminal state.
    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.waiting + self.delayed + self.active
    }
}

/// The shared durable job queue.
///
/// Job records live in a lock-free concurrent map and are written through
/// to the injected [`QueueStore`]. State-change persistence after a record
/// is already in memory is best-effort: a failed write is logged and the
/// in-memory state stands, to be re-persisted on the next change.
#[derive(Debug, Clone)]
pub struct JobQueue {
    jobs: Arc<DashMap<JobId, Job>>,
    paused_campaigns: Arc<DashSet<CampaignId>>,
    store: Arc<dyn QueueStore>,
}

impl JobQueue {
    /// Create an empty queue on top of a persistence backend.
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            paused_campaigns: Arc::new(DashSet::new()),
            store,
        }
    }

    /// Reload persisted jobs after a restart.
    ///
    /// Jobs that were Active when the process died are demoted back to
    /// Waiting; their send may or may not have happened, and the worker's
    /// status re-check makes re-running them safe.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read.
    pub async fn restore(&self) -> Result<usize, QueueError> {
        let mut restored = 0;
        for mut job in self.store.load_all().await? {
            if job.state == JobState::Active {
                debug!(job_id = %job.id, "Demoting interrupted active job to waiting");
                job.state = JobState::Waiting;
                self.persist(&job).await;
            }
            self.jobs.insert(job.id, job);
            restored += 1;
        }
        Ok(restored)
    }

    /// Add one job.
    ///
    /// The record is persisted before it becomes claimable, so an enqueue
    /// that returns Ok survives a crash.
    ///
    /// # Errors
    /// Returns an error if the backend rejects the write; the job is then
    /// not queued at all.
    pub async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        self.store.put(&job).await?;
        self.jobs.insert(job.id, job);
        Ok(())
    }

    /// Add a batch of jobs, stopping at the first backend failure.
    ///
    /// Jobs enqueued before the failure stay queued; the caller decides
    /// what to do about the rest.
    ///
    /// # Errors
    /// Returns the backend error that stopped the batch.
    pub async fn enqueue_all(&self, jobs: Vec<Job>) -> Result<usize, QueueError> {
        let mut enqueued = 0;
        for job in jobs {
            self.enqueue(job).await?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Claim the next ready job, atomically moving it Waiting→Active.
    ///
    /// Eligible jobs are drained highest priority first, then by
    /// `not_before`, then by id (creation order): paced batch order within
    /// a campaign, greedy priority across campaigns. Jobs of paused
    /// campaigns are skipped. Returns `None` when nothing is ready.
    pub async fn claim_ready(&self) -> Option<Job> {
        let now = unix_now();

        let mut candidates: Vec<_> = self
            .jobs
            .iter()
            .filter(|entry| {
                entry.value().is_ready(now)
                    && !self.paused_campaigns.contains(&entry.value().campaign_id)
            })
            .map(|entry| {
                let job = entry.value();
                (
                    std::cmp::Reverse(job.priority),
                    job.not_before,
                    job.id,
                )
            })
            .collect();
        candidates.sort_unstable();

        for (_, _, id) in candidates {
            let claimed = self.jobs.get_mut(&id).and_then(|mut entry| {
                let job = entry.value_mut();
                // Re-checked under the shard lock: another worker may have
                // won the race since the snapshot above.
                if job.state == JobState::Waiting && job.not_before <= now {
                    job.state = JobState::Active;
                    Some(job.clone())
                } else {
                    None
                }
            });

            if let Some(job) = claimed {
                self.persist(&job).await;
                return Some(job);
            }
        }

        None
    }

    /// Mark a job successfully finished.
    ///
    /// # Errors
    /// Returns an error if the job is not in the queue.
    pub async fn complete(&self, id: JobId) -> Result<(), QueueError> {
        self.finish(id, JobState::Completed, None).await
    }

    /// Mark a job permanently failed.
    ///
    /// # Errors
    /// Returns an error if the job is not in the queue.
    pub async fn fail(&self, id: JobId, error: impl Into<String>) -> Result<(), QueueError> {
        self.finish(id, JobState::Failed, Some(error.into())).await
    }

    async fn finish(
        &self,
        id: JobId,
        state: JobState,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        let job = {
            let mut entry = self.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
            let job = entry.value_mut();
            job.state = state;
            job.last_error = error;
            job.finished_at = Some(unix_now());
            job.clone()
        };
        self.persist(&job).await;
        Ok(())
    }

    /// Re-queue an active job for a later attempt.
    ///
    /// Increments the attempt counter, records the failure, and makes the
    /// job eligible again at `not_before`.
    ///
    /// # Errors
    /// Returns an error if the job is not in the queue.
    pub async fn retry_later(
        &self,
        id: JobId,
        not_before: u64,
        error: impl Into<String>,
    ) -> Result<u32, QueueError> {
        let job = {
            let mut entry = self.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
            let job = entry.value_mut();
            job.attempt = job.attempt.saturating_add(1);
            job.state = JobState::Waiting;
            job.not_before = not_before;
            job.last_error = Some(error.into());
            job.clone()
        };
        self.persist(&job).await;
        Ok(job.attempt)
    }

    /// Remove every not-yet-started job of one campaign.
    ///
    /// Only Waiting jobs (ready or delayed) are removed; Active jobs run to
    /// completion and terminal jobs stay for the administrative clean.
    /// Returns the removed jobs so the caller can reconcile their
    /// recipients.
    pub async fn remove_campaign_jobs(&self, campaign_id: CampaignId) -> Vec<Job> {
        let ids: Vec<_> = self
            .jobs
            .iter()
            .filter(|entry| {
                entry.value().campaign_id == campaign_id
                    && entry.value().state == JobState::Waiting
            })
            .map(|entry| *entry.key())
            .collect();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            // Entries may race to Active between snapshot and removal;
            // remove_if keeps those in place.
            if let Some((_, job)) = self
                .jobs
                .remove_if(&id, |_, job| job.state == JobState::Waiting)
            {
                if let Err(e) = self.store.delete(id).await {
                    warn!(job_id = %id, error = %e, "Failed to delete cancelled job record");
                }
                removed.push(job);
            }
        }
        removed
    }

    /// Remove up to `limit` terminal jobs older than `grace`.
    ///
    /// # Errors
    /// Returns an error when `state` is not terminal.
    pub async fn clean(
        &self,
        grace: Duration,
        limit: usize,
        state: JobState,
    ) -> Result<Vec<JobId>, QueueError> {
        if !state.is_terminal() {
            return Err(QueueError::NotTerminal(state));
        }

        let cutoff = unix_now().saturating_sub(grace.as_secs());
        let mut expired: Vec<_> = self
            .jobs
            .iter()
            .filter(|entry| {
                let job = entry.value();
                job.state == state && job.finished_at.is_some_and(|at| at <= cutoff)
            })
            .map(|entry| (entry.value().finished_at, *entry.key()))
            .collect();
        expired.sort_unstable();
        expired.truncate(limit);

        let mut removed = Vec::with_capacity(expired.len());
        for (_, id) in expired {
            if self.jobs.remove(&id).is_some() {
                if let Err(e) = self.store.delete(id).await {
                    warn!(job_id = %id, error = %e, "Failed to delete cleaned job record");
                }
                removed.push(id);
            }
        }
        Ok(removed)
    }

    /// Stop releasing one campaign's jobs to workers. In-flight jobs are
    /// unaffected.
    pub fn pause_campaign(&self, campaign_id: CampaignId) {
        self.paused_campaigns.insert(campaign_id);
    }

    /// Release a campaign's jobs again.
    pub fn resume_campaign(&self, campaign_id: CampaignId) {
        self.paused_campaigns.remove(&campaign_id);
    }

    /// Whether a campaign is currently held back.
    #[must_use]
    pub fn is_paused(&self, campaign_id: CampaignId) -> bool {
        self.paused_campaigns.contains(&campaign_id)
    }

    /// Counts per state, splitting waiting jobs into ready and delayed.
    #[must_use]
    pub fn counts(&self) -> JobCounts {
        let now = unix_now();
        let mut counts = JobCounts::default();

        for entry in self.jobs.iter() {
            let job = entry.value();
            match job.state {
                JobState::Waiting if job.not_before > now => counts.delayed += 1,
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Campaigns with at least one non-terminal job.
    #[must_use]
    pub fn active_campaigns(&self) -> usize {
        let mut campaigns = HashSet::new();
        for entry in self.jobs.iter() {
            if !entry.value().state.is_terminal() {
                campaigns.insert(entry.value().campaign_id);
            }
        }
        campaigns.len()
    }

    /// All jobs currently in `state`.
    #[must_use]
    pub fn jobs_in_state(&self, state: JobState) -> Vec<Job> {
        let mut jobs: Vec<_> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().state == state)
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    /// One campaign's jobs, any state.
    #[must_use]
    pub fn campaign_jobs(&self, campaign_id: CampaignId) -> Vec<Job> {
        let mut jobs: Vec<_> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().campaign_id == campaign_id)
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    /// Number of jobs in the queue, any state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the queue holds no jobs at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Probe the persistence backend.
    ///
    /// # Errors
    /// Returns the backend's error when it is unreachable.
    pub async fn ping(&self) -> Result<(), QueueError> {
        self.store.ping().await
    }

    /// Close the persistence backend.
    ///
    /// # Errors
    /// Returns the backend's error if the flush fails.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.store.close().await
    }

    async fn persist(&self, job: &Job) {
        if let Err(e) = self.store.put(job).await {
            warn!(job_id = %job.id, error = %e, "Failed to persist job state change");
        }
    }
}
