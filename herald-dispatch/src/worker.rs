//! The worker pool: a fixed-concurrency set of loops draining the queue.
//!
//! Each loop claims one ready job at a time, waits for a rate-limit permit
//! for the job's SMTP configuration, re-checks the recipient is still
//! Queued (the at-least-once guard), renders the merge tags, and attempts
//! the send under a bounded timeout. Reconciliation writes are conditioned
//! on the recipient's recorded status, so a duplicate execution of the
//! same job is a safe no-op.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use herald_common::{CampaignId, CampaignStatus, RecipientStatus, Signal, SmtpConfigId, unix_now};
use herald_queue::{Job, JobQueue};
use herald_store::{CampaignStats, Recipient, Store, StoreError};
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, task::JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
    error::{DispatchError, SendError},
    rate_limiter::RateLimiter,
    render,
    retry,
    transport::{OutboundEmail, Transport},
};

const fn default_concurrency() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_schedule() -> Vec<u64> {
    vec![30, 120, 600]
}

const fn default_retry_jitter_factor() -> f64 {
    0.2
}

const fn default_send_timeout() -> u64 {
    30
}

const fn default_poll_interval_ms() -> u64 {
    250
}

const fn default_sweep_interval() -> u64 {
    60
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// How many jobs run concurrently. Caps parallel execution only;
    /// batch pacing independently shapes when jobs become eligible.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per job before the recipient is marked Failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff delays per retry attempt, in seconds. Attempts past the end
    /// of the schedule reuse the last entry.
    #[serde(default = "default_backoff_schedule")]
    pub backoff_schedule_secs: Vec<u64>,

    /// Jitter factor applied to backoff delays (0.2 means ±20%).
    #[serde(default = "default_retry_jitter_factor")]
    pub retry_jitter_factor: f64,

    /// Bound on each send attempt; exceeding it counts as a transient
    /// failure.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// How long an idle worker sleeps before polling the queue again.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How often idle rate-limiter scopes are swept.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_schedule_secs: default_backoff_schedule(),
            retry_jitter_factor: default_retry_jitter_factor(),
            send_timeout_secs: default_send_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Point-in-time worker pool status for operators.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WorkerStatus {
    pub running: bool,
    pub paused: bool,
    pub concurrency: usize,
    pub in_flight: u64,
}

/// Shared, thread-safe view of the worker pool's state.
///
/// Cloning is cheap; the control surface and health monitor each hold one.
/// Pausing here is the global form: no worker starts a new job while the
/// flag is set, in-flight jobs complete.
#[derive(Debug, Clone)]
pub struct WorkerStatusHandle {
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    in_flight: Arc<AtomicU64>,
    concurrency: usize,
}

impl WorkerStatusHandle {
    /// Create a handle for a pool of the given concurrency.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicU64::new(0)),
            concurrency,
        }
    }

    /// Whether the pool's loops are serving.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop claiming new jobs across every campaign.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        info!("Worker pool paused");
    }

    /// Resume claiming jobs.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        info!("Worker pool resumed");
    }

    /// Whether the global pause flag is set.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Jobs currently executing.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// The pool's configured concurrency.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Snapshot for the health monitor.
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            running: self.is_running(),
            paused: self.is_paused(),
            concurrency: self.concurrency,
            in_flight: self.in_flight(),
        }
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    fn enter_job(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn leave_job(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Fixed-size pool of worker loops over one shared queue.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    queue: JobQueue,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    config: Arc<WorkerConfig>,
    status: WorkerStatusHandle,
}

impl WorkerPool {
    /// Assemble a pool from injected collaborators.
    #[must_use]
    pub fn new(
        queue: JobQueue,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        config: WorkerConfig,
    ) -> Self {
        let status = WorkerStatusHandle::new(config.concurrency);
        Self {
            queue,
            store,
            transport,
            limiter,
            config: Arc::new(config),
            status,
        }
    }

    /// A clone of the pool's status handle.
    #[must_use]
    pub fn status_handle(&self) -> WorkerStatusHandle {
        self.status.clone()
    }

    /// Run the pool until a shutdown signal arrives.
    ///
    /// Spawns `concurrency` worker loops plus a maintenance loop sweeping
    /// idle rate-limiter scopes. On shutdown, loops stop claiming and any
    /// in-flight sends run to completion before this returns.
    ///
    /// # Errors
    /// Currently infallible at this level; failures inside a job are
    /// handled per job.
    pub async fn serve(
        &self,
        shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), DispatchError> {
        self.status.set_running(true);
        info!(
            concurrency = self.config.concurrency,
            "Worker pool starting"
        );

        let mut tasks: JoinSet<()> = JoinSet::new();
        for worker_id in 0..self.config.concurrency {
            let pool = self.clone();
            let shutdown = shutdown.resubscribe();
            tasks.spawn(async move { pool.run_worker(worker_id, shutdown).await });
        }

        let pool = self.clone();
        let sweep_shutdown = shutdown.resubscribe();
        tasks.spawn(async move { pool.run_sweeper(sweep_shutdown).await });

        while tasks.join_next().await.is_some() {}

        self.status.set_running(false);
        info!("Worker pool stopped");
        Ok(())
    }

    async fn run_worker(&self, worker_id: usize, mut shutdown: broadcast::Receiver<Signal>) {
        debug!(worker_id, "Worker loop started");

        loop {
            match shutdown.try_recv() {
                Ok(Signal::Shutdown) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(
                    broadcast::error::TryRecvError::Empty
                    | broadcast::error::TryRecvError::Lagged(_),
                ) => {}
            }

            let claimed = if self.status.is_paused() {
                None
            } else {
                self.queue.claim_ready().await
            };

            match claimed {
                Some(job) => self.process_job(job).await,
                None => {
                    let idle = Duration::from_millis(self.config.poll_interval_ms);
                    tokio::select! {
                        () = tokio::time::sleep(idle) => {}
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }

        debug!(worker_id, "Worker loop stopped");
    }

    async fn run_sweeper(&self, mut shutdown: broadcast::Receiver<Signal>) {
        let mut timer =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs.max(1)));
        // The first tick fires immediately; burn it.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let swept = self.limiter.sweep_expired();
                    if swept > 0 {
                        debug!(swept, "Swept idle rate-limit scopes");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Execute one claimed job end to end.
    async fn process_job(&self, job: Job) {
        self.status.enter_job();

        self.wait_for_permit(&job.smtp_config_id).await;

        // Re-check the recipient before doing anything: a cancelled
        // campaign reverts its recipients, and a duplicate delivery of
        // this job would observe the Sent/Failed it already produced.
        let recipient = match self.store.recipient(job.recipient_id).await {
            Ok(recipient) => recipient,
            Err(StoreError::RecipientNotFound(_)) => {
                warn!(job_id = %job.id, "Recipient vanished, discarding job");
                self.finish_queue_job(&job, Ok(())).await;
                self.status.leave_job();
                return;
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Store unreachable, re-queueing job");
                self.handle_transient_failure(&job, format!("store unavailable: {e}"))
                    .await;
                self.status.leave_job();
                return;
            }
        };

        if recipient.status != RecipientStatus::Queued {
            debug!(
                job_id = %job.id,
                recipient_id = %job.recipient_id,
                status = %recipient.status,
                "Recipient no longer queued, discarding job as a no-op"
            );
            self.finish_queue_job(&job, Ok(())).await;
            self.status.leave_job();
            return;
        }

        let email = OutboundEmail {
            campaign_id: job.campaign_id,
            recipient_id: job.recipient_id,
            smtp_config_id: job.smtp_config_id.clone(),
            to: recipient.email.clone(),
            subject: render::render(&job.subject, &recipient),
            body: render::render(&job.body, &recipient),
            tracking_id: recipient.tracking_id.clone(),
        };

        let timeout = Duration::from_secs(self.config.send_timeout_secs);
        let outcome = match tokio::time::timeout(timeout, self.transport.send_email(&email)).await
        {
            Ok(result) => result,
            Err(_) => Err(SendError::Transient(format!(
                "send attempt timed out after {}s",
                timeout.as_secs()
            ))),
        };

        match outcome {
            Ok(receipt) => {
                debug!(
                    job_id = %job.id,
                    recipient_id = %job.recipient_id,
                    message_id = receipt.message_id.as_deref().unwrap_or("-"),
                    "Send accepted"
                );
                self.handle_success(&job, &recipient).await;
            }
            Err(SendError::Transient(reason)) => {
                self.handle_transient_failure(&job, reason).await;
            }
            Err(SendError::Permanent(reason)) => {
                self.handle_permanent_failure(&job, reason).await;
            }
        }

        self.status.leave_job();
    }

    /// Block until the scope grants a permit.
    async fn wait_for_permit(&self, scope: &SmtpConfigId) {
        loop {
            match self.limiter.check(scope) {
                Ok(()) => return,
                Err(wait) => {
                    tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
                }
            }
        }
    }

    async fn handle_success(&self, job: &Job, recipient: &Recipient) {
        let applied = self
            .store
            .transition_recipient(
                job.recipient_id,
                &[RecipientStatus::Queued, RecipientStatus::Pending],
                RecipientStatus::Sent,
                None,
            )
            .await;

        match applied {
            Ok(true) => {
                if let Err(e) = self
                    .store
                    .add_campaign_stats(job.campaign_id, CampaignStats::one_sent())
                    .await
                {
                    warn!(campaign_id = %job.campaign_id, error = %e, "Failed to update campaign counters");
                }
            }
            Ok(false) => {
                debug!(
                    recipient_id = %recipient.id,
                    "Recipient already reconciled, skipping counter update"
                );
            }
            Err(e) => {
                warn!(recipient_id = %recipient.id, error = %e, "Failed to mark recipient sent");
            }
        }

        self.finish_queue_job(job, Ok(())).await;
        self.maybe_complete_campaign(job.campaign_id).await;
    }

    async fn handle_transient_failure(&self, job: &Job, reason: String) {
        let next_attempt = job.attempt.saturating_add(1);

        if next_attempt < self.config.max_attempts {
            let delay = retry::backoff_delay(
                next_attempt,
                &self.config.backoff_schedule_secs,
                self.config.retry_jitter_factor,
            );
            let not_before = unix_now() + delay.as_secs();

            match self.queue.retry_later(job.id, not_before, &reason).await {
                Ok(attempt) => {
                    debug!(
                        job_id = %job.id,
                        attempt,
                        delay_secs = delay.as_secs(),
                        reason = %reason,
                        "Transient failure, retry scheduled"
                    );
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to schedule retry");
                }
            }
        } else {
            self.handle_permanent_failure(
                job,
                format!("retries exhausted after {next_attempt} attempts: {reason}"),
            )
            .await;
        }
    }

    async fn handle_permanent_failure(&self, job: &Job, reason: String) {
        let applied = self
            .store
            .transition_recipient(
                job.recipient_id,
                &[RecipientStatus::Queued, RecipientStatus::Pending],
                RecipientStatus::Failed,
                Some(reason.clone()),
            )
            .await;

        match applied {
            Ok(true) => {
                warn!(
                    recipient_id = %job.recipient_id,
                    reason = %reason,
                    "Recipient failed permanently"
                );
                if let Err(e) = self
                    .store
                    .add_campaign_stats(job.campaign_id, CampaignStats::one_failed())
                    .await
                {
                    warn!(campaign_id = %job.campaign_id, error = %e, "Failed to update campaign counters");
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(recipient_id = %job.recipient_id, error = %e, "Failed to mark recipient failed");
            }
        }

        self.finish_queue_job(job, Err(reason)).await;
        self.maybe_complete_campaign(job.campaign_id).await;
    }

    async fn finish_queue_job(&self, job: &Job, result: Result<(), String>) {
        let finished = match result {
            Ok(()) => self.queue.complete(job.id).await,
            Err(reason) => self.queue.fail(job.id, reason).await,
        };
        if let Err(e) = finished {
            warn!(job_id = %job.id, error = %e, "Failed to finalise job state");
        }
    }

    /// A Sending campaign with no Queued recipients left is Completed.
    async fn maybe_complete_campaign(&self, campaign_id: CampaignId) {
        match self
            .store
            .count_in_status(campaign_id, RecipientStatus::Queued)
            .await
        {
            Ok(0) => {
                match self
                    .store
                    .transition_campaign(
                        campaign_id,
                        &[CampaignStatus::Sending],
                        CampaignStatus::Completed,
                    )
                    .await
                {
                    Ok(()) => {
                        info!(campaign_id = %campaign_id, "Campaign completed");
                    }
                    // Paused/Cancelled runs keep their status.
                    Err(StoreError::StatusConflict { .. }) => {}
                    Err(e) => {
                        warn!(campaign_id = %campaign_id, error = %e, "Failed to complete campaign");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(campaign_id = %campaign_id, error = %e, "Failed to check campaign completion");
            }
        }
    }
}
