//! Turning an eligible recipient set into paced, batched jobs.

use chrono::{DateTime, Utc};
use herald_common::{CampaignId, RecipientId, RecipientStatus, unix_now};
use herald_queue::{Job, JobQueue};
use herald_store::{SendOptions, Store};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::DispatchError;

/// Subject/body pair chosen for a dispatch run (a variant override is
/// resolved before batching).
#[derive(Debug, Clone, Copy)]
pub struct MessageContent<'a> {
    pub subject: &'a str,
    pub body: &'a str,
}

/// Outcome of a dispatch call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// Recipients moved into the queue.
    pub queued_count: usize,
    /// Batches the jobs were paced into.
    pub batch_count: usize,
    /// True when the campaign was only scheduled for later instead of
    /// being enqueued now.
    pub scheduled: bool,
}

/// Owns the campaign's transition into Sending.
///
/// Batches are enqueued first and committed to the store second: if the
/// store commit fails, the freshly queued jobs find their recipients still
/// Pending and discard themselves, so nothing is sent that the store does
/// not know about. A failure part-way leaves earlier batches legitimately
/// queued; they are not unwound.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<dyn Store>,
    queue: JobQueue,
}

impl Dispatcher {
    /// Create a dispatcher over the injected store and queue handles.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, queue: JobQueue) -> Self {
        Self { store, queue }
    }

    /// Dispatch a campaign's pending recipients.
    ///
    /// With a future `scheduled_at`, the campaign is only marked Scheduled
    /// and the timestamp recorded; the external scheduler re-invokes this
    /// once the time arrives (Scheduled is a valid dispatch-from state).
    ///
    /// # Errors
    /// - [`DispatchError::StateConflict`] unless the campaign is Draft or
    ///   Scheduled.
    /// - [`DispatchError::NoRecipients`] when nothing is Pending.
    /// - Store/queue errors surface as-is; earlier batches stay queued.
    pub async fn queue_campaign(
        &self,
        campaign_id: CampaignId,
        options: SendOptions,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<DispatchReceipt, DispatchError> {
        let campaign = self.store.campaign(campaign_id).await?;
        if !campaign.status.can_begin_dispatch() {
            return Err(DispatchError::state_conflict(
                "queue_campaign",
                campaign.status,
            ));
        }

        if let Some(at) = scheduled_at
            && at > Utc::now()
        {
            self.store.set_schedule(campaign_id, at).await?;
            info!(campaign_id = %campaign_id, scheduled_at = %at, "Campaign scheduled");
            return Ok(DispatchReceipt {
                queued_count: 0,
                batch_count: 0,
                scheduled: true,
            });
        }

        self.store
            .set_send_options(campaign_id, options.clone())
            .await?;

        let pending = self
            .store
            .recipients_in_status(campaign_id, RecipientStatus::Pending)
            .await?;
        if pending.is_empty() {
            return Err(DispatchError::NoRecipients(campaign_id));
        }

        let recipient_ids: Vec<_> = pending.iter().map(|recipient| recipient.id).collect();
        let content = MessageContent {
            subject: &campaign.subject,
            body: &campaign.body,
        };

        self.dispatch_batches(campaign_id, &recipient_ids, content, &options)
            .await
    }

    /// The shared batching primitive: also used for retry runs and A/B
    /// test groups.
    ///
    /// Batch `i` is enqueued with `not_before = now + delay × i`, which
    /// paces egress; each batch's recipients are then committed
    /// Pending→Queued (and the campaign into Sending) in one atomic store
    /// step. Ids that are no longer Pending contribute dead jobs that the
    /// worker discards.
    ///
    /// # Errors
    /// Returns the first store or queue failure; earlier batches remain
    /// queued and committed.
    pub async fn dispatch_batches(
        &self,
        campaign_id: CampaignId,
        recipient_ids: &[RecipientId],
        content: MessageContent<'_>,
        options: &SendOptions,
    ) -> Result<DispatchReceipt, DispatchError> {
        let now = unix_now();
        let batch_size = options.batch_size.max(1);
        let delay = options.delay_between_batches_secs;

        let mut queued_count = 0;
        let mut batch_count = 0;

        for (index, batch) in recipient_ids.chunks(batch_size).enumerate() {
            let not_before = now + delay * index as u64;

            let jobs: Vec<Job> = batch
                .iter()
                .map(|recipient_id| {
                    Job::new(
                        campaign_id,
                        *recipient_id,
                        options.smtp_config_id.clone(),
                        content.subject,
                        content.body,
                        options.priority,
                        not_before,
                    )
                })
                .collect();

            self.queue.enqueue_all(jobs).await?;
            queued_count += self.store.commit_dispatch(campaign_id, batch).await?;
            batch_count += 1;

            debug!(
                campaign_id = %campaign_id,
                batch = index,
                size = batch.len(),
                not_before,
                "Batch enqueued"
            );
        }

        info!(
            campaign_id = %campaign_id,
            queued = queued_count,
            batches = batch_count,
            "Campaign dispatched"
        );

        Ok(DispatchReceipt {
            queued_count,
            batch_count,
            scheduled: false,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use herald_common::{CampaignStatus, JobPriority};
    use herald_queue::{JobState, MemoryQueueStore};
    use herald_store::{Campaign, MemoryStore, Recipient};
    use pretty_assertions::assert_eq;

    use super::*;

    async fn setup(recipients: usize) -> (Dispatcher, Arc<MemoryStore>, JobQueue, CampaignId) {
        let store = Arc::new(MemoryStore::new());
        let queue = JobQueue::new(Arc::new(MemoryQueueStore::new()));
        let dispatcher = Dispatcher::new(store.clone(), queue.clone());

        let campaign = Campaign::new("launch", "Hello {{name}}", "Body", "primary".into());
        let campaign_id = campaign.id;
        store.insert_campaign(campaign).await.unwrap();
        store
            .insert_recipients(
                (0..recipients)
                    .map(|i| Recipient::new(campaign_id, format!("user{i}@example.com")))
                    .collect(),
            )
            .await
            .unwrap();

        (dispatcher, store, queue, campaign_id)
    }

    fn options(batch_size: usize, delay_secs: u64) -> SendOptions {
        SendOptions {
            batch_size,
            delay_between_batches_secs: delay_secs,
            ..SendOptions::new("primary".into())
        }
    }

    #[tokio::test]
    async fn batches_are_paced_and_campaign_transitions() {
        let (dispatcher, store, queue, campaign_id) = setup(25).await;

        let receipt = dispatcher
            .queue_campaign(campaign_id, options(10, 60), None)
            .await
            .unwrap();

        // 25 recipients at batch size 10 -> ceil(25/10) = 3 batches.
        assert_eq!(receipt.queued_count, 25);
        assert_eq!(receipt.batch_count, 3);
        assert!(!receipt.scheduled);

        let campaign = store.campaign(campaign_id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Sending);
        assert_eq!(campaign.stats.queued, 25);

        // First batch ready now, the rest paced 60s apart.
        let jobs = queue.jobs_in_state(JobState::Waiting);
        assert_eq!(jobs.len(), 25);
        let mut offsets: Vec<_> = jobs.iter().map(|job| job.not_before).collect();
        offsets.sort_unstable();
        offsets.dedup();
        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets[1] - offsets[0], 60);
        assert_eq!(offsets[2] - offsets[1], 60);

        let counts = queue.counts();
        assert_eq!(counts.waiting, 10);
        assert_eq!(counts.delayed, 15);

        let queued = store
            .count_in_status(campaign_id, RecipientStatus::Queued)
            .await
            .unwrap();
        assert_eq!(queued, 25);
    }

    #[tokio::test]
    async fn dispatch_requires_draft_or_scheduled() {
        let (dispatcher, _, _, campaign_id) = setup(3).await;

        dispatcher
            .queue_campaign(campaign_id, options(10, 0), None)
            .await
            .unwrap();

        // Second dispatch sees Sending and conflicts.
        let err = dispatcher
            .queue_campaign(campaign_id, options(10, 0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::StateConflict { .. }));
    }

    #[tokio::test]
    async fn empty_recipient_set_is_an_error() {
        let (dispatcher, _, _, campaign_id) = setup(0).await;

        let err = dispatcher
            .queue_campaign(campaign_id, options(10, 0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoRecipients(_)));
    }

    #[tokio::test]
    async fn future_schedule_only_records_scheduled() {
        let (dispatcher, store, queue, campaign_id) = setup(5).await;

        let at = Utc::now() + chrono::Duration::hours(2);
        let receipt = dispatcher
            .queue_campaign(campaign_id, options(10, 0), Some(at))
            .await
            .unwrap();

        assert!(receipt.scheduled);
        assert_eq!(receipt.queued_count, 0);
        assert!(queue.is_empty());

        let campaign = store.campaign(campaign_id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Scheduled);
        assert_eq!(campaign.scheduled_at, Some(at));

        // When the scheduler fires later, dispatch proceeds from Scheduled.
        let receipt = dispatcher
            .queue_campaign(campaign_id, options(10, 0), Some(Utc::now()))
            .await
            .unwrap();
        assert_eq!(receipt.queued_count, 5);
    }

    #[tokio::test]
    async fn options_are_recorded_on_the_campaign() {
        let (dispatcher, store, _, campaign_id) = setup(2).await;

        let options = SendOptions {
            priority: JobPriority::High,
            batch_size: 1,
            delay_between_batches_secs: 0,
            smtp_config_id: "burst".into(),
        };
        dispatcher
            .queue_campaign(campaign_id, options, None)
            .await
            .unwrap();

        let campaign = store.campaign(campaign_id).await.unwrap();
        assert_eq!(campaign.send_options.priority, JobPriority::High);
        assert_eq!(campaign.send_options.batch_size, 1);
        assert_eq!(campaign.send_options.smtp_config_id.as_str(), "burst");
    }
}
