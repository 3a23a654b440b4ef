//! Mid-flight campaign control: pause, resume, cancel, retry.
//!
//! Every operation here is idempotent: repeating one on a campaign
//! already in the target state is a no-op success, never an error, so
//! callers can retry blindly on timeout.

use std::sync::Arc;

use herald_common::{CampaignId, CampaignStatus, RecipientStatus};
use herald_queue::JobQueue;
use herald_store::Store;
use tracing::{info, warn};

use crate::{
    dispatcher::{Dispatcher, MessageContent},
    error::DispatchError,
};

/// Outcome of a cancel operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelReceipt {
    /// Not-yet-started jobs removed from the queue.
    pub cancelled_jobs: usize,
}

/// Outcome of a retry operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReceipt {
    /// Failed recipients reset and re-queued.
    pub retried_count: usize,
}

/// Control operations that mutate both queue contents and campaign state.
#[derive(Debug, Clone)]
pub struct ControlPlane {
    store: Arc<dyn Store>,
    queue: JobQueue,
    dispatcher: Dispatcher,
}

impl ControlPlane {
    /// Create a control surface over the injected handles.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, queue: JobQueue, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            queue,
            dispatcher,
        }
    }

    /// Pause a Sending campaign: no new job of it starts, in-flight jobs
    /// complete. Pausing an already-Paused campaign is a no-op success.
    ///
    /// # Errors
    /// [`DispatchError::StateConflict`] from any other state.
    pub async fn pause_campaign(&self, campaign_id: CampaignId) -> Result<bool, DispatchError> {
        let campaign = self.store.campaign(campaign_id).await?;

        match campaign.status {
            CampaignStatus::Paused => Ok(true),
            CampaignStatus::Sending => {
                // Hold the queue back first so no job slips through while
                // the status flips.
                self.queue.pause_campaign(campaign_id);
                self.store
                    .transition_campaign(
                        campaign_id,
                        &[CampaignStatus::Sending],
                        CampaignStatus::Paused,
                    )
                    .await?;
                info!(campaign_id = %campaign_id, "Campaign paused");
                Ok(true)
            }
            status => Err(DispatchError::state_conflict("pause_campaign", status)),
        }
    }

    /// Resume a Paused campaign. Existing Queued jobs simply proceed; no
    /// duplicates are created. Resuming a Sending campaign is a no-op
    /// success.
    ///
    /// # Errors
    /// [`DispatchError::StateConflict`] from any other state.
    pub async fn resume_campaign(&self, campaign_id: CampaignId) -> Result<bool, DispatchError> {
        let campaign = self.store.campaign(campaign_id).await?;

        match campaign.status {
            CampaignStatus::Sending => Ok(true),
            CampaignStatus::Paused => {
                self.store
                    .transition_campaign(
                        campaign_id,
                        &[CampaignStatus::Paused],
                        CampaignStatus::Sending,
                    )
                    .await?;
                self.queue.resume_campaign(campaign_id);
                info!(campaign_id = %campaign_id, "Campaign resumed");
                Ok(true)
            }
            status => Err(DispatchError::state_conflict("resume_campaign", status)),
        }
    }

    /// Cancel a campaign: remove its waiting and delayed jobs, revert
    /// their recipients to Pending, and mark the campaign Cancelled.
    ///
    /// Jobs already executing are not interrupted; their recipients may
    /// still become Sent or Failed after this returns, an accepted race,
    /// since a half-sent email cannot be undone. Cancelling an
    /// already-Cancelled campaign is a no-op reporting zero jobs.
    ///
    /// # Errors
    /// [`DispatchError::StateConflict`] unless the campaign is Sending,
    /// Paused, or Scheduled.
    pub async fn cancel_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<CancelReceipt, DispatchError> {
        let campaign = self.store.campaign(campaign_id).await?;

        match campaign.status {
            CampaignStatus::Cancelled => Ok(CancelReceipt::default()),
            CampaignStatus::Sending | CampaignStatus::Paused | CampaignStatus::Scheduled => {
                let removed = self.queue.remove_campaign_jobs(campaign_id).await;

                for job in &removed {
                    // The job never ran, so the recipient goes back to
                    // Pending for truthful accounting.
                    if let Err(e) = self
                        .store
                        .transition_recipient(
                            job.recipient_id,
                            &[RecipientStatus::Queued],
                            RecipientStatus::Pending,
                            None,
                        )
                        .await
                    {
                        warn!(
                            recipient_id = %job.recipient_id,
                            error = %e,
                            "Failed to revert recipient on cancel"
                        );
                    }
                }

                self.store
                    .transition_campaign(
                        campaign_id,
                        &[
                            CampaignStatus::Sending,
                            CampaignStatus::Paused,
                            CampaignStatus::Scheduled,
                        ],
                        CampaignStatus::Cancelled,
                    )
                    .await?;

                // Drop a stale pause flag so the queue holds no state for
                // a dead campaign.
                self.queue.resume_campaign(campaign_id);

                info!(
                    campaign_id = %campaign_id,
                    cancelled_jobs = removed.len(),
                    "Campaign cancelled"
                );
                Ok(CancelReceipt {
                    cancelled_jobs: removed.len(),
                })
            }
            status => Err(DispatchError::state_conflict("cancel_campaign", status)),
        }
    }

    /// Reset currently-Failed recipients to Pending and re-run the
    /// batching logic for just that subset.
    ///
    /// With nothing Failed this returns `retried_count: 0`, not an error,
    /// so calling it twice in a row is safe.
    ///
    /// # Errors
    /// [`DispatchError::StateConflict`] unless the campaign is Completed
    /// or Sending.
    pub async fn retry_failed_recipients(
        &self,
        campaign_id: CampaignId,
    ) -> Result<RetryReceipt, DispatchError> {
        let campaign = self.store.campaign(campaign_id).await?;

        if !matches!(
            campaign.status,
            CampaignStatus::Completed | CampaignStatus::Sending
        ) {
            return Err(DispatchError::state_conflict(
                "retry_failed_recipients",
                campaign.status,
            ));
        }

        let failed = self
            .store
            .recipients_in_status(campaign_id, RecipientStatus::Failed)
            .await?;
        if failed.is_empty() {
            return Ok(RetryReceipt::default());
        }

        let mut recipient_ids = Vec::with_capacity(failed.len());
        for recipient in &failed {
            self.store
                .transition_recipient(
                    recipient.id,
                    &[RecipientStatus::Failed],
                    RecipientStatus::Pending,
                    None,
                )
                .await?;
            recipient_ids.push(recipient.id);
        }

        let receipt = self
            .dispatcher
            .dispatch_batches(
                campaign_id,
                &recipient_ids,
                MessageContent {
                    subject: &campaign.subject,
                    body: &campaign.body,
                },
                &campaign.send_options,
            )
            .await?;

        info!(
            campaign_id = %campaign_id,
            retried = receipt.queued_count,
            "Failed recipients re-queued"
        );
        Ok(RetryReceipt {
            retried_count: receipt.queued_count,
        })
    }
}
