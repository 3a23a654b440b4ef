//! Store trait abstractions.
//!
//! These traits decouple the dispatch core from any concrete persistence
//! backend. The in-memory implementation in [`crate::memory`] serves tests
//! and embedded deployments; a database-backed implementation satisfies the
//! same contracts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{CampaignId, CampaignStatus, RecipientId, RecipientStatus, VariantId};

use crate::{
    StoreError,
    types::{AbTest, AbTestEvent, AbTestStatus, Campaign, CampaignStats, Recipient, SendOptions},
};

/// Campaign and recipient persistence.
///
/// Status-mutating methods are guarded by the entity's expected current
/// status: the write happens only when the guard holds, which is what makes
/// duplicate job executions safe no-ops.
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Persist a new campaign.
    async fn insert_campaign(&self, campaign: Campaign) -> Result<(), StoreError>;

    /// Fetch a campaign by id.
    async fn campaign(&self, id: CampaignId) -> Result<Campaign, StoreError>;

    /// Transition a campaign's status, guarded by its expected current
    /// status.
    ///
    /// # Errors
    /// `StatusConflict` (carrying the observed status) when the campaign is
    /// not currently in any of `from`.
    async fn transition_campaign(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<(), StoreError>;

    /// Record a future send time and move the campaign to Scheduled.
    async fn set_schedule(&self, id: CampaignId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Replace the campaign's send options.
    async fn set_send_options(&self, id: CampaignId, options: SendOptions)
    -> Result<(), StoreError>;

    /// Add counter deltas onto the campaign's stats.
    async fn add_campaign_stats(
        &self,
        id: CampaignId,
        delta: CampaignStats,
    ) -> Result<(), StoreError>;

    /// Persist a batch of new recipients.
    async fn insert_recipients(&self, recipients: Vec<Recipient>) -> Result<(), StoreError>;

    /// Fetch a recipient by id.
    async fn recipient(&self, id: RecipientId) -> Result<Recipient, StoreError>;

    /// All of a campaign's recipients currently in `status`, in insertion
    /// order.
    async fn recipients_in_status(
        &self,
        campaign_id: CampaignId,
        status: RecipientStatus,
    ) -> Result<Vec<Recipient>, StoreError>;

    /// How many of a campaign's recipients are currently in `status`.
    async fn count_in_status(
        &self,
        campaign_id: CampaignId,
        status: RecipientStatus,
    ) -> Result<usize, StoreError>;

    /// Conditionally transition one recipient.
    ///
    /// Returns `Ok(false)` without writing when the recipient's current
    /// status is not in `from`; the caller's effect already happened or no
    /// longer applies. `error` replaces the recipient's `error_message`
    /// (pass `None` to clear it).
    async fn transition_recipient(
        &self,
        id: RecipientId,
        from: &[RecipientStatus],
        to: RecipientStatus,
        error: Option<String>,
    ) -> Result<bool, StoreError>;

    /// Record the A/B variant assignment for a group of recipients.
    async fn assign_variant(
        &self,
        ids: &[RecipientId],
        variant_id: VariantId,
    ) -> Result<(), StoreError>;

    /// Atomically move the listed recipients Pending→Queued and the
    /// campaign into Sending.
    ///
    /// A concurrent reader observes either none or all of the batch; the
    /// returned count is how many recipients were actually Pending and got
    /// queued. The campaign may already be Sending (later batches) or
    /// Completed (a retry run); Paused, Cancelled, and Failed campaigns
    /// conflict.
    async fn commit_dispatch(
        &self,
        campaign_id: CampaignId,
        recipients: &[RecipientId],
    ) -> Result<usize, StoreError>;
}

/// A/B test persistence.
#[async_trait]
pub trait TestStore: Send + Sync + std::fmt::Debug {
    /// Persist a new test. One test per campaign.
    async fn insert_test(&self, test: AbTest) -> Result<(), StoreError>;

    /// Fetch the test attached to a campaign, if any.
    async fn test_by_campaign(&self, campaign_id: CampaignId)
    -> Result<Option<AbTest>, StoreError>;

    /// Move the test's lifecycle status.
    async fn update_test_status(
        &self,
        campaign_id: CampaignId,
        status: AbTestStatus,
    ) -> Result<(), StoreError>;

    /// Store the per-variant test groups and the remaining pool.
    async fn set_assignments(
        &self,
        campaign_id: CampaignId,
        groups: &[(VariantId, Vec<RecipientId>)],
        remaining: Vec<RecipientId>,
    ) -> Result<(), StoreError>;

    /// Bump one variant counter.
    async fn record_variant_event(
        &self,
        campaign_id: CampaignId,
        variant_id: VariantId,
        event: AbTestEvent,
    ) -> Result<(), StoreError>;

    /// Record the winning variant.
    async fn set_winner(
        &self,
        campaign_id: CampaignId,
        variant_id: VariantId,
    ) -> Result<(), StoreError>;

    /// Pick and record the best-performing variant: highest click rate,
    /// ties broken by open rate. `None` when the test has no variants.
    async fn auto_select_winner(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<VariantId>, StoreError>;
}
