//! In-memory store implementation.
//!
//! Entities live in `HashMap`s behind a single `RwLock`, so every guarded
//! transition, including the whole-batch dispatch commit, happens under
//! one write lock and is atomic with respect to concurrent readers. This
//! implementation backs tests and embedded deployments; the trait contract
//! is what a database-backed store must reproduce.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{CampaignId, CampaignStatus, RecipientId, RecipientStatus, VariantId};
use parking_lot::RwLock;

use crate::{
    StoreError,
    store::{Store, TestStore},
    types::{AbTest, AbTestEvent, AbTestStatus, Campaign, CampaignStats, Recipient, SendOptions},
};

#[derive(Debug, Default)]
struct Inner {
    campaigns: HashMap<CampaignId, Campaign>,
    recipients: HashMap<RecipientId, Recipient>,
    /// Per-campaign recipient ids in insertion order, so listing is
    /// deterministic (the A/B split depends on stable ordering).
    by_campaign: HashMap<CampaignId, Vec<RecipientId>>,
    tests: HashMap<CampaignId, AbTest>,
}

impl Inner {
    fn campaign_mut(&mut self, id: CampaignId) -> Result<&mut Campaign, StoreError> {
        self.campaigns
            .get_mut(&id)
            .ok_or(StoreError::CampaignNotFound(id))
    }

    fn recipient_mut(&mut self, id: RecipientId) -> Result<&mut Recipient, StoreError> {
        self.recipients
            .get_mut(&id)
            .ok_or(StoreError::RecipientNotFound(id))
    }

    fn test_mut(&mut self, campaign_id: CampaignId) -> Result<&mut AbTest, StoreError> {
        self.tests
            .get_mut(&campaign_id)
            .ok_or(StoreError::TestNotFound(campaign_id))
    }

    fn guard_campaign(
        campaign: &Campaign,
        from: &[CampaignStatus],
    ) -> Result<(), StoreError> {
        if from.contains(&campaign.status) {
            Ok(())
        } else {
            Err(StoreError::StatusConflict {
                id: campaign.id,
                status: campaign.status,
                expected: from
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
        }
    }

    fn apply_recipient_transition(
        recipient: &mut Recipient,
        from: &[RecipientStatus],
        to: RecipientStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if !from.contains(&recipient.status) {
            return Ok(false);
        }
        if !recipient.status.can_transition_to(to) {
            return Err(StoreError::IllegalTransition {
                from: recipient.status,
                to,
            });
        }
        recipient.record_status(to, now);
        recipient.error_message = error;
        Ok(true)
    }
}

/// Thread-safe in-memory store for campaigns, recipients, and A/B tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_campaign(&self, campaign: Campaign) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.by_campaign.entry(campaign.id).or_default();
        inner.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    async fn campaign(&self, id: CampaignId) -> Result<Campaign, StoreError> {
        self.inner
            .read()
            .campaigns
            .get(&id)
            .cloned()
            .ok_or(StoreError::CampaignNotFound(id))
    }

    async fn transition_campaign(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let campaign = inner.campaign_mut(id)?;
        Inner::guard_campaign(campaign, from)?;
        campaign.status = to;
        Ok(())
    }

    async fn set_schedule(&self, id: CampaignId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let campaign = inner.campaign_mut(id)?;
        campaign.scheduled_at = Some(at);
        campaign.status = CampaignStatus::Scheduled;
        Ok(())
    }

    async fn set_send_options(
        &self,
        id: CampaignId,
        options: SendOptions,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.campaign_mut(id)?.send_options = options;
        Ok(())
    }

    async fn add_campaign_stats(
        &self,
        id: CampaignId,
        delta: CampaignStats,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.campaign_mut(id)?.stats.add(delta);
        Ok(())
    }

    async fn insert_recipients(&self, recipients: Vec<Recipient>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for recipient in recipients {
            inner
                .by_campaign
                .entry(recipient.campaign_id)
                .or_default()
                .push(recipient.id);
            inner.recipients.insert(recipient.id, recipient);
        }
        Ok(())
    }

    async fn recipient(&self, id: RecipientId) -> Result<Recipient, StoreError> {
        self.inner
            .read()
            .recipients
            .get(&id)
            .cloned()
            .ok_or(StoreError::RecipientNotFound(id))
    }

    async fn recipients_in_status(
        &self,
        campaign_id: CampaignId,
        status: RecipientStatus,
    ) -> Result<Vec<Recipient>, StoreError> {
        let inner = self.inner.read();
        let ids = inner
            .by_campaign
            .get(&campaign_id)
            .ok_or(StoreError::CampaignNotFound(campaign_id))?;

        Ok(ids
            .iter()
            .filter_map(|id| inner.recipients.get(id))
            .filter(|recipient| recipient.status == status)
            .cloned()
            .collect())
    }

    async fn count_in_status(
        &self,
        campaign_id: CampaignId,
        status: RecipientStatus,
    ) -> Result<usize, StoreError> {
        let inner = self.inner.read();
        let ids = inner
            .by_campaign
            .get(&campaign_id)
            .ok_or(StoreError::CampaignNotFound(campaign_id))?;

        Ok(ids
            .iter()
            .filter_map(|id| inner.recipients.get(id))
            .filter(|recipient| recipient.status == status)
            .count())
    }

    async fn transition_recipient(
        &self,
        id: RecipientId,
        from: &[RecipientStatus],
        to: RecipientStatus,
        error: Option<String>,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut inner = self.inner.write();
        let recipient = inner.recipient_mut(id)?;
        Inner::apply_recipient_transition(recipient, from, to, error, now)
    }

    async fn assign_variant(
        &self,
        ids: &[RecipientId],
        variant_id: VariantId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for id in ids {
            inner.recipient_mut(*id)?.variant_id = Some(variant_id);
        }
        Ok(())
    }

    async fn commit_dispatch(
        &self,
        campaign_id: CampaignId,
        recipients: &[RecipientId],
    ) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut inner = self.inner.write();

        {
            let campaign = inner.campaign_mut(campaign_id)?;
            // Draft/Scheduled start a run; Sending admits later batches of
            // the same run; Completed admits a retry run.
            Inner::guard_campaign(
                campaign,
                &[
                    CampaignStatus::Draft,
                    CampaignStatus::Scheduled,
                    CampaignStatus::Sending,
                    CampaignStatus::Completed,
                ],
            )?;
            campaign.status = CampaignStatus::Sending;
        }

        let mut queued = 0u64;
        for id in recipients {
            let recipient = inner.recipient_mut(*id)?;
            if recipient.status == RecipientStatus::Pending {
                recipient.record_status(RecipientStatus::Queued, now);
                recipient.error_message = None;
                queued += 1;
            }
        }

        inner.campaign_mut(campaign_id)?.stats.add(CampaignStats {
            queued,
            sent: 0,
            failed: 0,
        });

        Ok(usize::try_from(queued).unwrap_or(usize::MAX))
    }
}

#[async_trait]
impl TestStore for MemoryStore {
    async fn insert_test(&self, test: AbTest) -> Result<(), StoreError> {
        self.inner.write().tests.insert(test.campaign_id, test);
        Ok(())
    }

    async fn test_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<AbTest>, StoreError> {
        Ok(self.inner.read().tests.get(&campaign_id).cloned())
    }

    async fn update_test_status(
        &self,
        campaign_id: CampaignId,
        status: AbTestStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.test_mut(campaign_id)?.status = status;
        Ok(())
    }

    async fn set_assignments(
        &self,
        campaign_id: CampaignId,
        groups: &[(VariantId, Vec<RecipientId>)],
        remaining: Vec<RecipientId>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let test = inner.test_mut(campaign_id)?;

        for (variant_id, group) in groups {
            let variant = test
                .variants
                .iter_mut()
                .find(|variant| variant.id == *variant_id)
                .ok_or(StoreError::VariantNotFound(*variant_id))?;
            variant.recipient_ids.clone_from(group);
        }
        test.remaining_recipient_ids = remaining;
        Ok(())
    }

    async fn record_variant_event(
        &self,
        campaign_id: CampaignId,
        variant_id: VariantId,
        event: AbTestEvent,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let test = inner.test_mut(campaign_id)?;
        let variant = test
            .variants
            .iter_mut()
            .find(|variant| variant.id == variant_id)
            .ok_or(StoreError::VariantNotFound(variant_id))?;
        variant.stats.record(event);
        Ok(())
    }

    async fn set_winner(
        &self,
        campaign_id: CampaignId,
        variant_id: VariantId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let test = inner.test_mut(campaign_id)?;
        if test.variant(variant_id).is_none() {
            return Err(StoreError::VariantNotFound(variant_id));
        }
        test.winner = Some(variant_id);
        Ok(())
    }

    async fn auto_select_winner(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<VariantId>, StoreError> {
        let mut inner = self.inner.write();
        let test = inner.test_mut(campaign_id)?;

        let winner = test
            .variants
            .iter()
            .max_by(|a, b| {
                a.stats
                    .click_rate()
                    .total_cmp(&b.stats.click_rate())
                    .then(a.stats.open_rate().total_cmp(&b.stats.open_rate()))
            })
            .map(|variant| variant.id);

        test.winner = winner;
        Ok(winner)
    }
}
