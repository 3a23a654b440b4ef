//! A/B test split and winner rollout.
//!
//! Splitting is a pure partition over an ordered recipient list; no side
//! effects until dispatch. Rollout reuses the dispatcher's batching
//! primitive, so variant sends and the winner send share the same pacing
//! and failure model as any other campaign dispatch.

use std::sync::Arc;

use herald_common::{CampaignId, RecipientId, RecipientStatus, VariantId};
use herald_store::{AbTest, AbTestEvent, AbTestStatus, AbTestVariant, Store, StoreError, TestStore};
use tracing::{debug, info};

use crate::{
    dispatcher::{DispatchReceipt, Dispatcher, MessageContent},
    error::DispatchError,
};

/// Result of partitioning a recipient set for a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientSplit {
    /// Total recipients across all test groups.
    pub total_test_recipients: usize,
    /// One group per variant, in variant order.
    pub groups: Vec<(VariantId, Vec<RecipientId>)>,
    /// Everyone else; they receive the winner later.
    pub remaining_recipient_ids: Vec<RecipientId>,
}

/// Partition `recipient_ids` into per-variant test groups plus the
/// remaining pool.
///
/// `round(total × percent / 100)` recipients are divided as evenly as
/// possible across the variants, any remainder going to the first
/// variants. Deterministic given the same input ordering; no side effects.
#[must_use]
pub fn split_recipients(
    recipient_ids: &[RecipientId],
    sample_percent: u8,
    variant_ids: &[VariantId],
) -> RecipientSplit {
    let total = recipient_ids.len();

    let total_test_recipients = if variant_ids.is_empty() {
        0
    } else {
        // Integer round-half-up of total × percent / 100.
        ((total * usize::from(sample_percent) + 50) / 100).min(total)
    };

    let mut groups = Vec::with_capacity(variant_ids.len());
    let mut cursor = 0;

    if !variant_ids.is_empty() {
        let base = total_test_recipients / variant_ids.len();
        let remainder = total_test_recipients % variant_ids.len();

        for (index, variant_id) in variant_ids.iter().enumerate() {
            let size = base + usize::from(index < remainder);
            let group = recipient_ids[cursor..cursor + size].to_vec();
            cursor += size;
            groups.push((*variant_id, group));
        }
    }

    RecipientSplit {
        total_test_recipients,
        groups,
        remaining_recipient_ids: recipient_ids[cursor..].to_vec(),
    }
}

/// Aggregated results of a campaign's test.
#[derive(Debug, Clone)]
pub struct AbTestResults {
    /// Whether the test finished (winner rolled out).
    pub is_complete: bool,
    pub winner: Option<VariantId>,
    /// Variants with their counters.
    pub variants: Vec<AbTestVariant>,
}

/// Dispatch-time A/B operations over the shared dispatch primitive.
#[derive(Debug, Clone)]
pub struct AbTestManager {
    store: Arc<dyn Store>,
    tests: Arc<dyn TestStore>,
    dispatcher: Dispatcher,
}

impl AbTestManager {
    /// Create a manager over the injected collaborators.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, tests: Arc<dyn TestStore>, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            tests,
            dispatcher,
        }
    }

    /// Partition the campaign's pending recipients for a test.
    ///
    /// Pure with respect to the stores: nothing is written until the test
    /// is dispatched.
    ///
    /// # Errors
    /// Validation error for a percentage outside 1..=100; store errors
    /// surface as-is.
    pub async fn split_for_campaign(
        &self,
        campaign_id: CampaignId,
        sample_percent: u8,
        variant_ids: &[VariantId],
    ) -> Result<RecipientSplit, DispatchError> {
        if sample_percent == 0 || sample_percent > 100 {
            return Err(DispatchError::Validation(format!(
                "sample percent must be within 1..=100, got {sample_percent}"
            )));
        }

        let pending = self
            .store
            .recipients_in_status(campaign_id, RecipientStatus::Pending)
            .await?;
        let recipient_ids: Vec<_> = pending.iter().map(|recipient| recipient.id).collect();

        Ok(split_recipients(
            &recipient_ids,
            sample_percent,
            variant_ids,
        ))
    }

    /// Dispatch each variant's content to its assigned test group.
    ///
    /// # Errors
    /// Not-found without a campaign or test; state conflict unless the
    /// test is Draft with at least two variants.
    pub async fn queue_ab_test_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<DispatchReceipt, DispatchError> {
        let campaign = self.store.campaign(campaign_id).await?;
        let test = self.require_test(campaign_id).await?;

        if test.status != AbTestStatus::Draft {
            return Err(DispatchError::state_conflict(
                "queue_ab_test_campaign",
                format!("test is {:?}", test.status),
            ));
        }
        if test.variants.len() < 2 {
            return Err(DispatchError::state_conflict(
                "queue_ab_test_campaign",
                format!("only {} variant(s) configured", test.variants.len()),
            ));
        }

        let mut receipt = DispatchReceipt::default();
        for variant in &test.variants {
            if variant.recipient_ids.is_empty() {
                continue;
            }

            self.store
                .assign_variant(&variant.recipient_ids, variant.id)
                .await?;

            let variant_receipt = self
                .dispatcher
                .dispatch_batches(
                    campaign_id,
                    &variant.recipient_ids,
                    MessageContent {
                        subject: variant.subject.as_deref().unwrap_or(&campaign.subject),
                        body: variant.body.as_deref().unwrap_or(&campaign.body),
                    },
                    &campaign.send_options,
                )
                .await?;

            receipt.queued_count += variant_receipt.queued_count;
            receipt.batch_count += variant_receipt.batch_count;
        }

        self.tests
            .update_test_status(campaign_id, AbTestStatus::Running)
            .await?;

        info!(
            campaign_id = %campaign_id,
            variants = test.variants.len(),
            queued = receipt.queued_count,
            "A/B test dispatched"
        );
        Ok(receipt)
    }

    /// Dispatch the winning variant's content to the remaining pool.
    ///
    /// Succeeds trivially with a zero count when the pool is empty. The
    /// test is marked Completed with the winner recorded either way.
    ///
    /// # Errors
    /// Not-found without a campaign, test, or matching winner variant.
    pub async fn send_to_remaining_recipients(
        &self,
        campaign_id: CampaignId,
        winner_variant_id: VariantId,
    ) -> Result<DispatchReceipt, DispatchError> {
        let campaign = self.store.campaign(campaign_id).await?;
        let test = self.require_test(campaign_id).await?;
        let winner = test
            .variant(winner_variant_id)
            .ok_or(StoreError::VariantNotFound(winner_variant_id))?;

        let receipt = if test.remaining_recipient_ids.is_empty() {
            DispatchReceipt::default()
        } else {
            self.dispatcher
                .dispatch_batches(
                    campaign_id,
                    &test.remaining_recipient_ids,
                    MessageContent {
                        subject: winner.subject.as_deref().unwrap_or(&campaign.subject),
                        body: winner.body.as_deref().unwrap_or(&campaign.body),
                    },
                    &campaign.send_options,
                )
                .await?
        };

        self.tests
            .set_winner(campaign_id, winner_variant_id)
            .await?;
        self.tests
            .update_test_status(campaign_id, AbTestStatus::Completed)
            .await?;

        info!(
            campaign_id = %campaign_id,
            winner = %winner_variant_id,
            queued = receipt.queued_count,
            "Winner rolled out to remaining recipients"
        );
        Ok(receipt)
    }

    /// Record a recipient interaction against their assigned variant.
    ///
    /// A recipient without a variant assignment was never part of the
    /// test; the event is ignored.
    ///
    /// # Errors
    /// Not-found for an unknown recipient; store errors surface as-is.
    pub async fn record_event(
        &self,
        recipient_id: RecipientId,
        event: AbTestEvent,
    ) -> Result<(), DispatchError> {
        let recipient = self.store.recipient(recipient_id).await?;

        let Some(variant_id) = recipient.variant_id else {
            debug!(
                recipient_id = %recipient_id,
                "Recipient not part of a test, ignoring event"
            );
            return Ok(());
        };

        self.tests
            .record_variant_event(recipient.campaign_id, variant_id, event)
            .await?;
        Ok(())
    }

    /// The campaign's test results, or `None` without a test.
    ///
    /// # Errors
    /// Store errors surface as-is.
    pub async fn results(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<AbTestResults>, DispatchError> {
        Ok(self
            .tests
            .test_by_campaign(campaign_id)
            .await?
            .map(|test| AbTestResults {
                is_complete: test.status == AbTestStatus::Completed,
                winner: test.winner,
                variants: test.variants,
            }))
    }

    /// Whether the campaign has a test attached.
    ///
    /// # Errors
    /// Store errors surface as-is.
    pub async fn campaign_has_ab_test(
        &self,
        campaign_id: CampaignId,
    ) -> Result<bool, DispatchError> {
        Ok(self.tests.test_by_campaign(campaign_id).await?.is_some())
    }

    async fn require_test(&self, campaign_id: CampaignId) -> Result<AbTest, DispatchError> {
        self.tests
            .test_by_campaign(campaign_id)
            .await?
            .ok_or_else(|| StoreError::TestNotFound(campaign_id).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(count: usize) -> Vec<RecipientId> {
        (0..count).map(|_| RecipientId::generate()).collect()
    }

    fn variants(count: usize) -> Vec<VariantId> {
        (0..count).map(|_| VariantId::generate()).collect()
    }

    #[test]
    fn hundred_recipients_twenty_percent_two_variants() {
        let recipients = ids(100);
        let split = split_recipients(&recipients, 20, &variants(2));

        assert_eq!(split.total_test_recipients, 20);
        assert_eq!(split.groups.len(), 2);
        assert_eq!(split.groups[0].1.len(), 10);
        assert_eq!(split.groups[1].1.len(), 10);
        assert_eq!(split.remaining_recipient_ids.len(), 80);
    }

    #[test]
    fn fifty_recipients_thirty_percent_three_variants() {
        let recipients = ids(50);
        let split = split_recipients(&recipients, 30, &variants(3));

        assert_eq!(split.total_test_recipients, 15);
        for (_, group) in &split.groups {
            assert_eq!(group.len(), 5);
        }
        assert_eq!(split.remaining_recipient_ids.len(), 35);
    }

    #[test]
    fn remainder_goes_to_the_first_variants() {
        let recipients = ids(100);
        // 11 test recipients over 3 variants: 4 + 4 + 3.
        let split = split_recipients(&recipients, 11, &variants(3));

        assert_eq!(split.total_test_recipients, 11);
        assert_eq!(split.groups[0].1.len(), 4);
        assert_eq!(split.groups[1].1.len(), 4);
        assert_eq!(split.groups[2].1.len(), 3);
        assert_eq!(split.remaining_recipient_ids.len(), 89);
    }

    #[test]
    fn split_is_deterministic_and_covers_everyone_once() {
        let recipients = ids(37);
        let variant_ids = variants(2);

        let first = split_recipients(&recipients, 40, &variant_ids);
        let second = split_recipients(&recipients, 40, &variant_ids);
        assert_eq!(first, second);

        let mut seen: Vec<RecipientId> = first
            .groups
            .iter()
            .flat_map(|(_, group)| group.iter().copied())
            .chain(first.remaining_recipient_ids.iter().copied())
            .collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 37);
    }

    #[test]
    fn no_variants_means_no_test_group() {
        let recipients = ids(10);
        let split = split_recipients(&recipients, 50, &[]);

        assert_eq!(split.total_test_recipients, 0);
        assert!(split.groups.is_empty());
        assert_eq!(split.remaining_recipient_ids.len(), 10);
    }

    #[test]
    fn full_sample_leaves_no_remainder() {
        let recipients = ids(9);
        let split = split_recipients(&recipients, 100, &variants(2));

        assert_eq!(split.total_test_recipients, 9);
        assert_eq!(split.groups[0].1.len(), 5);
        assert_eq!(split.groups[1].1.len(), 4);
        assert!(split.remaining_recipient_ids.is_empty());
    }
}
