//! Typed error handling for store operations.

use herald_common::{CampaignId, CampaignStatus, RecipientId, RecipientStatus, VariantId};
use thiserror::Error;

/// Errors returned by the campaign, recipient, and A/B test stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Campaign does not exist.
    #[error("campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    /// Recipient does not exist.
    #[error("recipient not found: {0}")]
    RecipientNotFound(RecipientId),

    /// No A/B test is attached to the campaign.
    #[error("no A/B test for campaign: {0}")]
    TestNotFound(CampaignId),

    /// Variant does not exist within the campaign's test.
    #[error("variant not found: {0}")]
    VariantNotFound(VariantId),

    /// A guarded campaign transition observed an unexpected current status.
    ///
    /// Carries the observed status so callers can diagnose the conflict.
    #[error("campaign {id} is {status}, expected one of [{expected}]")]
    StatusConflict {
        id: CampaignId,
        status: CampaignStatus,
        expected: String,
    },

    /// A recipient transition would violate the delivery funnel.
    #[error("illegal recipient transition {from} -> {to}")]
    IllegalTransition {
        from: RecipientStatus,
        to: RecipientStatus,
    },

    /// The backing store cannot be reached. Operations fail fast and the
    /// health endpoints report unhealthy.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Other internal errors.
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether this error reports an absent entity.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CampaignNotFound(_)
                | Self::RecipientNotFound(_)
                | Self::TestNotFound(_)
                | Self::VariantNotFound(_)
        )
    }
}
