//! Campaign and recipient lifecycle states.
//!
//! The wire form (`SCREAMING_SNAKE_CASE`) matches what the store records,
//! so status values round-trip unchanged through persistence and the API
//! layer above it.

use core::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    /// Whether a dispatch run may start from this state.
    ///
    /// Draft and Scheduled are the only states from which `queue_campaign`
    /// may begin; everything else is a state conflict.
    #[must_use]
    pub const fn can_begin_dispatch(self) -> bool {
        matches!(self, Self::Draft | Self::Scheduled)
    }

    /// States that never transition out again.
    ///
    /// Completed is deliberately not terminal: retrying failed recipients
    /// moves a Completed campaign back to Sending.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed)
    }
}

impl Display for CampaignStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(match self {
            Self::Draft => "DRAFT",
            Self::Scheduled => "SCHEDULED",
            Self::Sending => "SENDING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        })
    }
}

/// Delivery state of one recipient within a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientStatus {
    Pending,
    Queued,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Failed,
    Unsubscribed,
}

impl RecipientStatus {
    /// Position along the delivery funnel; absorbing states have none.
    const fn funnel_rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Queued => Some(1),
            Self::Sent => Some(2),
            Self::Delivered => Some(3),
            Self::Opened => Some(4),
            Self::Clicked => Some(5),
            Self::Bounced | Self::Failed | Self::Unsubscribed => None,
        }
    }

    /// Bounced, Failed, and Unsubscribed absorb the recipient: no further
    /// funnel progress is recorded for them.
    #[must_use]
    pub const fn is_absorbing(self) -> bool {
        matches!(self, Self::Bounced | Self::Failed | Self::Unsubscribed)
    }

    /// Whether moving to `next` is a legal transition.
    ///
    /// Funnel moves are strictly forward (skips are fine: a click implies an
    /// open even when the open pixel never fired). Absorbing states are
    /// reachable from Queued or Sent. Two administrative resets exist:
    /// Failed recipients return to Pending when a retry is requested, and
    /// Queued recipients revert to Pending when their campaign is cancelled
    /// before their job started.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if next.is_absorbing() {
            return matches!(self, Self::Queued | Self::Sent);
        }

        match (self, next) {
            (Self::Failed | Self::Queued, Self::Pending) => true,
            _ => match (self.funnel_rank(), next.funnel_rank()) {
                (Some(current), Some(next)) => next > current,
                _ => false,
            },
        }
    }
}

impl Display for RecipientStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Opened => "OPENED",
            Self::Clicked => "CLICKED",
            Self::Bounced => "BOUNCED",
            Self::Failed => "FAILED",
            Self::Unsubscribed => "UNSUBSCRIBED",
        })
    }
}
