//! Typed error handling for dispatch operations.
//!
//! The taxonomy separates caller faults (validation, state conflicts) from
//! absent entities, send failures, and infrastructure failures. Send
//! failures are data, not control flow: the transport returns a tagged
//! [`SendError`] and retry logic branches on the tag.

use herald_common::CampaignId;
use herald_queue::QueueError;
use herald_store::StoreError;
use thiserror::Error;

/// Outcome tag for a failed send attempt.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// Worth retrying with backoff: timeouts, connection resets, greylists.
    #[error("transient send failure: {0}")]
    Transient(String),

    /// Never retried: invalid addresses, hard bounces, policy rejections.
    #[error("permanent send failure: {0}")]
    Permanent(String),
}

impl SendError {
    /// Whether this failure follows the retry/backoff path.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether this failure is recorded immediately, with no retry.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// The human-readable reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(reason) | Self::Permanent(reason) => reason,
        }
    }
}

/// Top-level error for dispatch, control, and A/B operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Malformed identifiers or options. The caller's fault; never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation is invalid for the entity's current state. Carries the
    /// observed state for caller diagnosis.
    #[error("{operation} is invalid while {state}")]
    StateConflict {
        operation: &'static str,
        state: String,
    },

    /// Dispatch was asked to start a campaign with nothing to send.
    #[error("campaign {0} has no pending recipients")]
    NoRecipients(CampaignId),

    /// Store failure: not-found lookups or an unreachable backend. The
    /// latter fails fast and flips health reporting unhealthy.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Queue failure: broker unavailable or a job gone missing.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl DispatchError {
    /// Build a state-conflict error from anything displayable.
    pub(crate) fn state_conflict(
        operation: &'static str,
        state: impl std::fmt::Display,
    ) -> Self {
        Self::StateConflict {
            operation,
            state: state.to_string(),
        }
    }

    /// Whether this error reports an absent campaign/test/variant/recipient.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}
