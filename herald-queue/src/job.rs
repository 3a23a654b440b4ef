//! Job types for the durable queue.

use core::fmt::{self, Display, Formatter};

use herald_common::{CampaignId, JobId, JobPriority, RecipientId, SmtpConfigId, unix_now};
use serde::{Deserialize, Serialize};

/// Queue-visible state of a job.
///
/// A waiting job whose `not_before` is still in the future is enumerated as
/// *delayed*; storage-wise it is the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    /// Completed and Failed jobs never run again; they linger only until
    /// an administrative clean removes them.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl Display for JobState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// One transient unit of dispatch work: send one rendered email to one
/// recipient.
///
/// Jobs exist only inside the queue and are never persisted elsewhere. The
/// subject and body carry the content chosen at dispatch time (a variant
/// override is already applied); merge tags are substituted by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
    pub smtp_config_id: SmtpConfigId,
    pub subject: String,
    pub body: String,
    /// Completed delivery attempts so far.
    pub attempt: u32,
    pub priority: JobPriority,
    /// Unix seconds before which the job must not start.
    pub not_before: u64,
    /// Unix seconds when the job entered the queue.
    pub enqueued_at: u64,
    pub state: JobState,
    /// Most recent failure, if any.
    pub last_error: Option<String>,
    /// Unix seconds when the job reached a terminal state.
    pub finished_at: Option<u64>,
}

impl Job {
    /// Create a waiting job eligible at `not_before`.
    #[must_use]
    pub fn new(
        campaign_id: CampaignId,
        recipient_id: RecipientId,
        smtp_config_id: SmtpConfigId,
        subject: impl Into<String>,
        body: impl Into<String>,
        priority: JobPriority,
        not_before: u64,
    ) -> Self {
        Self {
            id: JobId::generate(),
            campaign_id,
            recipient_id,
            smtp_config_id,
            subject: subject.into(),
            body: body.into(),
            attempt: 0,
            priority,
            not_before,
            enqueued_at: unix_now(),
            state: JobState::Waiting,
            last_error: None,
            finished_at: None,
        }
    }

    /// Waiting and eligible to start.
    #[must_use]
    pub fn is_ready(&self, now: u64) -> bool {
        self.state == JobState::Waiting && self.not_before <= now
    }

    /// Waiting but scheduled in the future.
    #[must_use]
    pub fn is_delayed(&self, now: u64) -> bool {
        self.state == JobState::Waiting && self.not_before > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(not_before: u64) -> Job {
        Job::new(
            CampaignId::generate(),
            RecipientId::generate(),
            "primary".into(),
            "subject",
            "body",
            JobPriority::Normal,
            not_before,
        )
    }

    #[test]
    fn readiness_follows_not_before() {
        let ready = job(100);
        assert!(ready.is_ready(100));
        assert!(ready.is_ready(500));
        assert!(!ready.is_ready(99));
        assert!(ready.is_delayed(99));
        assert!(!ready.is_delayed(100));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Active.is_terminal());
    }
}
