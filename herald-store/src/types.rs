//! Entity types owned by the store.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use herald_common::{
    CampaignId, CampaignStatus, JobPriority, RecipientId, RecipientStatus, SmtpConfigId, TestId,
    VariantId,
};
use serde::{Deserialize, Serialize};

const fn default_batch_size() -> usize {
    100
}

const fn default_delay_between_batches() -> u64 {
    5
}

/// Per-campaign dispatch knobs.
///
/// `delay_between_batches_secs` shapes the *enqueue* timeline only: batch
/// `i` becomes eligible `delay × i` seconds after dispatch. The worker
/// pool's concurrency caps *parallel execution*. The two are independent
/// knobs, not layered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOptions {
    /// Scheduling weight for this campaign's jobs.
    #[serde(default)]
    pub priority: JobPriority,

    /// How many recipients each paced batch contains.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds between consecutive batches becoming eligible.
    #[serde(default = "default_delay_between_batches")]
    pub delay_between_batches_secs: u64,

    /// Which SMTP configuration (and rate-limit scope) sends this campaign.
    pub smtp_config_id: SmtpConfigId,
}

impl SendOptions {
    /// Options for the given SMTP configuration with default pacing.
    #[must_use]
    pub fn new(smtp_config_id: SmtpConfigId) -> Self {
        Self {
            priority: JobPriority::default(),
            batch_size: default_batch_size(),
            delay_between_batches_secs: default_delay_between_batches(),
            smtp_config_id,
        }
    }
}

/// Monotonic per-campaign counters, updated as jobs are dispatched and
/// reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    /// Recipients ever moved into the queue.
    pub queued: u64,
    /// Sends that succeeded.
    pub sent: u64,
    /// Recipients that ended in failure.
    pub failed: u64,
}

impl CampaignStats {
    /// A delta with only the `sent` counter set.
    #[must_use]
    pub const fn one_sent() -> Self {
        Self {
            queued: 0,
            sent: 1,
            failed: 0,
        }
    }

    /// A delta with only the `failed` counter set.
    #[must_use]
    pub const fn one_failed() -> Self {
        Self {
            queued: 0,
            sent: 0,
            failed: 1,
        }
    }

    /// Add another set of counters onto this one.
    pub fn add(&mut self, delta: Self) {
        self.queued = self.queued.saturating_add(delta.queued);
        self.sent = self.sent.saturating_add(delta.sent);
        self.failed = self.failed.saturating_add(delta.failed);
    }
}

/// A bulk-send unit with its own recipient set and lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    /// Subject template; merge tags are substituted per recipient.
    pub subject: String,
    /// Body template; merge tags are substituted per recipient.
    pub body: String,
    pub status: CampaignStatus,
    /// When set in the future, dispatch only records Scheduled and the
    /// actual enqueue happens once this time arrives.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub send_options: SendOptions,
    pub stats: CampaignStats,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// Create a draft campaign.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        smtp_config_id: SmtpConfigId,
    ) -> Self {
        Self {
            id: CampaignId::generate(),
            name: name.into(),
            subject: subject.into(),
            body: body.into(),
            status: CampaignStatus::Draft,
            scheduled_at: None,
            send_options: SendOptions::new(smtp_config_id),
            stats: CampaignStats::default(),
            created_at: Utc::now(),
        }
    }
}

/// One addressee within a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub campaign_id: CampaignId,
    pub email: String,
    pub name: Option<String>,
    /// Additional merge-tag values beyond the built-in `email`, `name`,
    /// and `tracking_id` tags.
    #[serde(default)]
    pub merge_fields: AHashMap<String, String>,
    pub status: RecipientStatus,
    /// Opaque id embedded in tracking links and pixels.
    pub tracking_id: String,
    /// A/B variant this recipient was assigned to, if any.
    pub variant_id: Option<VariantId>,
    /// Last recorded failure, cleared on retry.
    pub error_message: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Recipient {
    /// Create a pending recipient for a campaign.
    #[must_use]
    pub fn new(campaign_id: CampaignId, email: impl Into<String>) -> Self {
        Self {
            id: RecipientId::generate(),
            campaign_id,
            email: email.into(),
            name: None,
            merge_fields: AHashMap::new(),
            status: RecipientStatus::Pending,
            tracking_id: ulid::Ulid::new().to_string(),
            variant_id: None,
            error_message: None,
            queued_at: None,
            sent_at: None,
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            failed_at: None,
        }
    }

    /// Create a pending recipient with a display name.
    #[must_use]
    pub fn named(
        campaign_id: CampaignId,
        email: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(campaign_id, email)
        }
    }

    /// Apply a status change and stamp the matching timestamp field.
    pub fn record_status(&mut self, status: RecipientStatus, now: DateTime<Utc>) {
        self.status = status;
        match status {
            RecipientStatus::Queued => self.queued_at = Some(now),
            RecipientStatus::Sent => self.sent_at = Some(now),
            RecipientStatus::Delivered => self.delivered_at = Some(now),
            RecipientStatus::Opened => self.opened_at = Some(now),
            RecipientStatus::Clicked => self.clicked_at = Some(now),
            RecipientStatus::Failed | RecipientStatus::Bounced => self.failed_at = Some(now),
            RecipientStatus::Pending | RecipientStatus::Unsubscribed => {}
        }
    }
}

/// Lifecycle state of an A/B test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbTestStatus {
    Draft,
    Running,
    Completed,
}

/// Recipient interaction kinds aggregated per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbTestEvent {
    Sent,
    Opened,
    Clicked,
    Bounced,
    Converted,
}

/// Aggregated interaction counters for one variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantStats {
    pub sent: u64,
    pub opened: u64,
    pub clicked: u64,
    pub bounced: u64,
    pub converted: u64,
}

impl VariantStats {
    /// Bump the counter for one event.
    pub fn record(&mut self, event: AbTestEvent) {
        let counter = match event {
            AbTestEvent::Sent => &mut self.sent,
            AbTestEvent::Opened => &mut self.opened,
            AbTestEvent::Clicked => &mut self.clicked,
            AbTestEvent::Bounced => &mut self.bounced,
            AbTestEvent::Converted => &mut self.converted,
        };
        *counter = counter.saturating_add(1);
    }

    /// Opens per send; zero when nothing was sent.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "Counters stay far below 2^52")]
    pub fn open_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.opened as f64 / self.sent as f64
        }
    }

    /// Clicks per send; zero when nothing was sent.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "Counters stay far below 2^52")]
    pub fn click_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.clicked as f64 / self.sent as f64
        }
    }
}

/// One content alternative within an A/B test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTestVariant {
    pub id: VariantId,
    pub name: String,
    /// Subject override; `None` falls back to the campaign subject.
    pub subject: Option<String>,
    /// Body override; `None` falls back to the campaign body.
    pub body: Option<String>,
    /// Recipients assigned to this variant's test group.
    pub recipient_ids: Vec<RecipientId>,
    pub stats: VariantStats,
}

impl AbTestVariant {
    /// Create an empty variant.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: VariantId::generate(),
            name: name.into(),
            subject: None,
            body: None,
            recipient_ids: Vec::new(),
            stats: VariantStats::default(),
        }
    }
}

/// An A/B test attached to a campaign: a sampled set of test groups plus
/// the remaining pool that later receives the winning content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTest {
    pub id: TestId,
    pub campaign_id: CampaignId,
    pub status: AbTestStatus,
    /// Share of the recipient set used for the test groups, in percent.
    pub sample_percent: u8,
    pub variants: Vec<AbTestVariant>,
    /// Recipients outside every test group; they receive the winner.
    pub remaining_recipient_ids: Vec<RecipientId>,
    pub winner: Option<VariantId>,
}

impl AbTest {
    /// Create a draft test for a campaign.
    #[must_use]
    pub fn new(campaign_id: CampaignId, sample_percent: u8) -> Self {
        Self {
            id: TestId::generate(),
            campaign_id,
            status: AbTestStatus::Draft,
            sample_percent,
            variants: Vec::new(),
            remaining_recipient_ids: Vec::new(),
            winner: None,
        }
    }

    /// Look up a variant by id.
    #[must_use]
    pub fn variant(&self, id: VariantId) -> Option<&AbTestVariant> {
        self.variants.iter().find(|variant| variant.id == id)
    }
}
