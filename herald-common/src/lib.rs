pub mod ids;
pub mod priority;
pub mod status;

pub use ids::{CampaignId, JobId, RecipientId, SmtpConfigId, TestId, VariantId};
pub use priority::JobPriority;
pub use status::{CampaignStatus, RecipientStatus};

/// Broadcast value used to coordinate graceful shutdown across services.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
}

/// Seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
