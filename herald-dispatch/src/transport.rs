//! Send transport abstraction.
//!
//! The actual SMTP/provider protocol lives behind [`Transport`]; this crate
//! only cares about the tagged outcome of each attempt. The bundled
//! [`MockTransport`] scripts outcomes per address and lets tests wait for
//! sends to land.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use herald_common::{CampaignId, RecipientId, SmtpConfigId};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::SendError;

/// One fully rendered email, ready for the wire.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
    pub smtp_config_id: SmtpConfigId,
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Embedded in tracking links and the open pixel.
    pub tracking_id: String,
}

/// Acknowledgement of an accepted send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Provider-side message id, when the provider returns one.
    pub message_id: Option<String>,
}

/// The send collaborator.
///
/// A send attempt either succeeds with a receipt or fails with a tagged
/// [`SendError`]; the worker's retry logic branches on that tag alone.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Attempt one delivery.
    async fn send_email(&self, email: &OutboundEmail) -> Result<SendReceipt, SendError>;
}

/// Scriptable in-memory transport for tests.
///
/// Failures are scripted per address: `fail_transient` makes the next N
/// attempts fail with a transient error, `fail_permanent` rejects the
/// address outright. Every attempt is counted; successes are recorded and
/// waiters are notified so tests can block until a send count is reached.
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Mutex<Vec<OutboundEmail>>,
    attempts: DashMap<String, u32>,
    transient_failures: DashMap<String, u32>,
    permanent_failures: DashSet<String>,
    notify: Notify,
}

impl MockTransport {
    /// Create a transport that accepts everything.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `times` attempts for `address` fail transiently.
    pub fn fail_transient(&self, address: impl Into<String>, times: u32) {
        self.transient_failures.insert(address.into(), times);
    }

    /// Reject every attempt for `address` with a permanent failure.
    pub fn fail_permanent(&self, address: impl Into<String>) {
        self.permanent_failures.insert(address.into());
    }

    /// Stop failing `address`.
    pub fn clear_failures(&self, address: &str) {
        self.transient_failures.remove(address);
        self.permanent_failures.remove(address);
    }

    /// Emails accepted so far, in acceptance order.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().clone()
    }

    /// Number of emails accepted so far.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Total attempts (accepted or failed) for one address.
    #[must_use]
    pub fn attempts_for(&self, address: &str) -> u32 {
        self.attempts.get(address).map_or(0, |count| *count)
    }

    /// Block until at least `expected` emails were accepted.
    ///
    /// # Errors
    /// Returns an error if the timeout elapses first.
    pub async fn wait_for_count(
        &self,
        expected: usize,
        timeout: std::time::Duration,
    ) -> Result<(), tokio::time::error::Elapsed> {
        tokio::time::timeout(timeout, async {
            loop {
                // Register interest before checking, so a send landing
                // in between cannot be missed.
                let notified = self.notify.notified();
                if self.sent_count() >= expected {
                    return;
                }
                notified.await;
            }
        })
        .await
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_email(&self, email: &OutboundEmail) -> Result<SendReceipt, SendError> {
        *self.attempts.entry(email.to.clone()).or_insert(0) += 1;

        if self.permanent_failures.contains(&email.to) {
            return Err(SendError::Permanent(format!(
                "mock permanent failure for {}",
                email.to
            )));
        }

        if let Some(mut remaining) = self.transient_failures.get_mut(&email.to)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(SendError::Transient(format!(
                "mock transient failure for {}",
                email.to
            )));
        }

        self.sent.lock().push(email.clone());
        self.notify.notify_waiters();

        Ok(SendReceipt {
            message_id: Some(ulid::Ulid::new().to_string()),
        })
    }
}
