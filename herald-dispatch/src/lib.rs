//! Campaign dispatch orchestration.
//!
//! This crate owns the hard part of the platform: turning a campaign with
//! many thousands of recipients into paced, batched jobs on the durable
//! queue, draining them through a bounded worker pool under per-SMTP-config
//! rate limits, and keeping the recipient store consistent with what was
//! actually enqueued, all while pause/resume/cancel/retry operate on the run
//! mid-flight.

pub mod abtest;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod rate_limiter;
pub mod render;
pub mod retry;
pub mod transport;
pub mod worker;

pub use abtest::{AbTestManager, AbTestResults, RecipientSplit, split_recipients};
pub use control::{CancelReceipt, ControlPlane, RetryReceipt};
pub use dispatcher::{DispatchReceipt, Dispatcher, MessageContent};
pub use error::{DispatchError, SendError};
pub use rate_limiter::{RateLimitConfig, RateLimitStats, RateLimiter, ScopeRateLimit};
pub use transport::{MockTransport, OutboundEmail, SendReceipt, Transport};
pub use worker::{WorkerConfig, WorkerPool, WorkerStatus, WorkerStatusHandle};
