//! Health reporting: queue depth, broker connectivity, worker status.
//!
//! The monitor only reads. Snapshots are recomputed on every call and
//! never persisted.

pub mod error;
pub mod monitor;

pub use error::HealthError;
pub use monitor::{BrokerHealth, HealthMonitor, QueueHealthSnapshot};
