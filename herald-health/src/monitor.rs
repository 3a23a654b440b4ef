//! Health snapshot aggregation.

use std::time::{Duration, Instant};

use herald_common::JobId;
use herald_dispatch::{WorkerStatus, WorkerStatusHandle};
use herald_queue::{JobCounts, JobQueue, JobState};
use serde::Serialize;
use tracing::debug;

use crate::HealthError;

/// How long a broker probe may take before it counts as down.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Point-in-time queue health for operators.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealthSnapshot {
    /// False when the broker probe fails.
    pub healthy: bool,
    /// Job counts per state.
    pub stats: JobCounts,
    /// Campaigns with outstanding work.
    pub active_campaigns: usize,
}

/// Broker connectivity probe result.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerHealth {
    pub connected: bool,
    /// Probe round-trip time in milliseconds.
    pub latency_ms: u64,
    /// The failure, when disconnected.
    pub error: Option<String>,
}

/// Read-only aggregation over the queue and worker pool.
///
/// Handles are injected; the monitor holds no state of its own and every
/// snapshot is recomputed on read.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    queue: JobQueue,
    workers: WorkerStatusHandle,
}

impl HealthMonitor {
    /// Create a monitor over the injected handles.
    #[must_use]
    pub fn new(queue: JobQueue, workers: WorkerStatusHandle) -> Self {
        Self { queue, workers }
    }

    /// Queue depth and campaign activity, with an overall healthy flag.
    pub async fn queue_health(&self) -> QueueHealthSnapshot {
        let broker = self.broker_health().await;

        QueueHealthSnapshot {
            healthy: broker.connected,
            stats: self.queue.counts(),
            active_campaigns: self.queue.active_campaigns(),
        }
    }

    /// Probe the queue's persistence backend and measure the round trip.
    pub async fn broker_health(&self) -> BrokerHealth {
        let started = Instant::now();
        let outcome = tokio::time::timeout(PROBE_TIMEOUT, self.queue.ping()).await;
        let latency_ms =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(Ok(())) => BrokerHealth {
                connected: true,
                latency_ms,
                error: None,
            },
            Ok(Err(e)) => {
                debug!(error = %e, "Broker probe failed");
                BrokerHealth {
                    connected: false,
                    latency_ms,
                    error: Some(e.to_string()),
                }
            }
            Err(_) => BrokerHealth {
                connected: false,
                latency_ms,
                error: Some(format!(
                    "broker probe timed out after {}s",
                    PROBE_TIMEOUT.as_secs()
                )),
            },
        }
    }

    /// The worker pool's running/paused/concurrency view.
    #[must_use]
    pub fn worker_status(&self) -> WorkerStatus {
        self.workers.status()
    }

    /// Remove up to `limit` terminal jobs older than `grace_period`.
    ///
    /// Administrative only; recipient records are never touched.
    ///
    /// # Errors
    /// Rejects non-terminal states; backend failures surface as-is.
    pub async fn clean_queue(
        &self,
        grace_period: Duration,
        limit: usize,
        state: JobState,
    ) -> Result<Vec<JobId>, HealthError> {
        Ok(self.queue.clean(grace_period, limit, state).await?)
    }
}
