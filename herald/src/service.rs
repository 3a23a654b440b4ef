//! Service assembly and lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use herald_common::Signal;
use herald_dispatch::{
    AbTestManager, ControlPlane, DispatchError, Dispatcher, OutboundEmail, RateLimiter,
    SendError, SendReceipt, Transport, WorkerPool,
};
use herald_health::HealthMonitor;
use herald_queue::{FileQueueStore, JobQueue, MemoryQueueStore, QueueError, QueueStore};
use herald_store::MemoryStore;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::{HeraldConfig, QueueBackend};

/// Errors raised while assembling or running the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The queue backend failed to open or restore.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The worker pool failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Transport that logs each send and reports success.
///
/// Used by the bundled binary for local runs; real deployments inject
/// their provider client instead.
#[derive(Debug, Default)]
pub struct DryRunTransport;

#[async_trait]
impl Transport for DryRunTransport {
    async fn send_email(&self, email: &OutboundEmail) -> Result<SendReceipt, SendError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            tracking_id = %email.tracking_id,
            "Dry-run send"
        );
        Ok(SendReceipt { message_id: None })
    }
}

/// The assembled engine: stores, queue, worker pool, control surface, and
/// health monitor sharing injected handles.
#[derive(Debug)]
pub struct Herald {
    pub store: Arc<MemoryStore>,
    pub queue: JobQueue,
    pub dispatcher: Dispatcher,
    pub control: ControlPlane,
    pub abtests: AbTestManager,
    pub health: HealthMonitor,
    pool: WorkerPool,
}

impl Herald {
    /// Assemble the engine from configuration, restoring any jobs the
    /// queue backend persisted before the last shutdown.
    ///
    /// # Errors
    /// Returns an error when the queue backend cannot be opened or read.
    pub async fn build(
        config: &HeraldConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ServiceError> {
        let queue_store: Arc<dyn QueueStore> = match config.queue.backend {
            QueueBackend::Memory => Arc::new(MemoryQueueStore::new()),
            QueueBackend::File => Arc::new(FileQueueStore::new(&config.queue.path)),
        };
        queue_store.connect().await?;

        let queue = JobQueue::new(queue_store);
        let restored = queue.restore().await?;
        if restored > 0 {
            info!(restored, "Restored persisted jobs");
        }

        let store = Arc::new(MemoryStore::new());
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));

        let dispatcher = Dispatcher::new(store.clone(), queue.clone());
        let control = ControlPlane::new(store.clone(), queue.clone(), dispatcher.clone());
        let abtests = AbTestManager::new(store.clone(), store.clone(), dispatcher.clone());

        let pool = WorkerPool::new(
            queue.clone(),
            store.clone(),
            transport,
            limiter,
            config.workers.clone(),
        );
        let health = HealthMonitor::new(queue.clone(), pool.status_handle());

        Ok(Self {
            store,
            queue,
            dispatcher,
            control,
            abtests,
            health,
            pool,
        })
    }

    /// Run the worker pool until shutdown, then close the queue backend.
    ///
    /// # Errors
    /// Returns the first failure from the pool or the backend close.
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) -> Result<(), ServiceError> {
        self.pool.serve(shutdown).await?;
        self.queue.close().await?;
        Ok(())
    }
}
