//! Shared harness wiring the full dispatch stack over in-memory backends.

// Each integration target exercises a different slice of the harness.
#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use herald_common::{CampaignId, RecipientId, Signal};
use herald_dispatch::{
    AbTestManager, ControlPlane, Dispatcher, MockTransport, RateLimitConfig, RateLimiter,
    WorkerConfig, WorkerPool, WorkerStatusHandle,
};
use herald_queue::{JobQueue, MemoryQueueStore};
use herald_store::{Campaign, MemoryStore, Recipient, SendOptions, Store};
use tokio::sync::broadcast;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: JobQueue,
    pub transport: Arc<MockTransport>,
    pub dispatcher: Dispatcher,
    pub control: ControlPlane,
    pub abtests: AbTestManager,
    pub status: WorkerStatusHandle,
    shutdown: broadcast::Sender<Signal>,
    workers: tokio::task::JoinHandle<()>,
}

impl Harness {
    /// Start the stack with test-friendly worker settings: fast polling,
    /// no backoff delay, no jitter.
    pub fn start() -> Self {
        Self::start_with(WorkerConfig {
            concurrency: 4,
            max_attempts: 3,
            backoff_schedule_secs: vec![0],
            retry_jitter_factor: 0.0,
            send_timeout_secs: 5,
            poll_interval_ms: 10,
            sweep_interval_secs: 3600,
        })
    }

    pub fn start_with(config: WorkerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = JobQueue::new(Arc::new(MemoryQueueStore::new()));
        let transport = MockTransport::new();
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));

        let dispatcher = Dispatcher::new(store.clone(), queue.clone());
        let control = ControlPlane::new(store.clone(), queue.clone(), dispatcher.clone());
        let abtests = AbTestManager::new(store.clone(), store.clone(), dispatcher.clone());

        let pool = WorkerPool::new(
            queue.clone(),
            store.clone(),
            transport.clone(),
            limiter,
            config,
        );
        let status = pool.status_handle();

        let (shutdown, receiver) = broadcast::channel(4);
        let workers = tokio::spawn(async move {
            let _ = pool.serve(receiver).await;
        });

        Self {
            store,
            queue,
            transport,
            dispatcher,
            control,
            abtests,
            status,
            shutdown,
            workers,
        }
    }

    /// Insert a draft campaign with `count` pending recipients named
    /// `user0@example.com`, `user1@example.com`, ...
    pub async fn seed_campaign(&self, count: usize) -> (CampaignId, Vec<RecipientId>) {
        let campaign = Campaign::new(
            "integration",
            "Hi {{name}}",
            "Hello {{email}}",
            "primary".into(),
        );
        let campaign_id = campaign.id;
        self.store.insert_campaign(campaign).await.unwrap();

        let recipients: Vec<_> = (0..count)
            .map(|i| {
                Recipient::named(campaign_id, format!("user{i}@example.com"), format!("User {i}"))
            })
            .collect();
        let ids = recipients.iter().map(|recipient| recipient.id).collect();
        self.store.insert_recipients(recipients).await.unwrap();

        (campaign_id, ids)
    }

    /// Default options used by most tests: one batch, no pacing delay.
    pub fn options(&self) -> SendOptions {
        SendOptions {
            batch_size: 1000,
            delay_between_batches_secs: 0,
            ..SendOptions::new("primary".into())
        }
    }

    pub async fn stop(self) {
        // Ensure the spawned `serve` task has been scheduled and has
        // resubscribed its workers to the broadcast channel before we send
        // the shutdown signal: a broadcast receiver created after a message
        // is sent never observes that message, so a test that never yields
        // to the worker loop would otherwise leave the signal unseen and
        // `workers.await` would hang.
        while !self.status.is_running() {
            tokio::task::yield_now().await;
        }
        let _ = self.shutdown.send(Signal::Shutdown);
        let _ = self.workers.await;
    }
}

/// Poll `check` until it returns true, panicking after ten seconds.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if check().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
