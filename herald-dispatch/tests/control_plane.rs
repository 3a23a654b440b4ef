//! Pause, resume, cancel, and retry against a live worker pool.

mod support;

use std::time::Duration;

use herald_common::{CampaignStatus, RecipientStatus};
use herald_dispatch::DispatchError;
use herald_store::{SendOptions, Store};
use support::{Harness, wait_until};

#[tokio::test]
async fn pause_and_resume_without_duplicate_sends() {
    let harness = Harness::start();
    let (campaign_id, _) = harness.seed_campaign(10).await;

    // Hold the workers so everything is still queued when the pause lands.
    harness.status.pause();
    harness
        .dispatcher
        .queue_campaign(campaign_id, harness.options(), None)
        .await
        .unwrap();

    assert!(harness.control.pause_campaign(campaign_id).await.unwrap());
    assert_eq!(
        harness.store.campaign(campaign_id).await.unwrap().status,
        CampaignStatus::Paused
    );

    // Workers run again, but the campaign is held: nothing may start.
    harness.status.resume();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.transport.sent_count(), 0);
    assert_eq!(harness.queue.counts().active, 0);
    assert_eq!(harness.queue.counts().waiting, 10);

    // Resume lets the existing jobs proceed; none are re-created.
    assert!(harness.control.resume_campaign(campaign_id).await.unwrap());
    harness
        .transport
        .wait_for_count(10, Duration::from_secs(10))
        .await
        .unwrap();
    wait_until("campaign completed", || async {
        harness.store.campaign(campaign_id).await.unwrap().status == CampaignStatus::Completed
    })
    .await;

    for i in 0..10 {
        assert_eq!(
            harness.transport.attempts_for(&format!("user{i}@example.com")),
            1
        );
    }
    assert_eq!(harness.queue.counts().completed, 10);

    harness.stop().await;
}

#[tokio::test]
async fn pause_is_idempotent_but_guarded_by_state() {
    let harness = Harness::start();
    let (sending, _) = harness.seed_campaign(2).await;
    let (draft, _) = harness.seed_campaign(2).await;

    harness.status.pause();
    harness
        .dispatcher
        .queue_campaign(sending, harness.options(), None)
        .await
        .unwrap();

    assert!(harness.control.pause_campaign(sending).await.unwrap());
    // Pausing again is a no-op success.
    assert!(harness.control.pause_campaign(sending).await.unwrap());

    // Resuming a campaign that is already Sending is also a no-op success.
    assert!(harness.control.resume_campaign(sending).await.unwrap());
    assert!(harness.control.resume_campaign(sending).await.unwrap());

    // A draft campaign has no run to pause.
    let err = harness.control.pause_campaign(draft).await.unwrap_err();
    assert!(matches!(err, DispatchError::StateConflict { .. }));

    harness.stop().await;
}

#[tokio::test]
async fn cancel_removes_unstarted_jobs_and_keeps_sent_recipients() {
    let harness = Harness::start();
    let (campaign_id, ids) = harness.seed_campaign(6).await;

    // First batch of two eligible now; the rest paced an hour apart.
    let options = SendOptions {
        batch_size: 2,
        delay_between_batches_secs: 3600,
        ..SendOptions::new("primary".into())
    };
    harness
        .dispatcher
        .queue_campaign(campaign_id, options, None)
        .await
        .unwrap();

    harness
        .transport
        .wait_for_count(2, Duration::from_secs(10))
        .await
        .unwrap();
    wait_until("first batch reconciled", || async {
        harness.queue.counts().completed == 2
    })
    .await;

    let receipt = harness.control.cancel_campaign(campaign_id).await.unwrap();
    assert_eq!(receipt.cancelled_jobs, 4);

    let campaign = harness.store.campaign(campaign_id).await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::Cancelled);

    // Recipients already sent before cancellation remain Sent; the
    // cancelled jobs' recipients revert to Pending.
    let sent = harness
        .store
        .count_in_status(campaign_id, RecipientStatus::Sent)
        .await
        .unwrap();
    let pending = harness
        .store
        .count_in_status(campaign_id, RecipientStatus::Pending)
        .await
        .unwrap();
    assert_eq!(sent, 2);
    assert_eq!(pending, 4);
    assert_eq!(ids.len(), 6);

    // Nothing left for the workers.
    let counts = harness.queue.counts();
    assert_eq!(counts.waiting + counts.delayed, 0);

    // Cancelling again is a no-op reporting zero jobs.
    let receipt = harness.control.cancel_campaign(campaign_id).await.unwrap();
    assert_eq!(receipt.cancelled_jobs, 0);

    harness.stop().await;
}

#[tokio::test]
async fn cancel_applies_to_scheduled_campaigns() {
    let harness = Harness::start();
    let (campaign_id, _) = harness.seed_campaign(3).await;

    let at = chrono::Utc::now() + chrono::Duration::hours(1);
    let receipt = harness
        .dispatcher
        .queue_campaign(campaign_id, harness.options(), Some(at))
        .await
        .unwrap();
    assert!(receipt.scheduled);

    let receipt = harness.control.cancel_campaign(campaign_id).await.unwrap();
    assert_eq!(receipt.cancelled_jobs, 0);
    assert_eq!(
        harness.store.campaign(campaign_id).await.unwrap().status,
        CampaignStatus::Cancelled
    );

    harness.stop().await;
}

#[tokio::test]
async fn retry_failed_recipients_requeues_only_failures() {
    let harness = Harness::start();
    let (campaign_id, ids) = harness.seed_campaign(3).await;

    harness.transport.fail_permanent("user2@example.com");
    harness
        .dispatcher
        .queue_campaign(campaign_id, harness.options(), None)
        .await
        .unwrap();

    wait_until("campaign completed with one failure", || async {
        let campaign = harness.store.campaign(campaign_id).await.unwrap();
        campaign.status == CampaignStatus::Completed && campaign.stats.failed == 1
    })
    .await;

    // The provider recovered; retry just the failed recipient.
    harness.transport.clear_failures("user2@example.com");
    let receipt = harness
        .control
        .retry_failed_recipients(campaign_id)
        .await
        .unwrap();
    assert_eq!(receipt.retried_count, 1);

    wait_until("failed recipient finally sent", || async {
        harness.store.recipient(ids[2]).await.unwrap().status == RecipientStatus::Sent
    })
    .await;
    wait_until("campaign completed again", || async {
        harness.store.campaign(campaign_id).await.unwrap().status == CampaignStatus::Completed
    })
    .await;

    // The retry cleared the stale error message.
    let recipient = harness.store.recipient(ids[2]).await.unwrap();
    assert!(recipient.error_message.is_none());

    // With no new failures, a second retry finds nothing.
    let receipt = harness
        .control
        .retry_failed_recipients(campaign_id)
        .await
        .unwrap();
    assert_eq!(receipt.retried_count, 0);

    harness.stop().await;
}
