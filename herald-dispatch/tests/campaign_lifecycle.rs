//! End-to-end dispatch tests: queueing, sending, retrying, failing.

mod support;

use std::time::Duration;

use herald_common::{CampaignStatus, RecipientStatus};
use herald_dispatch::DispatchError;
use herald_queue::Job;
use herald_store::Store;
use support::{Harness, wait_until};

#[tokio::test]
async fn every_recipient_is_sent_and_the_campaign_completes() {
    let harness = Harness::start();
    let (campaign_id, ids) = harness.seed_campaign(12).await;

    let receipt = harness
        .dispatcher
        .queue_campaign(campaign_id, harness.options(), None)
        .await
        .unwrap();
    assert_eq!(receipt.queued_count, 12);

    harness
        .transport
        .wait_for_count(12, Duration::from_secs(10))
        .await
        .unwrap();
    wait_until("campaign completed", || async {
        harness.store.campaign(campaign_id).await.unwrap().status == CampaignStatus::Completed
    })
    .await;

    for id in ids {
        let recipient = harness.store.recipient(id).await.unwrap();
        assert_eq!(recipient.status, RecipientStatus::Sent);
        assert!(recipient.sent_at.is_some());
        assert!(recipient.error_message.is_none());
    }

    let campaign = harness.store.campaign(campaign_id).await.unwrap();
    assert_eq!(campaign.stats.queued, 12);
    assert_eq!(campaign.stats.sent, 12);
    assert_eq!(campaign.stats.failed, 0);

    let counts = harness.queue.counts();
    assert_eq!(counts.completed, 12);
    assert_eq!(counts.outstanding(), 0);

    // Merge tags were rendered per recipient.
    let sent = harness.transport.sent();
    assert!(sent.iter().any(|email| email.subject == "Hi User 0"));
    assert!(
        sent.iter()
            .any(|email| email.body == "Hello user3@example.com")
    );

    harness.stop().await;
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let harness = Harness::start();
    let (campaign_id, ids) = harness.seed_campaign(3).await;

    // Two scripted failures, then success on the third attempt.
    harness.transport.fail_transient("user0@example.com", 2);

    harness
        .dispatcher
        .queue_campaign(campaign_id, harness.options(), None)
        .await
        .unwrap();

    harness
        .transport
        .wait_for_count(3, Duration::from_secs(10))
        .await
        .unwrap();
    wait_until("campaign completed", || async {
        harness.store.campaign(campaign_id).await.unwrap().status == CampaignStatus::Completed
    })
    .await;

    assert_eq!(harness.transport.attempts_for("user0@example.com"), 3);
    let recipient = harness.store.recipient(ids[0]).await.unwrap();
    assert_eq!(recipient.status, RecipientStatus::Sent);

    harness.stop().await;
}

#[tokio::test]
async fn permanent_failure_is_recorded_without_retry() {
    let harness = Harness::start();
    let (campaign_id, ids) = harness.seed_campaign(3).await;

    harness.transport.fail_permanent("user1@example.com");

    harness
        .dispatcher
        .queue_campaign(campaign_id, harness.options(), None)
        .await
        .unwrap();

    wait_until("campaign completed", || async {
        harness.store.campaign(campaign_id).await.unwrap().status == CampaignStatus::Completed
    })
    .await;

    // Exactly one attempt; no retry for a hard rejection.
    assert_eq!(harness.transport.attempts_for("user1@example.com"), 1);

    let failed = harness.store.recipient(ids[1]).await.unwrap();
    assert_eq!(failed.status, RecipientStatus::Failed);
    assert!(failed.failed_at.is_some());
    assert!(
        failed
            .error_message
            .as_deref()
            .is_some_and(|message| message.contains("permanent"))
    );

    let campaign = harness.store.campaign(campaign_id).await.unwrap();
    assert_eq!(campaign.stats.sent, 2);
    assert_eq!(campaign.stats.failed, 1);

    let counts = harness.queue.counts();
    assert_eq!(counts.completed, 2);
    assert_eq!(counts.failed, 1);

    harness.stop().await;
}

#[tokio::test]
async fn exhausted_retries_escalate_to_permanent_failure() {
    let harness = Harness::start();
    let (campaign_id, ids) = harness.seed_campaign(1).await;

    // More scripted failures than the pool will ever attempt.
    harness.transport.fail_transient("user0@example.com", 10);

    harness
        .dispatcher
        .queue_campaign(campaign_id, harness.options(), None)
        .await
        .unwrap();

    wait_until("recipient failed", || async {
        harness.store.recipient(ids[0]).await.unwrap().status == RecipientStatus::Failed
    })
    .await;

    // max_attempts = 3: the initial attempt plus two retries.
    assert_eq!(harness.transport.attempts_for("user0@example.com"), 3);

    let recipient = harness.store.recipient(ids[0]).await.unwrap();
    assert!(
        recipient
            .error_message
            .as_deref()
            .is_some_and(|message| message.contains("retries exhausted"))
    );

    harness.stop().await;
}

#[tokio::test]
async fn duplicate_job_execution_never_double_applies() {
    let harness = Harness::start();
    let (campaign_id, ids) = harness.seed_campaign(1).await;

    // Hold the workers while a duplicate job is planted.
    harness.status.pause();

    harness
        .dispatcher
        .queue_campaign(campaign_id, harness.options(), None)
        .await
        .unwrap();

    // Simulate at-least-once delivery handing out the same work twice.
    let options = harness.options();
    harness
        .queue
        .enqueue(Job::new(
            campaign_id,
            ids[0],
            options.smtp_config_id.clone(),
            "Hi {{name}}",
            "Hello {{email}}",
            options.priority,
            0,
        ))
        .await
        .unwrap();

    harness.status.resume();

    // Both jobs must drain; only one send may happen.
    wait_until("both jobs drained", || async {
        harness.queue.counts().completed == 2
    })
    .await;

    assert_eq!(harness.transport.attempts_for("user0@example.com"), 1);
    assert_eq!(harness.transport.sent_count(), 1);
    let recipient = harness.store.recipient(ids[0]).await.unwrap();
    assert_eq!(recipient.status, RecipientStatus::Sent);

    harness.stop().await;
}

#[tokio::test]
async fn dispatching_twice_is_a_state_conflict() {
    let harness = Harness::start();
    let (campaign_id, _) = harness.seed_campaign(2).await;

    harness
        .dispatcher
        .queue_campaign(campaign_id, harness.options(), None)
        .await
        .unwrap();

    let err = harness
        .dispatcher
        .queue_campaign(campaign_id, harness.options(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::StateConflict { .. }));

    harness.stop().await;
}
