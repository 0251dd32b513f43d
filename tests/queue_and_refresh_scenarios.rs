//! Queue retry/terminal-failure transitions and refresh-service scenarios.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use channelmirror::clients::testing::{FetcherStep, MockFetcher};
use channelmirror::clients::FetchedItem;
use channelmirror::errors::ErrorKind;
use channelmirror::models::episode::EpisodeMetadata;
use channelmirror::models::{ChannelCreateRequest, ChannelFormat, EpisodeStatus, QueueItemStatus};
use channelmirror::{AdminService, ConcurrencyGate, Metrics, QueueService, RefreshService, Store};

async fn new_channel(store: &Store, keep_count: i64) -> channelmirror::models::Channel {
    store
        .create_channel(ChannelCreateRequest {
            source_url: "https://example.com/channel".to_string(),
            title: "Test Channel".to_string(),
            description: None,
            thumbnail_url: None,
            keep_count,
            format: ChannelFormat::Audio,
            enabled: true,
        })
        .await
        .unwrap()
}

fn episode_metadata(external_id: &str) -> EpisodeMetadata {
    EpisodeMetadata {
        external_id: external_id.to_string(),
        title: format!("Episode {external_id}"),
        description: None,
        thumbnail_url: None,
        duration_seconds: Some(60),
        published_at: Some(Utc::now()),
    }
}

#[tokio::test]
async fn network_failure_schedules_a_retry_then_succeeds() {
    let store = Store::in_memory().await.unwrap();
    let channel = new_channel(&store, 3).await;
    let episode = store
        .create_episode(&channel.id, &episode_metadata("v1"))
        .await
        .unwrap();
    let queue = QueueService::new(store.clone(), Metrics::new());

    let enqueued = queue.enqueue_default_priority(&episode.id).await.unwrap();
    let claimed = queue.claim(&enqueued.id).await.unwrap();
    assert_eq!(claimed.status, QueueItemStatus::InProgress);

    let before_retry = Utc::now();
    let retried = queue
        .mark_failed(&claimed.id, ErrorKind::Network, "connection reset")
        .await
        .unwrap();
    assert_eq!(retried.status, QueueItemStatus::Retrying);
    assert_eq!(retried.attempts, 1);
    let next_retry_at = retried.next_retry_at.expect("retrying item has a next_retry_at");
    assert!(next_retry_at >= before_retry + chrono::Duration::seconds(15));
    assert!(next_retry_at <= before_retry + chrono::Duration::seconds(46));

    // Worker reclaims after the delay and this attempt succeeds.
    let reclaimed = queue.claim(&retried.id).await.unwrap();
    let completed = queue.mark_completed(&reclaimed.id).await.unwrap();
    assert_eq!(completed.status, QueueItemStatus::Completed);
    assert_eq!(completed.attempts, 1, "a successful attempt does not bump attempts");
}

#[tokio::test]
async fn private_item_fails_terminally_and_admin_retry_reopens_it() {
    let store = Store::in_memory().await.unwrap();
    let channel = new_channel(&store, 3).await;
    let episode = store
        .create_episode(&channel.id, &episode_metadata("v1"))
        .await
        .unwrap();
    let metrics = Metrics::new();
    let queue = QueueService::new(store.clone(), metrics.clone());

    let enqueued = queue.enqueue_default_priority(&episode.id).await.unwrap();
    queue.claim(&enqueued.id).await.unwrap();
    let failed = queue
        .mark_failed(&enqueued.id, ErrorKind::PrivateOrForbidden, "this video is private")
        .await
        .unwrap();
    assert_eq!(failed.status, QueueItemStatus::Failed);
    assert_eq!(failed.attempts, 1);

    store
        .mark_episode_failed(&episode.id, "this video is private")
        .await
        .unwrap();

    let fetcher = Arc::new(MockFetcher::new());
    let refresh = Arc::new(RefreshService::new(store.clone(), queue.clone(), fetcher, metrics.clone()));
    let gate = Arc::new(ConcurrencyGate::new(2));
    let admin = AdminService::new(
        store.clone(),
        queue.clone(),
        refresh,
        gate,
        metrics,
        std::path::PathBuf::from("./downloads"),
    );

    let retried_episode = admin.retry_episode(&episode.id).await.unwrap();
    assert_eq!(retried_episode.status, EpisodeStatus::Pending);
    assert_eq!(retried_episode.retry_count, 0);
    assert!(retried_episode.last_error.is_none());

    let new_item = queue
        .queue_item_by_episode(&episode.id)
        .await
        .unwrap()
        .expect("admin retry enqueues a fresh queue item");
    assert_eq!(new_item.status, QueueItemStatus::Pending);
    assert_ne!(new_item.id, enqueued.id);
}

#[tokio::test]
async fn duplicate_refresh_discovers_nothing_new() {
    let store = Store::in_memory().await.unwrap();
    let channel = new_channel(&store, 3).await;
    let metrics = Metrics::new();
    let queue = QueueService::new(store.clone(), metrics.clone());

    let items = vec![
        FetchedItem {
            external_id: "v1".to_string(),
            title: "Video 1".to_string(),
            description: None,
            duration_seconds: Some(100),
            published_at: Some(Utc::now()),
            thumbnail_url: None,
        },
        FetchedItem {
            external_id: "v2".to_string(),
            title: "Video 2".to_string(),
            description: None,
            duration_seconds: Some(100),
            published_at: Some(Utc::now() - chrono::Duration::seconds(60)),
            thumbnail_url: None,
        },
        FetchedItem {
            external_id: "v3".to_string(),
            title: "Video 3".to_string(),
            description: None,
            duration_seconds: Some(100),
            published_at: Some(Utc::now() - chrono::Duration::seconds(120)),
            thumbnail_url: None,
        },
    ];
    let fetcher = Arc::new(
        MockFetcher::new().with_list_results(vec![
            FetcherStep::Items(items.clone()),
            FetcherStep::Items(items.clone()),
        ]),
    );
    let refresh = RefreshService::new(store.clone(), queue.clone(), fetcher, metrics);
    let cancel = CancellationToken::new();

    let first = refresh.refresh_channel(&channel.id, &cancel).await.unwrap();
    assert_eq!(first.videos_found, 3);
    assert_eq!(first.episodes_queued, 3);

    let before_second = store.get_channel(&channel.id).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let second = refresh.refresh_channel(&channel.id, &cancel).await.unwrap();
    assert_eq!(second.videos_found, 3);
    assert_eq!(second.episodes_queued, 0, "no new episodes on an unchanged upstream listing");

    let after_second = store.get_channel(&channel.id).await.unwrap().unwrap();
    assert!(after_second.last_refresh_at.unwrap() >= before_second.last_refresh_at.unwrap());
}
