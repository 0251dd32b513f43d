//! End-to-end pipeline scenarios against an in-memory store, a tempdir for
//! artifacts, and the hand-written mock `Fetcher`/`Transcoder`.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use channelmirror::clients::testing::{FetcherStep, MockFetcher, MockTranscoder};
use channelmirror::config::TranscodeSettings;
use channelmirror::errors::{CoreError, ErrorKind};
use channelmirror::models::episode::EpisodeMetadata;
use channelmirror::models::{ChannelCreateRequest, ChannelFormat, EpisodeStatus};
use channelmirror::{ConcurrencyGate, Metrics, Pipeline, QueueService, RetentionService, Store};

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

fn episode_metadata(external_id: &str, published_at: chrono::DateTime<Utc>) -> EpisodeMetadata {
    EpisodeMetadata {
        external_id: external_id.to_string(),
        title: format!("Episode {external_id}"),
        description: None,
        thumbnail_url: None,
        duration_seconds: Some(120),
        published_at: Some(published_at),
    }
}

#[tokio::test]
async fn happy_path_audio_episode_completes_via_pipeline() {
    let store = Store::in_memory().await.unwrap();
    let channel = new_channel(&store, 3).await;
    let episode = store
        .create_episode(&channel.id, &episode_metadata("v1", Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap()))
        .await
        .unwrap();

    let metrics = Metrics::new();
    let gate = Arc::new(ConcurrencyGate::new(2));
    let retention = RetentionService::new(store.clone(), metrics.clone());
    let fetcher = Arc::new(MockFetcher::new());
    let transcoder = Arc::new(MockTranscoder::new());

    let download_dir = tempfile::tempdir().unwrap();
    let temp_dir = tempfile::tempdir().unwrap();

    let pipeline = Pipeline::new(
        store.clone(),
        fetcher,
        transcoder,
        gate,
        retention,
        metrics,
        TranscodeSettings::default(),
        download_dir.path().to_path_buf(),
        temp_dir.path().to_path_buf(),
    );

    let cancel = CancellationToken::new();
    let outcome = pipeline.run(&episode.id, None, &cancel).await.unwrap();
    assert!(outcome.success, "expected pipeline success, got {outcome:?}");

    let reloaded = store.get_episode(&episode.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, EpisodeStatus::Completed);
    assert!(reloaded.downloaded_at.is_some());
    let audio_path = reloaded.audio_path.expect("audio_path set on completion");
    assert!(reloaded.audio_size.unwrap_or(0) > 0);
    assert!(std::path::Path::new(&audio_path).exists());

    // Nothing left in the temp source directory.
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn retention_trims_beyond_keep_count() {
    let store = Store::in_memory().await.unwrap();
    let channel = new_channel(&store, 1).await;
    let metrics = Metrics::new();
    let retention = RetentionService::new(store.clone(), metrics.clone());
    let download_dir = tempfile::tempdir().unwrap();

    let older = store
        .create_episode(&channel.id, &episode_metadata("v0", Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap()))
        .await
        .unwrap();
    let newer = store
        .create_episode(&channel.id, &episode_metadata("v1", Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap()))
        .await
        .unwrap();

    let older_path = download_dir.path().join("v0.mp3");
    std::fs::write(&older_path, b"old-audio").unwrap();
    let newer_path = download_dir.path().join("v1.mp3");
    std::fs::write(&newer_path, b"new-audio").unwrap();

    store
        .finalize_episode(&older.id, Some(older_path.to_str().unwrap()), Some(9), None, None)
        .await
        .unwrap();
    store
        .finalize_episode(&newer.id, Some(newer_path.to_str().unwrap()), Some(9), None, None)
        .await
        .unwrap();

    retention.apply(&channel.id).await.unwrap();

    let older_reloaded = store.get_episode(&older.id).await.unwrap().unwrap();
    assert_eq!(older_reloaded.status, EpisodeStatus::Deleted);
    assert!(older_reloaded.audio_path.is_none());
    assert!(older_reloaded.audio_size.is_none());
    assert!(!older_path.exists(), "retention should have removed the older file");

    let newer_reloaded = store.get_episode(&newer.id).await.unwrap().unwrap();
    assert_eq!(newer_reloaded.status, EpisodeStatus::Completed);
    assert!(newer_path.exists(), "the kept episode's file must survive");
}

#[tokio::test]
async fn cancellation_during_fetch_returns_episode_to_pending() {
    let store = Store::in_memory().await.unwrap();
    let channel = new_channel(&store, 3).await;
    let episode = store
        .create_episode(&channel.id, &episode_metadata("v2", Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()))
        .await
        .unwrap();

    let metrics = Metrics::new();
    let gate = Arc::new(ConcurrencyGate::new(2));
    let retention = RetentionService::new(store.clone(), metrics.clone());
    let fetcher = Arc::new(
        MockFetcher::new().with_media_results(vec![FetcherStep::Err(CoreError::Cancelled)]),
    );
    let transcoder = Arc::new(MockTranscoder::new());

    let download_dir = tempfile::tempdir().unwrap();
    let temp_dir = tempfile::tempdir().unwrap();

    let pipeline = Pipeline::new(
        store.clone(),
        fetcher,
        transcoder,
        gate,
        retention,
        metrics,
        TranscodeSettings::default(),
        download_dir.path().to_path_buf(),
        temp_dir.path().to_path_buf(),
    );

    let cancel = CancellationToken::new();
    let outcome = pipeline.run(&episode.id, None, &cancel).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Cancelled));

    let reloaded = store.get_episode(&episode.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, EpisodeStatus::Pending);
    assert_eq!(reloaded.retry_count, 0);
    assert!(reloaded.audio_path.is_none());

    assert_eq!(
        std::fs::read_dir(download_dir.path()).unwrap().count(),
        0,
        "no artifact should have been produced"
    );
    assert_eq!(
        std::fs::read_dir(temp_dir.path()).unwrap().count(),
        0,
        "temp file must be cleaned up on cancellation"
    );
}

#[tokio::test]
async fn enqueueing_twice_for_the_same_episode_conflicts() {
    let store = Store::in_memory().await.unwrap();
    let channel = new_channel(&store, 3).await;
    let episode = store
        .create_episode(&channel.id, &episode_metadata("v1", Utc::now()))
        .await
        .unwrap();
    let metrics = Metrics::new();
    let queue = QueueService::new(store.clone(), metrics);

    queue.enqueue_default_priority(&episode.id).await.unwrap();
    let second = queue.enqueue_default_priority(&episode.id).await;
    assert!(matches!(second, Err(CoreError::Conflict { .. })));
}
