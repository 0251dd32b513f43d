//! Retention (C9): bounds each channel to its configured `keep_count` of
//! completed episodes, deleting files and soft-deleting rows for the rest.

use tracing::{info, warn};

use crate::errors::CoreResult;
use crate::metrics::Metrics;
use crate::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct RetentionService {
    store: Store,
    metrics: Arc<Metrics>,
}

impl RetentionService {
    pub fn new(store: Store, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Runs one retention pass for `channel_id`. Never touches non-completed
    /// episodes, never deletes rows, never cascades across channels — only
    /// clears artifact paths/sizes and marks `deleted`.
    pub async fn apply(&self, channel_id: &str) -> CoreResult<()> {
        let channel = match self.store.get_channel(channel_id).await? {
            Some(c) => c,
            None => return Ok(()),
        };

        let over_retention = self
            .store
            .completed_episodes_beyond_keep_count(channel_id, channel.keep_count)
            .await?;
        if over_retention.is_empty() {
            return Ok(());
        }

        let mut deleted = 0u64;
        let mut bytes_freed = 0u64;
        for episode in over_retention {
            let mut freed = 0u64;
            if let Some(path) = &episode.audio_path {
                match tokio::fs::metadata(path).await {
                    Ok(meta) => freed += meta.len(),
                    Err(e) => warn!(episode_id = %episode.id, path, error = %e, "retention: audio file missing before delete"),
                }
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!(episode_id = %episode.id, path, error = %e, "retention: failed to delete audio file");
                }
            }
            if let Some(path) = &episode.video_path {
                match tokio::fs::metadata(path).await {
                    Ok(meta) => freed += meta.len(),
                    Err(e) => warn!(episode_id = %episode.id, path, error = %e, "retention: video file missing before delete"),
                }
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!(episode_id = %episode.id, path, error = %e, "retention: failed to delete video file");
                }
            }

            self.store
                .mark_episode_deleted_by_retention(&episode.id)
                .await?;
            deleted += 1;
            bytes_freed += freed;

            info!(
                channel_id,
                episode_id = %episode.id,
                bytes_freed = freed,
                "retention deleted episode"
            );
        }

        self.metrics.record_retention(deleted, bytes_freed);
        Ok(())
    }
}
